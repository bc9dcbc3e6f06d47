// Copyright 2026 bleconfd developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! BLE beacon, GATT listener and the per-connection transport bridge.

pub mod advertising;
pub mod att;
pub mod beacon;
pub mod ble_constants;
pub mod catalog;
pub mod frame_queue;
pub mod gatt_server;
pub mod hci;
pub mod session;

pub use beacon::{BeaconController, Radio};
pub use gatt_server::{GattServer, TransportError};
pub use hci::HciRadio;
pub use session::{GattSession, SessionSlot, SessionState};
