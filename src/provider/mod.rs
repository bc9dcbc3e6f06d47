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

//! Sources for the values published in the diagnostic GATT services.
//!
//! The session reads every field once when it builds its attribute database,
//! so implementations may do blocking file or process I/O.

pub mod fixed;
pub mod pi;

pub use fixed::StaticDataProvider;
pub use pi::PlatformDataProvider;

/// Values for the Device Information service.
pub trait DeviceInfoProvider {
    fn system_id(&self) -> String;
    fn model_number(&self) -> String;
    fn serial_number(&self) -> String;
    fn firmware_revision(&self) -> String;
    fn hardware_revision(&self) -> String;
    fn software_revision(&self) -> String;
    fn manufacturer_name(&self) -> String;
}

/// Values for the RDK diagnostics service.
pub trait RdkDiagProvider {
    fn device_status(&self) -> String;
    fn firmware_download_status(&self) -> String;
    fn webpa_status(&self) -> String;
    fn wifi_radio1_status(&self) -> String;
    fn wifi_radio2_status(&self) -> String;
    fn rf_status(&self) -> String;
}
