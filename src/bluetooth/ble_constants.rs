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

//! BLE service and characteristic UUIDs for bleconfd.

use uuid::Uuid;

/// Bluetooth base UUID (`00000000-0000-1000-8000-00805f9b34fb`).
const BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit SIG-assigned UUID into its 128-bit form.
pub const fn uuid16(short: u16) -> Uuid {
    Uuid::from_u128(BASE_UUID | ((short as u128) << 96))
}

/// Return the 16-bit alias of a UUID if it lives in the Bluetooth base range.
pub fn short_form(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    let mask = !(0xFFFF_u128 << 96);
    if value & mask == BASE_UUID {
        Some((value >> 96) as u16)
    } else {
        None
    }
}

/// Device Information service (16-bit).
pub const DEVICE_INFO_SERVICE: u16 = 0x180a;

/// Device Information characteristics.
pub mod device_info {
    pub const SYSTEM_ID: u16 = 0x2a23;
    pub const MODEL_NUMBER: u16 = 0x2a24;
    pub const SERIAL_NUMBER: u16 = 0x2a25;
    pub const FIRMWARE_REVISION: u16 = 0x2a26;
    pub const HARDWARE_REVISION: u16 = 0x2a27;
    pub const SOFTWARE_REVISION: u16 = 0x2a28;
    pub const MANUFACTURER_NAME: u16 = 0x2a29;
}

/// RDK diagnostics characteristics. The service UUID itself comes from configuration.
pub mod rdk_diag {
    use uuid::Uuid;

    pub const DEVICE_STATUS: Uuid = Uuid::from_u128(0x1f113f2c_cc01_4f03_9c5c_4b273ed631bb);
    pub const FIRMWARE_DOWNLOAD_STATUS: Uuid =
        Uuid::from_u128(0x915f96a6_3788_4271_a7ea_6820e98896b8);
    pub const WEBPA_STATUS: Uuid = Uuid::from_u128(0x9d5d3aae_51e3_4767_a055_59febd71de9d);
    pub const WIFI_RADIO1_STATUS: Uuid = Uuid::from_u128(0x59a99d5a_3d2f_4265_af13_316c7c76b1f0);
    pub const WIFI_RADIO2_STATUS: Uuid = Uuid::from_u128(0x9d6cf473_4fa6_4868_bf2b_c310f38df0c8);
    pub const RF_STATUS: Uuid = Uuid::from_u128(0x91b9497e_634c_408a_9f77_8375b1461b8b);
}

/// RPC channel service UUID.
pub const RPC_SERVICE_UUID: Uuid = Uuid::from_u128(0x503553ca_eb90_11e8_ac5b_bb7e434023e8);

/// RPC inbox characteristic UUID (peer writes requests here).
/// Properties: Write, Write Without Response
pub const RPC_INBOX_UUID: Uuid = Uuid::from_u128(0x510c87c8_eb90_11e8_b3dc_17292c2ecc2d);

/// RPC poll characteristic UUID (doorbell notifications, reads drain the outgoing queue).
/// Properties: Read, Notify
pub const RPC_EPOLL_UUID: Uuid = Uuid::from_u128(0x5140f882_eb90_11e8_a835_13d2bd922d3f);

/// Record delimiter for the framed byte queues.
pub const RECORD_DELIMITER: u8 = 0x1e;

/// Handle-count capacity hints for the two catalog services.
pub const DEVICE_INFO_NUM_HANDLES: u16 = 30;
pub const RDK_DIAG_NUM_HANDLES: u16 = 31;

/// BLE configuration constants.
pub mod config {
    /// Default ATT MTU (minimum for all BLE devices).
    pub const DEFAULT_MTU: u16 = 23;

    /// Largest ATT MTU the server will accept.
    pub const SERVER_RX_MTU: u16 = 517;

    /// Doorbell timer period.
    pub const NOTIFY_INTERVAL_MS: u64 = 1000;

    /// Default bound on queued outgoing bytes.
    pub const OUTGOING_QUEUE_LIMIT: usize = 64 * 1024;

    /// Fixed L2CAP channel id of the ATT bearer.
    pub const ATT_CID: u16 = 4;

    /// Listen backlog for the L2CAP socket.
    pub const LISTEN_BACKLOG: u32 = 2;
}
