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

//! The two read-only diagnostic services published to every peer.

use tracing::{debug, info};
use uuid::Uuid;

use super::att::{properties, AttributeDatabase, DatabaseError};
use super::ble_constants::{
    device_info, rdk_diag, uuid16, DEVICE_INFO_NUM_HANDLES, DEVICE_INFO_SERVICE,
    RDK_DIAG_NUM_HANDLES,
};
use crate::provider::{DeviceInfoProvider, RdkDiagProvider};

/// A read-only characteristic and its snapshotted value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDescriptor {
    pub uuid: Uuid,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattServiceDescriptor {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicDescriptor>,
    /// Capacity hint carried over from the service definition.
    pub num_handles: u16,
}

/// Device-Info and Rdk-Diagnostics services with values read once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCatalog {
    services: Vec<GattServiceDescriptor>,
}

fn characteristic(uuid: Uuid, value: String) -> CharacteristicDescriptor {
    CharacteristicDescriptor { uuid, value }
}

impl GattCatalog {
    /// Query every provider field exactly once.
    pub fn build(
        rdk_diag_uuid: u16,
        device_info_provider: &dyn DeviceInfoProvider,
        rdk_diag_provider: &dyn RdkDiagProvider,
    ) -> Self {
        let p = device_info_provider;
        let device_info = GattServiceDescriptor {
            uuid: uuid16(DEVICE_INFO_SERVICE),
            num_handles: DEVICE_INFO_NUM_HANDLES,
            characteristics: vec![
                characteristic(uuid16(device_info::SYSTEM_ID), p.system_id()),
                characteristic(uuid16(device_info::MODEL_NUMBER), p.model_number()),
                characteristic(uuid16(device_info::SERIAL_NUMBER), p.serial_number()),
                characteristic(uuid16(device_info::FIRMWARE_REVISION), p.firmware_revision()),
                characteristic(uuid16(device_info::HARDWARE_REVISION), p.hardware_revision()),
                characteristic(uuid16(device_info::SOFTWARE_REVISION), p.software_revision()),
                characteristic(uuid16(device_info::MANUFACTURER_NAME), p.manufacturer_name()),
            ],
        };

        let r = rdk_diag_provider;
        let rdk_diag = GattServiceDescriptor {
            uuid: uuid16(rdk_diag_uuid),
            num_handles: RDK_DIAG_NUM_HANDLES,
            characteristics: vec![
                characteristic(rdk_diag::DEVICE_STATUS, r.device_status()),
                characteristic(rdk_diag::FIRMWARE_DOWNLOAD_STATUS, r.firmware_download_status()),
                characteristic(rdk_diag::WEBPA_STATUS, r.webpa_status()),
                characteristic(rdk_diag::WIFI_RADIO1_STATUS, r.wifi_radio1_status()),
                characteristic(rdk_diag::WIFI_RADIO2_STATUS, r.wifi_radio2_status()),
                characteristic(rdk_diag::RF_STATUS, r.rf_status()),
            ],
        };

        Self {
            services: vec![device_info, rdk_diag],
        }
    }

    pub fn services(&self) -> &[GattServiceDescriptor] {
        &self.services
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn characteristic_count(&self) -> usize {
        self.services.iter().map(|s| s.characteristics.len()).sum()
    }

    /// Append both services to `db` as read-only attributes.
    pub fn populate(&self, db: &mut AttributeDatabase) -> Result<(), DatabaseError> {
        for service in &self.services {
            let handle = db.add_primary_service(service.uuid)?;
            debug!("service {} at handle 0x{:04x}", service.uuid, handle);
            for c in &service.characteristics {
                db.add_characteristic(c.uuid, properties::READ, c.value.as_bytes().to_vec())?;
                info!("setting GATT attr: {} to {}", c.uuid, c.value);
            }
        }
        Ok(())
    }
}
