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

use std::cell::Cell;

use super::{DeviceInfoProvider, RdkDiagProvider};

/// Provider returning fixed strings. Counts how many values were produced.
#[derive(Debug, Clone, Default)]
pub struct StaticDataProvider {
    pub system_id: String,
    pub model_number: String,
    pub serial_number: String,
    pub firmware_revision: String,
    pub hardware_revision: String,
    pub software_revision: String,
    pub manufacturer_name: String,
    pub device_status: String,
    pub firmware_download_status: String,
    pub webpa_status: String,
    pub wifi_radio1_status: String,
    pub wifi_radio2_status: String,
    pub rf_status: String,
    reads: Cell<usize>,
}

impl StaticDataProvider {
    /// Every field set to `value`.
    pub fn uniform(value: &str) -> Self {
        let v = value.to_string();
        Self {
            system_id: v.clone(),
            model_number: v.clone(),
            serial_number: v.clone(),
            firmware_revision: v.clone(),
            hardware_revision: v.clone(),
            software_revision: v.clone(),
            manufacturer_name: v.clone(),
            device_status: v.clone(),
            firmware_download_status: v.clone(),
            webpa_status: v.clone(),
            wifi_radio1_status: v.clone(),
            wifi_radio2_status: v.clone(),
            rf_status: v,
            reads: Cell::new(0),
        }
    }

    /// Number of values handed out so far.
    pub fn reads(&self) -> usize {
        self.reads.get()
    }

    fn read(&self, value: &str) -> String {
        self.reads.set(self.reads.get() + 1);
        value.to_string()
    }
}

impl DeviceInfoProvider for StaticDataProvider {
    fn system_id(&self) -> String {
        self.read(&self.system_id)
    }

    fn model_number(&self) -> String {
        self.read(&self.model_number)
    }

    fn serial_number(&self) -> String {
        self.read(&self.serial_number)
    }

    fn firmware_revision(&self) -> String {
        self.read(&self.firmware_revision)
    }

    fn hardware_revision(&self) -> String {
        self.read(&self.hardware_revision)
    }

    fn software_revision(&self) -> String {
        self.read(&self.software_revision)
    }

    fn manufacturer_name(&self) -> String {
        self.read(&self.manufacturer_name)
    }
}

impl RdkDiagProvider for StaticDataProvider {
    fn device_status(&self) -> String {
        self.read(&self.device_status)
    }

    fn firmware_download_status(&self) -> String {
        self.read(&self.firmware_download_status)
    }

    fn webpa_status(&self) -> String {
        self.read(&self.webpa_status)
    }

    fn wifi_radio1_status(&self) -> String {
        self.read(&self.wifi_radio1_status)
    }

    fn wifi_radio2_status(&self) -> String {
        self.read(&self.wifi_radio2_status)
    }

    fn rf_status(&self) -> String {
        self.read(&self.rf_status)
    }
}
