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

//! Beacon controller: one ordered pass that leaves the radio advertising.

use std::time::Duration;
use tracing::{info, warn};

use super::advertising::{
    advertising_command, BeaconIds, InstanceId, RawHciCommand, OGF_LE_CTL, SCAN_RESPONSE_COMMAND,
};
use super::hci::{AdapterInfo, HciError, HciEvent, REQUEST_TIMEOUT};

const OGF_HOST_CTL: u8 = 0x03;
const OCF_WRITE_LOCAL_NAME: u16 = 0x0013;
const OCF_READ_LOCAL_NAME: u16 = 0x0014;
const OCF_WRITE_CLASS_OF_DEV: u16 = 0x0024;
const OCF_LE_SET_ADVERTISING_PARAMETERS: u16 = 0x0006;
const OCF_LE_SET_ADVERTISE_ENABLE: u16 = 0x000a;

const LOCAL_NAME_LEN: usize = 248;
const LOCAL_NAME_TIMEOUT: Duration = Duration::from_millis(2000);

/// Class of device advertised by the daemon.
pub const CLASS_OF_DEVICE: u32 = 0x3a0430;

/// Fixed advertising interval (units of 0.625 ms).
const ADVERTISING_INTERVAL: u16 = 0x0800;
/// All three advertising channels.
const ADVERTISING_CHANNEL_MAP: u8 = 0x07;

/// Operations the beacon needs from a Bluetooth controller.
pub trait Radio {
    /// First adapter reported UP by the kernel.
    fn first_available_route(&self) -> Result<u16, HciError>;

    fn device_info(&self, dev: u16) -> Result<AdapterInfo, HciError>;

    fn down(&self, dev: u16) -> Result<(), HciError>;

    /// Bring the adapter up. An already-running adapter surfaces as `EALREADY`.
    fn up(&self, dev: u16) -> Result<(), HciError>;

    /// Issue a command and wait for its Command Complete return parameters.
    fn request(
        &self,
        dev: u16,
        ogf: u8,
        ocf: u16,
        params: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, HciError>;

    /// Write a raw command and read back the next event.
    fn raw_command(&self, dev: u16, command: &RawHciCommand) -> Result<HciEvent, HciError>;
}

/// Beacon settings, read once from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconConfiguration {
    pub device_name: String,
    /// Adapter index, or -1 for the first available route.
    pub hci_device_id: i32,
    pub ids: BeaconIds,
}

/// What the radio ended up advertising.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingState {
    pub dev_id: u16,
    pub address: String,
    pub instance: InstanceId,
    pub local_name: String,
}

pub struct BeaconController<R> {
    radio: R,
}

impl<R: Radio> BeaconController<R> {
    pub fn new(radio: R) -> Self {
        Self { radio }
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Run the full sequence: down, up, disable advertising, class, payload,
    /// scan response, enable advertising, local name.
    pub fn start(&self, config: &BeaconConfiguration) -> Result<AdvertisingState, HciError> {
        let dev = self.resolve_device(config.hci_device_id)?;

        let adapter = self.radio.device_info(dev)?;
        let address = adapter.address_string();
        info!("bluetooth mac: {}", address);
        let instance = InstanceId::from_adapter_address(adapter.address);

        self.down(dev)?;
        self.up(dev)?;
        self.disable_advertising(dev)?;
        self.set_class(dev, CLASS_OF_DEVICE);

        let payload = advertising_command(&config.ids, &instance).to_string();
        info!("hcitool cmd {}", payload);
        self.send_advertising_payload(dev, &RawHciCommand::parse(&payload)?)?;
        self.send_advertising_payload(dev, &RawHciCommand::parse(SCAN_RESPONSE_COMMAND)?)?;

        self.enable_advertising(dev)?;
        let local_name = self.set_local_name(dev, &config.device_name)?;

        Ok(AdvertisingState {
            dev_id: dev,
            address,
            instance,
            local_name,
        })
    }

    pub fn resolve_device(&self, hci_device_id: i32) -> Result<u16, HciError> {
        if hci_device_id < 0 {
            let dev = self.radio.first_available_route()?;
            info!("using first available adapter hci{}", dev);
            Ok(dev)
        } else {
            u16::try_from(hci_device_id).map_err(|_| HciError::NoRoute)
        }
    }

    pub fn down(&self, dev: u16) -> Result<(), HciError> {
        self.radio.down(dev)?;
        info!("hci{} down", dev);
        Ok(())
    }

    pub fn up(&self, dev: u16) -> Result<(), HciError> {
        match self.radio.up(dev) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(libc::EALREADY) => {
                info!("hci{} already up", dev);
            }
            Err(e) => return Err(e),
        }
        info!("hci{} up", dev);
        Ok(())
    }

    pub fn disable_advertising(&self, dev: u16) -> Result<(), HciError> {
        let status = self.advertise_enable(dev, false)?;
        if status != 0 {
            // Prior state is unknown at startup; advertising may already be off.
            warn!("LE set advertise enable on hci{} returned status {}", dev, status);
        }
        Ok(())
    }

    /// Class of device is cosmetic, so failure only warns.
    pub fn set_class(&self, dev: u16, class: u32) {
        let bytes = class.to_le_bytes();
        match self.radio.request(
            dev,
            OGF_HOST_CTL,
            OCF_WRITE_CLASS_OF_DEV,
            &bytes[..3],
            REQUEST_TIMEOUT,
        ) {
            Ok(ret) if ret.first().copied().unwrap_or(0) != 0 => {
                warn!("set class 0x{:06x} on hci{} returned status {}", class, dev, ret[0]);
            }
            Ok(_) => info!("hci{} class 0x{:06x}", dev, class),
            Err(e) => warn!("can't set class 0x{:06x} on hci{}: {}", class, dev, e),
        }
    }

    pub fn send_advertising_payload(
        &self,
        dev: u16,
        command: &RawHciCommand,
    ) -> Result<HciEvent, HciError> {
        self.radio.raw_command(dev, command)
    }

    pub fn enable_advertising(&self, dev: u16) -> Result<(), HciError> {
        let interval = ADVERTISING_INTERVAL.to_le_bytes();
        let mut params = Vec::with_capacity(15);
        params.extend_from_slice(&interval); // min
        params.extend_from_slice(&interval); // max
        params.push(0x00); // ADV_IND
        params.push(0x00); // own address public
        params.push(0x00); // direct address type
        params.extend_from_slice(&[0u8; 6]);
        params.push(ADVERTISING_CHANNEL_MAP);
        params.push(0x00); // no filter policy

        let status = command_status(self.radio.request(
            dev,
            OGF_LE_CTL,
            OCF_LE_SET_ADVERTISING_PARAMETERS,
            &params,
            REQUEST_TIMEOUT,
        ))?;
        if status != 0 {
            warn!("LE set advertising parameters on hci{} returned status {}", dev, status);
        }

        let status = self.advertise_enable(dev, true)?;
        if status != 0 {
            warn!("LE set advertise enable on hci{} returned status {}", dev, status);
        } else {
            info!("advertising enabled on hci{}", dev);
        }
        Ok(())
    }

    /// Write the local name and read it back. Returns the name as the
    /// controller reports it, control characters shown as `.`.
    pub fn set_local_name(&self, dev: u16, name: &str) -> Result<String, HciError> {
        let mut params = [0u8; LOCAL_NAME_LEN];
        let len = name.len().min(LOCAL_NAME_LEN);
        params[..len].copy_from_slice(&name.as_bytes()[..len]);

        let status = command_status(self.radio.request(
            dev,
            OGF_HOST_CTL,
            OCF_WRITE_LOCAL_NAME,
            &params,
            LOCAL_NAME_TIMEOUT,
        ))?;
        if status != 0 {
            return Err(HciError::Status {
                opcode: super::advertising::opcode(OGF_HOST_CTL, OCF_WRITE_LOCAL_NAME),
                status,
            });
        }

        let ret = self.radio.request(
            dev,
            OGF_HOST_CTL,
            OCF_READ_LOCAL_NAME,
            &[],
            LOCAL_NAME_TIMEOUT,
        )?;
        match ret.split_first() {
            Some((0, raw_name)) => {
                let local_name = printable_name(raw_name);
                info!("hci{} name: '{}'", dev, local_name);
                Ok(local_name)
            }
            Some((&status, _)) => Err(HciError::Status {
                opcode: super::advertising::opcode(OGF_HOST_CTL, OCF_READ_LOCAL_NAME),
                status,
            }),
            None => Err(HciError::ShortEvent(0)),
        }
    }

    fn advertise_enable(&self, dev: u16, enable: bool) -> Result<u8, HciError> {
        command_status(self.radio.request(
            dev,
            OGF_LE_CTL,
            OCF_LE_SET_ADVERTISE_ENABLE,
            &[u8::from(enable)],
            REQUEST_TIMEOUT,
        ))
    }
}

/// Status byte of a completed command. A failing Command Status is reported
/// as its status rather than an error.
fn command_status(result: Result<Vec<u8>, HciError>) -> Result<u8, HciError> {
    match result {
        Ok(ret) => ret.first().copied().ok_or(HciError::ShortEvent(0)),
        Err(HciError::Status { status, .. }) => Ok(status),
        Err(e) => Err(e),
    }
}

/// Local name bytes up to the first NUL, with control characters as `.`.
/// The name is UTF-8 on the wire, so other bytes are kept.
pub fn printable_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let shown: Vec<u8> = raw[..end]
        .iter()
        .map(|&b| if b < 0x20 || b == 0x7f { b'.' } else { b })
        .collect();
    String::from_utf8_lossy(&shown).into_owned()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Call {
        Route,
        Info(u16),
        Down(u16),
        Up(u16),
        Request { opcode: u16, params: Vec<u8> },
        Raw(String),
    }

    /// Records every call and answers like a healthy controller.
    pub(crate) struct RecordingRadio {
        pub calls: Mutex<Vec<Call>>,
        pub address: [u8; 6],
        pub up_errno: Option<i32>,
        pub enable_status: u8,
        pub name: Mutex<Vec<u8>>,
    }

    impl RecordingRadio {
        pub fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                address: [0x2c, 0xda, 0xa0, 0xeb, 0x27, 0xb8],
                up_errno: None,
                enable_status: 0,
                name: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }
    }

    impl Radio for RecordingRadio {
        fn first_available_route(&self) -> Result<u16, HciError> {
            self.calls.lock().push(Call::Route);
            Ok(2)
        }

        fn device_info(&self, dev: u16) -> Result<AdapterInfo, HciError> {
            self.calls.lock().push(Call::Info(dev));
            Ok(AdapterInfo {
                dev_id: dev,
                name: format!("hci{}", dev),
                address: self.address,
                flags: 1,
            })
        }

        fn down(&self, dev: u16) -> Result<(), HciError> {
            self.calls.lock().push(Call::Down(dev));
            Ok(())
        }

        fn up(&self, dev: u16) -> Result<(), HciError> {
            self.calls.lock().push(Call::Up(dev));
            match self.up_errno {
                Some(errno) => Err(HciError::Ioctl {
                    op: "init",
                    dev,
                    source: io::Error::from_raw_os_error(errno),
                }),
                None => Ok(()),
            }
        }

        fn request(
            &self,
            _dev: u16,
            ogf: u8,
            ocf: u16,
            params: &[u8],
            _timeout: Duration,
        ) -> Result<Vec<u8>, HciError> {
            let opcode = super::super::advertising::opcode(ogf, ocf);
            self.calls.lock().push(Call::Request {
                opcode,
                params: params.to_vec(),
            });
            match ocf {
                OCF_WRITE_LOCAL_NAME => {
                    *self.name.lock() = params.to_vec();
                    Ok(vec![0])
                }
                OCF_READ_LOCAL_NAME => {
                    let mut ret = vec![0];
                    ret.extend_from_slice(&self.name.lock());
                    Ok(ret)
                }
                OCF_LE_SET_ADVERTISE_ENABLE if params == [1] => Ok(vec![self.enable_status]),
                _ => Ok(vec![0]),
            }
        }

        fn raw_command(&self, _dev: u16, command: &RawHciCommand) -> Result<HciEvent, HciError> {
            self.calls.lock().push(Call::Raw(command.to_string()));
            let [lo, hi] = command.opcode().to_le_bytes();
            Ok(HciEvent {
                code: 0x0e,
                params: vec![0x01, lo, hi, 0x00],
            })
        }
    }

    fn config() -> BeaconConfiguration {
        BeaconConfiguration {
            device_name: "XPI-SETUP".to_string(),
            hci_device_id: 0,
            ids: BeaconIds {
                company_id: 0xFFFF,
                device_info_uuid: 0x1000,
                rdk_diag_uuid: 0x2000,
            },
        }
    }

    fn request_opcodes(calls: &[Call]) -> Vec<u16> {
        calls
            .iter()
            .filter_map(|c| match c {
                Call::Request { opcode, .. } => Some(*opcode),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_sequence_order() {
        let controller = BeaconController::new(RecordingRadio::new());
        let state = controller.start(&config()).unwrap();
        assert_eq!(state.address, "B8:27:EB:A0:DA:2C");
        assert_eq!(state.local_name, "XPI-SETUP");

        let calls = controller.radio().calls();
        assert_eq!(calls[0], Call::Info(0));
        assert_eq!(calls[1], Call::Down(0));
        assert_eq!(calls[2], Call::Up(0));
        assert_eq!(
            calls[3],
            Call::Request {
                opcode: 0x200a,
                params: vec![0x00]
            }
        );
        assert_eq!(
            calls[4],
            Call::Request {
                opcode: 0x0c24,
                params: vec![0x30, 0x04, 0x3a]
            }
        );
        assert!(matches!(&calls[5], Call::Raw(text) if text.starts_with("0x08 0x0008 1f 02 01 06")));
        assert_eq!(
            calls[6],
            Call::Raw("0x08 0x0006 a0 00 a0 00 00 00 00 00 00 00 00 00 00 07 00".to_string())
        );
        assert_eq!(
            request_opcodes(&calls[7..]),
            vec![0x2006, 0x200a, 0x0c13, 0x0c14]
        );
    }

    #[test]
    fn test_payload_uses_reversed_hardware_address() {
        let controller = BeaconController::new(RecordingRadio::new());
        controller.start(&config()).unwrap();
        let calls = controller.radio().calls();
        assert_eq!(
            calls[5],
            Call::Raw(
                "0x08 0x0008 1f 02 01 06 05 03 00 10 00 20 09 ff ff ff b8 27 eb a0 da 2c"
                    .to_string()
            )
        );
    }

    #[test]
    fn test_zero_address_uses_default_instance() {
        let mut radio = RecordingRadio::new();
        radio.address = [0; 6];
        let controller = BeaconController::new(radio);
        let state = controller.start(&config()).unwrap();
        assert_eq!(state.instance, InstanceId::DEFAULT);
    }

    #[test]
    fn test_advertising_parameters() {
        let controller = BeaconController::new(RecordingRadio::new());
        controller.enable_advertising(0).unwrap();
        let calls = controller.radio().calls();
        assert_eq!(
            calls[0],
            Call::Request {
                opcode: 0x2006,
                params: vec![0x00, 0x08, 0x00, 0x08, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x07, 0]
            }
        );
        assert_eq!(
            calls[1],
            Call::Request {
                opcode: 0x200a,
                params: vec![0x01]
            }
        );
    }

    #[test]
    fn test_up_already_enabled_is_success() {
        let mut radio = RecordingRadio::new();
        radio.up_errno = Some(libc::EALREADY);
        let controller = BeaconController::new(radio);
        assert!(controller.up(0).is_ok());
        assert!(controller.start(&config()).is_ok());
    }

    #[test]
    fn test_up_failure_is_fatal() {
        let mut radio = RecordingRadio::new();
        radio.up_errno = Some(libc::EIO);
        let controller = BeaconController::new(radio);
        assert!(controller.start(&config()).is_err());
        // Nothing after bring-up was attempted.
        assert_eq!(controller.radio().calls().last(), Some(&Call::Up(0)));
    }

    #[test]
    fn test_enable_status_is_warning() {
        let mut radio = RecordingRadio::new();
        radio.enable_status = 0x0c;
        let controller = BeaconController::new(radio);
        assert!(controller.enable_advertising(0).is_ok());
    }

    #[test]
    fn test_first_available_route() {
        let controller = BeaconController::new(RecordingRadio::new());
        let mut cfg = config();
        cfg.hci_device_id = -1;
        let state = controller.start(&cfg).unwrap();
        assert_eq!(state.dev_id, 2);
        assert_eq!(controller.radio().calls()[0], Call::Route);
    }

    #[test]
    fn test_sequence_is_repeatable() {
        let controller = BeaconController::new(RecordingRadio::new());
        let first = controller.start(&config()).unwrap();
        let first_calls = controller.radio().calls();
        controller.radio().calls.lock().clear();
        let second = controller.start(&config()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first_calls, controller.radio().calls());
    }

    #[test]
    fn test_printable_name() {
        assert_eq!(printable_name(b"XPI\x01SETUP\0\0garbage"), "XPI.SETUP");
        assert_eq!(printable_name(b""), "");
        assert_eq!(printable_name(b"a b"), "a b");
        assert_eq!(printable_name("Café\0".as_bytes()), "Café");
        assert_eq!(printable_name(b"tab\there\x7f"), "tab.here.");
        assert_eq!(printable_name(b"bad\xff"), "bad\u{fffd}");
    }
}
