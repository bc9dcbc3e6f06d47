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

//! Advertising payload layout and the textual raw-HCI command form.
//!
//! The radio is driven with commands written as `"<ogf> <ocf> <byte> <byte> ..."`
//! hex text. The payload builder renders into that form and the beacon parses it
//! back before issuing it, so one code path carries every raw command.

use std::fmt;
use std::str::FromStr;

use super::hci::HciError;

/// OGF of LE controller commands.
pub const OGF_LE_CTL: u8 = 0x08;

/// LE Set Advertising Data.
pub const OCF_LE_SET_ADVERTISING_DATA: u16 = 0x0008;

/// Fixed follow-up command issued right after the advertising payload.
pub const SCAN_RESPONSE_COMMAND: &str =
    "0x08 0x0006 A0 00 A0 00 00 00 00 00 00 00 00 00 00 07 00";

/// Largest OGF/OCF values representable in an HCI opcode.
const MAX_OGF: u32 = 0x3f;
const MAX_OCF: u32 = 0x3ff;

/// Six-byte identity embedded at the end of the advertising payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceId([u8; 6]);

impl InstanceId {
    /// Used when the controller reports no fixed hardware address.
    pub const DEFAULT: InstanceId = InstanceId([0x00, 0x00, 0x00, 0x00, 0x00, 0x01]);

    /// Derive the instance id from the adapter's address bytes (as stored by the
    /// kernel, least significant first). An all-zero address means the
    /// controller assigns its address dynamically, so the default is used.
    pub fn from_adapter_address(address: [u8; 6]) -> Self {
        if address == [0u8; 6] {
            Self::DEFAULT
        } else {
            Self(address)
        }
    }

    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }

    /// Bytes in payload order: byte 5 first.
    pub fn reversed(&self) -> [u8; 6] {
        let mut bytes = self.0;
        bytes.reverse();
        bytes
    }
}

/// Identifiers the beacon advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconIds {
    pub company_id: u16,
    pub device_info_uuid: u16,
    pub rdk_diag_uuid: u16,
}

/// Build the advertising data bytes for the compiled-in layout.
#[cfg(not(feature = "eddystone"))]
pub fn advertising_payload(ids: &BeaconIds, instance: &InstanceId) -> Vec<u8> {
    let mut payload = vec![0x1f, 0x02, 0x01, 0x06, 0x05, 0x03];
    payload.extend_from_slice(&ids.device_info_uuid.to_le_bytes());
    payload.extend_from_slice(&ids.rdk_diag_uuid.to_le_bytes());
    payload.extend_from_slice(&[0x09, 0xff]);
    payload.extend_from_slice(&ids.company_id.to_le_bytes());
    payload.extend_from_slice(&instance.reversed());
    payload
}

/// Build the advertising data bytes for the compiled-in layout.
#[cfg(feature = "eddystone")]
pub fn advertising_payload(_ids: &BeaconIds, instance: &InstanceId) -> Vec<u8> {
    const PREAMBLE: [u8; 12] = [
        0x1f, 0x02, 0x01, 0x06, 0x03, 0x03, 0xaa, 0xfe, 0x17, 0x16, 0xaa, 0xfe,
    ];
    // UID frame type, tx power, then the 10-byte namespace.
    const UID_HEADER: [u8; 12] = [
        0x00, 0xe7, 0x36, 0xc8, 0x80, 0x7b, 0xf4, 0x60, 0xcb, 0x41, 0xd1, 0x45,
    ];

    let mut payload = PREAMBLE.to_vec();
    payload.extend_from_slice(&UID_HEADER);
    payload.extend_from_slice(&instance.reversed());
    payload.extend_from_slice(&[0x00, 0x00]);
    payload
}

/// The complete LE Set Advertising Data command for the beacon.
pub fn advertising_command(ids: &BeaconIds, instance: &InstanceId) -> RawHciCommand {
    RawHciCommand {
        ogf: OGF_LE_CTL,
        ocf: OCF_LE_SET_ADVERTISING_DATA,
        params: advertising_payload(ids, instance),
    }
}

/// Render bytes as lower-case, space separated hex pairs.
pub fn hex_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// A raw HCI command in its textual form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHciCommand {
    pub ogf: u8,
    pub ocf: u16,
    pub params: Vec<u8>,
}

impl RawHciCommand {
    /// Parse `"<ogf> <ocf> [byte ...]"`; every token is hex, `0x` optional.
    pub fn parse(text: &str) -> Result<Self, HciError> {
        let mut tokens = text.split_whitespace();

        let ogf = tokens
            .next()
            .ok_or_else(|| HciError::MalformedCommand("missing ogf".to_string()))
            .and_then(parse_hex)?;
        let ocf = tokens
            .next()
            .ok_or_else(|| HciError::MalformedCommand("missing ocf".to_string()))
            .and_then(parse_hex)?;

        if ogf > MAX_OGF || ocf > MAX_OCF {
            return Err(HciError::OpcodeOutOfRange { ogf, ocf });
        }

        let params = tokens
            .map(|token| {
                parse_hex(token).and_then(|value| {
                    u8::try_from(value).map_err(|_| {
                        HciError::MalformedCommand(format!("parameter byte out of range: {}", token))
                    })
                })
            })
            .collect::<Result<Vec<u8>, _>>()?;

        if params.len() > u8::MAX as usize {
            return Err(HciError::MalformedCommand(format!(
                "{} parameter bytes exceed the HCI limit",
                params.len()
            )));
        }

        Ok(Self {
            ogf: ogf as u8,
            ocf: ocf as u16,
            params,
        })
    }

    /// Combined 16-bit opcode.
    pub fn opcode(&self) -> u16 {
        opcode(self.ogf, self.ocf)
    }
}

impl FromStr for RawHciCommand {
    type Err = HciError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RawHciCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x} 0x{:04x}", self.ogf, self.ocf)?;
        if !self.params.is_empty() {
            write!(f, " {}", hex_string(&self.params))?;
        }
        Ok(())
    }
}

/// Pack OGF and OCF into an HCI opcode.
pub fn opcode(ogf: u8, ocf: u16) -> u16 {
    ((ogf as u16) << 10) | (ocf & 0x03ff)
}

fn parse_hex(token: &str) -> Result<u32, HciError> {
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u32::from_str_radix(digits, 16)
        .map_err(|_| HciError::MalformedCommand(format!("not a hex value: {}", token)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_ids() -> BeaconIds {
        BeaconIds {
            company_id: 0xFFFF,
            device_info_uuid: 0x1000,
            rdk_diag_uuid: 0x2000,
        }
    }

    #[test]
    fn test_instance_id_from_address() {
        let address = [0x2c, 0xda, 0xa0, 0xeb, 0x27, 0xb8];
        assert_eq!(InstanceId::from_adapter_address(address).bytes(), address);
        assert_eq!(
            InstanceId::from_adapter_address(address).reversed(),
            [0xb8, 0x27, 0xeb, 0xa0, 0xda, 0x2c]
        );
    }

    #[test]
    fn test_instance_id_zero_address_uses_default() {
        let id = InstanceId::from_adapter_address([0; 6]);
        assert_eq!(id, InstanceId::DEFAULT);
        assert_eq!(id.bytes(), [0, 0, 0, 0, 0, 1]);
    }

    #[cfg(not(feature = "eddystone"))]
    #[test]
    fn test_vendor_payload_defaults() {
        let payload = advertising_payload(&default_ids(), &InstanceId::DEFAULT);
        assert_eq!(
            hex_string(&payload),
            "1f 02 01 06 05 03 00 10 00 20 09 ff ff ff 01 00 00 00 00 00"
        );
    }

    #[cfg(not(feature = "eddystone"))]
    #[test]
    fn test_vendor_payload_little_endian_fields() {
        let ids = BeaconIds {
            company_id: 0x1234,
            device_info_uuid: 0xabcd,
            rdk_diag_uuid: 0x0102,
        };
        let instance = InstanceId::from_adapter_address([1, 2, 3, 4, 5, 6]);
        let command = advertising_command(&ids, &instance);
        assert_eq!(
            command.to_string(),
            "0x08 0x0008 1f 02 01 06 05 03 cd ab 02 01 09 ff 34 12 06 05 04 03 02 01"
        );
    }

    #[cfg(feature = "eddystone")]
    #[test]
    fn test_eddystone_payload() {
        let instance = InstanceId::from_adapter_address([1, 2, 3, 4, 5, 6]);
        let payload = advertising_payload(&default_ids(), &instance);
        assert_eq!(
            hex_string(&payload),
            "1f 02 01 06 03 03 aa fe 17 16 aa fe 00 e7 36 c8 80 7b f4 60 cb 41 d1 45 \
             06 05 04 03 02 01 00 00"
        );
    }

    #[test]
    fn test_command_text_round_trip() {
        let command = advertising_command(&default_ids(), &InstanceId::DEFAULT);
        let parsed = RawHciCommand::parse(&command.to_string()).unwrap();
        assert_eq!(parsed, command);
        assert_eq!(parsed.opcode(), 0x2008);
    }

    #[test]
    fn test_scan_response_literal() {
        let command: RawHciCommand = SCAN_RESPONSE_COMMAND.parse().unwrap();
        assert_eq!(command.ogf, 0x08);
        assert_eq!(command.ocf, 0x0006);
        assert_eq!(
            command.params,
            vec![0xA0, 0x00, 0xA0, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x07, 0x00]
        );
    }

    #[test]
    fn test_parse_rejects_out_of_range_opcode() {
        assert!(matches!(
            RawHciCommand::parse("0x40 0x0001"),
            Err(HciError::OpcodeOutOfRange { ogf: 0x40, .. })
        ));
        assert!(matches!(
            RawHciCommand::parse("0x08 0x0400 00"),
            Err(HciError::OpcodeOutOfRange { ocf: 0x400, .. })
        ));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(RawHciCommand::parse("").is_err());
        assert!(RawHciCommand::parse("0x08").is_err());
        assert!(RawHciCommand::parse("0x08 0x0008 zz").is_err());
        assert!(RawHciCommand::parse("0x08 0x0008 100").is_err());
    }
}
