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

//! Raw HCI access through the kernel's `AF_BLUETOOTH` sockets.
//!
//! Adapter power is switched with ioctls on an unbound control socket. Commands
//! go over a device socket bound to the raw channel, opened per call and closed
//! when dropped.

use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

use super::advertising::{opcode, RawHciCommand};
use super::beacon::Radio;

// Bluetooth socket constants (Linux BlueZ extension)
const AF_BLUETOOTH: i32 = 31;
const BTPROTO_HCI: i32 = 1;
const SOL_HCI: i32 = 0;
const HCI_FILTER: i32 = 2;
const HCI_CHANNEL_RAW: u16 = 0;

// HCI packet types
const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
const EVT_CMD_COMPLETE: u8 = 0x0e;
const EVT_CMD_STATUS: u8 = 0x0f;

const HCI_MAX_DEV: usize = 16;
const HCI_MAX_EVENT_SIZE: usize = 260;

// Device flag bits
const HCI_UP: u32 = 0;

// ioctls: _IOW('H', 201/202, int) and _IOR('H', 210/211, int)
const HCIDEVUP: u64 = 0x4004_48c9;
const HCIDEVDOWN: u64 = 0x4004_48ca;
const HCIGETDEVLIST: u64 = 0x8004_48d2;
const HCIGETDEVINFO: u64 = 0x8004_48d3;

/// Timeout used for request/response commands.
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(1000);

/// Errors raised while talking to the controller.
#[derive(Debug, Error)]
pub enum HciError {
    #[error("can't open HCI socket: {0}")]
    Socket(#[source] io::Error),

    #[error("can't {op} device hci{dev}: {source}")]
    Ioctl {
        op: &'static str,
        dev: u16,
        #[source]
        source: io::Error,
    },

    #[error("could not open device hci{dev}: {source}")]
    OpenDevice {
        dev: u16,
        #[source]
        source: io::Error,
    },

    #[error("HCI filter setup failed: {0}")]
    Filter(#[source] io::Error),

    #[error("send failed: {0}")]
    Send(#[source] io::Error),

    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    #[error("timed out waiting for response to opcode 0x{opcode:04x}")]
    Timeout { opcode: u16 },

    #[error("command 0x{opcode:04x} failed with status 0x{status:02x}")]
    Status { opcode: u16, status: u8 },

    #[error("no available bluetooth adapter")]
    NoRoute,

    #[error("truncated HCI event ({0} bytes)")]
    ShortEvent(usize),

    #[error("malformed HCI command: {0}")]
    MalformedCommand(String),

    #[error("ogf must be in range (0x3f,0x3ff): got ogf 0x{ogf:x}, ocf 0x{ocf:x}")]
    OpcodeOutOfRange { ogf: u32, ocf: u32 },
}

impl HciError {
    /// OS error code behind this failure, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            HciError::Socket(e)
            | HciError::Filter(e)
            | HciError::Send(e)
            | HciError::Read(e)
            | HciError::Ioctl { source: e, .. }
            | HciError::OpenDevice { source: e, .. } => e.raw_os_error(),
            _ => None,
        }
    }
}

/// What the kernel reports about an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    pub dev_id: u16,
    pub name: String,
    /// Address bytes as stored by the kernel, least significant first.
    pub address: [u8; 6],
    pub flags: u32,
}

impl AdapterInfo {
    pub fn is_up(&self) -> bool {
        self.flags & (1 << HCI_UP) != 0
    }

    /// Conventional `XX:XX:XX:XX:XX:XX` rendering, most significant byte first.
    pub fn address_string(&self) -> String {
        self.address
            .iter()
            .rev()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// An HCI event read back from the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HciEvent {
    pub code: u8,
    pub params: Vec<u8>,
}

impl HciEvent {
    /// Parse a packet of the form `[0x04, code, plen, params...]`.
    pub fn parse(packet: &[u8]) -> Result<Self, HciError> {
        if packet.len() < 3 || packet[0] != HCI_EVENT_PKT {
            return Err(HciError::ShortEvent(packet.len()));
        }
        Ok(Self {
            code: packet[1],
            params: packet[3..].to_vec(),
        })
    }

    /// Return parameters of a Command Complete event for `opcode`.
    fn command_complete_for(&self, opcode: u16) -> Option<&[u8]> {
        if self.code == EVT_CMD_COMPLETE
            && self.params.len() >= 3
            && u16::from_le_bytes([self.params[1], self.params[2]]) == opcode
        {
            Some(&self.params[3..])
        } else {
            None
        }
    }

    /// Status of a Command Status event for `opcode`.
    fn command_status_for(&self, opcode: u16) -> Option<u8> {
        if self.code == EVT_CMD_STATUS
            && self.params.len() >= 4
            && u16::from_le_bytes([self.params[2], self.params[3]]) == opcode
        {
            Some(self.params[0])
        } else {
            None
        }
    }
}

/// Format bytes as rows of `width` upper-case hex pairs, each row indented.
pub fn hex_dump(width: usize, bytes: &[u8]) -> Vec<String> {
    bytes
        .chunks(width.max(1))
        .map(|row| {
            let mut line = String::from("  ");
            for b in row {
                line.push_str(&format!("{:02X} ", b));
            }
            line
        })
        .collect()
}

fn log_hex_dump(bytes: &[u8]) {
    for line in hex_dump(20, bytes) {
        info!("{}", line);
    }
}

/// HCI socket address structure (Bluetooth-specific, not in std or socket2)
#[repr(C)]
struct SockaddrHci {
    hci_family: libc::sa_family_t,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure (Bluetooth-specific)
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn events(events: &[u8], opcode: u16) -> Self {
        let mut event_mask = [0u32; 2];
        for &e in events {
            event_mask[(e >> 5) as usize] |= 1 << (e & 31);
        }
        Self {
            type_mask: 1 << HCI_EVENT_PKT,
            event_mask,
            opcode: opcode.to_le(),
        }
    }

    fn all_events() -> Self {
        Self {
            type_mask: 1 << HCI_EVENT_PKT,
            event_mask: [u32::MAX, u32::MAX],
            opcode: 0,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
struct HciDevStats {
    err_rx: u32,
    err_tx: u32,
    cmd_tx: u32,
    evt_rx: u32,
    acl_tx: u32,
    acl_rx: u32,
    sco_tx: u32,
    sco_rx: u32,
    byte_rx: u32,
    byte_tx: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct HciDevInfo {
    dev_id: u16,
    name: [u8; 8],
    bdaddr: [u8; 6],
    flags: u32,
    dev_type: u8,
    features: [u8; 8],
    pkt_type: u32,
    link_policy: u32,
    link_mode: u32,
    acl_mtu: u16,
    acl_pkts: u16,
    sco_mtu: u16,
    sco_pkts: u16,
    stat: HciDevStats,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct HciDevReq {
    dev_id: u16,
    dev_opt: u32,
}

#[repr(C)]
struct HciDevListReq {
    dev_num: u16,
    dev_req: [HciDevReq; HCI_MAX_DEV],
}

fn new_hci_socket() -> io::Result<Socket> {
    Socket::new(
        Domain::from(AF_BLUETOOTH),
        Type::RAW,
        Some(Protocol::from(BTPROTO_HCI)),
    )
}

fn ioctl_result(ret: libc::c_int) -> io::Result<()> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// The production radio: kernel HCI sockets.
pub struct HciRadio {
    ctl: Socket,
}

impl HciRadio {
    /// Open the control socket used for adapter ioctls.
    pub fn open() -> Result<Self, HciError> {
        let ctl = new_hci_socket().map_err(HciError::Socket)?;
        Ok(Self { ctl })
    }

    fn dev_ioctl(&self, op: &'static str, request: u64, dev: u16) -> Result<(), HciError> {
        // SAFETY: HCIDEVUP/HCIDEVDOWN take the device id by value.
        let ret = unsafe {
            libc::ioctl(
                self.ctl.as_raw_fd(),
                request as _,
                libc::c_int::from(dev),
            )
        };
        ioctl_result(ret).map_err(|source| HciError::Ioctl { op, dev, source })
    }
}

impl Radio for HciRadio {
    fn first_available_route(&self) -> Result<u16, HciError> {
        // SAFETY: plain-old-data request struct, all-zero is a valid value.
        let mut list: HciDevListReq = unsafe { std::mem::zeroed() };
        list.dev_num = HCI_MAX_DEV as u16;

        // SAFETY: the kernel fills at most dev_num entries of dev_req.
        let ret = unsafe {
            libc::ioctl(
                self.ctl.as_raw_fd(),
                HCIGETDEVLIST as _,
                &mut list as *mut HciDevListReq,
            )
        };
        ioctl_result(ret).map_err(|source| HciError::Ioctl {
            op: "list",
            dev: 0,
            source,
        })?;

        let count = (list.dev_num as usize).min(HCI_MAX_DEV);
        list.dev_req[..count]
            .iter()
            .find(|req| req.dev_opt & (1 << HCI_UP) != 0)
            .map(|req| req.dev_id)
            .ok_or(HciError::NoRoute)
    }

    fn device_info(&self, dev: u16) -> Result<AdapterInfo, HciError> {
        // SAFETY: plain-old-data struct, all-zero is a valid value.
        let mut info: HciDevInfo = unsafe { std::mem::zeroed() };
        info.dev_id = dev;

        // SAFETY: HCIGETDEVINFO fills a struct hci_dev_info.
        let ret = unsafe {
            libc::ioctl(
                self.ctl.as_raw_fd(),
                HCIGETDEVINFO as _,
                &mut info as *mut HciDevInfo,
            )
        };
        ioctl_result(ret).map_err(|source| HciError::Ioctl {
            op: "get info for",
            dev,
            source,
        })?;

        let name_len = info.name.iter().position(|&b| b == 0).unwrap_or(8);
        Ok(AdapterInfo {
            dev_id: info.dev_id,
            name: String::from_utf8_lossy(&info.name[..name_len]).into_owned(),
            address: info.bdaddr,
            flags: info.flags,
        })
    }

    fn down(&self, dev: u16) -> Result<(), HciError> {
        self.dev_ioctl("down", HCIDEVDOWN, dev)
    }

    fn up(&self, dev: u16) -> Result<(), HciError> {
        self.dev_ioctl("init", HCIDEVUP, dev)
    }

    fn request(
        &self,
        dev: u16,
        ogf: u8,
        ocf: u16,
        params: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, HciError> {
        let opcode = opcode(ogf, ocf);
        let mut device = HciDevice::open(dev)?;
        device.set_filter(&HciFilter::events(
            &[EVT_CMD_STATUS, EVT_CMD_COMPLETE],
            opcode,
        ))?;
        device.send_command(opcode, params)?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(HciError::Timeout { opcode });
            }
            let event = device.read_event(remaining, opcode)?;
            if let Some(status) = event.command_status_for(opcode) {
                if status != 0 {
                    return Err(HciError::Status { opcode, status });
                }
                continue;
            }
            if let Some(ret) = event.command_complete_for(opcode) {
                return Ok(ret.to_vec());
            }
        }
    }

    fn raw_command(&self, dev: u16, command: &RawHciCommand) -> Result<HciEvent, HciError> {
        let opcode = command.opcode();
        let mut device = HciDevice::open(dev)?;
        device.set_filter(&HciFilter::all_events())?;

        info!(
            "< HCI Command: ogf 0x{:02x}, ocf 0x{:04x}, plen {}",
            command.ogf,
            command.ocf,
            command.params.len()
        );
        log_hex_dump(&command.params);

        device.send_command(opcode, &command.params)?;
        let event = device.read_event(REQUEST_TIMEOUT * 2, opcode)?;

        info!("> HCI Event: 0x{:02x} plen {}", event.code, event.params.len());
        log_hex_dump(&event.params);

        Ok(event)
    }
}

/// Device socket bound to one adapter's raw channel.
struct HciDevice {
    socket: Socket,
}

impl HciDevice {
    fn open(dev: u16) -> Result<Self, HciError> {
        let socket = new_hci_socket().map_err(|source| HciError::OpenDevice { dev, source })?;
        let addr = SockaddrHci {
            hci_family: AF_BLUETOOTH as libc::sa_family_t,
            hci_dev: dev,
            hci_channel: HCI_CHANNEL_RAW,
        };
        // SAFETY: bind() with valid fd and properly sized sockaddr struct
        let ret = unsafe {
            libc::bind(
                socket.as_raw_fd(),
                &addr as *const SockaddrHci as *const libc::sockaddr,
                std::mem::size_of::<SockaddrHci>() as libc::socklen_t,
            )
        };
        ioctl_result(ret).map_err(|source| HciError::OpenDevice { dev, source })?;
        Ok(Self { socket })
    }

    fn set_filter(&self, filter: &HciFilter) -> Result<(), HciError> {
        // SAFETY: setsockopt with valid fd and properly sized filter struct
        let ret = unsafe {
            libc::setsockopt(
                self.socket.as_raw_fd(),
                SOL_HCI,
                HCI_FILTER,
                filter as *const HciFilter as *const libc::c_void,
                std::mem::size_of::<HciFilter>() as libc::socklen_t,
            )
        };
        ioctl_result(ret).map_err(HciError::Filter)
    }

    fn send_command(&mut self, opcode: u16, params: &[u8]) -> Result<(), HciError> {
        let mut packet = Vec::with_capacity(4 + params.len());
        packet.push(HCI_COMMAND_PKT);
        packet.extend_from_slice(&opcode.to_le_bytes());
        packet.push(params.len() as u8);
        packet.extend_from_slice(params);
        debug!("HCI send opcode 0x{:04x}: {}", opcode, hex::encode(&packet));
        (&self.socket).write_all(&packet).map_err(HciError::Send)
    }

    fn read_event(&mut self, timeout: Duration, opcode: u16) -> Result<HciEvent, HciError> {
        self.socket
            .set_read_timeout(Some(timeout))
            .map_err(HciError::Read)?;
        let mut buf = [0u8; HCI_MAX_EVENT_SIZE];
        let len = match (&self.socket).read(&mut buf) {
            Ok(len) => len,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                return Err(HciError::Timeout { opcode });
            }
            Err(e) => return Err(HciError::Read(e)),
        };
        HciEvent::parse(&buf[..len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_dump_rows() {
        let bytes: Vec<u8> = (0u8..25).collect();
        let lines = hex_dump(20, &bytes);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("  00 01 02 "));
        assert!(lines[0].ends_with("13 "));
        assert_eq!(lines[1], "  14 15 16 17 18 ");
        assert!(hex_dump(20, &[]).is_empty());
    }

    #[test]
    fn test_event_parse() {
        let event = HciEvent::parse(&[0x04, 0x0e, 0x04, 0x01, 0x0a, 0x20, 0x00]).unwrap();
        assert_eq!(event.code, EVT_CMD_COMPLETE);
        assert_eq!(event.command_complete_for(0x200a), Some(&[0x00][..]));
        assert_eq!(event.command_complete_for(0x2008), None);

        assert!(matches!(
            HciEvent::parse(&[0x04, 0x0e]),
            Err(HciError::ShortEvent(2))
        ));
        assert!(HciEvent::parse(&[0x02, 0x0e, 0x00]).is_err());
    }

    #[test]
    fn test_command_status_event() {
        let event = HciEvent::parse(&[0x04, 0x0f, 0x04, 0x0c, 0x01, 0x13, 0x0c]).unwrap();
        assert_eq!(event.command_status_for(0x0c13), Some(0x0c));
        assert_eq!(event.command_complete_for(0x0c13), None);
    }

    #[test]
    fn test_filter_event_bits() {
        let filter = HciFilter::events(&[EVT_CMD_STATUS, EVT_CMD_COMPLETE], 0x200a);
        assert_eq!(filter.type_mask, 1 << 4);
        assert_eq!(filter.event_mask[0], (1 << 0x0e) | (1 << 0x0f));
        assert_eq!(filter.event_mask[1], 0);
    }

    #[test]
    fn test_adapter_address_string() {
        let info = AdapterInfo {
            dev_id: 0,
            name: "hci0".to_string(),
            address: [0x2c, 0xda, 0xa0, 0xeb, 0x27, 0xb8],
            flags: 1,
        };
        assert_eq!(info.address_string(), "B8:27:EB:A0:DA:2C");
        assert!(info.is_up());
    }

    #[test]
    fn test_raw_os_error() {
        let err = HciError::Ioctl {
            op: "init",
            dev: 0,
            source: io::Error::from_raw_os_error(libc::EALREADY),
        };
        assert_eq!(err.raw_os_error(), Some(libc::EALREADY));
        assert_eq!(HciError::NoRoute.raw_os_error(), None);
    }
}
