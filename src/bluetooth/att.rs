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

//! Attribute database and a small ATT server for the LE fixed channel.
//!
//! The server is a pure PDU-in, PDU-out state machine. The session owns the
//! bearer and feeds requests through [`AttServer::handle_pdu`]; values that
//! must be computed at read time or consumed on write go through an
//! [`AttributeHandler`].

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use super::ble_constants::{config, short_form, uuid16};

pub type Handle = u16;

// ATT opcodes
const ATT_OP_ERROR_RSP: u8 = 0x01;
const ATT_OP_MTU_REQ: u8 = 0x02;
const ATT_OP_MTU_RSP: u8 = 0x03;
const ATT_OP_FIND_INFO_REQ: u8 = 0x04;
const ATT_OP_FIND_INFO_RSP: u8 = 0x05;
const ATT_OP_FIND_BY_TYPE_REQ: u8 = 0x06;
const ATT_OP_FIND_BY_TYPE_RSP: u8 = 0x07;
const ATT_OP_READ_BY_TYPE_REQ: u8 = 0x08;
const ATT_OP_READ_BY_TYPE_RSP: u8 = 0x09;
const ATT_OP_READ_REQ: u8 = 0x0A;
const ATT_OP_READ_RSP: u8 = 0x0B;
const ATT_OP_READ_BLOB_REQ: u8 = 0x0C;
const ATT_OP_READ_BLOB_RSP: u8 = 0x0D;
const ATT_OP_READ_BY_GROUP_REQ: u8 = 0x10;
const ATT_OP_READ_BY_GROUP_RSP: u8 = 0x11;
const ATT_OP_WRITE_REQ: u8 = 0x12;
const ATT_OP_WRITE_RSP: u8 = 0x13;
const ATT_OP_HANDLE_VALUE_NTF: u8 = 0x1B;
const ATT_OP_WRITE_CMD: u8 = 0x52;

/// Opcodes with this bit set are commands and never get a response.
const ATT_COMMAND_FLAG: u8 = 0x40;

// ATT error codes
pub const ATT_ERR_INVALID_HANDLE: u8 = 0x01;
pub const ATT_ERR_READ_NOT_PERMITTED: u8 = 0x02;
pub const ATT_ERR_WRITE_NOT_PERMITTED: u8 = 0x03;
pub const ATT_ERR_INVALID_PDU: u8 = 0x04;
pub const ATT_ERR_REQUEST_NOT_SUPPORTED: u8 = 0x06;
pub const ATT_ERR_INVALID_OFFSET: u8 = 0x07;
pub const ATT_ERR_ATTR_NOT_FOUND: u8 = 0x0A;
pub const ATT_ERR_INVALID_VALUE_LEN: u8 = 0x0D;
pub const ATT_ERR_UNSUPPORTED_GROUP_TYPE: u8 = 0x10;

// GATT attribute types
const PRIMARY_SERVICE: u16 = 0x2800;
const SECONDARY_SERVICE: u16 = 0x2801;
const CHARACTERISTIC: u16 = 0x2803;
const CLIENT_CHARACTERISTIC_CONFIG: u16 = 0x2902;

const MAX_VALUE_LEN: usize = 512;

/// Characteristic property bits.
pub mod properties {
    pub const READ: u8 = 0x02;
    pub const WRITE_WITHOUT_RESPONSE: u8 = 0x04;
    pub const WRITE: u8 = 0x08;
    pub const NOTIFY: u8 = 0x10;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
}

impl Permissions {
    pub const READ_ONLY: Permissions = Permissions {
        read: true,
        write: false,
    };
    pub const READ_WRITE: Permissions = Permissions {
        read: true,
        write: true,
    };

    fn from_properties(props: u8) -> Self {
        Self {
            read: props & properties::READ != 0,
            write: props & (properties::WRITE | properties::WRITE_WITHOUT_RESPONSE) != 0,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DatabaseError {
    #[error("characteristic added before any service")]
    NoService,
    #[error("attribute handle space exhausted")]
    Full,
    #[error("no attribute at handle 0x{0:04x}")]
    UnknownHandle(Handle),
}

/// Little-endian wire form of a UUID: two bytes for SIG aliases, sixteen otherwise.
pub fn uuid_bytes(uuid: &Uuid) -> Vec<u8> {
    match short_form(uuid) {
        Some(short) => short.to_le_bytes().to_vec(),
        None => uuid.as_u128().to_le_bytes().to_vec(),
    }
}

fn parse_uuid(bytes: &[u8]) -> Option<Uuid> {
    match bytes.len() {
        2 => Some(uuid16(u16::from_le_bytes([bytes[0], bytes[1]]))),
        16 => {
            let mut raw = [0u8; 16];
            raw.copy_from_slice(bytes);
            Some(Uuid::from_u128(u128::from_le_bytes(raw)))
        }
        _ => None,
    }
}

#[derive(Debug, Clone)]
struct Attribute {
    handle: Handle,
    kind: Uuid,
    value: Vec<u8>,
    perms: Permissions,
    /// Last handle of the group this attribute opens (service declarations).
    group_end: Handle,
}

/// Ordered attribute table with handles starting at 1.
#[derive(Debug, Default)]
pub struct AttributeDatabase {
    attributes: Vec<Attribute>,
    last_service: Option<usize>,
}

impl AttributeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_handle(&self) -> Result<Handle, DatabaseError> {
        Handle::try_from(self.attributes.len() + 1).map_err(|_| DatabaseError::Full)
    }

    fn push(&mut self, kind: Uuid, value: Vec<u8>, perms: Permissions) -> Result<Handle, DatabaseError> {
        let handle = self.next_handle()?;
        self.attributes.push(Attribute {
            handle,
            kind,
            value,
            perms,
            group_end: handle,
        });
        if let Some(index) = self.last_service {
            self.attributes[index].group_end = handle;
        }
        Ok(handle)
    }

    /// Open a primary service. Characteristics added after this belong to it.
    pub fn add_primary_service(&mut self, uuid: Uuid) -> Result<Handle, DatabaseError> {
        self.last_service = None;
        let handle = self.push(uuid16(PRIMARY_SERVICE), uuid_bytes(&uuid), Permissions::READ_ONLY)?;
        self.last_service = Some(self.attributes.len() - 1);
        Ok(handle)
    }

    /// Add a characteristic declaration and its value; returns the value handle.
    pub fn add_characteristic(
        &mut self,
        uuid: Uuid,
        props: u8,
        value: Vec<u8>,
    ) -> Result<Handle, DatabaseError> {
        if self.last_service.is_none() {
            return Err(DatabaseError::NoService);
        }
        let value_handle = self.next_handle()?.checked_add(1).ok_or(DatabaseError::Full)?;
        let mut declaration = vec![props];
        declaration.extend_from_slice(&value_handle.to_le_bytes());
        declaration.extend_from_slice(&uuid_bytes(&uuid));

        self.push(uuid16(CHARACTERISTIC), declaration, Permissions::READ_ONLY)?;
        self.push(uuid, value, Permissions::from_properties(props))
    }

    /// Add a Client Characteristic Configuration descriptor, initially zero.
    pub fn add_cccd(&mut self) -> Result<Handle, DatabaseError> {
        if self.last_service.is_none() {
            return Err(DatabaseError::NoService);
        }
        self.push(
            uuid16(CLIENT_CHARACTERISTIC_CONFIG),
            vec![0, 0],
            Permissions::READ_WRITE,
        )
    }

    pub fn value(&self, handle: Handle) -> Option<&[u8]> {
        self.get(handle).map(|a| a.value.as_slice())
    }

    pub fn set_value(&mut self, handle: Handle, value: Vec<u8>) -> Result<(), DatabaseError> {
        let index = self.index(handle).ok_or(DatabaseError::UnknownHandle(handle))?;
        self.attributes[index].value = value;
        Ok(())
    }

    /// Number of primary service declarations.
    pub fn service_count(&self) -> usize {
        self.count_of(PRIMARY_SERVICE)
    }

    /// Number of characteristic declarations.
    pub fn characteristic_count(&self) -> usize {
        self.count_of(CHARACTERISTIC)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    fn count_of(&self, kind: u16) -> usize {
        let kind = uuid16(kind);
        self.attributes.iter().filter(|a| a.kind == kind).count()
    }

    fn index(&self, handle: Handle) -> Option<usize> {
        let index = (handle as usize).checked_sub(1)?;
        (index < self.attributes.len()).then_some(index)
    }

    fn get(&self, handle: Handle) -> Option<&Attribute> {
        self.index(handle).map(|i| &self.attributes[i])
    }

    fn range(&self, start: Handle, end: Handle) -> impl Iterator<Item = &Attribute> {
        self.attributes
            .iter()
            .filter(move |a| a.handle >= start && a.handle <= end)
    }
}

/// The request reading a dynamic attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadKind {
    Read,
    ReadBlob,
    ReadByType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub kind: ReadKind,
    /// Blob offset requested by the client, zero otherwise.
    pub offset: usize,
    /// Most value bytes the response can carry.
    pub max_len: usize,
}

/// Hooks for attributes whose value is produced or consumed by the session.
pub trait AttributeHandler {
    /// Reads of a dynamic handle go to [`AttributeHandler::on_read`] instead
    /// of the stored value.
    fn is_dynamic(&self, handle: Handle) -> bool;

    /// Value for a read of a dynamic handle, sent as returned with no offset
    /// applied. Anything past `request.max_len` is cut off, so handlers that
    /// consume state must not return more. `Err` carries an ATT error code.
    fn on_read(&mut self, handle: Handle, request: ReadRequest) -> Result<Vec<u8>, u8>;

    /// Called after a write has been stored.
    fn on_write(&mut self, handle: Handle, value: &[u8]);
}

/// Handler with no dynamic attributes.
pub struct NoDynamicAttributes;

impl AttributeHandler for NoDynamicAttributes {
    fn is_dynamic(&self, _handle: Handle) -> bool {
        false
    }

    fn on_read(&mut self, _handle: Handle, _request: ReadRequest) -> Result<Vec<u8>, u8> {
        Err(ATT_ERR_READ_NOT_PERMITTED)
    }

    fn on_write(&mut self, _handle: Handle, _value: &[u8]) {}
}

fn error_response(request: u8, handle: Handle, code: u8) -> Vec<u8> {
    let [lo, hi] = handle.to_le_bytes();
    vec![ATT_OP_ERROR_RSP, request, lo, hi, code]
}

fn read_u16(pdu: &[u8], at: usize) -> Option<u16> {
    pdu.get(at..at + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

type AttResult = Result<Vec<u8>, (Handle, u8)>;

/// ATT server state for one connection.
#[derive(Debug)]
pub struct AttServer {
    db: AttributeDatabase,
    mtu: u16,
    max_mtu: u16,
}

impl AttServer {
    pub fn new(db: AttributeDatabase) -> Self {
        Self {
            db,
            mtu: config::DEFAULT_MTU,
            max_mtu: config::SERVER_RX_MTU,
        }
    }

    pub fn database(&self) -> &AttributeDatabase {
        &self.db
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// Cap what an MTU exchange may negotiate, e.g. to the link's receive MTU.
    pub fn set_max_mtu(&mut self, max: u16) {
        self.max_mtu = max.clamp(config::DEFAULT_MTU, config::SERVER_RX_MTU);
    }

    /// Build a Handle Value Notification, value truncated to fit the MTU.
    pub fn notification(&self, handle: Handle, value: &[u8]) -> Vec<u8> {
        let max = self.mtu as usize - 3;
        let mut pdu = Vec::with_capacity(3 + value.len().min(max));
        pdu.push(ATT_OP_HANDLE_VALUE_NTF);
        pdu.extend_from_slice(&handle.to_le_bytes());
        pdu.extend_from_slice(&value[..value.len().min(max)]);
        pdu
    }

    /// Process one incoming PDU and return the response, if any.
    pub fn handle_pdu(
        &mut self,
        pdu: &[u8],
        handler: &mut dyn AttributeHandler,
    ) -> Option<Vec<u8>> {
        let (&opcode, _) = pdu.split_first()?;
        debug!("ATT: < {}", hex::encode(pdu));

        let result = match opcode {
            ATT_OP_MTU_REQ => self.exchange_mtu(pdu),
            ATT_OP_FIND_INFO_REQ => self.find_information(pdu),
            ATT_OP_FIND_BY_TYPE_REQ => self.find_by_type_value(pdu),
            ATT_OP_READ_BY_TYPE_REQ => self.read_by_type(pdu, handler),
            ATT_OP_READ_REQ => self.read(pdu, handler),
            ATT_OP_READ_BLOB_REQ => self.read_blob(pdu, handler),
            ATT_OP_READ_BY_GROUP_REQ => self.read_by_group_type(pdu),
            ATT_OP_WRITE_REQ => self.write(pdu, handler).map(|()| vec![ATT_OP_WRITE_RSP]),
            ATT_OP_WRITE_CMD => {
                if let Err((handle, code)) = self.write(pdu, handler) {
                    debug!("ATT: write command to 0x{:04x} dropped (error 0x{:02x})", handle, code);
                }
                return None;
            }
            op if op & ATT_COMMAND_FLAG != 0 => {
                debug!("ATT: ignoring command 0x{:02x}", op);
                return None;
            }
            // Confirmations need no answer.
            0x1E => return None,
            _ => Err((0, ATT_ERR_REQUEST_NOT_SUPPORTED)),
        };

        let response = match result {
            Ok(response) => response,
            Err((handle, code)) => error_response(opcode, handle, code),
        };
        debug!("ATT: > {}", hex::encode(&response));
        Some(response)
    }

    fn exchange_mtu(&mut self, pdu: &[u8]) -> AttResult {
        let client = read_u16(pdu, 1).ok_or((0, ATT_ERR_INVALID_PDU))?;
        self.mtu = client.clamp(config::DEFAULT_MTU, self.max_mtu);
        debug!("ATT: MTU exchanged, client {} -> {}", client, self.mtu);
        let mut rsp = vec![ATT_OP_MTU_RSP];
        rsp.extend_from_slice(&self.max_mtu.to_le_bytes());
        Ok(rsp)
    }

    fn handle_range(pdu: &[u8]) -> Result<(Handle, Handle), (Handle, u8)> {
        let start = read_u16(pdu, 1).ok_or((0, ATT_ERR_INVALID_PDU))?;
        let end = read_u16(pdu, 3).ok_or((0, ATT_ERR_INVALID_PDU))?;
        if start == 0 || start > end {
            return Err((start, ATT_ERR_INVALID_HANDLE));
        }
        Ok((start, end))
    }

    fn find_information(&self, pdu: &[u8]) -> AttResult {
        let (start, end) = Self::handle_range(pdu)?;
        let mtu = self.mtu as usize;

        let mut entries = self.db.range(start, end).peekable();
        let first = entries.peek().ok_or((start, ATT_ERR_ATTR_NOT_FOUND))?;
        let short = short_form(&first.kind).is_some();

        let mut rsp = vec![ATT_OP_FIND_INFO_RSP, if short { 0x01 } else { 0x02 }];
        for attribute in entries {
            let uuid = uuid_bytes(&attribute.kind);
            if (uuid.len() == 2) != short || rsp.len() + 2 + uuid.len() > mtu {
                break;
            }
            rsp.extend_from_slice(&attribute.handle.to_le_bytes());
            rsp.extend_from_slice(&uuid);
        }
        Ok(rsp)
    }

    fn find_by_type_value(&self, pdu: &[u8]) -> AttResult {
        let (start, end) = Self::handle_range(pdu)?;
        let kind = read_u16(pdu, 5).ok_or((start, ATT_ERR_INVALID_PDU))?;
        let value = &pdu[7..];
        let kind = uuid16(kind);
        let mtu = self.mtu as usize;

        let mut rsp = vec![ATT_OP_FIND_BY_TYPE_RSP];
        for attribute in self.db.range(start, end) {
            if attribute.kind != kind || attribute.value != value {
                continue;
            }
            if rsp.len() + 4 > mtu {
                break;
            }
            rsp.extend_from_slice(&attribute.handle.to_le_bytes());
            rsp.extend_from_slice(&attribute.group_end.to_le_bytes());
        }
        if rsp.len() == 1 {
            return Err((start, ATT_ERR_ATTR_NOT_FOUND));
        }
        Ok(rsp)
    }

    fn read_by_type(&self, pdu: &[u8], handler: &mut dyn AttributeHandler) -> AttResult {
        let (start, end) = Self::handle_range(pdu)?;
        let kind = parse_uuid(&pdu[5..]).ok_or((start, ATT_ERR_INVALID_PDU))?;
        let mtu = self.mtu as usize;
        let max_value = (mtu - 4).min(253);

        let mut rsp = vec![ATT_OP_READ_BY_TYPE_RSP, 0];
        let mut entry_len = None;
        for attribute in self.db.range(start, end).filter(|a| a.kind == kind) {
            if !attribute.perms.read {
                if entry_len.is_none() {
                    return Err((attribute.handle, ATT_ERR_READ_NOT_PERMITTED));
                }
                break;
            }
            // A dynamic value is only produced as the sole entry, so nothing
            // it yields is discarded.
            let dynamic = handler.is_dynamic(attribute.handle);
            if dynamic && entry_len.is_some() {
                break;
            }
            let value = if dynamic {
                let request = ReadRequest {
                    kind: ReadKind::ReadByType,
                    offset: 0,
                    max_len: max_value,
                };
                let mut value = handler
                    .on_read(attribute.handle, request)
                    .map_err(|code| (attribute.handle, code))?;
                value.truncate(max_value);
                value
            } else {
                attribute.value[..attribute.value.len().min(max_value)].to_vec()
            };
            let len = 2 + value.len();
            match entry_len {
                None => entry_len = Some(len),
                Some(expected) if expected != len => break,
                Some(_) => {}
            }
            if rsp.len() + len > mtu {
                break;
            }
            rsp.extend_from_slice(&attribute.handle.to_le_bytes());
            rsp.extend_from_slice(&value);
            if dynamic {
                break;
            }
        }
        match entry_len {
            Some(len) => {
                rsp[1] = len as u8;
                Ok(rsp)
            }
            None => Err((start, ATT_ERR_ATTR_NOT_FOUND)),
        }
    }

    /// Bytes a Read or Read Blob response carries for `handle`.
    fn read_value(
        &self,
        handle: Handle,
        handler: &mut dyn AttributeHandler,
        kind: ReadKind,
        offset: usize,
    ) -> AttResult {
        let attribute = self.db.get(handle).ok_or((handle, ATT_ERR_INVALID_HANDLE))?;
        if !attribute.perms.read {
            return Err((handle, ATT_ERR_READ_NOT_PERMITTED));
        }
        let max_len = self.mtu as usize - 1;

        if handler.is_dynamic(handle) {
            let request = ReadRequest {
                kind,
                offset,
                max_len,
            };
            let mut value = handler.on_read(handle, request).map_err(|code| (handle, code))?;
            value.truncate(max_len);
            return Ok(value);
        }

        if offset > attribute.value.len() {
            return Err((handle, ATT_ERR_INVALID_OFFSET));
        }
        let tail = &attribute.value[offset..];
        Ok(tail[..tail.len().min(max_len)].to_vec())
    }

    fn read(&self, pdu: &[u8], handler: &mut dyn AttributeHandler) -> AttResult {
        let handle = read_u16(pdu, 1).ok_or((0, ATT_ERR_INVALID_PDU))?;
        let mut rsp = vec![ATT_OP_READ_RSP];
        rsp.extend(self.read_value(handle, handler, ReadKind::Read, 0)?);
        Ok(rsp)
    }

    fn read_blob(&self, pdu: &[u8], handler: &mut dyn AttributeHandler) -> AttResult {
        let handle = read_u16(pdu, 1).ok_or((0, ATT_ERR_INVALID_PDU))?;
        let offset = read_u16(pdu, 3).ok_or((handle, ATT_ERR_INVALID_PDU))? as usize;
        let mut rsp = vec![ATT_OP_READ_BLOB_RSP];
        rsp.extend(self.read_value(handle, handler, ReadKind::ReadBlob, offset)?);
        Ok(rsp)
    }

    fn read_by_group_type(&self, pdu: &[u8]) -> AttResult {
        let (start, end) = Self::handle_range(pdu)?;
        let kind = parse_uuid(&pdu[5..]).ok_or((start, ATT_ERR_INVALID_PDU))?;
        if kind != uuid16(PRIMARY_SERVICE) && kind != uuid16(SECONDARY_SERVICE) {
            return Err((start, ATT_ERR_UNSUPPORTED_GROUP_TYPE));
        }
        let mtu = self.mtu as usize;

        let mut rsp = vec![ATT_OP_READ_BY_GROUP_RSP, 0];
        let mut entry_len = None;
        for attribute in self.db.range(start, end).filter(|a| a.kind == kind) {
            let len = 4 + attribute.value.len();
            match entry_len {
                None => entry_len = Some(len),
                Some(expected) if expected != len => break,
                Some(_) => {}
            }
            if rsp.len() + len > mtu {
                break;
            }
            rsp.extend_from_slice(&attribute.handle.to_le_bytes());
            rsp.extend_from_slice(&attribute.group_end.to_le_bytes());
            rsp.extend_from_slice(&attribute.value);
        }
        match entry_len {
            Some(len) => {
                rsp[1] = len as u8;
                Ok(rsp)
            }
            None => Err((start, ATT_ERR_ATTR_NOT_FOUND)),
        }
    }

    fn write(
        &mut self,
        pdu: &[u8],
        handler: &mut dyn AttributeHandler,
    ) -> Result<(), (Handle, u8)> {
        let handle = read_u16(pdu, 1).ok_or((0, ATT_ERR_INVALID_PDU))?;
        let value = &pdu[3..];
        let attribute = self.db.get(handle).ok_or((handle, ATT_ERR_INVALID_HANDLE))?;
        if !attribute.perms.write {
            return Err((handle, ATT_ERR_WRITE_NOT_PERMITTED));
        }
        if value.len() > MAX_VALUE_LEN {
            return Err((handle, ATT_ERR_INVALID_VALUE_LEN));
        }
        self.db
            .set_value(handle, value.to_vec())
            .map_err(|_| (handle, ATT_ERR_INVALID_HANDLE))?;
        handler.on_write(handle, value);
        Ok(())
    }
}
