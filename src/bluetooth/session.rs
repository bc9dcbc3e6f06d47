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

//! One connected peer: attribute database, ATT server and the doorbell timer.
//!
//! The RPC layer pushes framed records through an [`Outbox`] from any thread.
//! Every notify interval the session checks how many bytes are waiting and,
//! if any, notifies the peer with the 4-byte big-endian count. The peer then
//! pulls the bytes by reading the EPoll characteristic.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::att::{
    properties, AttServer, AttributeDatabase, AttributeHandler, DatabaseError, Handle, ReadRequest,
};
use super::ble_constants::{
    config, RECORD_DELIMITER, RPC_EPOLL_UUID, RPC_INBOX_UUID, RPC_SERVICE_UUID,
};
use super::catalog::GattCatalog;
use super::frame_queue::{OutgoingFrameQueue, QueueError, RecordAssembler};
use crate::provider::{DeviceInfoProvider, RdkDiagProvider};

/// A connected ATT bearer.
pub trait AttBearer {
    /// Next inbound PDU. An empty PDU means the peer has gone away.
    fn recv(&mut self) -> impl Future<Output = io::Result<Vec<u8>>>;

    fn send(&mut self, pdu: &[u8]) -> impl Future<Output = io::Result<()>>;

    /// Receive MTU of the underlying link.
    fn link_mtu(&self) -> io::Result<u16>;
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a GATT session is already active")]
    AlreadyActive,
    #[error("failed to build attribute database: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Disconnected,
}

/// Allows at most one live session.
#[derive(Debug, Clone, Default)]
pub struct SessionSlot {
    busy: Arc<AtomicBool>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot; released when the returned guard is dropped.
    pub fn claim(&self) -> Result<SessionGuard, SessionError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SessionError::AlreadyActive)?;
        Ok(SessionGuard {
            busy: self.busy.clone(),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct SessionGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Cross-thread handle for queueing records to the peer.
#[derive(Debug, Clone)]
pub struct Outbox {
    queue: Arc<OutgoingFrameQueue>,
}

impl Outbox {
    /// Queue one record. An empty buffer is ignored with a warning.
    pub fn enqueue_for_send(&self, data: &[u8]) -> Result<(), QueueError> {
        if data.is_empty() {
            warn!("enqueue_for_send: ignoring empty buffer");
            return Ok(());
        }
        self.queue.put_record(data).map_err(|e| {
            warn!("enqueue_for_send: {}", e);
            e
        })
    }

    /// Bytes waiting to be pulled, delimiters included.
    pub fn pending(&self) -> usize {
        self.queue.pending()
    }
}

/// Receives each complete record the peer writes to the inbox.
pub type DataHandler = Box<dyn FnMut(Vec<u8>, &Outbox) + Send>;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub rdk_diag_uuid: u16,
    pub notify_interval: Duration,
    pub queue_limit: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            rdk_diag_uuid: 0x2000,
            notify_interval: Duration::from_millis(config::NOTIFY_INTERVAL_MS),
            queue_limit: config::OUTGOING_QUEUE_LIMIT,
        }
    }
}

/// Value handles of the RPC channel characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcHandles {
    pub inbox: Handle,
    pub epoll: Handle,
    pub epoll_cccd: Handle,
}

impl RpcHandles {
    fn register(db: &mut AttributeDatabase) -> Result<Self, DatabaseError> {
        db.add_primary_service(RPC_SERVICE_UUID)?;
        let inbox = db.add_characteristic(
            RPC_INBOX_UUID,
            properties::WRITE | properties::WRITE_WITHOUT_RESPONSE,
            Vec::new(),
        )?;
        let epoll = db.add_characteristic(
            RPC_EPOLL_UUID,
            properties::READ | properties::NOTIFY,
            Vec::new(),
        )?;
        let epoll_cccd = db.add_cccd()?;
        Ok(Self {
            inbox,
            epoll,
            epoll_cccd,
        })
    }
}

/// Dynamic side of the RPC channel service.
struct RpcChannel {
    handles: RpcHandles,
    outbox: Outbox,
    inbox: RecordAssembler,
    on_record: Option<DataHandler>,
}

impl AttributeHandler for RpcChannel {
    fn is_dynamic(&self, handle: Handle) -> bool {
        handle == self.handles.epoll
    }

    /// Every EPoll read pulls the next bytes of the stream. A blob offset
    /// counts bytes the peer already holds, so it is not applied again.
    fn on_read(&mut self, _handle: Handle, request: ReadRequest) -> Result<Vec<u8>, u8> {
        let data = self.outbox.queue.take(request.max_len);
        debug!(
            "EPoll {:?}: {} bytes, {} left",
            request.kind,
            data.len(),
            self.outbox.pending()
        );
        Ok(data)
    }

    fn on_write(&mut self, handle: Handle, value: &[u8]) {
        if handle == self.handles.epoll_cccd {
            debug!("EPoll notifications {:02x?}", value);
            return;
        }
        if handle != self.handles.inbox {
            return;
        }
        for record in self.inbox.push(value) {
            match &mut self.on_record {
                Some(handler) => handler(record, &self.outbox),
                None => warn!("dropping {}-byte record: no data handler", record.len()),
            }
        }
    }
}

/// Stops a running session from outside the reactor.
#[derive(Debug, Clone)]
pub struct SessionStopper {
    notify: Arc<Notify>,
}

impl SessionStopper {
    pub fn stop(&self) {
        self.notify.notify_one();
    }
}

/// The transport bridge for one accepted connection.
pub struct GattSession<B> {
    bearer: B,
    peer: String,
    state: SessionState,
    server: AttServer,
    channel: RpcChannel,
    notify_interval: Duration,
    stop: Arc<Notify>,
    _guard: SessionGuard,
}

impl<B: AttBearer> GattSession<B> {
    /// Build the attribute database and make the session active.
    ///
    /// Every provider field is read exactly once here.
    pub fn new(
        bearer: B,
        peer: impl Into<String>,
        slot: &SessionSlot,
        options: &SessionOptions,
        device_info: &dyn DeviceInfoProvider,
        rdk_diag: &dyn RdkDiagProvider,
    ) -> Result<Self, SessionError> {
        let guard = slot.claim()?;
        let peer = peer.into();
        let mut state = SessionState::Connecting;
        debug!("session {}: {:?}", peer, state);

        let mut db = AttributeDatabase::new();
        info!("Building GATT database");
        GattCatalog::build(options.rdk_diag_uuid, device_info, rdk_diag).populate(&mut db)?;
        let handles = RpcHandles::register(&mut db)?;
        debug!("RPC channel handles: {:?}", handles);

        let mut server = AttServer::new(db);
        match bearer.link_mtu() {
            Ok(mtu) => {
                debug!("link MTU {}", mtu);
                server.set_max_mtu(mtu);
            }
            Err(e) => error!(
                "failed to query link MTU, using {}: {}",
                config::DEFAULT_MTU,
                e
            ),
        }

        let outbox = Outbox {
            queue: Arc::new(OutgoingFrameQueue::new(RECORD_DELIMITER, options.queue_limit)),
        };

        state = SessionState::Active;
        info!("session {}: {:?}", peer, state);

        Ok(Self {
            bearer,
            peer,
            state,
            server,
            channel: RpcChannel {
                handles,
                outbox,
                inbox: RecordAssembler::new(RECORD_DELIMITER),
                on_record: None,
            },
            notify_interval: options.notify_interval,
            stop: Arc::new(Notify::new()),
            _guard: guard,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn rpc_handles(&self) -> RpcHandles {
        self.channel.handles
    }

    pub fn mtu(&self) -> u16 {
        self.server.mtu()
    }

    pub fn outbox(&self) -> Outbox {
        self.channel.outbox.clone()
    }

    pub fn stopper(&self) -> SessionStopper {
        SessionStopper {
            notify: self.stop.clone(),
        }
    }

    /// Route complete inbox records to `handler`.
    pub fn set_data_handler(&mut self, handler: DataHandler) {
        self.channel.on_record = Some(handler);
    }

    /// Queue one record for the peer.
    pub fn enqueue_for_send(&self, data: &[u8]) -> Result<(), QueueError> {
        self.channel.outbox.enqueue_for_send(data)
    }

    /// Serve the peer until it disconnects or the session is stopped.
    pub async fn run(&mut self) -> SessionState {
        if self.state != SessionState::Active {
            return self.state;
        }

        let mut ticker = tokio::time::interval(self.notify_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                pdu = self.bearer.recv() => match pdu {
                    Ok(pdu) if pdu.is_empty() => {
                        info!("peer {} disconnected", self.peer);
                        break;
                    }
                    Ok(pdu) => self.on_pdu(&pdu).await,
                    Err(e) => {
                        info!("peer {} disconnected: {}", self.peer, e);
                        break;
                    }
                },
                _ = ticker.tick() => self.on_timer().await,
                _ = self.stop.notified() => {
                    info!("stopping session with {}", self.peer);
                    break;
                }
            }
        }

        self.state = SessionState::Disconnected;
        self.state
    }

    async fn on_pdu(&mut self, pdu: &[u8]) {
        if let Some(response) = self.server.handle_pdu(pdu, &mut self.channel) {
            if let Err(e) = self.bearer.send(&response).await {
                warn!("ATT: failed to send response: {}", e);
            }
        }
    }

    /// Doorbell: notify the pending byte count, if any.
    async fn on_timer(&mut self) {
        let pending = self.channel.outbox.pending();
        if pending == 0 {
            return;
        }
        let count = u32::try_from(pending).unwrap_or(u32::MAX);
        let pdu = self
            .server
            .notification(self.channel.handles.epoll, &count.to_be_bytes());
        match self.bearer.send(&pdu).await {
            Ok(()) => debug!("doorbell: {} bytes pending", pending),
            Err(e) => warn!("failed to send doorbell notification: {}", e),
        }
    }
}
