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

//! BLE GATT connection listener for bleconfd.

use bluer::l2cap::{Security, SecurityLevel, SeqPacket, SeqPacketListener, Socket, SocketAddr};
use bluer::{Address, AddressType};
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::{self, JoinError};
use tracing::{debug, info};

use super::beacon::{AdvertisingState, BeaconConfiguration, BeaconController, Radio};
use super::ble_constants::config;
use super::hci::HciError;
use super::session::{AttBearer, GattSession, SessionError, SessionOptions, SessionSlot};
use crate::config::ListenerConfig;
use crate::provider::{DeviceInfoProvider, RdkDiagProvider};

/// Listener setup and accept failures. All of them end the process.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to create L2CAP socket: {0}")]
    Socket(#[source] io::Error),

    #[error("failed to bind L2CAP socket: {0}")]
    Bind(#[source] io::Error),

    #[error("failed to set L2CAP security level: {0}")]
    Security(#[source] io::Error),

    #[error("failed to listen on L2CAP socket: {0}")]
    Listen(#[source] io::Error),

    #[error("failed to accept incoming connection on bluetooth socket: {0}")]
    Accept(#[source] io::Error),

    #[error("beacon setup failed: {0}")]
    Beacon(#[from] HciError),

    #[error("beacon task failed: {0}")]
    BeaconTask(#[from] JoinError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// ATT bearer over an accepted LE fixed-channel socket.
pub struct L2capBearer {
    socket: SeqPacket,
    buf: Vec<u8>,
}

impl L2capBearer {
    pub fn new(socket: SeqPacket) -> Self {
        Self {
            socket,
            buf: vec![0; config::SERVER_RX_MTU as usize],
        }
    }
}

impl AttBearer for L2capBearer {
    async fn recv(&mut self) -> io::Result<Vec<u8>> {
        let n = self.socket.recv(&mut self.buf).await?;
        Ok(self.buf[..n].to_vec())
    }

    async fn send(&mut self, pdu: &[u8]) -> io::Result<()> {
        let n = self.socket.send(pdu).await?;
        if n != pdu.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short ATT send: {} of {} bytes", n, pdu.len()),
            ));
        }
        Ok(())
    }

    fn link_mtu(&self) -> io::Result<u16> {
        self.socket.as_ref().recv_mtu()
    }
}

/// Address the listener binds to: any local adapter, LE public, ATT channel.
fn listen_address() -> SocketAddr {
    SocketAddr {
        addr: Address::any(),
        addr_type: AddressType::LePublic,
        psm: 0,
        cid: config::ATT_CID,
    }
}

/// Run the beacon sequence on the blocking pool; it waits on HCI replies.
pub async fn start_beacon<R>(
    beacon: Arc<BeaconController<R>>,
    config: BeaconConfiguration,
) -> Result<AdvertisingState, TransportError>
where
    R: Radio + Send + Sync + 'static,
{
    let advertising = task::spawn_blocking(move || beacon.start(&config)).await??;
    Ok(advertising)
}

/// Listening socket plus the advertising it started.
pub struct GattServer {
    listener: SeqPacketListener,
    slot: SessionSlot,
    options: SessionOptions,
    advertising: AdvertisingState,
}

impl GattServer {
    /// Bind the ATT channel, then run the beacon sequence.
    pub async fn init<R>(
        config: &ListenerConfig,
        beacon: Arc<BeaconController<R>>,
        slot: SessionSlot,
    ) -> Result<Self, TransportError>
    where
        R: Radio + Send + Sync + 'static,
    {
        info!("Initializing BLE GATT listener...");

        let socket = Socket::<SeqPacket>::new_seq_packet().map_err(TransportError::Socket)?;
        socket
            .bind(listen_address())
            .map_err(TransportError::Bind)?;
        socket
            .set_security(Security {
                level: SecurityLevel::Low,
                key_size: 0,
            })
            .map_err(TransportError::Security)?;
        let listener = socket
            .listen(config::LISTEN_BACKLOG)
            .map_err(TransportError::Listen)?;
        debug!("L2CAP listener bound to cid {}", config::ATT_CID);

        let advertising = start_beacon(beacon, config.beacon_configuration()).await?;
        info!(
            "BLE advertising started on hci{} as '{}'",
            advertising.dev_id, advertising.local_name
        );

        Ok(Self {
            listener,
            slot,
            options: config.session_options(),
            advertising,
        })
    }

    pub fn advertising(&self) -> &AdvertisingState {
        &self.advertising
    }

    /// Wait for the next peer and build its session. Fails if a previous
    /// session is still alive.
    pub async fn accept(
        &self,
        device_info: &dyn DeviceInfoProvider,
        rdk_diag: &dyn RdkDiagProvider,
    ) -> Result<GattSession<L2capBearer>, TransportError> {
        info!("waiting for incoming BLE connections");
        let (socket, peer) = self.listener.accept().await.map_err(TransportError::Accept)?;
        info!("accepted remote connection from: {}", peer.addr);

        let session = GattSession::new(
            L2capBearer::new(socket),
            peer.addr.to_string(),
            &self.slot,
            &self.options,
            device_info,
            rdk_diag,
        )?;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::advertising::{BeaconIds, RawHciCommand};
    use crate::bluetooth::beacon::tests::RecordingRadio;
    use crate::bluetooth::hci::{AdapterInfo, HciEvent};
    use parking_lot::Mutex;
    use std::thread::{self, ThreadId};
    use std::time::Duration;

    /// Notes which thread each radio call ran on.
    struct ThreadRadio {
        inner: RecordingRadio,
        threads: Mutex<Vec<ThreadId>>,
    }

    impl ThreadRadio {
        fn note(&self) {
            self.threads.lock().push(thread::current().id());
        }
    }

    impl Radio for ThreadRadio {
        fn first_available_route(&self) -> Result<u16, HciError> {
            self.note();
            self.inner.first_available_route()
        }

        fn device_info(&self, dev: u16) -> Result<AdapterInfo, HciError> {
            self.note();
            self.inner.device_info(dev)
        }

        fn down(&self, dev: u16) -> Result<(), HciError> {
            self.note();
            self.inner.down(dev)
        }

        fn up(&self, dev: u16) -> Result<(), HciError> {
            self.note();
            self.inner.up(dev)
        }

        fn request(
            &self,
            dev: u16,
            ogf: u8,
            ocf: u16,
            params: &[u8],
            timeout: Duration,
        ) -> Result<Vec<u8>, HciError> {
            self.note();
            self.inner.request(dev, ogf, ocf, params, timeout)
        }

        fn raw_command(&self, dev: u16, command: &RawHciCommand) -> Result<HciEvent, HciError> {
            self.note();
            self.inner.raw_command(dev, command)
        }
    }

    fn beacon_configuration() -> BeaconConfiguration {
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

    #[tokio::test(flavor = "current_thread")]
    async fn test_beacon_runs_off_the_runtime_thread() {
        let beacon = Arc::new(BeaconController::new(ThreadRadio {
            inner: RecordingRadio::new(),
            threads: Mutex::new(Vec::new()),
        }));

        let state = start_beacon(beacon.clone(), beacon_configuration())
            .await
            .unwrap();
        assert_eq!(state.local_name, "XPI-SETUP");
        assert_eq!(state.address, "B8:27:EB:A0:DA:2C");

        let runtime_thread = thread::current().id();
        let threads = beacon.radio().threads.lock();
        assert!(!threads.is_empty());
        assert!(threads.iter().all(|id| *id != runtime_thread));
    }

    #[tokio::test]
    async fn test_beacon_failure_is_transport_error() {
        let mut radio = RecordingRadio::new();
        radio.up_errno = Some(libc::EIO);
        let beacon = Arc::new(BeaconController::new(radio));

        let err = start_beacon(beacon, beacon_configuration())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Beacon(_)));
    }

    #[test]
    fn test_listen_address() {
        let addr = listen_address();
        assert_eq!(addr.addr, Address::any());
        assert_eq!(addr.addr_type, AddressType::LePublic);
        assert_eq!(addr.psm, 0);
        assert_eq!(addr.cid, 4);
    }

    #[test]
    fn test_transport_error_messages() {
        let err = TransportError::Accept(io::Error::from(io::ErrorKind::ConnectionAborted));
        assert!(err
            .to_string()
            .starts_with("failed to accept incoming connection on bluetooth socket"));

        let err = TransportError::from(SessionError::AlreadyActive);
        assert_eq!(err.to_string(), "a GATT session is already active");
    }
}
