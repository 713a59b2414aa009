//! Running device fixture
//!
//! Spawns the session event loop behind a [`GattServer`] and records every
//! indication and notification the device sends back.
//!
//! # Example
//!
//! ```no_run
//! use dott_core::{Characteristic, TransferConfig};
//! use dott_integration_tests::fixtures::{Device, images};
//!
//! # async fn run() {
//! let device = Device::spawn(TransferConfig::declared()).await;
//! let image = images::gif(8, 8);
//! let generation = device.start(image.len()).await;
//! device.write_all(Characteristic::ImageData, &image, 10).await;
//! device.settle(generation).await;
//! assert_eq!(device.wire.results(), vec!["Transfer Complete"]);
//! # }
//! ```

use dott_core::protocol::Command;
use dott_core::runtime;
use dott_core::{
    BlobStore, Characteristic, GattNotifier, GattServer, Generation, HeaderRenderer, LinkSink,
    MemoryStore, PeerId, Renderer, SessionHandle, SessionManager, SessionSnapshot,
    TransferConfig, TransferState,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Address the test central connects from
pub const PEER: PeerId = PeerId([0x02, 0x7E, 0x57, 0x00, 0x00, 0x01]);

/// Upper bound on how long any single wait in a test may take
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// One outbound value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    /// `true` for an indication
    pub indication: bool,
    /// Source characteristic
    pub characteristic: Characteristic,
    /// Payload
    pub value: Vec<u8>,
}

/// Link sink that records everything
#[derive(Debug, Clone, Default)]
pub struct Wire(Arc<Mutex<Vec<Sent>>>);

impl Wire {
    /// Everything sent so far
    #[must_use]
    pub fn sent(&self) -> Vec<Sent> {
        self.0.lock().unwrap().clone()
    }

    /// Text results ("Transfer Complete" / "Transfer Fail") in order
    #[must_use]
    pub fn results(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|s| !s.indication)
            .filter(|s| s.value.starts_with(b"Transfer"))
            .map(|s| String::from_utf8_lossy(&s.value).into_owned())
            .collect()
    }

    /// Number of indications sent
    #[must_use]
    pub fn indications(&self) -> usize {
        self.sent().iter().filter(|s| s.indication).count()
    }

    fn push(&self, indication: bool, characteristic: Characteristic, value: &[u8]) {
        self.0.lock().unwrap().push(Sent {
            indication,
            characteristic,
            value: value.to_vec(),
        });
    }
}

impl LinkSink for Wire {
    fn indicate(&mut self, characteristic: Characteristic, value: &[u8]) {
        self.push(true, characteristic, value);
    }

    fn notify(&mut self, characteristic: Characteristic, value: &[u8]) {
        self.push(false, characteristic, value);
    }
}

/// A connected device running its event loop
pub struct Device {
    /// Inbound GATT side
    pub server: GattServer,
    /// Outbound link
    pub wire: Wire,
    task: JoinHandle<SessionManager>,
}

impl Device {
    /// Spawn with an unlimited in-memory store and the header renderer
    pub async fn spawn(config: TransferConfig) -> Self {
        Self::spawn_with(
            config,
            Box::new(MemoryStore::default()),
            Box::new(HeaderRenderer::new()),
        )
        .await
    }

    /// Spawn with an explicit store and renderer, then connect [`PEER`]
    pub async fn spawn_with(
        config: TransferConfig,
        store: Box<dyn BlobStore>,
        renderer: Box<dyn Renderer>,
    ) -> Self {
        let wire = Wire::default();
        let mode = config.mode;
        let mut manager = SessionManager::new(config, store, renderer).unwrap();
        manager.set_transfer_listener(Box::new(GattNotifier::new(mode, wire.clone())));

        let (handle, task) = runtime::spawn(manager);
        let server = GattServer::new(handle);
        server.connect(PEER).await.unwrap();

        Self { server, wire, task }
    }

    /// Session handle behind the server
    #[must_use]
    pub fn handle(&self) -> &SessionHandle {
        self.server.handle()
    }

    /// Write a declared start command, returning the allocated generation
    pub async fn start(&self, size: usize) -> Generation {
        let size = u32::try_from(size).unwrap();
        self.server
            .write(Characteristic::Control, &Command::Start { size }.encode())
            .await
            .unwrap();
        self.handle().current_generation()
    }

    /// Write the open-ended trigger, returning the allocated generation
    pub async fn trigger(&self) -> Generation {
        self.server
            .write(Characteristic::Trigger, &dott_core::protocol::TRIGGER_BYTES)
            .await
            .unwrap();
        self.handle().current_generation()
    }

    /// Write `data` to `characteristic` in `chunk_size` pieces
    pub async fn write_all(&self, characteristic: Characteristic, data: &[u8], chunk_size: usize) {
        for chunk in data.chunks(chunk_size) {
            self.server.write(characteristic, chunk).await.unwrap();
        }
    }

    /// Wait until `generation` (or a later one) has been seen and the
    /// manager is idle again
    pub async fn settle(&self, generation: Generation) -> SessionSnapshot {
        self.wait_for(|s| s.generation >= generation && s.state == TransferState::Idle)
            .await
    }

    /// Wait for a snapshot matching `pred`, failing the test after a bound
    pub async fn wait_for(&self, pred: impl FnMut(&SessionSnapshot) -> bool) -> SessionSnapshot {
        tokio::time::timeout(SETTLE_TIMEOUT, self.handle().wait_for(pred))
            .await
            .expect("timed out waiting for snapshot")
            .unwrap()
    }

    /// Drop the link, drain the queue, and return the manager
    pub async fn shutdown(self) -> SessionManager {
        drop(self.server);
        tokio::time::timeout(SETTLE_TIMEOUT, self.task)
            .await
            .expect("event loop did not stop")
            .unwrap()
    }
}
