//! Simulated device: a session manager wired to a directory-backed store,
//! the header renderer, and a console link.

use crate::config::StorageConfig;
use dott_core::{
    Characteristic, FsStore, GattNotifier, HeaderRenderer, LinkSink, SessionManager,
    TransferConfig,
};
use std::sync::{Arc, Mutex};

/// One outbound indication or notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// `true` for an indication
    pub indication: bool,
    /// Source characteristic
    pub characteristic: Characteristic,
    /// Payload
    pub value: Vec<u8>,
}

impl Notification {
    /// Payload as text if it is printable ASCII, hex otherwise
    #[must_use]
    pub fn render(&self) -> String {
        if !self.value.is_empty() && self.value.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            String::from_utf8_lossy(&self.value).into_owned()
        } else {
            hex::encode(&self.value)
        }
    }
}

/// Link sink that prints and records everything sent to the central
#[derive(Debug, Clone, Default)]
pub struct ConsoleSink {
    log: Arc<Mutex<Vec<Notification>>>,
    quiet: bool,
}

impl ConsoleSink {
    /// Recording sink that does not print
    #[must_use]
    pub fn quiet() -> Self {
        Self {
            quiet: true,
            ..Self::default()
        }
    }

    /// Everything sent so far
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    fn push(&mut self, indication: bool, characteristic: Characteristic, value: &[u8]) {
        let notification = Notification {
            indication,
            characteristic,
            value: value.to_vec(),
        };
        if !self.quiet {
            let verb = if indication { "indicate" } else { "notify" };
            println!("  <- {verb} {characteristic:?}: {}", notification.render());
        }
        if let Ok(mut log) = self.log.lock() {
            log.push(notification);
        }
    }
}

impl LinkSink for ConsoleSink {
    fn indicate(&mut self, characteristic: Characteristic, value: &[u8]) {
        self.push(true, characteristic, value);
    }

    fn notify(&mut self, characteristic: Characteristic, value: &[u8]) {
        self.push(false, characteristic, value);
    }
}

/// Build a session manager over the configured storage directory
///
/// # Errors
///
/// Returns an error if the store cannot be opened or the transfer
/// configuration is invalid.
pub fn build_manager(
    transfer: TransferConfig,
    storage: &StorageConfig,
    sink: ConsoleSink,
) -> anyhow::Result<SessionManager> {
    let store = FsStore::open(&storage.dir, storage.quota)?;
    let mode = transfer.mode;
    let mut manager =
        SessionManager::new(transfer, Box::new(store), Box::new(HeaderRenderer::new()))?;
    manager.set_transfer_listener(Box::new(GattNotifier::new(mode, sink)));
    Ok(manager)
}
