//! Serialized event loop.
//!
//! A single task owns the [`SessionManager`]. Transport events arrive over a
//! bounded channel and the inactivity deadline is a `sleep_until` in the
//! same `select!`, so exactly one event is handled at a time. When both are
//! ready the queued event goes first.
//!
//! Generations are allocated by the [`SessionHandle`] when a start or
//! trigger is enqueued. Chunks are stamped with the latest allocated
//! generation, so chunks queued behind a newer start are recognized as stale
//! by the manager. A start for the other transfer mode is forwarded under
//! the current generation, so the manager rejects it and the live session
//! keeps its chunks.

use crate::manager::{Event, PeerId, SessionManager, SessionSnapshot, Step};
use crate::session::{Generation, TransferMode};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// The event loop has shut down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("transfer loop has shut down")]
pub struct LoopClosed;

/// Cloneable sender side of the event loop
#[derive(Debug, Clone)]
pub struct SessionHandle {
    events: mpsc::Sender<Event>,
    snapshot: watch::Receiver<SessionSnapshot>,
    generation: Arc<AtomicU64>,
    mode: TransferMode,
}

impl SessionHandle {
    async fn send(&self, event: Event) -> Result<(), LoopClosed> {
        self.events.send(event).await.map_err(|_| LoopClosed)
    }

    /// Next generation for a start in `mode`. Wrong-mode starts never arm,
    /// so they reuse the current generation.
    fn allocate(&self, mode: TransferMode) -> Generation {
        if mode != self.mode {
            tracing::warn!(
                "{} start on a {} device, keeping generation {}",
                mode,
                self.mode,
                self.current_generation().get()
            );
            return self.current_generation();
        }
        Generation::new(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Current generation chunks are stamped with
    #[must_use]
    pub fn current_generation(&self) -> Generation {
        Generation::new(self.generation.load(Ordering::SeqCst))
    }

    /// A central connected
    ///
    /// # Errors
    ///
    /// Returns `LoopClosed` if the loop has stopped.
    pub async fn connect(&self, peer: PeerId) -> Result<(), LoopClosed> {
        self.send(Event::Connected(peer)).await
    }

    /// The central disconnected
    ///
    /// # Errors
    ///
    /// Returns `LoopClosed` if the loop has stopped.
    pub async fn disconnect(&self, peer: PeerId) -> Result<(), LoopClosed> {
        self.send(Event::Disconnected(peer)).await
    }

    /// Enqueue a declared-length start, returning its generation
    ///
    /// On an open-ended device the start is still enqueued, and rejected,
    /// but no new generation is taken.
    ///
    /// # Errors
    ///
    /// Returns `LoopClosed` if the loop has stopped.
    pub async fn start(&self, size: u64) -> Result<Generation, LoopClosed> {
        let generation = self.allocate(TransferMode::Declared);
        self.send(Event::Start { generation, size }).await?;
        Ok(generation)
    }

    /// Enqueue an open-ended trigger, returning its generation
    ///
    /// On a declared device the trigger is still enqueued, and rejected,
    /// but no new generation is taken.
    ///
    /// # Errors
    ///
    /// Returns `LoopClosed` if the loop has stopped.
    pub async fn trigger(&self) -> Result<Generation, LoopClosed> {
        let generation = self.allocate(TransferMode::OpenEnded);
        self.send(Event::Trigger { generation }).await?;
        Ok(generation)
    }

    /// Enqueue a cancel
    ///
    /// # Errors
    ///
    /// Returns `LoopClosed` if the loop has stopped.
    pub async fn cancel(&self) -> Result<(), LoopClosed> {
        self.send(Event::Cancel).await
    }

    /// Enqueue a status query
    ///
    /// # Errors
    ///
    /// Returns `LoopClosed` if the loop has stopped.
    pub async fn status(&self) -> Result<(), LoopClosed> {
        self.send(Event::Status).await
    }

    /// Enqueue a chunk stamped with the current generation
    ///
    /// # Errors
    ///
    /// Returns `LoopClosed` if the loop has stopped.
    pub async fn chunk(&self, data: impl Into<Vec<u8>>) -> Result<(), LoopClosed> {
        let generation = self.current_generation();
        self.send(Event::Chunk {
            generation,
            data: data.into(),
        })
        .await
    }

    /// Latest published snapshot
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        *self.snapshot.borrow()
    }

    /// Wait until a published snapshot satisfies `pred`
    ///
    /// # Errors
    ///
    /// Returns `LoopClosed` if the loop stops first.
    pub async fn wait_for(
        &self,
        mut pred: impl FnMut(&SessionSnapshot) -> bool,
    ) -> Result<SessionSnapshot, LoopClosed> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx.wait_for(|s| pred(s)).await.map_err(|_| LoopClosed)?;
        Ok(*snapshot)
    }
}

/// Spawn the event loop.
///
/// The loop runs until every [`SessionHandle`] is dropped, then returns the
/// manager through the join handle.
pub fn spawn(manager: SessionManager) -> (SessionHandle, JoinHandle<SessionManager>) {
    let (tx, rx) = mpsc::channel(manager.config().queue_depth);
    let (snapshot_tx, snapshot_rx) = watch::channel(manager.snapshot());
    let generation = Arc::new(AtomicU64::new(manager.generation().get()));

    let handle = SessionHandle {
        events: tx,
        snapshot: snapshot_rx,
        generation,
        mode: manager.config().mode,
    };
    let task = tokio::spawn(run(manager, rx, snapshot_tx));
    (handle, task)
}

async fn run(
    mut manager: SessionManager,
    mut events: mpsc::Receiver<Event>,
    snapshot: watch::Sender<SessionSnapshot>,
) -> SessionManager {
    tracing::info!("Transfer loop started ({} mode)", manager.config().mode);

    loop {
        let deadline = manager.deadline();
        let step = tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(event) => manager.handle(event, now()),
                None => break,
            },
            generation = expiry(deadline) => {
                manager.handle(Event::Timeout { generation }, now())
            }
        };

        if let Step::Failed { error, .. } = &step {
            tracing::debug!("Loop step failed: {} ({})", error, error.category());
        }
        snapshot.send_replace(manager.snapshot());
    }

    tracing::info!("Transfer loop stopped: {:?}", manager.stats());
    manager
}

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

async fn expiry(deadline: Option<(Generation, std::time::Instant)>) -> Generation {
    match deadline {
        Some((generation, at)) => {
            tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await;
            generation
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferConfig;
    use crate::display::HeaderRenderer;
    use crate::session::TransferState;
    use crate::storage::{BlobStore, MemoryStore};
    use std::time::Duration;

    const PEER: PeerId = PeerId([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

    fn gif() -> Vec<u8> {
        let mut data = b"GIF89a".to_vec();
        data.extend_from_slice(&[4, 0, 4, 0, 0, 0, 0]);
        data.extend_from_slice(&[0u8; 20]);
        data.push(0x3B);
        data
    }

    fn spawn_with(config: TransferConfig) -> (SessionHandle, JoinHandle<SessionManager>) {
        let manager = SessionManager::new(
            config,
            Box::new(MemoryStore::default()),
            Box::new(HeaderRenderer::new()),
        )
        .unwrap();
        spawn(manager)
    }

    #[tokio::test]
    async fn test_declared_transfer_through_loop() {
        let (handle, task) = spawn_with(TransferConfig::declared());
        let image = gif();

        handle.connect(PEER).await.unwrap();
        let generation = handle.start(image.len() as u64).await.unwrap();
        assert_eq!(generation, Generation::new(1));
        for part in image.chunks(10) {
            handle.chunk(part).await.unwrap();
        }
        drop(handle);

        let manager = task.await.unwrap();
        assert_eq!(manager.stats().sessions_completed, 1);
        assert_eq!(manager.store().load("current.img").unwrap(), image);
    }

    #[tokio::test]
    async fn test_open_ended_completes_after_silence() {
        let mut config = TransferConfig::open_ended();
        config.inactivity_timeout = Duration::from_millis(200);
        let (handle, task) = spawn_with(config);

        handle.connect(PEER).await.unwrap();
        handle.trigger().await.unwrap();
        handle.chunk(gif()).await.unwrap();

        let snapshot = handle
            .wait_for(|s| s.state == TransferState::Receiving)
            .await
            .unwrap();
        assert_eq!(snapshot.received, gif().len());

        let snapshot = tokio::time::timeout(
            Duration::from_secs(2),
            handle.wait_for(|s| s.state == TransferState::Idle),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(snapshot.generation, Generation::new(1));

        drop(handle);
        let manager = task.await.unwrap();
        assert_eq!(manager.stats().sessions_completed, 1);
    }

    #[tokio::test]
    async fn test_chunks_behind_new_start_use_new_generation() {
        let (handle, task) = spawn_with(TransferConfig::declared());
        let image = gif();

        handle.connect(PEER).await.unwrap();
        handle.start(1000).await.unwrap();
        handle.chunk(vec![0u8; 10]).await.unwrap();
        handle.start(image.len() as u64).await.unwrap();
        handle.chunk(image.clone()).await.unwrap();
        drop(handle);

        let manager = task.await.unwrap();
        let stats = manager.stats();
        assert_eq!(stats.sessions_started, 2);
        assert_eq!(stats.sessions_failed, 1);
        assert_eq!(stats.sessions_completed, 1);
    }

    #[tokio::test]
    async fn test_wrong_mode_trigger_keeps_live_session() {
        let (handle, task) = spawn_with(TransferConfig::declared());
        let image = gif();

        handle.connect(PEER).await.unwrap();
        let generation = handle.start(image.len() as u64).await.unwrap();
        handle.chunk(&image[..10]).await.unwrap();

        assert_eq!(handle.trigger().await.unwrap(), generation);
        assert_eq!(handle.current_generation(), generation);

        handle.chunk(&image[10..]).await.unwrap();
        drop(handle);

        let manager = task.await.unwrap();
        let stats = manager.stats();
        assert_eq!(stats.starts_rejected, 1);
        assert_eq!(stats.stale_chunks, 0);
        assert_eq!(stats.sessions_completed, 1);
        assert_eq!(manager.store().load("current.img").unwrap(), image);
    }

    #[tokio::test]
    async fn test_wrong_mode_start_keeps_generation() {
        let (handle, task) = spawn_with(TransferConfig::open_ended());

        handle.connect(PEER).await.unwrap();
        let generation = handle.trigger().await.unwrap();
        assert_eq!(handle.start(34).await.unwrap(), generation);
        handle.chunk(gif()).await.unwrap();

        let snapshot = handle
            .wait_for(|s| s.received == gif().len())
            .await
            .unwrap();
        assert_eq!(snapshot.generation, generation);

        drop(handle);
        let stats = task.await.unwrap().stats();
        assert_eq!(stats.starts_rejected, 1);
        assert_eq!(stats.stale_chunks, 0);
    }

    #[tokio::test]
    async fn test_send_after_shutdown() {
        let (handle, task) = spawn_with(TransferConfig::declared());
        task.abort();
        let _ = task.await;
        assert_eq!(handle.status().await, Err(LoopClosed));
    }
}
