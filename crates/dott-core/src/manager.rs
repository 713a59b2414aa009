//! Session manager.
//!
//! Owns at most one [`TransferSession`] and is the only thing that mutates
//! it. Every transport event and timer expiry goes through
//! [`SessionManager::handle`], one at a time.

use crate::arbiter::Verdict;
use crate::config::{ConfigError, TransferConfig};
use crate::display::{RenderedFrame, Renderer};
use crate::error::{Error, FormatError, LinkError, ProtocolError, ResourceError};
use crate::observer::{Listeners, ProgressListener, TransferListener, TransferReport};
use crate::protocol::{DeviceInfo, StatusReport};
use crate::session::{Generation, TransferMode, TransferSession, TransferState};
use crate::storage::BlobStore;
use crate::validate::validate;
use std::fmt;
use std::time::Instant;

/// Bluetooth device address of the connected central
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub [u8; 6]);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Input to the session manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A central connected
    Connected(PeerId),
    /// The central disconnected
    Disconnected(PeerId),
    /// Declared-length start command
    Start {
        /// Generation the new session will carry
        generation: Generation,
        /// Declared byte count
        size: u64,
    },
    /// Open-ended trigger
    Trigger {
        /// Generation the new session will carry
        generation: Generation,
    },
    /// Cancel command
    Cancel,
    /// Status command
    Status,
    /// Image data
    Chunk {
        /// Generation current when the chunk was enqueued
        generation: Generation,
        /// Chunk payload
        data: Vec<u8>,
    },
    /// Inactivity deadline reached
    Timeout {
        /// Session the deadline belonged to
        generation: Generation,
    },
}

impl Event {
    /// Short event name for logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::Disconnected(_) => "disconnected",
            Self::Start { .. } => "start",
            Self::Trigger { .. } => "trigger",
            Self::Cancel => "cancel",
            Self::Status => "status",
            Self::Chunk { .. } => "chunk",
            Self::Timeout { .. } => "timeout",
        }
    }
}

/// What handling one event did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Nothing changed
    Ignored,
    /// Peer binding changed
    Linked,
    /// A session was armed
    Armed(Generation),
    /// A chunk was accepted
    Accepted {
        /// Session generation
        generation: Generation,
        /// Bytes accepted so far
        received: usize,
    },
    /// A session committed its image
    Completed(TransferReport),
    /// A session failed, or a start was rejected
    Failed {
        /// Session generation, `None` if no session was armed
        generation: Option<Generation>,
        /// Failure reason
        error: Error,
    },
    /// A status report was produced
    Status(StatusReport),
}

/// Point-in-time view of the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Session state, `Idle` when there is no session
    pub state: TransferState,
    /// Configured mode
    pub mode: TransferMode,
    /// Most recent generation seen
    pub generation: Generation,
    /// Bytes accepted by the current session
    pub received: usize,
    /// Declared size of the current session
    pub expected: Option<usize>,
    /// Whether a peer is bound
    pub connected: bool,
    /// Free image storage in bytes
    pub free_space: u64,
}

impl SessionSnapshot {
    /// Status report for this snapshot
    #[must_use]
    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            state: self.state,
            received: u32::try_from(self.received).unwrap_or(u32::MAX),
            expected: self
                .expected
                .map_or(0, |e| u32::try_from(e).unwrap_or(u32::MAX)),
        }
    }
}

/// Session manager statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Sessions armed
    pub sessions_started: u64,
    /// Sessions committed
    pub sessions_completed: u64,
    /// Sessions failed
    pub sessions_failed: u64,
    /// Start requests rejected before arming
    pub starts_rejected: u64,
    /// Allocation failures so far
    pub allocation_failures: u64,
    /// Bytes accepted across all sessions
    pub bytes_received: u64,
    /// Chunks dropped for belonging to an older generation
    pub stale_chunks: u64,
    /// Events dropped for arriving with no session or no peer
    pub dropped_events: u64,
}

/// Owner of the single active transfer session
pub struct SessionManager {
    config: TransferConfig,
    session: Option<TransferSession>,
    generation: Generation,
    peer: Option<PeerId>,
    store: Box<dyn BlobStore>,
    renderer: Box<dyn Renderer>,
    listeners: Listeners,
    stats: ManagerStats,
    free_space: u64,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("session", &self.session)
            .field("generation", &self.generation)
            .field("peer", &self.peer)
            .field("listeners", &self.listeners)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a manager.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `config` does not validate.
    pub fn new(
        config: TransferConfig,
        store: Box<dyn BlobStore>,
        renderer: Box<dyn Renderer>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let free_space = store.free_space();
        tracing::debug!(
            "Session manager ready: {} mode, {} bytes free",
            config.mode,
            free_space
        );

        Ok(Self {
            config,
            session: None,
            generation: Generation::ZERO,
            peer: None,
            store,
            renderer,
            listeners: Listeners::default(),
            stats: ManagerStats::default(),
            free_space,
        })
    }

    /// Register the lifecycle listener, replacing any previous one
    pub fn set_transfer_listener(&mut self, listener: Box<dyn TransferListener>) {
        self.listeners.set_transfer(listener);
    }

    /// Register the progress listener, replacing any previous one
    pub fn set_progress_listener(&mut self, listener: Box<dyn ProgressListener>) {
        self.listeners.set_progress(listener);
    }

    /// Handle one event
    pub fn handle(&mut self, event: Event, now: Instant) -> Step {
        match event {
            Event::Connected(peer) => self.on_connected(peer),
            Event::Disconnected(peer) => self.on_disconnected(peer),
            Event::Timeout { generation } => self.on_timeout(generation, now),
            other if self.peer.is_none() => {
                tracing::warn!("No peer bound, dropping {} event", other.kind());
                self.stats.dropped_events += 1;
                Step::Ignored
            }
            Event::Start { generation, size } => self.on_start(generation, Some(size), now),
            Event::Trigger { generation } => self.on_start(generation, None, now),
            Event::Cancel => self.abort(LinkError::Cancelled),
            Event::Status => {
                let report = self.snapshot().status_report();
                self.listeners.status(&report);
                Step::Status(report)
            }
            Event::Chunk { generation, data } => self.on_chunk(generation, &data, now),
        }
    }

    fn on_connected(&mut self, peer: PeerId) -> Step {
        let step = self.abort(LinkError::Disconnected);
        if let Some(old) = self.peer.replace(peer) {
            tracing::warn!("Peer {} replaced by {}", old, peer);
        }
        tracing::info!("Peer {} connected", peer);
        match step {
            Step::Ignored => Step::Linked,
            failed => failed,
        }
    }

    fn on_disconnected(&mut self, peer: PeerId) -> Step {
        if self.peer != Some(peer) {
            tracing::warn!("Disconnect from unbound peer {}, ignoring", peer);
            return Step::Ignored;
        }
        self.peer = None;
        tracing::info!("Peer {} disconnected", peer);
        match self.abort(LinkError::Disconnected) {
            Step::Ignored => Step::Linked,
            failed => failed,
        }
    }

    fn on_start(&mut self, generation: Generation, size: Option<u64>, now: Instant) -> Step {
        let mode = self.config.mode;
        if matches!(
            (mode, size),
            (TransferMode::Declared, None) | (TransferMode::OpenEnded, Some(_))
        ) {
            let error = Error::from(ProtocolError::WrongMode(mode.as_str()));
            tracing::warn!("Rejected start: {}", error);
            return self.reject(error);
        }

        if generation <= self.generation {
            tracing::debug!(
                "Ignoring stale start {} (current {})",
                generation,
                self.generation
            );
            return Step::Ignored;
        }
        self.generation = generation;

        if self.session.is_some() {
            self.abort(LinkError::Superseded);
        }

        let armed = match size {
            Some(size) => {
                TransferSession::arm_declared(generation, size, self.config.max_image_size, now)
            }
            None => TransferSession::arm_open_ended(
                generation,
                self.config.open_ended_capacity,
                self.config.inactivity_timeout,
                now,
            ),
        };

        match armed {
            Ok(session) => {
                self.stats.sessions_started += 1;
                self.session = Some(session);
                self.listeners.armed(generation, mode);
                Step::Armed(generation)
            }
            Err(error) => {
                if matches!(error, Error::Resource(ResourceError::Allocation(_))) {
                    self.stats.allocation_failures += 1;
                    tracing::error!(
                        "Buffer allocation failed ({} failures so far)",
                        self.stats.allocation_failures
                    );
                } else {
                    tracing::warn!("Rejected start {}: {}", generation, error);
                }
                self.reject(error)
            }
        }
    }

    fn reject(&mut self, error: Error) -> Step {
        self.stats.starts_rejected += 1;
        self.listeners.failed(None, &error);
        Step::Failed {
            generation: None,
            error,
        }
    }

    fn on_chunk(&mut self, generation: Generation, data: &[u8], now: Instant) -> Step {
        let Some(session) = self.session.as_mut() else {
            if generation < self.generation {
                self.stats.stale_chunks += 1;
                tracing::debug!("Dropping stale chunk from {}", generation);
            } else {
                self.stats.dropped_events += 1;
                tracing::warn!("Dropping {} byte chunk while idle", data.len());
            }
            return Step::Ignored;
        };

        if session.generation() != generation {
            self.stats.stale_chunks += 1;
            tracing::debug!(
                "Dropping stale chunk from {} (current {})",
                generation,
                session.generation()
            );
            return Step::Ignored;
        }

        match session.accept_chunk(data, now) {
            Ok(verdict) => {
                let received = session.received();
                let expected = session.expected();
                self.stats.bytes_received += data.len() as u64;
                self.listeners.progress(generation, received, expected);
                match verdict {
                    Verdict::Continue => Step::Accepted {
                        generation,
                        received,
                    },
                    Verdict::Complete => self.finish(),
                }
            }
            Err(error) => self.conclude_failed(error),
        }
    }

    fn on_timeout(&mut self, generation: Generation, now: Instant) -> Step {
        let Some(session) = self.session.as_mut() else {
            return Step::Ignored;
        };
        if session.generation() != generation {
            tracing::debug!("Ignoring timer for {}", generation);
            return Step::Ignored;
        }

        match session.on_timer(now) {
            Ok(Verdict::Complete) => self.finish(),
            Ok(Verdict::Continue) => Step::Ignored,
            Err(error) => self.conclude_failed(error),
        }
    }

    /// Validate, persist, then render
    fn finish(&mut self) -> Step {
        let Some(session) = self.session.as_mut() else {
            return Step::Ignored;
        };

        let outcome = session.validate();
        if let Some(reason) = outcome.reason {
            return self.conclude_failed(reason);
        }

        let Some(image) = session.image() else {
            return self.conclude_failed(FormatError::NoData.into());
        };

        if let Err(err) = self.store.save(&self.config.image_name, image) {
            tracing::error!("Failed to persist {}: {}", self.config.image_name, err);
            let error = session.fail(ResourceError::Commit(err).into());
            return self.conclude_failed(error);
        }

        let rendered = match self.renderer.render(image) {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!("Display failed, image kept: {}", err);
                false
            }
        };

        let report = TransferReport {
            generation: session.generation(),
            mode: session.mode(),
            format: outcome.format,
            width: outcome.width,
            height: outcome.height,
            bytes: session.received(),
            trailer_present: outcome.trailer_present,
            rendered,
            elapsed: session.elapsed(),
        };
        session.complete();

        self.close_session();
        self.free_space = self.store.free_space();
        self.stats.sessions_completed += 1;
        self.listeners.complete(&report);
        Step::Completed(report)
    }

    fn abort(&mut self, reason: LinkError) -> Step {
        match self.session.as_mut() {
            Some(session) => {
                let error = session.fail(reason.into());
                self.conclude_failed(error)
            }
            None => Step::Ignored,
        }
    }

    fn conclude_failed(&mut self, error: Error) -> Step {
        let generation = self.close_session();
        self.stats.sessions_failed += 1;
        self.listeners.failed(generation, &error);
        Step::Failed { generation, error }
    }

    fn close_session(&mut self) -> Option<Generation> {
        let mut session = self.session.take()?;
        session.close();
        Some(session.generation())
    }

    /// Load the stored image and show it again.
    ///
    /// A missing or invalid image is logged and left alone.
    pub fn restore_last_image(&mut self) -> Option<RenderedFrame> {
        let name = &self.config.image_name;
        let data = match self.store.load(name) {
            Ok(data) => data,
            Err(err) => {
                tracing::info!("No stored image to restore: {}", err);
                return None;
            }
        };

        let outcome = validate(&data);
        if let Some(reason) = outcome.reason {
            tracing::warn!("Stored image {} is invalid: {}", name, reason);
            return None;
        }

        match self.renderer.render(&data) {
            Ok(frame) => {
                tracing::info!("Restored {} ({} bytes)", name, data.len());
                Some(frame)
            }
            Err(err) => {
                tracing::warn!("Could not display stored image: {}", err);
                None
            }
        }
    }

    /// Device information with current free space
    #[must_use]
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo::current(self.free_space)
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let (state, received, expected) = self
            .session
            .as_ref()
            .map_or((TransferState::Idle, 0, None), |s| {
                (s.state(), s.received(), s.expected())
            });

        SessionSnapshot {
            state,
            mode: self.config.mode,
            generation: self.generation,
            received,
            expected,
            connected: self.peer.is_some(),
            free_space: self.free_space,
        }
    }

    /// Pending inactivity deadline and the session it belongs to
    #[must_use]
    pub fn deadline(&self) -> Option<(Generation, Instant)> {
        let session = self.session.as_ref()?;
        session.deadline().map(|d| (session.generation(), d))
    }

    /// Active session, if any
    #[must_use]
    pub fn session(&self) -> Option<&TransferSession> {
        self.session.as_ref()
    }

    /// Most recent generation seen
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Bound peer
    #[must_use]
    pub fn peer(&self) -> Option<PeerId> {
        self.peer
    }

    /// Transfer configuration
    #[must_use]
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Statistics
    #[must_use]
    pub fn stats(&self) -> ManagerStats {
        self.stats
    }

    /// Blob store
    #[must_use]
    pub fn store(&self) -> &dyn BlobStore {
        self.store.as_ref()
    }
}
