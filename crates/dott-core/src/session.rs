//! Transfer session state machine.
//!
//! One [`TransferSession`] exists per upload. It owns the ingestion buffer
//! and the completion arbiter for its whole life and releases the buffer
//! exactly once, on whichever terminal path it takes.
//!
//! ```text
//! Idle ─start─> Armed ─chunk─> Receiving ─arbiter─> Arbitrating ─> Validating ─> Complete ─┐
//!                 │                │                     │              │                  │
//!                 └────────────────┴─────────> Failed <──┴──────────────┘                  │
//!                                                 └──────────────> Idle <──────────────────┘
//! ```

use crate::arbiter::{CompletionArbiter, Verdict};
use crate::buffer::IngestBuffer;
use crate::error::{Error, FormatError, ResourceError};
use crate::format::{ImageFormat, magic_hex};
use crate::validate::{ValidationOutcome, validate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Session generation.
///
/// Strictly increasing across sessions. Every chunk is stamped with the
/// generation current when it was enqueued; chunks from an older generation
/// are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
    /// Generation before any session
    pub const ZERO: Self = Self(0);

    /// Wrap a raw counter value
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The generation after this one
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Raw counter value
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How the end of a transfer is determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferMode {
    /// Start command carries the exact byte count
    Declared,
    /// Trigger arms the session; inactivity ends it
    OpenEnded,
}

impl TransferMode {
    /// Lowercase name as used in configuration files
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Declared => "declared",
            Self::OpenEnded => "open-ended",
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transfer session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferState {
    /// No session; waiting for a start or trigger
    Idle,
    /// Buffer allocated, no data yet
    Armed,
    /// At least one chunk accepted
    Receiving,
    /// Arbiter declared the session over
    Arbitrating,
    /// Structural validation and commit in progress
    Validating,
    /// Image committed
    Complete,
    /// Session failed; buffer released
    Failed,
}

impl TransferState {
    /// Single-byte code used in status reports
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Armed => 1,
            Self::Receiving => 2,
            Self::Arbitrating => 3,
            Self::Validating => 4,
            Self::Complete => 5,
            Self::Failed => 6,
        }
    }

    /// Check if this state ends a session
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// One upload, from arming to its terminal state
#[derive(Debug)]
pub struct TransferSession {
    generation: Generation,
    mode: TransferMode,
    state: TransferState,
    buffer: Option<IngestBuffer>,
    arbiter: CompletionArbiter,
    expected: Option<usize>,
    capacity: usize,
    received: usize,
    chunks: u64,
    format: ImageFormat,
    error: Option<Error>,
    armed_at: Instant,
    last_activity: Instant,
}

impl TransferSession {
    fn new(
        generation: Generation,
        mode: TransferMode,
        buffer: IngestBuffer,
        arbiter: CompletionArbiter,
        expected: Option<usize>,
        now: Instant,
    ) -> Self {
        let capacity = buffer.capacity();
        let mut session = Self {
            generation,
            mode,
            state: TransferState::Idle,
            buffer: Some(buffer),
            arbiter,
            expected,
            capacity,
            received: 0,
            chunks: 0,
            format: ImageFormat::Unknown,
            error: None,
            armed_at: now,
            last_activity: now,
        };
        session.transition_to(TransferState::Armed);
        session
    }

    /// Arm a declared-length session.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::InvalidSize` if `size` is zero or above `max`,
    /// and `ResourceError::Allocation` if the buffer cannot be reserved.
    pub fn arm_declared(
        generation: Generation,
        size: u64,
        max: usize,
        now: Instant,
    ) -> Result<Self, Error> {
        let expected = usize::try_from(size)
            .ok()
            .filter(|&s| s > 0 && s <= max)
            .ok_or(ResourceError::InvalidSize { size, max })?;

        let buffer = IngestBuffer::with_capacity(expected)?;
        tracing::info!(
            "Session {} armed: declared {} bytes",
            generation,
            expected
        );

        Ok(Self::new(
            generation,
            TransferMode::Declared,
            buffer,
            CompletionArbiter::declared(expected),
            Some(expected),
            now,
        ))
    }

    /// Arm an open-ended session with a fixed buffer capacity.
    ///
    /// The inactivity deadline starts running immediately.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::Allocation` if the buffer cannot be reserved.
    pub fn arm_open_ended(
        generation: Generation,
        capacity: usize,
        window: Duration,
        now: Instant,
    ) -> Result<Self, Error> {
        let buffer = IngestBuffer::with_capacity(capacity)?;
        tracing::info!(
            "Session {} armed: open-ended, capacity {} bytes, {:?} inactivity window",
            generation,
            capacity,
            window
        );

        Ok(Self::new(
            generation,
            TransferMode::OpenEnded,
            buffer,
            CompletionArbiter::open_ended(window, now),
            None,
            now,
        ))
    }

    /// Check if a state transition is valid
    #[must_use]
    pub fn can_transition(&self, to: TransferState) -> bool {
        use TransferState::{Arbitrating, Armed, Complete, Failed, Idle, Receiving, Validating};

        matches!(
            (self.state, to),
            (Idle, Armed)
                | (Armed, Receiving | Failed)
                | (Receiving, Arbitrating | Failed)
                | (Arbitrating, Validating | Failed)
                | (Validating, Complete | Failed)
                | (Complete | Failed, Idle)
        )
    }

    fn transition_to(&mut self, new_state: TransferState) -> bool {
        if !self.can_transition(new_state) {
            tracing::error!(
                "Session {} rejected transition: {:?} -> {:?}",
                self.generation,
                self.state,
                new_state
            );
            return false;
        }

        let old_state = self.state;
        self.state = new_state;

        if matches!(
            new_state,
            TransferState::Complete | TransferState::Failed | TransferState::Idle
        ) {
            self.release();
        }

        tracing::debug!(
            "Session {} state transition: {:?} -> {:?}",
            self.generation,
            old_state,
            new_state
        );
        true
    }

    fn release(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            tracing::debug!(
                "Session {} released {} byte buffer ({} used)",
                self.generation,
                buffer.capacity(),
                buffer.len()
            );
        }
    }

    /// Accept one chunk of image data.
    ///
    /// The first chunk of an open-ended session must carry a recognizable
    /// magic prefix. Chunks are never partially accepted.
    ///
    /// # Errors
    ///
    /// Returns `Error::Overflow` if the chunk does not fit and
    /// `FormatError::Unrecognized` if an open-ended session's first chunk has
    /// no known magic. The session is `Failed` afterwards.
    pub fn accept_chunk(&mut self, data: &[u8], now: Instant) -> Result<Verdict, Error> {
        if !self.is_accepting() {
            tracing::warn!(
                "Session {} dropping {} byte chunk in state {:?}",
                self.generation,
                data.len(),
                self.state
            );
            return Ok(Verdict::Continue);
        }

        if self.state == TransferState::Armed && self.mode == TransferMode::OpenEnded {
            let format = ImageFormat::detect(data);
            if !format.is_known() {
                let err = Error::from(FormatError::Unrecognized(magic_hex(data)));
                return Err(self.fail(err));
            }
            tracing::info!("Session {} receiving {}", self.generation, format);
            self.format = format;
        }

        let Some(buffer) = self.buffer.as_mut() else {
            return Ok(Verdict::Continue);
        };
        if let Err(err) = buffer.append(data) {
            return Err(self.fail(err));
        }
        self.received = buffer.len();
        self.chunks += 1;
        self.last_activity = now;

        if self.state == TransferState::Armed {
            self.transition_to(TransferState::Receiving);
        }

        let verdict = self.arbiter.on_chunk(self.received, now);
        if verdict == Verdict::Complete {
            self.transition_to(TransferState::Arbitrating);
        }
        Ok(verdict)
    }

    /// Inactivity timer fired.
    ///
    /// # Errors
    ///
    /// Returns `FormatError::NoData` if an open-ended session times out
    /// before its first chunk. The session is `Failed` afterwards.
    pub fn on_timer(&mut self, now: Instant) -> Result<Verdict, Error> {
        if !self.is_accepting() || self.arbiter.on_timer(now) == Verdict::Continue {
            return Ok(Verdict::Continue);
        }

        if self.state == TransferState::Armed {
            return Err(self.fail(FormatError::NoData.into()));
        }

        tracing::debug!(
            "Session {} idle for {:?}, {} bytes in {} chunks",
            self.generation,
            now.saturating_duration_since(self.last_activity),
            self.received,
            self.chunks
        );
        self.transition_to(TransferState::Arbitrating);
        Ok(Verdict::Complete)
    }

    /// Run structural validation over the finished buffer.
    ///
    /// A rejected buffer fails the session. An accepted one leaves it in
    /// `Validating` until [`complete`](Self::complete) or
    /// [`fail`](Self::fail) is called.
    pub fn validate(&mut self) -> ValidationOutcome {
        if self.state != TransferState::Arbitrating || self.buffer.is_none() {
            let err = Error::from(FormatError::NoData);
            let outcome = ValidationOutcome {
                format: ImageFormat::Unknown,
                width: 0,
                height: 0,
                ok: false,
                reason: Some(err.clone()),
                trailer_present: None,
            };
            if !self.state.is_terminal() && self.state != TransferState::Idle {
                self.fail(err);
            }
            return outcome;
        }

        self.transition_to(TransferState::Validating);

        let outcome = match self.buffer.as_ref() {
            Some(buffer) => {
                self.arbiter.note_trailer(buffer.as_slice());
                validate(buffer.as_slice())
            }
            None => validate(&[]),
        };
        self.format = outcome.format;

        if let Some(reason) = outcome.reason.clone() {
            self.fail(reason);
        }
        outcome
    }

    /// The accepted image bytes while validation and commit are in progress
    #[must_use]
    pub fn image(&self) -> Option<&[u8]> {
        match self.state {
            TransferState::Validating => self.buffer.as_ref().map(IngestBuffer::as_slice),
            _ => None,
        }
    }

    /// Mark the image committed
    pub fn complete(&mut self) -> bool {
        let done = self.transition_to(TransferState::Complete);
        if done {
            tracing::info!(
                "Session {} complete: {} {} bytes in {:?}",
                self.generation,
                self.format,
                self.received,
                self.elapsed()
            );
        }
        done
    }

    /// Fail the session with `err`, releasing the buffer.
    ///
    /// Returns `err` for convenient propagation. A session already in a
    /// terminal state keeps its first error.
    pub fn fail(&mut self, err: Error) -> Error {
        if self.transition_to(TransferState::Failed) {
            tracing::warn!(
                "Session {} failed after {} bytes: {} ({})",
                self.generation,
                self.received,
                err,
                err.category()
            );
            self.error = Some(err.clone());
        }
        err
    }

    /// Return a terminal session to `Idle`
    pub fn close(&mut self) -> bool {
        self.transition_to(TransferState::Idle)
    }

    /// Session generation
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Completion mode
    #[must_use]
    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Check if chunks are currently accepted
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        matches!(self.state, TransferState::Armed | TransferState::Receiving)
    }

    /// Bytes accepted so far
    #[must_use]
    pub fn received(&self) -> usize {
        self.received
    }

    /// Declared size, for declared sessions
    #[must_use]
    pub fn expected(&self) -> Option<usize> {
        self.expected
    }

    /// Buffer capacity fixed at arming
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Chunks accepted so far
    #[must_use]
    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    /// Format detected so far; `Unknown` until the first open-ended chunk or
    /// validation
    #[must_use]
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Failure reason, once `Failed`
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Check if the buffer has been released
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.buffer.is_none()
    }

    /// Pending inactivity deadline, while chunks are accepted
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        if self.is_accepting() {
            self.arbiter.deadline()
        } else {
            None
        }
    }

    /// Time since arming
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.armed_at.elapsed()
    }
}
