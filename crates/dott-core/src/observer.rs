//! Transfer observers.
//!
//! At most one listener is registered per category. Registering a new one
//! replaces the previous listener.

use crate::error::Error;
use crate::format::ImageFormat;
use crate::protocol::StatusReport;
use crate::session::{Generation, TransferMode};
use std::fmt;
use std::time::Duration;

/// Summary of a committed session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    /// Session generation
    pub generation: Generation,
    /// Completion mode
    pub mode: TransferMode,
    /// Detected format
    pub format: ImageFormat,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Committed size in bytes
    pub bytes: usize,
    /// Trailer heuristic
    pub trailer_present: Option<bool>,
    /// Whether the display accepted the image
    pub rendered: bool,
    /// Time from arming to commit
    pub elapsed: Duration,
}

/// Session lifecycle listener
pub trait TransferListener: Send {
    /// A session was armed
    fn on_armed(&mut self, generation: Generation, mode: TransferMode) {
        let _ = (generation, mode);
    }

    /// A session committed its image
    fn on_complete(&mut self, report: &TransferReport) {
        let _ = report;
    }

    /// A session failed, or a start was rejected before a session existed
    fn on_failed(&mut self, generation: Option<Generation>, error: &Error) {
        let _ = (generation, error);
    }

    /// A status report was requested
    fn on_status(&mut self, report: &StatusReport) {
        let _ = report;
    }
}

/// Byte-count progress listener
pub trait ProgressListener: Send {
    /// A chunk was accepted
    fn on_progress(&mut self, generation: Generation, received: usize, expected: Option<usize>);
}

/// Registered listeners, one per category
#[derive(Default)]
pub struct Listeners {
    transfer: Option<Box<dyn TransferListener>>,
    progress: Option<Box<dyn ProgressListener>>,
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("transfer", &self.transfer.is_some())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl Listeners {
    /// Register the lifecycle listener, returning the one it replaces
    pub fn set_transfer(
        &mut self,
        listener: Box<dyn TransferListener>,
    ) -> Option<Box<dyn TransferListener>> {
        let previous = self.transfer.replace(listener);
        if previous.is_some() {
            tracing::debug!("Replaced transfer listener");
        }
        previous
    }

    /// Register the progress listener, returning the one it replaces
    pub fn set_progress(
        &mut self,
        listener: Box<dyn ProgressListener>,
    ) -> Option<Box<dyn ProgressListener>> {
        let previous = self.progress.replace(listener);
        if previous.is_some() {
            tracing::debug!("Replaced progress listener");
        }
        previous
    }

    /// Remove the lifecycle listener
    pub fn clear_transfer(&mut self) -> Option<Box<dyn TransferListener>> {
        self.transfer.take()
    }

    /// Remove the progress listener
    pub fn clear_progress(&mut self) -> Option<Box<dyn ProgressListener>> {
        self.progress.take()
    }

    pub(crate) fn armed(&mut self, generation: Generation, mode: TransferMode) {
        if let Some(l) = self.transfer.as_mut() {
            l.on_armed(generation, mode);
        }
    }

    pub(crate) fn complete(&mut self, report: &TransferReport) {
        if let Some(l) = self.transfer.as_mut() {
            l.on_complete(report);
        }
    }

    pub(crate) fn failed(&mut self, generation: Option<Generation>, error: &Error) {
        if let Some(l) = self.transfer.as_mut() {
            l.on_failed(generation, error);
        }
    }

    pub(crate) fn status(&mut self, report: &StatusReport) {
        if let Some(l) = self.transfer.as_mut() {
            l.on_status(report);
        }
    }

    pub(crate) fn progress(&mut self, generation: Generation, received: usize, expected: Option<usize>) {
        if let Some(l) = self.progress.as_mut() {
            l.on_progress(generation, received, expected);
        }
    }
}
