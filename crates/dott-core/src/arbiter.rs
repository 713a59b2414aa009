//! Completion arbitration.
//!
//! Decides *that* a session is over, never whether its content is good.
//!
//! - Declared sessions complete synchronously the moment the received byte
//!   count equals the declared size.
//! - Open-ended sessions complete when no chunk has arrived for the
//!   inactivity window. The deadline is armed when the session arms and
//!   pushed back on every accepted chunk.
//!
//! The trailer check is advisory only: a missing trailer is logged and never
//! blocks completion.

use crate::format::ImageFormat;
use std::time::{Duration, Instant};

/// Arbitration verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Keep receiving
    Continue,
    /// The session is over; proceed to validation
    Complete,
}

#[derive(Debug, Clone, Copy)]
enum Rule {
    Exact { expected: usize },
    Inactivity { window: Duration, deadline: Instant },
}

/// Per-session completion arbiter
#[derive(Debug, Clone)]
pub struct CompletionArbiter {
    rule: Rule,
}

impl CompletionArbiter {
    /// Arbiter for a declared-length session
    #[must_use]
    pub fn declared(expected: usize) -> Self {
        Self {
            rule: Rule::Exact { expected },
        }
    }

    /// Arbiter for an open-ended session armed at `now`
    #[must_use]
    pub fn open_ended(window: Duration, now: Instant) -> Self {
        Self {
            rule: Rule::Inactivity {
                window,
                deadline: now + window,
            },
        }
    }

    /// Record an accepted chunk bringing the total to `received`
    pub fn on_chunk(&mut self, received: usize, now: Instant) -> Verdict {
        match &mut self.rule {
            Rule::Exact { expected } => {
                if received == *expected {
                    Verdict::Complete
                } else {
                    Verdict::Continue
                }
            }
            Rule::Inactivity { window, deadline } => {
                *deadline = now + *window;
                Verdict::Continue
            }
        }
    }

    /// Check the inactivity deadline.
    ///
    /// Declared sessions never time out here. An open-ended session whose
    /// deadline was pushed back after the timer was scheduled keeps going.
    #[must_use]
    pub fn on_timer(&self, now: Instant) -> Verdict {
        match self.rule {
            Rule::Inactivity { deadline, .. } if now >= deadline => Verdict::Complete,
            _ => Verdict::Continue,
        }
    }

    /// Current inactivity deadline, if this arbiter has one
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        match self.rule {
            Rule::Inactivity { deadline, .. } => Some(deadline),
            Rule::Exact { .. } => None,
        }
    }

    /// Log the trailer heuristic for a finished buffer
    pub fn note_trailer(&self, data: &[u8]) {
        let format = ImageFormat::detect(data);
        match format.has_trailer(data) {
            Some(true) => tracing::debug!("{} trailer present", format),
            Some(false) => tracing::warn!(
                "{} trailer absent after {} bytes, completing anyway",
                format,
                data.len()
            ),
            None => {}
        }
    }
}
