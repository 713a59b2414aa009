//! # OpenDOTT Core
//!
//! Image transfer core for the OpenDOTT BLE wearable display.
//!
//! This crate provides:
//! - Chunk ingestion into a fixed-capacity buffer
//! - Image format detection and structural validation
//! - Completion arbitration for declared-length and open-ended uploads
//! - The transfer session state machine and its manager
//! - A serialized tokio event loop and a GATT adapter
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      GATT adapter                               │
//! │   (characteristic writes/reads → events, results → notify)      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                      Event loop                                 │
//! │   (one task, bounded queue + inactivity timer)                  │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                      Session manager                            │
//! │   (one session at a time, commit = persist + render)            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Buffer  │  Detector  │  Arbiter  │  Validator                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arbiter;
pub mod buffer;
pub mod config;
pub mod display;
pub mod error;
pub mod format;
pub mod gatt;
pub mod manager;
pub mod observer;
pub mod protocol;
pub mod runtime;
pub mod session;
pub mod storage;
pub mod validate;

pub use arbiter::{CompletionArbiter, Verdict};
pub use buffer::IngestBuffer;
pub use config::TransferConfig;
pub use display::{HeaderRenderer, RenderedFrame, Renderer};
pub use error::{Error, Result};
pub use format::ImageFormat;
pub use gatt::{AttError, Characteristic, GattNotifier, GattServer, LinkSink};
pub use manager::{Event, PeerId, SessionManager, SessionSnapshot, Step};
pub use observer::{ProgressListener, TransferListener, TransferReport};
pub use runtime::SessionHandle;
pub use session::{Generation, TransferMode, TransferSession, TransferState};
pub use storage::{BlobStore, FsStore, MemoryStore};
pub use validate::{ValidationOutcome, validate};

/// Largest image accepted (16 MiB)
pub const MAX_IMAGE_SIZE: usize = 16 * 1024 * 1024;

/// Largest width or height accepted by the validator
pub const MAX_DIMENSION: u32 = 4096;

/// Blob name of the committed image
pub const DEFAULT_IMAGE_NAME: &str = "current.img";
