//! Transfer configuration

use crate::session::TransferMode;
use crate::{DEFAULT_IMAGE_NAME, MAX_IMAGE_SIZE};
use std::borrow::Cow;
use std::time::Duration;
use thiserror::Error;

/// Default inactivity window for open-ended sessions
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_millis(3000);

/// Default buffer capacity for open-ended sessions
pub const DEFAULT_OPEN_ENDED_CAPACITY: usize = 512 * 1024;

/// Default depth of the serialized event queue
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Invalid configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub Cow<'static, str>);

/// Transfer session configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Which protocol variant the device speaks
    pub mode: TransferMode,

    /// Largest declared size accepted by a start command
    pub max_image_size: usize,

    /// Buffer capacity for open-ended sessions
    pub open_ended_capacity: usize,

    /// Open-ended sessions complete after this long without a chunk
    pub inactivity_timeout: Duration,

    /// Blob name the committed image is stored under
    pub image_name: String,

    /// Bound of the event queue between transport and state machine
    pub queue_depth: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            mode: TransferMode::OpenEnded,
            max_image_size: MAX_IMAGE_SIZE,
            open_ended_capacity: DEFAULT_OPEN_ENDED_CAPACITY,
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            image_name: DEFAULT_IMAGE_NAME.to_string(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl TransferConfig {
    /// Default configuration for the declared-length protocol
    #[must_use]
    pub fn declared() -> Self {
        Self {
            mode: TransferMode::Declared,
            ..Self::default()
        }
    }

    /// Default configuration for the trigger/timeout protocol
    #[must_use]
    pub fn open_ended() -> Self {
        Self::default()
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_image_size == 0 || self.max_image_size > MAX_IMAGE_SIZE {
            return Err(ConfigError(
                format!("max_image_size must be between 1 and {MAX_IMAGE_SIZE}").into(),
            ));
        }

        if self.open_ended_capacity == 0 || self.open_ended_capacity > self.max_image_size {
            return Err(ConfigError(
                "open_ended_capacity must be between 1 and max_image_size".into(),
            ));
        }

        if self.inactivity_timeout.is_zero() {
            return Err(ConfigError("inactivity_timeout must be non-zero".into()));
        }

        if !is_plain_name(&self.image_name) {
            return Err(ConfigError(
                format!("image_name '{}' is not a plain file name", self.image_name).into(),
            ));
        }

        if self.queue_depth == 0 {
            return Err(ConfigError("queue_depth must be non-zero".into()));
        }

        Ok(())
    }
}

/// Check that `name` is a single path component
#[must_use]
pub fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}
