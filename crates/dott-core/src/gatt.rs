//! GATT adapter.
//!
//! Maps characteristic writes and reads onto session events, and session
//! notifications back onto indications and notifications. The BLE stack
//! itself sits behind [`LinkSink`] on the way out and calls
//! [`GattServer::write`] / [`GattServer::read`] on the way in.

use crate::error::{Error, ProtocolError};
use crate::manager::PeerId;
use crate::observer::{TransferListener, TransferReport};
use crate::protocol::{
    Command, DATA_READ_REPLY, DeviceInfo, NOTIFY_COMPLETE, NOTIFY_FAIL, READY_INDICATION,
    STATUS_BUSY, STATUS_IDLE, StatusReport, parse_trigger,
};
use crate::runtime::{LoopClosed, SessionHandle};
use crate::session::{Generation, TransferMode, TransferState};
use thiserror::Error;

/// Service UUID of the trigger/timeout variant
pub const OPEN_ENDED_SERVICE_UUID: &str = "0483dadd-6c9d-6ca9-5d41-03ad4fff4bcc";
/// Service UUID of the declared-length variant
pub const DECLARED_SERVICE_UUID: &str = "f000ffe0-0451-4000-b000-000000000000";

/// GATT characteristics of both protocol variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    /// Open-ended image data
    Data,
    /// Open-ended command; writes accepted and ignored
    Command,
    /// Open-ended busy flag
    Status,
    /// Open-ended trigger
    Trigger,
    /// Open-ended result notifications
    Notify,
    /// Open-ended reserved response
    Response,
    /// Declared-length image data
    ImageData,
    /// Declared-length control
    Control,
    /// Declared-length device information
    DeviceInfo,
}

impl Characteristic {
    /// 16-bit short UUID
    #[must_use]
    pub fn short_uuid(self) -> u16 {
        match self {
            Self::Data => 0x1525,
            Self::Command => 0x1526,
            Self::Status => 0x1527,
            Self::Trigger => 0x1528,
            Self::Notify => 0x1529,
            Self::Response => 0x1530,
            Self::ImageData => 0xFFE1,
            Self::Control => 0xFFE2,
            Self::DeviceInfo => 0xFFE3,
        }
    }

    /// Protocol variant this characteristic belongs to
    #[must_use]
    pub fn mode(self) -> TransferMode {
        match self {
            Self::ImageData | Self::Control | Self::DeviceInfo => TransferMode::Declared,
            _ => TransferMode::OpenEnded,
        }
    }

    /// Characteristics exposed in `mode`
    #[must_use]
    pub fn for_mode(mode: TransferMode) -> &'static [Self] {
        match mode {
            TransferMode::OpenEnded => &[
                Self::Data,
                Self::Command,
                Self::Status,
                Self::Trigger,
                Self::Notify,
                Self::Response,
            ],
            TransferMode::Declared => &[Self::ImageData, Self::Control, Self::DeviceInfo],
        }
    }

    /// Service UUID for `mode`
    #[must_use]
    pub fn service_uuid(mode: TransferMode) -> &'static str {
        match mode {
            TransferMode::OpenEnded => OPEN_ENDED_SERVICE_UUID,
            TransferMode::Declared => DECLARED_SERVICE_UUID,
        }
    }
}

/// ATT error response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AttError {
    /// Read not permitted
    #[error("read not permitted")]
    ReadNotPermitted,
    /// Write not permitted
    #[error("write not permitted")]
    WriteNotPermitted,
    /// Characteristic not in the active service
    #[error("request not supported")]
    RequestNotSupported,
    /// Value has the wrong length
    #[error("invalid attribute value length")]
    InvalidLength,
    /// Value is not allowed
    #[error("value not allowed")]
    ValueNotAllowed,
    /// The transfer core is unavailable
    #[error("unlikely error")]
    Unlikely,
}

impl AttError {
    /// ATT error code
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::ReadNotPermitted => 0x02,
            Self::WriteNotPermitted => 0x03,
            Self::RequestNotSupported => 0x06,
            Self::InvalidLength => 0x0D,
            Self::Unlikely => 0x0E,
            Self::ValueNotAllowed => 0x13,
        }
    }
}

impl From<ProtocolError> for AttError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Empty
            | ProtocolError::TooShort { .. }
            | ProtocolError::TriggerLength(_) => Self::InvalidLength,
            ProtocolError::UnknownTrigger(_) | ProtocolError::UnknownOpcode(_) => {
                Self::ValueNotAllowed
            }
            ProtocolError::WrongMode(_) => Self::RequestNotSupported,
        }
    }
}

impl From<LoopClosed> for AttError {
    fn from(_: LoopClosed) -> Self {
        Self::Unlikely
    }
}

/// Inbound side of the GATT service
#[derive(Debug, Clone)]
pub struct GattServer {
    handle: SessionHandle,
}

impl GattServer {
    /// Serve characteristics for the mode the session loop runs in
    #[must_use]
    pub fn new(handle: SessionHandle) -> Self {
        Self { handle }
    }

    /// Session handle
    #[must_use]
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    fn mode(&self) -> TransferMode {
        self.handle.snapshot().mode
    }

    fn check_service(&self, characteristic: Characteristic) -> Result<(), AttError> {
        if characteristic.mode() != self.mode() {
            tracing::warn!(
                "{:?} is not part of the {} service",
                characteristic,
                self.mode()
            );
            return Err(AttError::RequestNotSupported);
        }
        Ok(())
    }

    /// Link established
    ///
    /// # Errors
    ///
    /// Returns `AttError::Unlikely` if the session loop has stopped.
    pub async fn connect(&self, peer: PeerId) -> Result<(), AttError> {
        Ok(self.handle.connect(peer).await?)
    }

    /// Link lost
    ///
    /// # Errors
    ///
    /// Returns `AttError::Unlikely` if the session loop has stopped.
    pub async fn disconnect(&self, peer: PeerId) -> Result<(), AttError> {
        Ok(self.handle.disconnect(peer).await?)
    }

    /// Handle a characteristic write.
    ///
    /// Malformed control frames are answered with an ATT error and never
    /// reach the session.
    ///
    /// # Errors
    ///
    /// Returns the ATT error to send back to the central.
    pub async fn write(&self, characteristic: Characteristic, value: &[u8]) -> Result<(), AttError> {
        self.check_service(characteristic)?;

        match characteristic {
            Characteristic::Data | Characteristic::ImageData => {
                self.handle.chunk(value).await?;
            }
            Characteristic::Trigger => {
                parse_trigger(value).inspect_err(|e| tracing::warn!("Bad trigger: {}", e))?;
                let generation = self.handle.trigger().await?;
                tracing::debug!("Trigger accepted, session {}", generation);
            }
            Characteristic::Control => {
                match Command::parse(value).inspect_err(|e| tracing::warn!("Bad command: {}", e))? {
                    Command::Start { size } => {
                        let generation = self.handle.start(u64::from(size)).await?;
                        tracing::debug!("Start {} bytes, session {}", size, generation);
                    }
                    Command::Cancel => self.handle.cancel().await?,
                    Command::Status => self.handle.status().await?,
                }
            }
            Characteristic::Command | Characteristic::Notify => {
                tracing::debug!("Ignoring {} byte write to {:?}", value.len(), characteristic);
            }
            Characteristic::Status | Characteristic::Response | Characteristic::DeviceInfo => {
                return Err(AttError::WriteNotPermitted);
            }
        }
        Ok(())
    }

    /// Handle a characteristic read
    ///
    /// # Errors
    ///
    /// Returns the ATT error to send back to the central.
    pub fn read(&self, characteristic: Characteristic) -> Result<Vec<u8>, AttError> {
        self.check_service(characteristic)?;
        let snapshot = self.handle.snapshot();

        let value = match characteristic {
            Characteristic::Data => DATA_READ_REPLY.to_vec(),
            Characteristic::Status => {
                let busy = snapshot.state != TransferState::Idle;
                vec![if busy { STATUS_BUSY } else { STATUS_IDLE }]
            }
            Characteristic::Trigger => match snapshot.state {
                TransferState::Armed | TransferState::Receiving => READY_INDICATION.to_vec(),
                _ => vec![0; 4],
            },
            Characteristic::Command | Characteristic::Response => Vec::new(),
            Characteristic::Control => snapshot.status_report().encode().to_vec(),
            Characteristic::DeviceInfo => DeviceInfo::current(snapshot.free_space).encode().to_vec(),
            Characteristic::Notify | Characteristic::ImageData => {
                return Err(AttError::ReadNotPermitted);
            }
        };
        Ok(value)
    }
}

/// Outbound link to the central
pub trait LinkSink: Send {
    /// Send an indication
    fn indicate(&mut self, characteristic: Characteristic, value: &[u8]);

    /// Send a notification
    fn notify(&mut self, characteristic: Characteristic, value: &[u8]);
}

/// Session listener that reports results over GATT
#[derive(Debug)]
pub struct GattNotifier<S> {
    mode: TransferMode,
    sink: S,
}

impl<S: LinkSink> GattNotifier<S> {
    /// Report results for `mode` through `sink`
    pub fn new(mode: TransferMode, sink: S) -> Self {
        Self { mode, sink }
    }

    fn result_channel(&self) -> Characteristic {
        match self.mode {
            TransferMode::OpenEnded => Characteristic::Notify,
            TransferMode::Declared => Characteristic::Control,
        }
    }
}

impl<S: LinkSink> TransferListener for GattNotifier<S> {
    fn on_armed(&mut self, generation: Generation, mode: TransferMode) {
        if mode == TransferMode::OpenEnded {
            tracing::debug!("Indicating ready for session {}", generation);
            self.sink.indicate(Characteristic::Trigger, &READY_INDICATION);
        }
    }

    fn on_complete(&mut self, _report: &TransferReport) {
        let channel = self.result_channel();
        self.sink.notify(channel, NOTIFY_COMPLETE);
    }

    fn on_failed(&mut self, _generation: Option<Generation>, error: &Error) {
        tracing::debug!("Notifying failure: {}", error.category());
        let channel = self.result_channel();
        self.sink.notify(channel, NOTIFY_FAIL);
    }

    fn on_status(&mut self, report: &StatusReport) {
        let channel = self.result_channel();
        self.sink.notify(channel, &report.encode());
    }
}
