//! Control-channel wire formats for both protocol variants.
//!
//! Declared-length devices take one-byte opcodes on the control
//! characteristic; multi-byte fields are little-endian. Open-ended devices
//! take a fixed 4-byte trigger and answer with an indication and plain-text
//! notifications.

use crate::error::ProtocolError;
use crate::session::TransferState;

/// Start opcode, followed by a `u32` LE byte count
pub const OP_START: u8 = 0x01;
/// Cancel opcode
pub const OP_CANCEL: u8 = 0x02;
/// Status opcode
pub const OP_STATUS: u8 = 0x03;

/// Length of a start frame
pub const START_FRAME_LEN: usize = 5;

/// Trigger value that arms an open-ended session
pub const TRIGGER_BYTES: [u8; 4] = [0x00, 0x10, 0x40, 0x00];
/// Indication sent once the session is armed
pub const READY_INDICATION: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];
/// Notification text for a committed image
pub const NOTIFY_COMPLETE: &[u8] = b"Transfer Complete";
/// Notification text for a failed session
pub const NOTIFY_FAIL: &[u8] = b"Transfer Fail";
/// Fixed reply to a data characteristic read
pub const DATA_READ_REPLY: [u8; 6] = [0x01, 0x31, 0x00, 0x02, 0x29, 0x00];
/// Status characteristic value while idle
pub const STATUS_IDLE: u8 = 0x01;
/// Status characteristic value while a session is active
pub const STATUS_BUSY: u8 = 0x00;

/// Declared-length control command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Arm a session for exactly `size` bytes
    Start {
        /// Declared byte count
        size: u32,
    },
    /// Abort the active session
    Cancel,
    /// Request a status report
    Status,
}

impl Command {
    /// Parse a control frame.
    ///
    /// Bytes past the end of a fixed-length frame are ignored.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` for empty frames, short start frames, and
    /// unknown opcodes.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        let (&opcode, rest) = data.split_first().ok_or(ProtocolError::Empty)?;

        match opcode {
            OP_START => {
                if data.len() < START_FRAME_LEN {
                    return Err(ProtocolError::TooShort {
                        opcode,
                        expected: START_FRAME_LEN,
                        actual: data.len(),
                    });
                }
                let size = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
                Ok(Self::Start { size })
            }
            OP_CANCEL => Ok(Self::Cancel),
            OP_STATUS => Ok(Self::Status),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }

    /// Encode as a control frame
    #[must_use]
    pub fn encode(self) -> Vec<u8> {
        match self {
            Self::Start { size } => {
                let mut frame = Vec::with_capacity(START_FRAME_LEN);
                frame.push(OP_START);
                frame.extend_from_slice(&size.to_le_bytes());
                frame
            }
            Self::Cancel => vec![OP_CANCEL],
            Self::Status => vec![OP_STATUS],
        }
    }
}

/// Check a trigger write.
///
/// # Errors
///
/// Returns `ProtocolError::TriggerLength` unless the write is exactly four
/// bytes, and `ProtocolError::UnknownTrigger` for any other value.
pub fn parse_trigger(data: &[u8]) -> Result<(), ProtocolError> {
    let bytes: [u8; 4] = data
        .try_into()
        .map_err(|_| ProtocolError::TriggerLength(data.len()))?;

    if bytes != TRIGGER_BYTES {
        return Err(ProtocolError::UnknownTrigger(u32::from_be_bytes(bytes)));
    }
    Ok(())
}

/// Status report sent in reply to a status command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    /// Session state
    pub state: TransferState,
    /// Bytes accepted so far
    pub received: u32,
    /// Declared size, or zero when open-ended or idle
    pub expected: u32,
}

impl StatusReport {
    /// Encoded length
    pub const LEN: usize = 10;

    /// Encode as `[0x03, state, received LE u32, expected LE u32]`
    #[must_use]
    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0] = OP_STATUS;
        buf[1] = self.state.code();
        buf[2..6].copy_from_slice(&self.received.to_le_bytes());
        buf[6..10].copy_from_slice(&self.expected.to_le_bytes());
        buf
    }

    /// Decode a status report
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the frame is short, is not a status frame,
    /// or carries an unknown state code.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let (&opcode, _) = data.split_first().ok_or(ProtocolError::Empty)?;
        if opcode != OP_STATUS {
            return Err(ProtocolError::UnknownOpcode(opcode));
        }
        if data.len() < Self::LEN {
            return Err(ProtocolError::TooShort {
                opcode,
                expected: Self::LEN,
                actual: data.len(),
            });
        }

        let state = match data[1] {
            0 => TransferState::Idle,
            1 => TransferState::Armed,
            2 => TransferState::Receiving,
            3 => TransferState::Arbitrating,
            4 => TransferState::Validating,
            5 => TransferState::Complete,
            6 => TransferState::Failed,
            other => return Err(ProtocolError::UnknownOpcode(other)),
        };

        Ok(Self {
            state,
            received: u32::from_le_bytes([data[2], data[3], data[4], data[5]]),
            expected: u32::from_le_bytes([data[6], data[7], data[8], data[9]]),
        })
    }
}

/// Device information characteristic value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Firmware version major
    pub version_major: u8,
    /// Firmware version minor
    pub version_minor: u8,
    /// Firmware version patch
    pub version_patch: u8,
    /// Battery percentage
    pub battery: u8,
    /// Free image storage in bytes
    pub free_space: u32,
}

impl DeviceInfo {
    /// Encoded length
    pub const LEN: usize = 8;

    /// Device info for this firmware build with the given free space
    #[must_use]
    pub fn current(free_space: u64) -> Self {
        Self {
            version_major: parse_version_part(env!("CARGO_PKG_VERSION_MAJOR")),
            version_minor: parse_version_part(env!("CARGO_PKG_VERSION_MINOR")),
            version_patch: parse_version_part(env!("CARGO_PKG_VERSION_PATCH")),
            battery: 100,
            free_space: u32::try_from(free_space).unwrap_or(u32::MAX),
        }
    }

    /// Encode as packed bytes
    #[must_use]
    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0] = self.version_major;
        buf[1] = self.version_minor;
        buf[2] = self.version_patch;
        buf[3] = self.battery;
        buf[4..8].copy_from_slice(&self.free_space.to_le_bytes());
        buf
    }

    /// Decode packed bytes
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::TooShort` if fewer than 8 bytes are given.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < Self::LEN {
            return Err(ProtocolError::TooShort {
                opcode: 0,
                expected: Self::LEN,
                actual: data.len(),
            });
        }
        Ok(Self {
            version_major: data[0],
            version_minor: data[1],
            version_patch: data[2],
            battery: data[3],
            free_space: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
        })
    }
}

fn parse_version_part(part: &str) -> u8 {
    part.parse().unwrap_or(0)
}
