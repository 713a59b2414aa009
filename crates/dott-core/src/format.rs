//! Image format detection from magic bytes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// GIF 89a signature
pub const GIF89A_MAGIC: &[u8; 6] = b"GIF89a";
/// GIF 87a signature
pub const GIF87A_MAGIC: &[u8; 6] = b"GIF87a";
/// PNG signature
pub const PNG_MAGIC: &[u8; 8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
/// JPEG start-of-image prefix
pub const JPEG_MAGIC: &[u8; 3] = &[0xFF, 0xD8, 0xFF];
/// BMP signature
pub const BMP_MAGIC: &[u8; 2] = b"BM";

/// GIF trailer byte
pub const GIF_TRAILER: &[u8; 1] = &[0x3B];
/// JPEG end-of-image marker
pub const JPEG_EOI: &[u8; 2] = &[0xFF, 0xD9];

/// Shortest prefix the detector will classify
pub const MIN_DETECT_LEN: usize = 8;

/// Known image formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageFormat {
    /// Graphics Interchange Format
    Gif,
    /// Portable Network Graphics
    Png,
    /// JPEG / JFIF
    Jpeg,
    /// Windows bitmap
    Bmp,
    /// No magic matched
    Unknown,
}

impl ImageFormat {
    /// Classify a byte prefix.
    ///
    /// Prefixes shorter than [`MIN_DETECT_LEN`] are always `Unknown`. Magics
    /// are matched in the fixed order GIF, PNG, JPEG, BMP and the first match
    /// wins.
    #[must_use]
    pub fn detect(data: &[u8]) -> Self {
        if data.len() < MIN_DETECT_LEN {
            return Self::Unknown;
        }

        if data.starts_with(GIF89A_MAGIC) || data.starts_with(GIF87A_MAGIC) {
            Self::Gif
        } else if data.starts_with(PNG_MAGIC) {
            Self::Png
        } else if data.starts_with(JPEG_MAGIC) {
            Self::Jpeg
        } else if data.starts_with(BMP_MAGIC) {
            Self::Bmp
        } else {
            Self::Unknown
        }
    }

    /// Check if this is a recognized format
    #[must_use]
    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }

    /// Terminator that weakly signals a complete stream, if the format has one
    #[must_use]
    pub fn trailer(self) -> Option<&'static [u8]> {
        match self {
            Self::Gif => Some(GIF_TRAILER),
            Self::Jpeg => Some(JPEG_EOI),
            Self::Png | Self::Bmp | Self::Unknown => None,
        }
    }

    /// Whether `data` ends with this format's trailer.
    ///
    /// `None` when the format has no trailer to look for.
    #[must_use]
    pub fn has_trailer(self, data: &[u8]) -> Option<bool> {
        self.trailer().map(|t| data.ends_with(t))
    }

    /// Short uppercase name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gif => "GIF",
            Self::Png => "PNG",
            Self::Jpeg => "JPEG",
            Self::Bmp => "BMP",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hex rendering of the leading bytes, for diagnostics
#[must_use]
pub fn magic_hex(data: &[u8]) -> String {
    hex::encode(&data[..data.len().min(MIN_DETECT_LEN)])
}
