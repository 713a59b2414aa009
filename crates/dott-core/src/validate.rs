//! Structural validation of received images.
//!
//! Runs once per completed session, after the detector has classified the
//! buffer. Either every check for the detected format passes or the whole
//! buffer is rejected; there is no partial acceptance.
//!
//! | Format | Minimum size | Checks |
//! |--------|--------------|--------|
//! | GIF    | 14           | LSD width/height (LE u16) in `(0, 4096]`; trailer `0x3B` warned |
//! | PNG    | 33           | `IHDR` at 12..16; width/height (BE u32) in `(0, 4096]` |
//! | JPEG   | 10           | `FF D8 FF` prefix; `FF D9` end marker warned |
//! | BMP    | 54           | width (LE i32) `> 0`; `abs(height)` non-zero; both `≤ 4096` |

use crate::MAX_DIMENSION;
use crate::error::{Error, FormatError, StructuralError};
use crate::format::{ImageFormat, JPEG_MAGIC, magic_hex};

/// Minimum GIF size: header(6) + logical screen descriptor(7) + trailer(1)
pub const GIF_MIN_SIZE: usize = 14;
/// Minimum PNG size: signature(8) + IHDR chunk(25)
pub const PNG_MIN_SIZE: usize = 33;
/// Minimum JPEG size
pub const JPEG_MIN_SIZE: usize = 10;
/// Minimum BMP size: file header(14) + info header(40)
pub const BMP_MIN_SIZE: usize = 54;

/// Result of validating one completed buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    /// Detected format
    pub format: ImageFormat,
    /// Width in pixels (0 when rejected before it could be read)
    pub width: u32,
    /// Height in pixels (0 when rejected before it could be read)
    pub height: u32,
    /// Whether the buffer may be committed
    pub ok: bool,
    /// Why the buffer was rejected
    pub reason: Option<Error>,
    /// Trailer heuristic; `None` for formats without a trailer
    pub trailer_present: Option<bool>,
}

impl ValidationOutcome {
    fn accepted(format: ImageFormat, width: u32, height: u32, data: &[u8]) -> Self {
        Self {
            format,
            width,
            height,
            ok: true,
            reason: None,
            trailer_present: format.has_trailer(data),
        }
    }

    fn rejected(format: ImageFormat, reason: Error) -> Self {
        Self {
            format,
            width: 0,
            height: 0,
            ok: false,
            reason: Some(reason),
            trailer_present: None,
        }
    }
}

/// Detect and structurally validate a complete image buffer
#[must_use]
pub fn validate(data: &[u8]) -> ValidationOutcome {
    let format = ImageFormat::detect(data);

    let checked = match format {
        ImageFormat::Gif => validate_gif(data),
        ImageFormat::Png => validate_png(data),
        ImageFormat::Jpeg => validate_jpeg(data),
        ImageFormat::Bmp => validate_bmp(data),
        ImageFormat::Unknown => {
            tracing::error!(
                "Unknown image format ({} bytes, magic {})",
                data.len(),
                magic_hex(data)
            );
            return ValidationOutcome::rejected(
                format,
                FormatError::Unrecognized(magic_hex(data)).into(),
            );
        }
    };

    match checked {
        Ok((width, height)) => {
            let outcome = ValidationOutcome::accepted(format, width, height, data);
            if outcome.trailer_present == Some(false) {
                tracing::warn!("{} missing trailer, may be truncated", format);
            }
            tracing::info!(
                "Validated {} {}x{} ({} bytes)",
                format,
                width,
                height,
                data.len()
            );
            outcome
        }
        Err(err) => {
            tracing::error!("{} rejected: {}", format, err);
            ValidationOutcome::rejected(format, err.into())
        }
    }
}

fn require_size(format: ImageFormat, data: &[u8], minimum: usize) -> Result<(), StructuralError> {
    if data.len() < minimum {
        return Err(StructuralError::TooSmall {
            format,
            size: data.len(),
            minimum,
        });
    }
    Ok(())
}

fn check_dimensions(format: ImageFormat, width: i64, height: i64) -> Result<(u32, u32), StructuralError> {
    let max = i64::from(MAX_DIMENSION);
    if width <= 0 || height <= 0 || width > max || height > max {
        return Err(StructuralError::Dimensions {
            format,
            width,
            height,
        });
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok((width as u32, height as u32))
}

fn validate_gif(data: &[u8]) -> Result<(u32, u32), StructuralError> {
    require_size(ImageFormat::Gif, data, GIF_MIN_SIZE)?;

    let width = u16::from_le_bytes([data[6], data[7]]);
    let height = u16::from_le_bytes([data[8], data[9]]);

    check_dimensions(ImageFormat::Gif, i64::from(width), i64::from(height))
}

fn validate_png(data: &[u8]) -> Result<(u32, u32), StructuralError> {
    require_size(ImageFormat::Png, data, PNG_MIN_SIZE)?;

    if &data[12..16] != b"IHDR" {
        return Err(StructuralError::MissingIhdr);
    }

    let width = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
    let height = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);

    check_dimensions(ImageFormat::Png, i64::from(width), i64::from(height))
}

fn validate_jpeg(data: &[u8]) -> Result<(u32, u32), StructuralError> {
    require_size(ImageFormat::Jpeg, data, JPEG_MIN_SIZE)?;

    if !data.starts_with(JPEG_MAGIC) {
        return Err(StructuralError::BadJpegMarker);
    }

    // Dimensions live in a SOF segment; not parsed here.
    Ok((0, 0))
}

fn validate_bmp(data: &[u8]) -> Result<(u32, u32), StructuralError> {
    require_size(ImageFormat::Bmp, data, BMP_MIN_SIZE)?;

    let width = i32::from_le_bytes([data[18], data[19], data[20], data[21]]);
    let height = i32::from_le_bytes([data[22], data[23], data[24], data[25]]);

    // Negative height marks a top-down bitmap
    check_dimensions(
        ImageFormat::Bmp,
        i64::from(width),
        i64::from(height).abs(),
    )
}
