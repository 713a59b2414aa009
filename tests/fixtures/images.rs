//! Image builders
//!
//! Each builder produces the smallest buffer that passes (or, for the
//! `broken_*` helpers, fails) structural validation for its format.

/// GIF89a with the given logical screen size and a trailing `0x3B`
#[must_use]
pub fn gif(width: u16, height: u16) -> Vec<u8> {
    let mut data = gif_without_trailer(width, height);
    data.push(0x3B);
    data
}

/// GIF89a whose stream stops before the trailer
#[must_use]
pub fn gif_without_trailer(width: u16, height: u16) -> Vec<u8> {
    let mut data = b"GIF89a".to_vec();
    data.extend_from_slice(&width.to_le_bytes());
    data.extend_from_slice(&height.to_le_bytes());
    // Packed field: global colour table, 2 entries
    data.extend_from_slice(&[0x80, 0x00, 0x00]);
    data.extend_from_slice(&[0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF]);
    data.extend_from_slice(&[0x2C, 0, 0, 0, 0]);
    data
}

/// PNG signature followed by an IHDR chunk
#[must_use]
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut data = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
    data.extend_from_slice(&13u32.to_be_bytes());
    data.extend_from_slice(b"IHDR");
    data.extend_from_slice(&width.to_be_bytes());
    data.extend_from_slice(&height.to_be_bytes());
    data.extend_from_slice(&[8, 2, 0, 0, 0]);
    data.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
    data
}

/// JPEG with SOI and APP0, optionally terminated by EOI
#[must_use]
pub fn jpeg(with_eoi: bool) -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
    data.extend_from_slice(b"JFIF\0");
    data.extend_from_slice(&[0x01, 0x01, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00]);
    if with_eoi {
        data.extend_from_slice(&[0xFF, 0xD9]);
    }
    data
}

/// BMP with a BITMAPINFOHEADER and no pixel data
#[must_use]
pub fn bmp(width: i32, height: i32) -> Vec<u8> {
    let mut data = vec![0u8; 54];
    data[0..2].copy_from_slice(b"BM");
    data[2..6].copy_from_slice(&54u32.to_le_bytes());
    data[10..14].copy_from_slice(&54u32.to_le_bytes());
    data[14..18].copy_from_slice(&40u32.to_le_bytes());
    data[18..22].copy_from_slice(&width.to_le_bytes());
    data[22..26].copy_from_slice(&height.to_le_bytes());
    data
}

/// First ten bytes of a PNG: detectable, but too short to validate
#[must_use]
pub fn broken_png_prefix() -> Vec<u8> {
    png(16, 16)[..10].to_vec()
}

/// Split `data` into chunks of at most `size` bytes
#[must_use]
pub fn chunks(data: &[u8], size: usize) -> Vec<Vec<u8>> {
    data.chunks(size).map(<[u8]>::to_vec).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dott_core::{ImageFormat, validate};

    #[test]
    fn test_builders_validate() {
        for (data, format) in [
            (gif(64, 32), ImageFormat::Gif),
            (png(16, 16), ImageFormat::Png),
            (jpeg(true), ImageFormat::Jpeg),
            (bmp(2, -2), ImageFormat::Bmp),
        ] {
            let outcome = validate(&data);
            assert!(outcome.ok, "{format} builder rejected: {:?}", outcome.reason);
            assert_eq!(outcome.format, format);
        }
    }

    #[test]
    fn test_broken_prefix_is_detected_but_invalid() {
        let data = broken_png_prefix();
        assert_eq!(ImageFormat::detect(&data), ImageFormat::Png);
        assert!(!validate(&data).ok);
    }
}
