//! Display rendering of committed images.

use crate::error::RenderError;
use crate::format::ImageFormat;
use crate::validate::validate;

/// What was drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderedFrame {
    /// Image format
    pub format: ImageFormat,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

/// Draws a committed image on the panel
pub trait Renderer: Send {
    /// Render `data`.
    ///
    /// # Errors
    ///
    /// Returns `RenderError` if the image cannot be drawn. Callers treat this
    /// as non-fatal.
    fn render(&mut self, data: &[u8]) -> Result<RenderedFrame, RenderError>;
}

/// GIF global colour table descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GifColorTable {
    /// Number of palette entries
    pub entries: usize,
    /// Background colour index
    pub background: u8,
}

/// Read the global colour table descriptor from a GIF logical screen
/// descriptor, if the image has one
#[must_use]
pub fn gif_color_table(data: &[u8]) -> Option<GifColorTable> {
    let flags = *data.get(10)?;
    let background = *data.get(11)?;
    if flags & 0x80 == 0 {
        return None;
    }
    Some(GifColorTable {
        entries: 1 << ((flags & 0x07) + 1),
        background,
    })
}

/// Renderer that re-validates and decodes headers only.
///
/// GIF headers are accepted and logged; other formats have no decoder and
/// report `Unsupported`.
#[derive(Debug, Default)]
pub struct HeaderRenderer {
    frames: u64,
    last: Option<RenderedFrame>,
}

impl HeaderRenderer {
    /// Create a renderer with nothing shown
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames drawn
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Last frame drawn
    #[must_use]
    pub fn last(&self) -> Option<RenderedFrame> {
        self.last
    }
}

impl Renderer for HeaderRenderer {
    fn render(&mut self, data: &[u8]) -> Result<RenderedFrame, RenderError> {
        let outcome = validate(data);
        if let Some(reason) = outcome.reason {
            return Err(RenderError::Invalid(reason.to_string()));
        }

        if outcome.format != ImageFormat::Gif {
            tracing::warn!("{} decoding not implemented", outcome.format);
            return Err(RenderError::Unsupported(outcome.format));
        }

        match gif_color_table(data) {
            Some(table) => tracing::info!(
                "Rendering GIF {}x{}, global colour table {} entries, background {}",
                outcome.width,
                outcome.height,
                table.entries,
                table.background
            ),
            None => tracing::info!(
                "Rendering GIF {}x{}, no global colour table",
                outcome.width,
                outcome.height
            ),
        }

        let frame = RenderedFrame {
            format: outcome.format,
            width: outcome.width,
            height: outcome.height,
        };
        self.frames += 1;
        self.last = Some(frame);
        Ok(frame)
    }
}
