//! Monospace bitmap fonts
//!
//! A [`Font`] is a grid atlas: printable ASCII laid out row by row in
//! fixed-size cells. Glyph quads sample the atlas through
//! [`GlyphMetrics`] UV rectangles.

use std::sync::Arc;

use super::ImageAsset;
use crate::render::backend::SamplerDesc;
use crate::render::VulkanResult;

const FIRST_CHAR: u8 = b' ';
const LAST_CHAR: u8 = b'~';
const FALLBACK_CHAR: char = '?';

/// Placement of one glyph in the atlas, in atlas UV and cell units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphMetrics {
    /// Top-left UV
    pub uv_min: [f32; 2],
    /// Bottom-right UV
    pub uv_max: [f32; 2],
    /// Horizontal advance, in units of the glyph height
    pub advance: f32,
    /// Whether the glyph produces a quad (space does not)
    pub visible: bool,
}

/// Fixed-cell bitmap font
#[derive(Debug)]
pub struct Font {
    name: String,
    cell_width: u32,
    cell_height: u32,
    columns: u32,
    atlas: Arc<ImageAsset>,
}

impl Font {
    /// Wrap an existing grid atlas of `columns` cells per row
    pub fn from_atlas(name: impl Into<String>, atlas: Arc<ImageAsset>, cell_width: u32, cell_height: u32, columns: u32) -> Self {
        Self { name: name.into(), cell_width, cell_height, columns: columns.max(1), atlas }
    }

    /// Built-in 8x8 font with a procedurally filled atlas, for tools and tests
    pub fn builtin(name: impl Into<String>) -> VulkanResult<Self> {
        let name = name.into();
        let (cell, columns) = (8u32, 16u32);
        let count = u32::from(LAST_CHAR - FIRST_CHAR) + 1;
        let rows = count.div_ceil(columns);
        let (width, height) = (cell * columns, cell * rows);

        let mut pixels = vec![0u8; (width * height * 4) as usize];
        for index in 1..count {
            let (cx, cy) = ((index % columns) * cell, (index / columns) * cell);
            // Rows 1..7 of each cell carry a pattern derived from the code point.
            for y in 1..cell - 1 {
                let bits = (index.wrapping_mul(2654435761) >> (y * 3)) as u8 | 0x18;
                for x in 0..cell {
                    if bits & (1 << x) != 0 {
                        let offset = (((cy + y) * width + cx + x) * 4) as usize;
                        pixels[offset..offset + 4].copy_from_slice(&[255, 255, 255, 255]);
                    }
                }
            }
        }

        let atlas = ImageAsset::with_sampler(format!("{name} atlas"), width, height, pixels, SamplerDesc::nearest_clamped())?;
        Ok(Self::from_atlas(name, atlas, cell, cell, columns))
    }

    /// Font name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Atlas image
    pub fn atlas(&self) -> &Arc<ImageAsset> {
        &self.atlas
    }

    /// Width over height of a cell
    pub fn aspect(&self) -> f32 {
        self.cell_width as f32 / self.cell_height as f32
    }

    /// Metrics of `ch`; characters outside the atlas map to `?`
    pub fn glyph(&self, ch: char) -> GlyphMetrics {
        let code = match u8::try_from(ch) {
            Ok(code) if (FIRST_CHAR..=LAST_CHAR).contains(&code) => code,
            _ => FALLBACK_CHAR as u8,
        };
        let index = u32::from(code - FIRST_CHAR);
        let extent = self.atlas.extent();
        let (x, y) = ((index % self.columns) * self.cell_width, (index / self.columns) * self.cell_height);
        let (w, h) = (extent.width as f32, extent.height as f32);
        GlyphMetrics {
            uv_min: [x as f32 / w, y as f32 / h],
            uv_max: [(x + self.cell_width) as f32 / w, (y + self.cell_height) as f32 / h],
            advance: self.aspect(),
            visible: code != b' ',
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_builtin_atlas_layout() {
        let font = Font::builtin("mono").unwrap();
        let extent = font.atlas().extent();
        assert_eq!((extent.width, extent.height), (128, 48));

        let a = font.glyph('A');
        assert!(a.visible);
        assert_relative_eq!(a.uv_min[0], 1.0 / 16.0);
        assert_relative_eq!(a.uv_min[1], 16.0 / 48.0);
        assert_relative_eq!(a.advance, 1.0);
        assert!(!font.glyph(' ').visible);
    }

    #[test]
    fn test_unknown_characters_fall_back() {
        let font = Font::builtin("mono").unwrap();
        assert_eq!(font.glyph('\u{263a}'), font.glyph('?'));
        assert_eq!(font.glyph('\n'), font.glyph('?'));
    }
}
