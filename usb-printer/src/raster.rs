//! Bitmap to ESC/POS column raster
//!
//! Images are printed in horizontal strips of 24 rows using the 24-dot
//! double-density bit image mode (`ESC * 33`). Each column of a strip is
//! three bytes, most significant bit on top.
//!
//! Only fully opaque dark pixels are printed. Any transparency, even partial,
//! leaves the dot blank.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use tracing::{debug, instrument};

use crate::config::DEFAULT_IMAGE_MAX_DIMENSION;
use crate::escpos::EscPosBuilder;

/// Rows per `ESC *` strip
pub const STRIP_HEIGHT: u32 = 24;

const LINE_SPACING_STRIP: u8 = 24;
const LINE_SPACING_DEFAULT: u8 = 32;
const LUMINANCE_THRESHOLD: f32 = 127.0;

/// Whether a pixel becomes a printed dot
pub fn is_ink_pixel(pixel: &Rgba<u8>) -> bool {
    let [r, g, b, a] = pixel.0;
    if a != u8::MAX {
        return false;
    }
    let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    luma < LUMINANCE_THRESHOLD
}

/// Thresholded `height × width` ink matrix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    /// Row-major
    ink: Vec<bool>,
}

impl RasterImage {
    pub fn from_rgba(img: &RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        let ink = img.pixels().map(is_ink_pixel).collect();
        Self { width, height, ink }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Ink at (x, y); anything outside the image is blank
    pub fn is_ink(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.ink[(y as usize) * (self.width as usize) + x as usize]
    }

    /// The three column bytes for column `x` of the strip starting at row `y0`
    ///
    /// Bit `7 - b` of byte `i` is the ink of row `y0 + 8 * i + b`.
    pub fn column_slice(&self, x: u32, y0: u32) -> [u8; 3] {
        let mut slice = [0u8; 3];
        for (i, byte) in slice.iter_mut().enumerate() {
            for b in 0..8 {
                let y = y0 + (i as u32) * 8 + b;
                if self.is_ink(x, y) {
                    *byte |= 1 << (7 - b);
                }
            }
        }
        slice
    }

    /// Full command stream: header, one `ESC *` block per strip, trailer
    pub fn to_escpos(&self) -> Vec<u8> {
        // nL nH cannot express more columns
        let columns = self.width.min(u16::MAX as u32);
        let strips = self.height.div_ceil(STRIP_HEIGHT);

        let mut b = EscPosBuilder::with_capacity(12 + strips as usize * (6 + 3 * columns as usize));
        b.line_spacing(LINE_SPACING_STRIP).center();

        for strip in 0..strips {
            let y0 = strip * STRIP_HEIGHT;
            b.bit_image_24(columns as u16);
            for x in 0..columns {
                b.raw(&self.column_slice(x, y0));
            }
            b.newline();
        }

        b.line_spacing(LINE_SPACING_DEFAULT).newline();
        b.build()
    }
}

/// Converts RGBA bitmaps into printer raster commands
#[derive(Debug, Clone, Copy)]
pub struct RasterEncoder {
    max_dimension: u32,
}

impl RasterEncoder {
    /// `max_dimension` is clamped to `1..=65535`
    pub fn new(max_dimension: u32) -> Self {
        Self {
            max_dimension: max_dimension.clamp(1, u16::MAX as u32),
        }
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    /// Output size after downscaling
    ///
    /// Images within the bound are untouched. Otherwise the larger side
    /// becomes `max_dimension` and the other side is scaled and rounded,
    /// never below one pixel.
    pub fn target_size(&self, width: u32, height: u32) -> (u32, u32) {
        let max = self.max_dimension;
        if width == 0 || height == 0 || (width <= max && height <= max) {
            return (width, height);
        }

        let larger = width.max(height) as u64;
        let scale = |side: u32| -> u32 {
            let scaled = (side as u64 * max as u64 + larger / 2) / larger;
            (scaled as u32).max(1)
        };

        if width >= height {
            (max, scale(height))
        } else {
            (scale(width), max)
        }
    }

    /// Encode a bitmap; deterministic for identical input
    #[instrument(skip(self, img), fields(width = img.width(), height = img.height()))]
    pub fn encode(&self, img: &RgbaImage) -> Vec<u8> {
        let (width, height) = self.target_size(img.width(), img.height());

        let raster = if (width, height) == img.dimensions() {
            RasterImage::from_rgba(img)
        } else {
            debug!(width, height, "Downscaling image");
            let resized = imageops::resize(img, width, height, FilterType::Triangle);
            RasterImage::from_rgba(&resized)
        };

        let data = raster.to_escpos();
        debug!(bytes = data.len(), "Image rasterized");
        data
    }
}

impl Default for RasterEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE_MAX_DIMENSION)
    }
}
