use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};

use crate::error::{StageError, StageResult};

/// Geometry of fitting a `(W, H)` image into an `S x S` square without
/// distorting it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub source_width: u32,
    pub source_height: u32,
    pub target_size: u32,
    pub scale: f32,
    /// Padding on each side, in target pixels
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    pub fn new(source_width: u32, source_height: u32, target_size: u32) -> Self {
        let s = target_size as f32;
        let w = source_width.max(1) as f32;
        let h = source_height.max(1) as f32;
        let scale = (s / w).min(s / h);

        Self {
            source_width,
            source_height,
            target_size,
            scale,
            pad_x: (s - w * scale) / 2.0,
            pad_y: (s - h * scale) / 2.0,
        }
    }

    /// Scaled content size in target pixels, at least one pixel per axis
    pub fn scaled_size(&self) -> (u32, u32) {
        let w = (self.source_width as f32 * self.scale).round().max(1.0) as u32;
        let h = (self.source_height as f32 * self.scale).round().max(1.0) as u32;
        (w.min(self.target_size), h.min(self.target_size))
    }

    /// Top-left corner of the scaled content, in target pixels
    pub fn offset(&self) -> (u32, u32) {
        (self.pad_x.round() as u32, self.pad_y.round() as u32)
    }
}

/// Scale to fit inside `target_size x target_size` and center on black
pub fn letterbox(img: &DynamicImage, target_size: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    let geometry = Letterbox::new(width, height, target_size);
    let (scaled_w, scaled_h) = geometry.scaled_size();

    let scaled = img.resize_exact(scaled_w, scaled_h, FilterType::Triangle).to_rgb8();

    let mut canvas = RgbImage::from_pixel(target_size, target_size, Rgb([0u8, 0, 0]));
    let (offset_x, offset_y) = geometry.offset();

    image::imageops::overlay(&mut canvas, &scaled, offset_x.into(), offset_y.into());

    DynamicImage::ImageRgb8(canvas)
}

/// Scale each axis independently to exactly `target_size x target_size`
pub fn stretch(img: &DynamicImage, target_size: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(
        img.resize_exact(target_size, target_size, FilterType::Triangle)
            .to_rgb8(),
    )
}

/// 32 bits per pixel, laid out X R G B. The leading byte is padding that
/// consumers skip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub const BYTES_PER_PIXEL: usize = 4;

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bytes_per_row(&self) -> usize {
        self.width as usize * Self::BYTES_PER_PIXEL
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn rgb(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = y as usize * self.bytes_per_row() + x as usize * Self::BYTES_PER_PIXEL;
        Some([
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ])
    }
}

/// Convert to the 32-bit pixel layout the models consume
pub fn to_pixel_buffer(img: &DynamicImage) -> StageResult<PixelBuffer> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(StageError::Conversion(format!(
            "cannot build a pixel buffer from a {}x{} image",
            width, height
        )));
    }

    let rgb = img.to_rgb8();
    let mut data = Vec::with_capacity(width as usize * height as usize * PixelBuffer::BYTES_PER_PIXEL);
    for pixel in rgb.pixels() {
        data.push(0xFF);
        data.extend_from_slice(&pixel.0);
    }

    Ok(PixelBuffer { width, height, data })
}
