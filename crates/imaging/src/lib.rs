//! Pixel buffers and the PNG codec behind frame attachments.
//!
//! Hosts with their own imaging stack implement [`ImageCodec`];
//! [`PngCodec`] is the default backed by the `image` crate.

use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, ImageFormat};

/// Bytes per RGBA8 pixel.
pub const BYTES_PER_PIXEL: usize = 4;

/// Errors produced by image encoding and decoding.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("PNG decode failed: {0}")]
    Decode(String),

    #[error("PNG encode failed: {0}")]
    Encode(String),

    #[error("pixel buffer is {actual} bytes, expected {expected} for {width}x{height}")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// An uncompressed RGBA8 image, row-major, no padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RawImage {
    /// Wraps a pixel buffer, checking its length against the dimensions.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, ImageError> {
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if pixels.len() != expected {
            return Err(ImageError::BufferSize {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// A fully transparent image.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * BYTES_PER_PIXEL],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Size of the pixel buffer in bytes.
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

/// PNG encode/decode capability supplied by the host.
pub trait ImageCodec: Send + Sync {
    fn encode_png(&self, image: &RawImage) -> Result<Vec<u8>, ImageError>;
    fn decode_png(&self, png: &[u8]) -> Result<RawImage, ImageError>;
}

/// [`ImageCodec`] backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct PngCodec;

impl ImageCodec for PngCodec {
    fn encode_png(&self, image: &RawImage) -> Result<Vec<u8>, ImageError> {
        let mut out = Vec::new();
        PngEncoder::new(&mut out)
            .write_image(image.pixels(), image.width(), image.height(), ColorType::Rgba8)
            .map_err(|e| ImageError::Encode(e.to_string()))?;
        Ok(out)
    }

    fn decode_png(&self, png: &[u8]) -> Result<RawImage, ImageError> {
        let decoded = image::load_from_memory_with_format(png, ImageFormat::Png)
            .map_err(|e| ImageError::Decode(e.to_string()))?
            .to_rgba8();
        let (width, height) = decoded.dimensions();
        RawImage::new(width, height, decoded.into_raw())
    }
}
