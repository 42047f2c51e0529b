use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::CaptureError;

/// Pixel layout of a live video frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Packed 8-bit RGB
    Rgb24,
    /// Packed 8-bit RGBA (alpha ignored on capture)
    Rgba32,
}

impl PixelFormat {
    /// Get bytes per pixel for the format
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Rgba32 => 4,
        }
    }
}

/// The frame currently shown by a live feed
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Monotonic frame number within the feed
    pub sequence: u64,
    /// Raw pixels (shared ownership, frames are handed out often)
    pub data: Arc<Vec<u8>>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    pub format: PixelFormat,
}

impl VideoFrame {
    pub fn new(sequence: u64, data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            sequence,
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    pub fn expected_size(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    /// Validate frame data size against expected size
    pub fn validate_size(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == self.expected_size()
    }

    /// Draw this frame into an RGB buffer of the same size
    pub fn to_rgb_image(&self) -> Result<RgbImage, CaptureError> {
        if !self.validate_size() {
            return Err(CaptureError::Encode {
                details: format!(
                    "frame {} has {} bytes, expected {} for {}x{} {:?}",
                    self.sequence,
                    self.data.len(),
                    self.expected_size(),
                    self.width,
                    self.height,
                    self.format
                ),
            });
        }

        let pixels = match self.format {
            PixelFormat::Rgb24 => self.data.as_ref().clone(),
            PixelFormat::Rgba32 => self
                .data
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
        };

        RgbImage::from_raw(self.width, self.height, pixels).ok_or_else(|| CaptureError::Encode {
            details: "pixel buffer does not match frame dimensions".to_string(),
        })
    }
}

/// A still image taken from the live feed, ready to submit
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    pub width: u32,
    pub height: u32,
    /// Encoded JPEG bytes
    pub jpeg: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl CaptureFrame {
    /// Encode an RGB buffer as JPEG with the given quality (1-100)
    pub fn encode(image: &RgbImage, quality: u8) -> Result<Self, CaptureError> {
        let mut jpeg = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100));
        encoder
            .encode(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)
            .map_err(|e| CaptureError::Encode {
                details: e.to_string(),
            })?;

        Ok(Self {
            width: image.width(),
            height: image.height(),
            jpeg,
            captured_at: Utc::now(),
        })
    }

    /// Wrap an already-encoded image (e.g. a file on disk). JPEG input is
    /// kept as is; other formats are re-encoded at `quality`.
    pub fn from_encoded(bytes: Vec<u8>, quality: u8) -> Result<Self, CaptureError> {
        let decoded = image::load_from_memory(&bytes).map_err(|e| CaptureError::Encode {
            details: e.to_string(),
        })?;

        match image::guess_format(&bytes) {
            Ok(image::ImageFormat::Jpeg) => Ok(Self {
                width: decoded.width(),
                height: decoded.height(),
                jpeg: bytes,
                captured_at: Utc::now(),
            }),
            // Re-encode anything else so every submission is a JPEG
            _ => Self::encode(&decoded.to_rgb8(), quality),
        }
    }

    pub fn to_data_url(&self) -> String {
        DataUrl::new("image/jpeg", self.jpeg.clone()).to_string()
    }
}

/// A `data:<mime>;base64,<payload>` URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl DataUrl {
    pub fn new<S: Into<String>>(mime_type: S, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Parse a base64 data URL. Only the base64 form is accepted.
    pub fn parse(input: &str) -> Result<Self, String> {
        let rest = input
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| "image must be a data URL".to_string())?;

        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| "data URL is missing its payload".to_string())?;

        let mut params = header.split(';');
        let mime_type = params.next().unwrap_or_default().trim().to_ascii_lowercase();
        if !params.any(|p| p.trim().eq_ignore_ascii_case("base64")) {
            return Err("data URL must be base64 encoded".to_string());
        }
        if mime_type.is_empty() {
            return Err("data URL does not declare a MIME type".to_string());
        }

        let data = STANDARD
            .decode(payload.trim())
            .map_err(|e| format!("data URL payload is not valid base64: {}", e))?;
        if data.is_empty() {
            return Err("data URL payload is empty".to_string());
        }

        Ok(Self { mime_type, data })
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

impl fmt::Display for DataUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data:{};base64,{}", self.mime_type, STANDARD.encode(&self.data))
    }
}
