//! Frame types
//!
//! `RawFrame` is whatever an upstream renderer hands back.
//! `CanonicalFrame` is the only shape that ever reaches a video subscriber:
//! 8-bit RGB, even width and height, row-major, contiguous.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ContractError;

/// Channel count of a canonical frame
pub const CANONICAL_CHANNELS: usize = 3;

/// Round a dimension down to the nearest even value, never below 2
pub fn even_dimension(value: u32) -> u32 {
    (value - value % 2).max(2)
}

/// Sample storage of a raw frame
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    U8(Vec<u8>),
    U16(Vec<u16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl PixelData {
    /// Number of samples
    pub fn len(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::U16(v) => v.len(),
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample type name (used in logs)
    pub fn dtype(&self) -> &'static str {
        match self {
            Self::U8(_) => "u8",
            Self::U16(_) => "u16",
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
        }
    }
}

/// Pixel buffer as produced by a renderer
///
/// Nothing about it is trusted: the declared shape may disagree with the
/// sample count, values may be out of range or not finite.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub pixels: PixelData,
}

impl RawFrame {
    pub fn new(width: u32, height: u32, channels: u32, pixels: PixelData) -> Self {
        Self {
            width,
            height,
            channels,
            pixels,
        }
    }

    /// Sample count implied by the declared shape
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    /// Declared shape agrees with the buffer and is non-empty
    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.channels > 0
            && self.pixels.len() == self.expected_len()
    }
}

/// Canonical RGB frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalFrame {
    width: u32,
    height: u32,
    data: Bytes,
}

impl CanonicalFrame {
    /// Wrap an RGB buffer, checking the canonical invariant
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self, ContractError> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(ContractError::Other(format!(
                "canonical frame needs even non-zero size, got {width}x{height}"
            )));
        }
        let expected = width as usize * height as usize * CANONICAL_CHANNELS;
        if data.len() != expected {
            return Err(ContractError::Other(format!(
                "canonical frame {width}x{height} needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data: Bytes::from(data),
        })
    }

    /// Flat single-colour frame; odd sizes are rounded down to even
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let width = even_dimension(width);
        let height = even_dimension(height);
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * CANONICAL_CHANNELS);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self {
            width,
            height,
            data: Bytes::from(data),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Always 3
    pub fn channels(&self) -> usize {
        CANONICAL_CHANNELS
    }

    /// Row-major RGB bytes
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// RGB value at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * CANONICAL_CHANNELS;
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    }

    /// Copy back into an untrusted raw frame (8-bit, 3 channels)
    pub fn to_raw(&self) -> RawFrame {
        RawFrame::new(
            self.width,
            self.height,
            CANONICAL_CHANNELS as u32,
            PixelData::U8(self.data.to_vec()),
        )
    }
}

/// Where an emitted frame came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum FrameOrigin {
    /// Real capture through the named strategy
    Live { strategy: String },
    /// Startup frame before the first live capture
    Warmup,
    /// Every strategy failed
    Placeholder,
    /// Capture succeeded but the buffer could not be normalized
    Safe,
}

impl FrameOrigin {
    pub fn label(&self) -> &str {
        match self {
            Self::Live { .. } => "live",
            Self::Warmup => "warmup",
            Self::Placeholder => "placeholder",
            Self::Safe => "safe",
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live { .. })
    }
}

/// Timestamped canonical frame handed to video subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    /// Presentation counter, strictly increasing per pipeline
    pub pts: u64,
    pub captured_at: DateTime<Utc>,
    pub origin: FrameOrigin,
    pub frame: CanonicalFrame,
}
