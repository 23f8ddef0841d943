//! FrameNormalizer - any raw buffer to a canonical RGB frame
//!
//! Rules, in order: sample scaling to 8 bit, channel reduction to RGB,
//! bilinear resize to the target size. `normalize` is total: anything it
//! cannot convert becomes the safe frame.

use contracts::{even_dimension, CanonicalFrame, ContractError, PixelData, RawFrame};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tracing::debug;

use crate::error::{FrameError, Result};

/// Fill colour of the safe frame (dim green, distinct from "no signal" black)
pub const SAFE_COLOR: [u8; 3] = [0, 128, 0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameNormalizer {
    width: u32,
    height: u32,
}

impl FrameNormalizer {
    /// Odd target sizes are rounded down to even
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: even_dimension(width),
            height: even_dimension(height),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Normalize, degrading to the safe frame on any failure
    pub fn normalize(&self, raw: &RawFrame) -> CanonicalFrame {
        match self.try_normalize(raw) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, dtype = raw.pixels.dtype(), "Normalization failed, emitting safe frame");
                self.safe_frame()
            }
        }
    }

    pub fn try_normalize(&self, raw: &RawFrame) -> Result<CanonicalFrame> {
        if !raw.is_well_formed() {
            return Err(FrameError::MalformedBuffer {
                width: raw.width,
                height: raw.height,
                channels: raw.channels,
                samples: raw.pixels.len(),
            });
        }

        let samples = to_u8_samples(&raw.pixels);
        let rgb = reduce_channels(samples, raw.channels)?;
        let rgb = self.resize(rgb, raw.width, raw.height)?;
        Ok(CanonicalFrame::from_rgb(self.width, self.height, rgb)?)
    }

    pub fn safe_frame(&self) -> CanonicalFrame {
        CanonicalFrame::filled(self.width, self.height, SAFE_COLOR)
    }

    fn resize(&self, rgb: Vec<u8>, width: u32, height: u32) -> Result<Vec<u8>> {
        if width == self.width && height == self.height {
            return Ok(rgb);
        }
        let image = RgbImage::from_raw(width, height, rgb)
            .ok_or_else(|| FrameError::resize(format!("buffer does not hold {width}x{height} RGB")))?;
        Ok(imageops::resize(&image, self.width, self.height, FilterType::Triangle).into_raw())
    }
}

fn to_u8_samples(pixels: &PixelData) -> Vec<u8> {
    match pixels {
        PixelData::U8(samples) => samples.clone(),
        PixelData::U16(samples) => scale_samples(samples.iter().map(|&s| f64::from(s)).collect(), false),
        PixelData::F32(samples) => scale_samples(samples.iter().map(|&s| f64::from(s)).collect(), true),
        PixelData::F64(samples) => scale_samples(samples.clone(), true),
    }
}

/// Non-finite samples become 0 before the range is inspected
fn scale_samples(mut samples: Vec<f64>, is_float: bool) -> Vec<u8> {
    for s in samples.iter_mut().filter(|s| !s.is_finite()) {
        *s = 0.0;
    }
    let (min, max) = samples
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

    if samples.is_empty() {
        return Vec::new();
    }
    if is_float && min >= 0.0 && max <= 1.0 {
        samples.iter().map(|&v| to_byte(v * 255.0)).collect()
    } else if min >= 0.0 && max <= 255.0 {
        samples.iter().map(|&v| to_byte(v)).collect()
    } else if max > min {
        let span = max - min;
        samples.iter().map(|&v| to_byte((v - min) / span * 255.0)).collect()
    } else {
        vec![0; samples.len()]
    }
}

fn to_byte(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

fn reduce_channels(samples: Vec<u8>, channels: u32) -> Result<Vec<u8>> {
    match channels {
        3 => Ok(samples),
        1 => Ok(samples.iter().flat_map(|&s| [s, s, s]).collect()),
        4 => {
            let pixels: &[[u8; 4]] = bytemuck::try_cast_slice(&samples)
                .map_err(|e| ContractError::Other(format!("RGBA view: {e}")))?;
            Ok(pixels.iter().flat_map(|&[r, g, b, _]| [r, g, b]).collect())
        }
        other => Err(FrameError::UnsupportedChannels { channels: other }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn assert_canonical(frame: &CanonicalFrame, width: u32, height: u32) {
        assert_eq!(frame.width(), width);
        assert_eq!(frame.height(), height);
        assert_eq!(frame.width() % 2, 0);
        assert_eq!(frame.height() % 2, 0);
        assert_eq!(frame.channels(), 3);
        assert_eq!(frame.as_slice().len(), (width * height * 3) as usize);
    }

    #[test]
    fn test_u8_rgb_passthrough_is_idempotent() {
        let n = FrameNormalizer::new(4, 2);
        let data: Vec<u8> = (0..24).collect();
        let raw = RawFrame::new(4, 2, 3, PixelData::U8(data.clone()));

        let once = n.normalize(&raw);
        assert_eq!(once.as_slice(), data.as_slice());
        let twice = n.normalize(&once.to_raw());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_unit_float_scaled() {
        let n = FrameNormalizer::new(2, 2);
        let raw = RawFrame::new(2, 2, 1, PixelData::F32(vec![0.0, 0.5, 1.0, 0.25]));
        let frame = n.try_normalize(&raw).unwrap();
        assert_eq!(frame.pixel(0, 0), Some([0, 0, 0]));
        assert_eq!(frame.pixel(1, 0), Some([128, 128, 128]));
        assert_eq!(frame.pixel(0, 1), Some([255, 255, 255]));
    }

    #[test]
    fn test_byte_range_float_passes_through() {
        let n = FrameNormalizer::new(2, 2);
        let raw = RawFrame::new(2, 2, 1, PixelData::F64(vec![0.0, 10.0, 200.0, 255.0]));
        let frame = n.try_normalize(&raw).unwrap();
        assert_eq!(frame.pixel(1, 0), Some([10, 10, 10]));
        assert_eq!(frame.pixel(0, 1), Some([200, 200, 200]));
    }

    #[test]
    fn test_wide_range_min_max_scaled() {
        let n = FrameNormalizer::new(2, 2);
        let raw = RawFrame::new(2, 2, 1, PixelData::U16(vec![0, 1000, 500, 1000]));
        let frame = n.try_normalize(&raw).unwrap();
        assert_eq!(frame.pixel(0, 0), Some([0, 0, 0]));
        assert_eq!(frame.pixel(1, 0), Some([255, 255, 255]));
        assert_eq!(frame.pixel(0, 1), Some([128, 128, 128]));
    }

    #[test]
    fn test_non_finite_samples_become_zero() {
        let n = FrameNormalizer::new(2, 2);
        let raw = RawFrame::new(
            2,
            2,
            1,
            PixelData::F32(vec![f32::NAN, f32::INFINITY, f32::NEG_INFINITY, 1.0]),
        );
        let frame = n.try_normalize(&raw).unwrap();
        assert_eq!(frame.pixel(0, 0), Some([0, 0, 0]));
        assert_eq!(frame.pixel(1, 0), Some([0, 0, 0]));
        assert_eq!(frame.pixel(0, 1), Some([0, 0, 0]));
        assert_eq!(frame.pixel(1, 1), Some([255, 255, 255]));
    }

    #[test]
    fn test_constant_out_of_range_buffer() {
        let n = FrameNormalizer::new(2, 2);
        let raw = RawFrame::new(2, 2, 1, PixelData::F32(vec![-3.0; 4]));
        let frame = n.try_normalize(&raw).unwrap();
        assert!(frame.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_rgba_drops_alpha() {
        let n = FrameNormalizer::new(2, 2);
        let data = [[10u8, 20, 30, 255]; 4].concat();
        let raw = RawFrame::new(2, 2, 4, PixelData::U8(data));
        let frame = n.try_normalize(&raw).unwrap();
        assert_eq!(frame.pixel(1, 1), Some([10, 20, 30]));
    }

    #[test]
    fn test_unsupported_channels_and_malformed_give_safe_frame() {
        let n = FrameNormalizer::new(4, 4);

        let two_channel = RawFrame::new(2, 2, 2, PixelData::U8(vec![0; 8]));
        assert!(matches!(
            n.try_normalize(&two_channel),
            Err(FrameError::UnsupportedChannels { channels: 2 })
        ));
        assert_eq!(n.normalize(&two_channel), n.safe_frame());

        let short = RawFrame::new(2, 2, 3, PixelData::U8(vec![0; 5]));
        assert!(matches!(n.try_normalize(&short), Err(FrameError::MalformedBuffer { .. })));
        assert_eq!(n.normalize(&short).pixel(0, 0), Some(SAFE_COLOR));
    }

    #[test]
    fn test_resize_to_even_target() {
        let n = FrameNormalizer::new(7, 5);
        assert_eq!((n.width(), n.height()), (6, 4));

        let raw = RawFrame::new(3, 3, 3, PixelData::U8(vec![90; 27]));
        let frame = n.try_normalize(&raw).unwrap();
        assert_canonical(&frame, 6, 4);
        assert!(frame.as_slice().iter().all(|&b| b == 90));
    }

    #[test]
    fn test_random_inputs_always_canonical() {
        let mut rng = rand::rng();
        let n = FrameNormalizer::new(16, 10);

        for _ in 0..50 {
            let width = rng.random_range(1..20);
            let height = rng.random_range(1..20);
            let channels = [1u32, 2, 3, 4, 5][rng.random_range(0..5)];
            let len = (width * height * channels) as usize;
            let pixels = match rng.random_range(0..3) {
                0 => PixelData::U8((0..len).map(|_| rng.random()).collect()),
                1 => PixelData::F32(
                    (0..len)
                        .map(|_| match rng.random_range(0..10) {
                            0 => f32::NAN,
                            1 => f32::INFINITY,
                            _ => rng.random_range(-50.0..50.0),
                        })
                        .collect(),
                ),
                _ => PixelData::U16((0..len).map(|_| rng.random()).collect()),
            };

            let frame = n.normalize(&RawFrame::new(width, height, channels, pixels));
            assert_canonical(&frame, 16, 10);
            assert_eq!(n.normalize(&frame.to_raw()), frame);
        }
    }
}
