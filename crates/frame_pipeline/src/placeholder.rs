//! Synthetic frames emitted instead of a live capture

use contracts::{even_dimension, CanonicalFrame};

/// Colour bars, left to right
pub const TEST_PATTERN: [[u8; 3]; 7] = [
    [255, 255, 255],
    [255, 255, 0],
    [0, 255, 255],
    [0, 255, 0],
    [255, 0, 255],
    [255, 0, 0],
    [0, 0, 255],
];

/// Black: no signal yet
pub fn warmup_frame(width: u32, height: u32) -> CanonicalFrame {
    CanonicalFrame::filled(width, height, [0, 0, 0])
}

/// Colour bars: every capture strategy failed this tick
pub fn test_pattern(width: u32, height: u32) -> CanonicalFrame {
    let width = even_dimension(width);
    let height = even_dimension(height);
    let stripe = (width as usize / TEST_PATTERN.len()).max(1);

    let row: Vec<[u8; 3]> = (0..width as usize)
        .map(|x| TEST_PATTERN[(x / stripe).min(TEST_PATTERN.len() - 1)])
        .collect();
    let row_bytes: &[u8] = bytemuck::cast_slice(&row);
    let data = row_bytes.repeat(height as usize);

    CanonicalFrame::from_rgb(width, height, data)
        .unwrap_or_else(|_| CanonicalFrame::filled(width, height, TEST_PATTERN[0]))
}
