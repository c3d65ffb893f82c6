//! RGB565 frame packing for the panel's three-chunk upload format.
//!
//! A full frame goes to the device as three transfers covering column bands
//! of 120, 120 and 80 columns. Within a band, pixels are emitted column by
//! column, bottom row first, each pixel as a little-endian RGB565 word. Any
//! deviation from this interleave shows up as interlaced or stretched output
//! on the panel.

use crate::{FRAME_BYTES, LCD_HEIGHT, LCD_WIDTH};

/// Column widths of the three upload chunks.
pub const CHUNK_WIDTHS: [usize; 3] = [120, 120, 80];

/// Byte sizes of the three upload chunks (width x height x 2).
pub const CHUNK_SIZES: [usize; 3] = [
    CHUNK_WIDTHS[0] * LCD_HEIGHT * 2,
    CHUNK_WIDTHS[1] * LCD_HEIGHT * 2,
    CHUNK_WIDTHS[2] * LCD_HEIGHT * 2,
];

/// Converts RGB888 to RGB565.
#[inline]
pub fn rgb888_to_rgb565(r: u8, g: u8, b: u8) -> u16 {
    ((r as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (b as u16 >> 3)
}

/// Packs a 320x240 RGB buffer into the device's three column-interleaved
/// RGB565 chunks.
///
/// The input must be exactly [`FRAME_BYTES`] long, row-major with the top
/// row first.
pub fn pack_frame(rgb: &[u8]) -> [Vec<u8>; 3] {
    assert_eq!(rgb.len(), FRAME_BYTES, "frame must be 320x240 RGB");

    let mut chunks = CHUNK_WIDTHS.map(|w| Vec::with_capacity(w * LCD_HEIGHT * 2));
    let mut start = 0;
    for (chunk, &width) in chunks.iter_mut().zip(CHUNK_WIDTHS.iter()) {
        for col in 0..width {
            let column = start + col;
            for row in 0..LCD_HEIGHT {
                let flipped = LCD_HEIGHT - 1 - row;
                let idx = (flipped * LCD_WIDTH + column) * 3;
                let word = rgb888_to_rgb565(rgb[idx], rgb[idx + 1], rgb[idx + 2]);
                chunk.extend_from_slice(&word.to_le_bytes());
            }
        }
        start += width;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reverses the packing permutation. RGB565 widens back to the 8-bit
    /// values it kept, so inputs whose low bits are zero round-trip exactly.
    fn unpack_frame(chunks: &[Vec<u8>; 3]) -> Vec<u8> {
        let mut rgb = vec![0u8; FRAME_BYTES];
        let mut start = 0;
        for (chunk, &width) in chunks.iter().zip(CHUNK_WIDTHS.iter()) {
            let mut words = chunk.chunks_exact(2);
            for col in 0..width {
                for row in 0..LCD_HEIGHT {
                    let flipped = LCD_HEIGHT - 1 - row;
                    let pair = words.next().unwrap();
                    let word = u16::from_le_bytes([pair[0], pair[1]]);
                    let idx = (flipped * LCD_WIDTH + start + col) * 3;
                    rgb[idx] = ((word >> 8) & 0xF8) as u8;
                    rgb[idx + 1] = ((word >> 3) & 0xFC) as u8;
                    rgb[idx + 2] = ((word << 3) & 0xF8) as u8;
                }
            }
            start += width;
        }
        rgb
    }

    #[test]
    fn test_rgb565_conversion() {
        assert_eq!(rgb888_to_rgb565(255, 0, 0), 0xF800);
        assert_eq!(rgb888_to_rgb565(0, 255, 0), 0x07E0);
        assert_eq!(rgb888_to_rgb565(0, 0, 255), 0x001F);
        assert_eq!(rgb888_to_rgb565(255, 255, 255), 0xFFFF);
        assert_eq!(rgb888_to_rgb565(0, 0, 0), 0x0000);
    }

    #[test]
    fn test_chunk_sizes() {
        let frame = vec![0u8; FRAME_BYTES];
        let chunks = pack_frame(&frame);
        assert_eq!(chunks[0].len(), 57_600);
        assert_eq!(chunks[1].len(), 57_600);
        assert_eq!(chunks[2].len(), 38_400);
        assert_eq!(chunks.iter().map(Vec::len).sum::<usize>(), 153_600);
    }

    #[test]
    fn test_solid_red_frame() {
        let mut frame = vec![0u8; FRAME_BYTES];
        for px in frame.chunks_exact_mut(3) {
            px[0] = 255;
        }
        let chunks = pack_frame(&frame);
        for chunk in &chunks {
            for pair in chunk.chunks_exact(2) {
                // 0xF800 little-endian
                assert_eq!(pair, [0x00, 0xF8]);
            }
        }
    }

    #[test]
    fn test_corner_pixel_placement() {
        let mut frame = vec![0u8; FRAME_BYTES];
        // top-left pixel
        frame[0] = 8;
        frame[1] = 16;
        frame[2] = 24;
        // bottom-left pixel, which is emitted first
        let bottom = (LCD_HEIGHT - 1) * LCD_WIDTH * 3;
        frame[bottom] = 255;
        frame[bottom + 1] = 255;
        frame[bottom + 2] = 255;

        let chunks = pack_frame(&frame);
        // column 0 starts bottom-up, so chunk 0 opens with the bottom-left pixel
        assert_eq!(&chunks[0][0..2], [0xFF, 0xFF]);
        // and the top-left pixel lands at the end of column 0
        let offset = (LCD_HEIGHT - 1) * 2;
        assert_eq!(offset, 478);
        assert_eq!(rgb888_to_rgb565(8, 16, 24), 0x0883);
        assert_eq!(&chunks[0][offset..offset + 2], [0x83, 0x08]);
    }

    #[test]
    fn test_packing_is_deterministic() {
        let frame: Vec<u8> = (0..FRAME_BYTES).map(|i| (i % 251) as u8).collect();
        assert_eq!(pack_frame(&frame), pack_frame(&frame));
    }

    #[test]
    fn test_pack_unpack_round_trip() {
        // pixel values exact under RGB565 so quantization drops nothing
        let mut frame = vec![0u8; FRAME_BYTES];
        for (i, px) in frame.chunks_exact_mut(3).enumerate() {
            px[0] = ((i * 8) % 256) as u8 & 0xF8;
            px[1] = ((i * 4) % 256) as u8 & 0xFC;
            px[2] = ((i * 16) % 256) as u8 & 0xF8;
        }
        let chunks = pack_frame(&frame);
        assert_eq!(unpack_frame(&chunks), frame);
    }
}
