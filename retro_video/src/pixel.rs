use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 0RGB1555, little-endian 16-bit words.
    Xrgb1555,
    /// XRGB8888, little-endian 32-bit words (B, G, R, X in memory).
    #[default]
    Xrgb8888,
    /// RGB565, little-endian 16-bit words.
    Rgb565,
    /// Bytes already in R, G, B, A order.
    Rgba8888,
}

impl PixelFormat {
    /// Map a libretro `retro_pixel_format` id.
    pub fn from_libretro(id: u32) -> Option<Self> {
        match id {
            0 => Some(Self::Xrgb1555),
            1 => Some(Self::Xrgb8888),
            2 => Some(Self::Rgb565),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Xrgb1555 | Self::Rgb565 => 2,
            Self::Xrgb8888 | Self::Rgba8888 => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame dimensions {width}x{height} overflow")]
    Overflow { width: u32, height: u32 },
    #[error("pitch {pitch} smaller than row bytes {row_bytes}")]
    PitchTooSmall { pitch: usize, row_bytes: usize },
    #[error("frame data {actual} bytes, expected at least {expected}")]
    Truncated { actual: usize, expected: usize },
}

/// Decode a core frame into tightly packed RGBA8 rows.
///
/// Tight `Rgba8888` input is returned borrowed.
pub fn decode_to_rgba(
    format: PixelFormat,
    data: &[u8],
    width: u32,
    height: u32,
    pitch: usize,
) -> Result<Cow<'_, [u8]>, FrameError> {
    let overflow = FrameError::Overflow { width, height };
    let bpp = format.bytes_per_pixel();
    let row_bytes = (width as usize).checked_mul(bpp).ok_or(overflow.clone())?;
    let rows = height as usize;
    if rows == 0 || row_bytes == 0 {
        return Ok(Cow::Borrowed(&[]));
    }
    let pitch = if pitch == 0 { row_bytes } else { pitch };
    if pitch < row_bytes {
        return Err(FrameError::PitchTooSmall { pitch, row_bytes });
    }
    let expected = pitch
        .checked_mul(rows - 1)
        .and_then(|bytes| bytes.checked_add(row_bytes))
        .ok_or(overflow)?;
    if data.len() < expected {
        return Err(FrameError::Truncated {
            actual: data.len(),
            expected,
        });
    }

    if format == PixelFormat::Rgba8888 && pitch == row_bytes {
        return Ok(Cow::Borrowed(&data[..expected]));
    }

    let mut output = Vec::with_capacity(width as usize * rows * 4);
    for row in 0..rows {
        let start = row * pitch;
        let src = &data[start..start + row_bytes];
        match format {
            PixelFormat::Rgba8888 => output.extend_from_slice(src),
            PixelFormat::Xrgb8888 => {
                for pixel in src.chunks_exact(4) {
                    output.extend_from_slice(&[pixel[2], pixel[1], pixel[0], 0xFF]);
                }
            }
            PixelFormat::Rgb565 => {
                for pixel in src.chunks_exact(2) {
                    let value = u16::from_le_bytes([pixel[0], pixel[1]]);
                    let r = expand5((value >> 11) & 0x1F);
                    let g = expand6((value >> 5) & 0x3F);
                    let b = expand5(value & 0x1F);
                    output.extend_from_slice(&[r, g, b, 0xFF]);
                }
            }
            PixelFormat::Xrgb1555 => {
                for pixel in src.chunks_exact(2) {
                    let value = u16::from_le_bytes([pixel[0], pixel[1]]);
                    let r = expand5((value >> 10) & 0x1F);
                    let g = expand5((value >> 5) & 0x1F);
                    let b = expand5(value & 0x1F);
                    output.extend_from_slice(&[r, g, b, 0xFF]);
                }
            }
        }
    }
    Ok(Cow::Owned(output))
}

fn expand5(value: u16) -> u8 {
    ((value << 3) | (value >> 2)) as u8
}

fn expand6(value: u16) -> u8 {
    ((value << 2) | (value >> 4)) as u8
}
