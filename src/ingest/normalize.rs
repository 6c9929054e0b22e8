use anyhow::{anyhow, Result};
use zeroize::Zeroize;

/// Layout of a captured pixel buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 8-bit RGB, row-major, no padding.
    #[default]
    Rgb24,
    /// Full-resolution Y plane followed by interleaved half-resolution UV.
    Nv12,
}

impl PixelFormat {
    /// Expected buffer length for a `width x height` frame.
    ///
    /// NV12 subsamples chroma 2x2, so both dimensions must be even.
    pub fn buffer_len(&self, width: u32, height: u32) -> Result<usize> {
        if *self == PixelFormat::Nv12 && (width % 2 != 0 || height % 2 != 0) {
            return Err(anyhow!("NV12 frames need even dimensions, got {}x{}", width, height));
        }
        let pixels = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        let len = match self {
            PixelFormat::Rgb24 => pixels.checked_mul(3),
            PixelFormat::Nv12 => pixels.checked_add(pixels / 2),
        };
        len.ok_or_else(|| anyhow!("frame dimensions overflow"))
    }
}

/// Convert a captured buffer to packed RGB. RGB input is passed through
/// without copying; converted sources are zeroized.
pub(crate) fn normalize_to_rgb(
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    let expected = format.buffer_len(width, height)?;
    if pixels.len() != expected {
        return Err(anyhow!(
            "{:?} buffer is {} bytes, expected {} for {}x{}",
            format,
            pixels.len(),
            expected,
            width,
            height
        ));
    }
    match format {
        PixelFormat::Rgb24 => Ok(pixels),
        PixelFormat::Nv12 => {
            let mut source = pixels;
            let rgb = nv12_to_rgb(&source, width as usize);
            source.zeroize();
            Ok(rgb)
        }
    }
}

// Full-range BT.601 coefficients in 16.16 fixed point.
const CR_TO_R: i32 = 91_881;
const CB_TO_G: i32 = 22_554;
const CR_TO_G: i32 = 46_802;
const CB_TO_B: i32 = 116_130;
const HALF: i32 = 1 << 15;

fn nv12_to_rgb(source: &[u8], width: usize) -> Vec<u8> {
    let (luma, chroma) = source.split_at(source.len() * 2 / 3);
    let mut rgb = Vec::with_capacity(luma.len() * 3);
    for (row, luma_row) in luma.chunks_exact(width).enumerate() {
        let chroma_row = &chroma[(row / 2) * width..(row / 2 + 1) * width];
        for (col, &y) in luma_row.iter().enumerate() {
            let pair = col & !1;
            let cb = chroma_row[pair] as i32 - 128;
            let cr = chroma_row[pair + 1] as i32 - 128;
            let y = (y as i32) << 16;
            rgb.push(fixed_to_u8(y + CR_TO_R * cr));
            rgb.push(fixed_to_u8(y - CB_TO_G * cb - CR_TO_G * cr));
            rgb.push(fixed_to_u8(y + CB_TO_B * cb));
        }
    }
    rgb
}

fn fixed_to_u8(value: i32) -> u8 {
    ((value + HALF) >> 16).clamp(0, 255) as u8
}
