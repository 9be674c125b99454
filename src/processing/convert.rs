//! Pixel format conversion for captured buffers

use super::to_u8;
use crate::error::{Error, Result};

/// Convert packed BGRA/BGRx rows to tightly packed RGBA
///
/// `stride` is the source row length in bytes. With `opaque` set the fourth
/// byte is treated as padding and written as 255.
pub fn bgra_to_rgba(input: &[u8], width: u32, height: u32, stride: u32, opaque: bool) -> Result<Vec<u8>> {
    repack(input, width, height, stride, opaque, [2, 1, 0, 3])
}

/// Convert packed RGBA/RGBx rows to tightly packed RGBA
pub fn rgbx_to_rgba(input: &[u8], width: u32, height: u32, stride: u32, opaque: bool) -> Result<Vec<u8>> {
    repack(input, width, height, stride, opaque, [0, 1, 2, 3])
}

/// Byte order of packed YUV 4:2:2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Yuv422 {
    /// Y0 U Y1 V
    Yuy2,
    /// U Y0 V Y1
    Uyvy,
}

/// Convert packed YUV 4:2:2 rows to tightly packed RGBA (BT.601)
///
/// Every 4 bytes carry two pixels sharing one chroma sample. An odd width
/// drops the unused second pixel of the last pair.
pub fn yuv422_to_rgba(input: &[u8], width: u32, height: u32, stride: u32, layout: Yuv422) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let stride = stride as usize;
    let row_bytes = w.div_ceil(2) * 4;

    if stride < row_bytes {
        return Err(Error::Internal(format!(
            "Stride {} too small for width {}",
            stride, width
        )));
    }
    if h > 0 && input.len() < stride * (h - 1) + row_bytes {
        return Err(Error::Internal("Input buffer too small".into()));
    }

    let (y0, u, y1, v) = match layout {
        Yuv422::Yuy2 => (0, 1, 2, 3),
        Yuv422::Uyvy => (1, 0, 3, 2),
    };

    let mut output = vec![0u8; w * h * 4];
    for y in 0..h {
        let row = &input[y * stride..y * stride + row_bytes];
        let out_row = &mut output[y * w * 4..(y + 1) * w * 4];
        for (pair, out) in row.chunks_exact(4).zip(out_row.chunks_mut(8)) {
            let cu = pair[u] as f32 - 128.0;
            let cv = pair[v] as f32 - 128.0;
            for (luma, px) in [pair[y0], pair[y1]].into_iter().zip(out.chunks_exact_mut(4)) {
                let l = luma as f32;
                px[0] = to_u8(l + 1.402 * cv);
                px[1] = to_u8(l - 0.344 * cu - 0.714 * cv);
                px[2] = to_u8(l + 1.772 * cu);
                px[3] = 255;
            }
        }
    }

    Ok(output)
}

fn repack(
    input: &[u8],
    width: u32,
    height: u32,
    stride: u32,
    opaque: bool,
    order: [usize; 4],
) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let stride = stride as usize;

    if stride < w * 4 {
        return Err(Error::Internal(format!(
            "Stride {} too small for width {}",
            stride, width
        )));
    }
    if h > 0 && input.len() < stride * (h - 1) + w * 4 {
        return Err(Error::Internal("Input buffer too small".into()));
    }

    let mut output = vec![0u8; w * h * 4];
    for y in 0..h {
        let row = &input[y * stride..y * stride + w * 4];
        let out_row = &mut output[y * w * 4..(y + 1) * w * 4];
        for (src, dst) in row.chunks_exact(4).zip(out_row.chunks_exact_mut(4)) {
            dst[0] = src[order[0]];
            dst[1] = src[order[1]];
            dst[2] = src[order[2]];
            dst[3] = if opaque { 255 } else { src[order[3]] };
        }
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bgrx_with_padding() {
        // 1x2 image, stride 8 (4 bytes of row padding)
        let input = [1, 2, 3, 0, 9, 9, 9, 9, 4, 5, 6, 0, 9, 9, 9, 9];
        let out = bgra_to_rgba(&input, 1, 2, 8, true).unwrap();
        assert_eq!(out, vec![3, 2, 1, 255, 6, 5, 4, 255]);
    }

    #[test]
    fn test_rgba_keeps_alpha() {
        let out = rgbx_to_rgba(&[1, 2, 3, 4], 1, 1, 4, false).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_yuy2_grey_levels() {
        // Two pairs: white/black, then mid grey twice.
        let input = [255, 128, 0, 128, 128, 128, 128, 128];
        let out = yuv422_to_rgba(&input, 4, 1, 8, Yuv422::Yuy2).unwrap();
        assert_eq!(
            out,
            vec![255, 255, 255, 255, 0, 0, 0, 255, 128, 128, 128, 255, 128, 128, 128, 255]
        );
    }

    #[test]
    fn test_uyvy_chroma_and_odd_width() {
        // U=128 V=255 pushes red up and green down; width 1 keeps only Y0.
        let input = [128, 128, 255, 0];
        let out = yuv422_to_rgba(&input, 1, 1, 4, Yuv422::Uyvy).unwrap();
        assert_eq!(out, vec![255, 37, 128, 255]);

        assert!(yuv422_to_rgba(&[0; 4], 3, 1, 8, Yuv422::Yuy2).is_err());
        assert!(yuv422_to_rgba(&[0; 8], 2, 1, 2, Yuv422::Yuy2).is_err());
    }

    #[test]
    fn test_short_buffer() {
        assert!(bgra_to_rgba(&[0; 7], 2, 1, 8, true).is_err());
        assert!(bgra_to_rgba(&[0; 16], 2, 2, 4, true).is_err());
    }
}
