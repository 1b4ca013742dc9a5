use crate::StreamError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Yuyv,
    Nv12,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"NV12" => Some(PixelFormat::Nv12),
            _ => None,
        }
    }
}

pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>, StreamError> {
    let w = width as usize;
    let h = height as usize;
    let plane = w
        .checked_mul(h)
        .ok_or_else(|| StreamError::Encode("frame dimensions overflow".into()))?;
    match format {
        PixelFormat::Rgb24 => {
            let expected = plane * 3;
            check_len("RGB", pixels, expected)?;
            Ok(pixels[..expected].to_vec())
        }
        PixelFormat::Yuyv => {
            check_len("YUYV", pixels, plane * 2)?;
            Ok(yuyv_to_rgb(pixels, plane))
        }
        PixelFormat::Nv12 => {
            if w % 2 != 0 || h % 2 != 0 {
                return Err(StreamError::TransientCaptureFailure(format!(
                    "NV12 frame needs even dimensions, got {}x{}",
                    width, height
                )));
            }
            check_len("NV12", pixels, plane + plane / 2)?;
            Ok(nv12_to_rgb(pixels, w, h))
        }
    }
}

/// Drivers may pad buffers, so only a short buffer is an error.
fn check_len(label: &str, pixels: &[u8], expected: usize) -> Result<(), StreamError> {
    if pixels.len() < expected {
        return Err(StreamError::TransientCaptureFailure(format!(
            "{} frame too short: expected {}, got {}",
            label,
            expected,
            pixels.len()
        )));
    }
    Ok(())
}

fn yuyv_to_rgb(pixels: &[u8], plane: usize) -> Vec<u8> {
    let mut rgb = vec![0u8; plane * 3];
    for (pair, out) in pixels[..plane * 2]
        .chunks_exact(4)
        .zip(rgb.chunks_exact_mut(6))
    {
        let u = pair[1] as f32 - 128.0;
        let v = pair[3] as f32 - 128.0;
        write_rgb(&mut out[..3], pair[0] as f32, u, v);
        write_rgb(&mut out[3..], pair[2] as f32, u, v);
    }
    rgb
}

fn nv12_to_rgb(pixels: &[u8], w: usize, h: usize) -> Vec<u8> {
    let y_plane = w * h;
    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;
            let offset = (j * w + i) * 3;
            write_rgb(&mut rgb[offset..offset + 3], y, u, v);
        }
    }
    rgb
}

fn write_rgb(out: &mut [u8], y: f32, u: f32, v: f32) {
    out[0] = clamp_to_u8(y + 1.402_f32 * v);
    out[1] = clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v);
    out[2] = clamp_to_u8(y + 1.772_f32 * u);
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_conversion_produces_gray() -> Result<(), StreamError> {
        let nv12 = [vec![128u8; 4], vec![128u8; 2]].concat();
        let rgb = normalize_to_rgb(&nv12, 2, 2, PixelFormat::Nv12)?;
        assert_eq!(rgb, vec![128u8; 12]);
        Ok(())
    }

    #[test]
    fn yuyv_conversion_produces_gray() -> Result<(), StreamError> {
        let yuyv = [128u8, 128, 128, 128].repeat(2);
        let rgb = normalize_to_rgb(&yuyv, 2, 2, PixelFormat::Yuyv)?;
        assert_eq!(rgb, vec![128u8; 12]);
        Ok(())
    }

    #[test]
    fn padded_rgb_buffer_is_trimmed() -> Result<(), StreamError> {
        let pixels = vec![1u8; 12];
        let rgb = normalize_to_rgb(&pixels, 1, 3, PixelFormat::Rgb24)?;
        assert_eq!(rgb.len(), 9);
        Ok(())
    }

    #[test]
    fn odd_nv12_dimensions_are_transient() {
        let nv12 = vec![128u8; 9];
        let err = normalize_to_rgb(&nv12, 3, 2, PixelFormat::Nv12).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn short_buffer_is_transient() {
        let err = normalize_to_rgb(&[0u8; 3], 2, 2, PixelFormat::Yuyv).unwrap_err();
        assert!(err.is_transient());
    }
}
