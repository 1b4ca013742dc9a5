use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use super::RawImage;
use crate::StreamError;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// Encode a capture as a single JPEG image.
///
/// Device-compressed frames are passed through after a sanity check on the
/// start-of-image marker.
pub fn encode_jpeg(image: RawImage, quality: u8) -> Result<Vec<u8>, StreamError> {
    match image {
        RawImage::Jpeg(bytes) => {
            if bytes.len() < JPEG_SOI.len() || bytes[..2] != JPEG_SOI {
                return Err(StreamError::TransientCaptureFailure(format!(
                    "device returned a {} byte frame without a JPEG header",
                    bytes.len()
                )));
            }
            Ok(bytes)
        }
        RawImage::Rgb24 {
            width,
            height,
            pixels,
        } => {
            let expected = (width as usize)
                .checked_mul(height as usize)
                .and_then(|v| v.checked_mul(3))
                .ok_or_else(|| StreamError::Encode("frame dimensions overflow".into()))?;
            if pixels.len() != expected || expected == 0 {
                return Err(StreamError::Encode(format!(
                    "RGB frame length mismatch: expected {}, got {}",
                    expected,
                    pixels.len()
                )));
            }
            let mut out = Vec::with_capacity(expected / 8);
            JpegEncoder::new_with_quality(&mut out, quality)
                .encode(&pixels, width, height, ExtendedColorType::Rgb8)
                .map_err(|err| StreamError::Encode(err.to_string()))?;
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_rgb_to_jpeg() -> Result<(), StreamError> {
        let image = RawImage::Rgb24 {
            width: 8,
            height: 8,
            pixels: vec![200u8; 8 * 8 * 3],
        };
        let jpeg = encode_jpeg(image, 80)?;
        assert_eq!(&jpeg[..2], &JPEG_SOI);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
        Ok(())
    }

    #[test]
    fn rejects_short_rgb_buffer() {
        let image = RawImage::Rgb24 {
            width: 4,
            height: 4,
            pixels: vec![0u8; 10],
        };
        assert!(matches!(encode_jpeg(image, 80), Err(StreamError::Encode(_))));
    }

    #[test]
    fn passes_device_jpeg_through() -> Result<(), StreamError> {
        let bytes = vec![0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9];
        assert_eq!(encode_jpeg(RawImage::Jpeg(bytes.clone()), 80)?, bytes);
        Ok(())
    }

    #[test]
    fn truncated_device_frame_is_transient() {
        let err = encode_jpeg(RawImage::Jpeg(vec![0x00]), 80).unwrap_err();
        assert!(err.is_transient());
    }
}
