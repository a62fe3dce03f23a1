use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::RgbImage;
use std::borrow::Cow;

use crate::error::DecodeError;
use crate::types::RawImage;

/// Three-channel raster with non-zero width and height
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRaster {
    image: RgbImage,
}

impl DecodedRaster {
    pub fn new(image: RgbImage) -> Result<Self, DecodeError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DecodeError::ZeroArea {
                width: image.width(),
                height: image.height(),
            });
        }
        Ok(Self { image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

/// Decode a captured screenshot into a raster.
///
/// Base64 payloads may carry a `data:image/...;base64,` prefix. The encoded
/// format is sniffed from the bytes, so the file extension never matters.
pub fn decode(blob: &RawImage) -> Result<DecodedRaster, DecodeError> {
    let bytes: Cow<'_, [u8]> = match blob {
        RawImage::Base64(text) => {
            let text = text.trim();
            let payload = match text.strip_prefix("data:") {
                Some(uri) => uri.split_once(',').map(|(_, data)| data).unwrap_or(""),
                None => text,
            };
            if payload.is_empty() {
                return Err(DecodeError::Empty);
            }
            Cow::Owned(STANDARD.decode(payload)?)
        }
        RawImage::Bytes(bytes) => Cow::Borrowed(bytes.as_slice()),
    };

    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let image = image::load_from_memory(&bytes)?;
    DecodedRaster::new(image.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn png_bytes(image: &RgbImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_base64_png() {
        let source = RgbImage::from_pixel(7, 3, Rgb([10, 20, 30]));
        let blob = RawImage::Base64(STANDARD.encode(png_bytes(&source)));

        let raster = decode(&blob).unwrap();
        assert_eq!((raster.width(), raster.height()), (7, 3));
        assert_eq!(raster.image(), &source);
    }

    #[test]
    fn test_decode_data_uri() {
        let source = RgbImage::from_pixel(2, 2, Rgb([255, 0, 0]));
        let uri = format!("data:image/png;base64,{}", STANDARD.encode(png_bytes(&source)));

        assert_eq!(decode(&RawImage::Base64(uri)).unwrap().image(), &source);
    }

    #[test]
    fn test_decode_empty_payloads() {
        assert!(matches!(decode(&RawImage::Bytes(Vec::new())), Err(DecodeError::Empty)));
        assert!(matches!(decode(&RawImage::Base64("  ".into())), Err(DecodeError::Empty)));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode(&RawImage::Bytes(b"definitely not an image".to_vec())),
            Err(DecodeError::Image(_))
        ));
        assert!(matches!(
            decode(&RawImage::Base64("%%%not-base64%%%".into())),
            Err(DecodeError::Base64(_))
        ));
    }

    #[test]
    fn test_zero_area_rejected() {
        assert!(matches!(
            DecodedRaster::new(RgbImage::new(0, 5)),
            Err(DecodeError::ZeroArea { width: 0, height: 5 })
        ));
    }
}
