use image::{imageops, GrayImage};

use super::filters::{gaussian_blur, threshold, to_gray, BLUR_SIGMA, INK, THRESHOLD_CUTOFF};
use super::region::ChartRegion;
use crate::error::PreprocessError;

/// Share of the surface height above the volume band
pub const PRICE_BAND_FRACTION: f64 = 0.8;

/// Binary single-channel raster of a chart region: every pixel is 0 or [`INK`]
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSurface {
    image: GrayImage,
}

impl AnalysisSurface {
    /// Wrap an already-binarized raster; anything above the cutoff is ink
    pub fn from_binary(image: GrayImage) -> Self {
        Self {
            image: threshold(&image, THRESHOLD_CUTOFF),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn is_ink(&self, x: u32, y: u32) -> bool {
        self.image.get_pixel(x, y).0[0] == INK
    }

    /// First row of the volume band, `floor(0.8 * height)`
    pub fn volume_split(&self) -> u32 {
        ((self.height() as f64 * PRICE_BAND_FRACTION).floor() as u32).min(self.height())
    }

    /// Rows above the volume band
    pub fn price_band(&self) -> GrayImage {
        imageops::crop_imm(&self.image, 0, 0, self.width(), self.volume_split()).to_image()
    }

    /// Bottom rows, from [`volume_split`](Self::volume_split) down
    pub fn volume_band(&self) -> GrayImage {
        let split = self.volume_split();
        imageops::crop_imm(&self.image, 0, split, self.width(), self.height() - split).to_image()
    }
}

/// Grayscale, Gaussian blur, then binary threshold at 127
pub fn preprocess(region: &ChartRegion) -> Result<AnalysisSurface, PreprocessError> {
    if region.width() == 0 || region.height() == 0 {
        return Err(PreprocessError::ZeroArea {
            width: region.width(),
            height: region.height(),
        });
    }

    Ok(binarize(&to_gray(region.image())))
}

/// Smoothing and threshold shared with reference patterns
pub(crate) fn binarize(gray: &GrayImage) -> AnalysisSurface {
    let blurred = gaussian_blur(gray, BLUR_SIGMA);
    AnalysisSurface {
        image: threshold(&blurred, THRESHOLD_CUTOFF),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RegionBounds;
    use image::{Luma, Rgb, RgbImage};

    fn region(image: RgbImage) -> ChartRegion {
        let bounds = RegionBounds {
            x: 0,
            y: 0,
            width: image.width(),
            height: image.height(),
        };
        ChartRegion::new(image, bounds)
    }

    #[test]
    fn test_surface_is_binary() {
        let image = RgbImage::from_fn(40, 30, |x, y| Rgb([(x * 6) as u8, (y * 8) as u8, 90]));
        let surface = preprocess(&region(image)).unwrap();

        assert_eq!((surface.width(), surface.height()), (40, 30));
        assert!(surface.image().pixels().all(|p| p.0[0] == 0 || p.0[0] == INK));
    }

    #[test]
    fn test_bright_stroke_survives_dark_page_does_not() {
        let mut image = RgbImage::from_pixel(30, 30, Rgb([90, 90, 90]));
        for x in 5..25 {
            for y in 14..18 {
                image.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let surface = preprocess(&region(image)).unwrap();

        assert!(surface.is_ink(15, 15));
        assert!(!surface.is_ink(15, 5));
        assert!(!surface.is_ink(2, 15));
    }

    #[test]
    fn test_zero_area_region_is_rejected() {
        let err = preprocess(&region(RgbImage::new(0, 0))).unwrap_err();
        assert!(matches!(err, PreprocessError::ZeroArea { .. }));
    }

    #[test]
    fn test_bands_split_at_eighty_percent() {
        let surface = AnalysisSurface::from_binary(GrayImage::from_pixel(10, 101, Luma([0])));
        assert_eq!(surface.volume_split(), 80);
        assert_eq!(surface.price_band().height(), 80);
        assert_eq!(surface.volume_band().height(), 21);
    }
}
