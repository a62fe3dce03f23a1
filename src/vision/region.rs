use image::{imageops, RgbImage};
use tracing::debug;

use super::codec::DecodedRaster;
use super::components::external_components;
use super::filters::{canny, gaussian_blur, to_gray, BLUR_SIGMA, CANNY_HIGH, CANNY_LOW};
use crate::types::RegionBounds;

/// Rectangular sub-raster believed to contain the price chart
#[derive(Debug, Clone, PartialEq)]
pub struct ChartRegion {
    image: RgbImage,
    bounds: RegionBounds,
}

impl ChartRegion {
    pub fn new(image: RgbImage, bounds: RegionBounds) -> Self {
        Self { image, bounds }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Where the region sits in the original screenshot
    pub fn bounds(&self) -> RegionBounds {
        self.bounds
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn is_full_frame(&self, raster: &DecodedRaster) -> bool {
        self.bounds.x == 0
            && self.bounds.y == 0
            && self.bounds.width == raster.width()
            && self.bounds.height == raster.height()
    }
}

/// Locate the chart inside a full-page screenshot.
///
/// Edges are extracted with Canny on the smoothed grayscale. The outermost
/// edge component enclosing the largest area wins (first one on ties) and
/// the raster is cropped to its bounding box. Without any edge component the whole raster is returned.
/// Never fails.
pub fn isolate(raster: &DecodedRaster) -> ChartRegion {
    let smoothed = gaussian_blur(&to_gray(raster.image()), BLUR_SIGMA);
    let edges = canny(&smoothed, CANNY_LOW, CANNY_HIGH);

    let mut best = None;
    let mut best_area = 0usize;
    for component in external_components(&edges) {
        let area = component.enclosed_area();
        if area > best_area {
            best_area = area;
            best = Some(component.bbox);
        }
    }

    match best {
        Some(bbox) => {
            debug!(
                "📐 Chart region {}x{} at ({}, {}), enclosed area {}",
                bbox.width, bbox.height, bbox.x, bbox.y, best_area
            );
            let image = imageops::crop_imm(raster.image(), bbox.x, bbox.y, bbox.width, bbox.height).to_image();
            ChartRegion::new(
                image,
                RegionBounds {
                    x: bbox.x,
                    y: bbox.y,
                    width: bbox.width,
                    height: bbox.height,
                },
            )
        }
        None => {
            debug!("📐 No chart outline found, using the full {}x{} frame", raster.width(), raster.height());
            full_frame(raster)
        }
    }
}

fn full_frame(raster: &DecodedRaster) -> ChartRegion {
    ChartRegion::new(
        raster.image().clone(),
        RegionBounds {
            x: 0,
            y: 0,
            width: raster.width(),
            height: raster.height(),
        },
    )
}
