use image::GrayImage;

use super::{chart_components, Detector, VOLUME_PROFILE};
use crate::error::DetectorError;
use crate::types::{DetectorResult, VolumeBuildup, VolumeDistribution, VolumeProfile};
use crate::vision::AnalysisSurface;

/// Spikes needed before a distribution is called suspicious
pub const SUSPICIOUS_SPIKES: usize = 3;
const SPIKE_SIGMAS: f64 = 2.0;
/// Normalized left→right growth of bar heights that counts as a buildup
const BUILDUP_SLOPE: f64 = 0.05;
const BUILDUP_MIN_BARS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Bar {
    pub center_x: u32,
    pub height: u32,
}

/// Bar-like components of the volume band, left to right
pub(crate) fn bars(band: &GrayImage) -> Vec<Bar> {
    let max_width = (band.width() / 2).max(1);
    let mut bars: Vec<Bar> = chart_components(band)
        .into_iter()
        .filter(|c| c.bbox.width <= max_width)
        .map(|c| Bar {
            center_x: c.bbox.x + c.bbox.width / 2,
            height: c.bbox.height,
        })
        .collect();
    bars.sort_by_key(|b| b.center_x);
    bars
}

/// Distribution statistics of bar heights
pub fn profile(heights: &[f64]) -> VolumeProfile {
    let heights: Vec<f64> = heights.iter().cloned().filter(|h| h.is_finite() && *h >= 0.0).collect();
    if heights.is_empty() {
        return VolumeProfile::unknown();
    }

    let n = heights.len() as f64;
    let average = heights.iter().sum::<f64>() / n;
    let std_dev = if heights.len() < 2 {
        0.0
    } else {
        (heights.iter().map(|h| (h - average) * (h - average)).sum::<f64>() / n).sqrt()
    };
    let cutoff = average + SPIKE_SIGMAS * std_dev;
    let spikes = heights.iter().filter(|&&h| h > cutoff).count();

    VolumeProfile {
        distribution: if spikes >= SUSPICIOUS_SPIKES {
            VolumeDistribution::Suspicious
        } else {
            VolumeDistribution::Normal
        },
        average,
        std_dev,
        spikes,
        bars: heights.len(),
    }
}

/// Growth of bar heights across the band
pub(crate) fn buildup(bars: &[Bar], band_width: u32, band_height: u32) -> VolumeBuildup {
    if bars.len() < 2 {
        return VolumeBuildup {
            bars: bars.len(),
            slope: 0.0,
            rising: false,
        };
    }

    let n = bars.len() as f64;
    let mean_x = bars.iter().map(|b| b.center_x as f64).sum::<f64>() / n;
    let mean_h = bars.iter().map(|b| b.height as f64).sum::<f64>() / n;
    let (mut cov, mut var) = (0.0, 0.0);
    for b in bars {
        let dx = b.center_x as f64 - mean_x;
        cov += dx * (b.height as f64 - mean_h);
        var += dx * dx;
    }
    let slope = if var > 0.0 {
        cov / var * band_width as f64 / band_height.max(1) as f64
    } else {
        0.0
    };

    VolumeBuildup {
        bars: bars.len(),
        slope,
        rising: bars.len() >= BUILDUP_MIN_BARS && slope > BUILDUP_SLOPE,
    }
}

/// Volume bar statistics of the bottom band
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeDetector;

impl Detector for VolumeDetector {
    fn name(&self) -> &'static str {
        VOLUME_PROFILE
    }

    fn detect(&self, surface: &AnalysisSurface) -> Result<DetectorResult, DetectorError> {
        let heights: Vec<f64> = bars(&surface.volume_band()).iter().map(|b| b.height as f64).collect();
        Ok(DetectorResult::Volume(profile(&heights)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_no_bars_is_unknown_sentinel() {
        let p = profile(&[]);
        assert_eq!(p.distribution, VolumeDistribution::Unknown);
        assert_eq!(p.average, 0.0);
        assert_eq!(p.spikes, 0);
    }

    #[test]
    fn test_single_bar_has_zero_std() {
        let p = profile(&[12.0]);
        assert_eq!(p.std_dev, 0.0);
        assert_eq!(p.spikes, 0);
        assert_eq!(p.distribution, VolumeDistribution::Normal);
    }

    #[test]
    fn test_equal_bars_are_normal() {
        let p = profile(&[8.0; 10]);
        assert_eq!(p.average, 8.0);
        assert_eq!(p.spikes, 0);
        assert_eq!(p.distribution, VolumeDistribution::Normal);
    }

    #[test]
    fn test_three_spikes_are_suspicious() {
        let mut heights = vec![10.0; 20];
        heights.extend([100.0, 100.0, 100.0]);
        let p = profile(&heights);

        assert_eq!(p.spikes, 3);
        assert_eq!(p.distribution, VolumeDistribution::Suspicious);
    }

    #[test]
    fn test_spike_count_monotone_in_extra_spikes() {
        let base = vec![5.0; 40];
        let mut previous = 0;
        for extra in 0..4 {
            let mut heights = base.clone();
            heights.extend(std::iter::repeat(80.0).take(extra));
            let spikes = profile(&heights).spikes;
            assert!(spikes >= previous);
            previous = spikes;
        }
        assert_eq!(previous, 3);
    }

    #[test]
    fn test_bars_from_band() {
        let mut band = GrayImage::new(60, 20);
        for (x0, h) in [(5u32, 4u32), (20, 8), (35, 12), (50, 16)] {
            for x in x0..x0 + 4 {
                for y in 19 - h..19 {
                    band.put_pixel(x, y, Luma([255]));
                }
            }
        }
        let found = bars(&band);
        assert_eq!(found.iter().map(|b| b.height).collect::<Vec<_>>(), vec![4, 8, 12, 16]);

        let growth = buildup(&found, 60, 20);
        assert!(growth.rising);
        assert!(growth.slope > 0.0);
    }
}
