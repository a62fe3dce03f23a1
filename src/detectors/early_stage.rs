use std::collections::BTreeMap;
use std::sync::Arc;

use super::price::{breakout_potential, is_consolidating, PriceTrace};
use super::volume::{bars, buildup};
use super::{Detector, PatternLibrary, EARLY_STAGE};
use crate::error::DetectorError;
use crate::types::{DetectorResult, EarlyStageIndicators};
use crate::vision::AnalysisSurface;

/// Accumulation, breakout potential and volume buildup.
///
/// Reference patterns win when loaded: an `accumulation` hit above the
/// threshold sets accumulation, a `breakout` hit raises breakout potential to
/// at least the match score. Without patterns the price-trace heuristics
/// decide on their own.
#[derive(Debug, Clone)]
pub struct EarlyStageDetector {
    patterns: Arc<PatternLibrary>,
    template_threshold: f64,
}

impl EarlyStageDetector {
    pub fn new(patterns: Arc<PatternLibrary>, template_threshold: f64) -> Self {
        Self {
            patterns,
            template_threshold,
        }
    }
}

impl Detector for EarlyStageDetector {
    fn name(&self) -> &'static str {
        EARLY_STAGE
    }

    fn detect(&self, surface: &AnalysisSurface) -> Result<DetectorResult, DetectorError> {
        let price_band = surface.price_band();
        if price_band.width() < 2 || price_band.height() < 2 {
            return Err(DetectorError::SurfaceTooSmall {
                detector: EARLY_STAGE,
                width: surface.width(),
                height: surface.height(),
            });
        }

        let mut template_scores = BTreeMap::new();
        for name in self.patterns.names() {
            if let Some(score) = self.patterns.best_match(name, &price_band) {
                template_scores.insert(name.to_string(), score);
            }
        }

        let trace = PriceTrace::extract(&price_band);
        let accumulation = match template_scores.get("accumulation") {
            Some(&score) => score >= self.template_threshold,
            None => is_consolidating(&trace),
        };

        let mut breakout = breakout_potential(&trace);
        if let Some(&score) = template_scores.get("breakout") {
            if score >= self.template_threshold {
                breakout = breakout.max(score);
            }
        }

        let volume_band = surface.volume_band();
        let volume_buildup = buildup(&bars(&volume_band), volume_band.width(), volume_band.height());

        Ok(DetectorResult::EarlyStage(EarlyStageIndicators {
            accumulation,
            breakout_potential: breakout.clamp(0.0, 1.0),
            volume_buildup,
            template_scores,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn surface_with_basing_trace() -> AnalysisSurface {
        // 100 rows: price band 0..80, volume band 80..100
        let mut img = GrayImage::new(90, 100);
        for x in 5..85u32 {
            let y = if x < 45 { 10 + x } else { 60 };
            img.put_pixel(x, y, Luma([255]));
        }
        AnalysisSurface::from_binary(img)
    }

    #[test]
    fn test_heuristics_without_patterns() {
        let detector = EarlyStageDetector::new(Arc::new(PatternLibrary::empty()), 0.8);
        let result = detector.detect(&surface_with_basing_trace()).unwrap();

        let DetectorResult::EarlyStage(indicators) = result else {
            panic!("unexpected result kind");
        };
        assert!(indicators.accumulation);
        assert!(indicators.breakout_potential < 0.1);
        assert!(indicators.template_scores.is_empty());
        assert_eq!(indicators.volume_buildup.bars, 0);
    }

    #[test]
    fn test_pattern_scores_are_reported() {
        let pattern = GrayImage::from_fn(20, 20, |x, y| {
            if (x as i32 - y as i32).abs() <= 1 {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        let patterns = PatternLibrary::empty().with_pattern("breakout", pattern);
        let detector = EarlyStageDetector::new(Arc::new(patterns), 0.8);

        let DetectorResult::EarlyStage(indicators) = detector.detect(&surface_with_basing_trace()).unwrap() else {
            panic!("unexpected result kind");
        };
        let score = indicators.template_scores["breakout"];
        assert!((0.0..=1.0).contains(&score));
        assert!((0.0..=1.0).contains(&indicators.breakout_potential));
    }
}
