//! 🎯 Confidence scoring
//!
//! Additive, bounded score over the detector outputs:
//!
//! | Signal | Weight |
//! |---|---|
//! | accumulation detected | +0.3 |
//! | breakout potential > 0 | +0.3 |
//! | trend classified (any direction) | +0.4 |
//! | volume distribution normal | +0.3 |
//!
//! The sum is capped at 1.0. A degraded (`None`) input contributes nothing.

use tracing::debug;

use crate::types::{EarlyStageIndicators, PricePatterns, VolumeDistribution, VolumeProfile};

pub const ACCUMULATION_WEIGHT: f64 = 0.3;
pub const BREAKOUT_WEIGHT: f64 = 0.3;
pub const TREND_WEIGHT: f64 = 0.4;
pub const VOLUME_WEIGHT: f64 = 0.3;

/// Per-signal contributions of one score
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScoreBreakdown {
    pub accumulation: f64,
    pub breakout: f64,
    pub trend: f64,
    pub volume: f64,
    /// Capped sum, always within [0, 1]
    pub total: f64,
}

impl ScoreBreakdown {
    /// Human-readable breakdown, e.g. `acc:0.3, trend:0.4`
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if self.accumulation > 0.0 {
            parts.push(format!("acc:{:.1}", self.accumulation));
        }
        if self.breakout > 0.0 {
            parts.push(format!("breakout:{:.1}", self.breakout));
        }
        if self.trend > 0.0 {
            parts.push(format!("trend:{:.1}", self.trend));
        }
        if self.volume > 0.0 {
            parts.push(format!("vol:{:.1}", self.volume));
        }

        if parts.is_empty() {
            "no signals".to_string()
        } else {
            parts.join(", ")
        }
    }
}

pub struct ScoreAggregator;

impl ScoreAggregator {
    pub fn breakdown(
        early_stage: Option<&EarlyStageIndicators>,
        price: Option<&PricePatterns>,
        volume: Option<&VolumeProfile>,
    ) -> ScoreBreakdown {
        let mut score = ScoreBreakdown::default();

        if let Some(early) = early_stage {
            if early.accumulation {
                score.accumulation = ACCUMULATION_WEIGHT;
            }
            if early.breakout_potential > 0.0 {
                score.breakout = BREAKOUT_WEIGHT;
            }
        }
        if price.map_or(false, |p| p.trend.is_detected()) {
            score.trend = TREND_WEIGHT;
        }
        if volume.map_or(false, |v| v.distribution == VolumeDistribution::Normal) {
            score.volume = VOLUME_WEIGHT;
        }

        // fixed summation order keeps the result independent of detector order
        let sum = score.accumulation + score.breakout + score.trend + score.volume;
        score.total = if sum.is_finite() { sum.clamp(0.0, 1.0) } else { 0.0 };

        debug!("🎯 Score {:.2} | {}", score.total, score.summary());
        score
    }

    /// Confidence in [0, 1]
    pub fn score(
        early_stage: Option<&EarlyStageIndicators>,
        price: Option<&PricePatterns>,
        volume: Option<&VolumeProfile>,
    ) -> f64 {
        Self::breakdown(early_stage, price, volume).total
    }
}
