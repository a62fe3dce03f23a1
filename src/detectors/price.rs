//! Price band analysis
//!
//! The price trace is the topmost ink pixel of every column in the price
//! band. Heights are measured upward from the bottom of the band, so a larger
//! value means a higher price.

use image::GrayImage;

use super::{chart_components, Detector, PRICE_PATTERNS};
use crate::error::DetectorError;
use crate::types::{DetectorResult, PriceAction, PricePatterns, Trend};
use crate::vision::AnalysisSurface;

/// Fewer inked columns than this and no direction is claimed
pub const MIN_TRACE_COLUMNS: usize = 8;

/// Support/resistance clustering tolerance, relative to band height
const LEVEL_TOLERANCE: f64 = 0.02;
const LEVEL_MIN_TOUCHES: usize = 2;

/// Share of the trace treated as "current" price
const TRAILING_FRACTION: f64 = 0.1;
/// Trailing range (relative to band height) still counted as a consolidation
const CONSOLIDATION_RANGE: f64 = 0.1;

#[derive(Debug, Clone)]
pub(crate) struct PriceTrace {
    /// (x, top ink y), ascending x
    columns: Vec<(u32, u32)>,
    width: u32,
    height: u32,
}

impl PriceTrace {
    pub fn extract(band: &GrayImage) -> Self {
        let mut tops: Vec<Option<u32>> = vec![None; band.width() as usize];
        for component in chart_components(band) {
            for &(x, y) in &component.pixels {
                let top = &mut tops[x as usize];
                *top = Some(top.map_or(y, |t| t.min(y)));
            }
        }

        Self {
            columns: tops
                .into_iter()
                .enumerate()
                .filter_map(|(x, top)| top.map(|y| (x as u32, y)))
                .collect(),
            width: band.width(),
            height: band.height(),
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Heights above the band floor, in column order
    pub fn values(&self) -> Vec<f64> {
        self.columns
            .iter()
            .map(|&(_, y)| (self.height.saturating_sub(1) - y) as f64)
            .collect()
    }

    fn height(&self) -> f64 {
        self.height.max(1) as f64
    }
}

/// Least-squares slope of the trace, as total rise relative to band height
pub(crate) fn relative_rise(trace: &PriceTrace) -> Option<f64> {
    if trace.len() < MIN_TRACE_COLUMNS {
        return None;
    }
    let xs: Vec<f64> = trace.columns.iter().map(|&(x, _)| x as f64).collect();
    let vs = trace.values();
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_v = vs.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var = 0.0;
    for (x, v) in xs.iter().zip(&vs) {
        cov += (x - mean_x) * (v - mean_v);
        var += (x - mean_x) * (x - mean_x);
    }
    if var <= 0.0 {
        return None;
    }

    let span = xs[xs.len() - 1] - xs[0];
    Some(cov / var * span / trace.height())
}

pub(crate) fn classify_trend(trace: &PriceTrace, threshold: f64) -> Trend {
    match relative_rise(trace) {
        Some(rise) if rise > threshold => Trend::Up,
        Some(rise) if rise < -threshold => Trend::Down,
        Some(_) => Trend::Flat,
        None => Trend::Unknown,
    }
}

/// (support, resistance) levels as ascending y-coordinates
pub(crate) fn support_resistance(trace: &PriceTrace) -> (Vec<u32>, Vec<u32>) {
    let mut runs: Vec<u32> = Vec::new();
    for &(_, y) in &trace.columns {
        if runs.last() != Some(&y) {
            runs.push(y);
        }
    }

    let mut troughs = Vec::new();
    let mut peaks = Vec::new();
    for w in runs.windows(3) {
        let (prev, y, next) = (w[0], w[1], w[2]);
        // smaller y is higher on screen
        if y < prev && y < next {
            peaks.push(y);
        } else if y > prev && y > next {
            troughs.push(y);
        }
    }

    let tolerance = ((trace.height() * LEVEL_TOLERANCE).round() as u32).max(1);
    (cluster_levels(troughs, tolerance), cluster_levels(peaks, tolerance))
}

fn cluster_levels(mut ys: Vec<u32>, tolerance: u32) -> Vec<u32> {
    ys.sort_unstable();
    let mut levels = Vec::new();
    let mut cluster: Vec<u32> = Vec::new();

    let mut close = |cluster: &mut Vec<u32>| {
        if cluster.len() >= LEVEL_MIN_TOUCHES {
            let mean = cluster.iter().map(|&y| y as f64).sum::<f64>() / cluster.len() as f64;
            levels.push(mean.round() as u32);
        }
        cluster.clear();
    };

    for y in ys {
        if let Some(&last) = cluster.last() {
            if y - last > tolerance {
                close(&mut cluster);
            }
        }
        cluster.push(y);
    }
    close(&mut cluster);

    levels
}

pub(crate) fn price_action(trace: &PriceTrace) -> PriceAction {
    let values = trace.values();
    if values.is_empty() {
        return PriceAction {
            coverage: 0.0,
            range: 0.0,
            volatility: 0.0,
            net_change: 0.0,
        };
    }

    let height = trace.height();
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    let max = values.iter().cloned().fold(f64::MIN, f64::max);
    let min = values.iter().cloned().fold(f64::MAX, f64::min);

    PriceAction {
        coverage: n / trace.width.max(1) as f64,
        range: (max - min) / height,
        volatility: variance.sqrt() / height,
        net_change: (values[values.len() - 1] - values[0]) / height,
    }
}

/// Where the latest price sits inside the observed range, in [0, 1]
pub(crate) fn breakout_potential(trace: &PriceTrace) -> f64 {
    if trace.len() < MIN_TRACE_COLUMNS {
        return 0.0;
    }
    let values = trace.values();
    let max = values.iter().cloned().fold(f64::MIN, f64::max);
    let min = values.iter().cloned().fold(f64::MAX, f64::min);
    if max - min <= 0.0 {
        return 0.0;
    }

    let tail = ((values.len() as f64 * TRAILING_FRACTION).ceil() as usize).max(1);
    let recent = &values[values.len() - tail..];
    let current = recent.iter().sum::<f64>() / recent.len() as f64;
    ((current - min) / (max - min)).clamp(0.0, 1.0)
}

/// Tight sideways movement over the last third of the trace
pub(crate) fn is_consolidating(trace: &PriceTrace) -> bool {
    if trace.len() < MIN_TRACE_COLUMNS {
        return false;
    }
    let values = trace.values();
    let tail = (values.len() / 3).max(1);
    let recent = &values[values.len() - tail..];
    let max = recent.iter().cloned().fold(f64::MIN, f64::max);
    let min = recent.iter().cloned().fold(f64::MAX, f64::min);
    (max - min) / trace.height() <= CONSOLIDATION_RANGE
}

/// Trend, support/resistance and price action of the price band
#[derive(Debug, Clone)]
pub struct PriceDetector {
    trend_threshold: f64,
}

impl PriceDetector {
    pub fn new(trend_threshold: f64) -> Self {
        Self { trend_threshold }
    }
}

impl Default for PriceDetector {
    fn default() -> Self {
        Self::new(0.05)
    }
}

impl Detector for PriceDetector {
    fn name(&self) -> &'static str {
        PRICE_PATTERNS
    }

    fn detect(&self, surface: &AnalysisSurface) -> Result<DetectorResult, DetectorError> {
        let band = surface.price_band();
        if band.width() < 2 || band.height() < 2 {
            return Err(DetectorError::SurfaceTooSmall {
                detector: PRICE_PATTERNS,
                width: band.width(),
                height: band.height(),
            });
        }

        let trace = PriceTrace::extract(&band);
        let (support_levels, resistance_levels) = support_resistance(&trace);

        Ok(DetectorResult::Price(PricePatterns {
            trend: classify_trend(&trace, self.trend_threshold),
            support_levels,
            resistance_levels,
            price_action: price_action(&trace),
        }))
    }
}
