//! 🔍 Pattern detectors
//!
//! A detector reads an [`AnalysisSurface`] and returns one typed result. The
//! registry runs every registered detector against the same surface, each on
//! its own scoped thread. A detector that errors or panics degrades to `None`
//! for that item only; the others are unaffected.

pub mod early_stage;
pub mod price;
pub mod templates;
pub mod volume;

use image::GrayImage;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::AnalysisConfig;
use crate::error::DetectorError;
use crate::types::DetectorResult;
use crate::vision::components::{label_components, Component};
use crate::vision::AnalysisSurface;

pub use early_stage::EarlyStageDetector;
pub use price::PriceDetector;
pub use templates::PatternLibrary;
pub use volume::VolumeDetector;

pub const EARLY_STAGE: &str = "early_stage";
pub const PRICE_PATTERNS: &str = "price_patterns";
pub const VOLUME_PROFILE: &str = "volume_profile";

/// A pattern detector
///
/// Implementations must be pure functions of the surface: no shared mutable
/// state, safe to call from several threads at once.
pub trait Detector: Send + Sync {
    /// Key under which the result is reported
    fn name(&self) -> &'static str;

    fn detect(&self, surface: &AnalysisSurface) -> Result<DetectorResult, DetectorError>;
}

/// Per-detector outcome for one surface; `None` marks a degraded detector
pub type DetectorOutcomes = BTreeMap<&'static str, Option<DetectorResult>>;

/// Ordered set of detectors, unique by name
#[derive(Clone, Default)]
pub struct DetectorRegistry {
    detectors: Vec<Arc<dyn Detector>>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in detectors. The volume detector is only registered when
    /// detailed volume analysis is requested.
    pub fn with_defaults(config: &AnalysisConfig, detailed_volume: bool, patterns: Arc<PatternLibrary>) -> Self {
        let mut registry = Self::new();
        registry.register(EarlyStageDetector::new(patterns, config.template_threshold));
        registry.register(PriceDetector::new(config.trend_threshold));
        if detailed_volume {
            registry.register(VolumeDetector);
        }
        registry
    }

    /// Add a detector, replacing any registered under the same name
    pub fn register(&mut self, detector: impl Detector + 'static) -> &mut Self {
        let detector: Arc<dyn Detector> = Arc::new(detector);
        match self.detectors.iter_mut().find(|d| d.name() == detector.name()) {
            Some(existing) => *existing = detector,
            None => self.detectors.push(detector),
        }
        self
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.detectors.len();
        self.detectors.retain(|d| d.name() != name);
        self.detectors.len() != before
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Run every detector against the surface
    pub fn run_all(&self, surface: &AnalysisSurface) -> DetectorOutcomes {
        std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .detectors
                .iter()
                .map(|detector| (detector.name(), scope.spawn(move || detector.detect(surface))))
                .collect();

            handles
                .into_iter()
                .map(|(name, handle)| {
                    let outcome = match handle.join() {
                        Ok(Ok(result)) => Some(result),
                        Ok(Err(e)) => {
                            warn!("⚠️  Detector {} degraded: {}", name, e);
                            None
                        }
                        Err(panic) => {
                            let e = DetectorError::Panicked(panic_message(panic.as_ref()));
                            warn!("⚠️  Detector {} degraded: {}", name, e);
                            None
                        }
                    };
                    debug!("🔍 {} → {}", name, if outcome.is_some() { "ok" } else { "null" });
                    (name, outcome)
                })
                .collect()
        })
    }
}

impl std::fmt::Debug for DetectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorRegistry").field("detectors", &self.names()).finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Ink components of a band, minus grid and frame lines.
///
/// Anything spanning the band from the left border to the right border is
/// treated as chart furniture rather than data.
pub(crate) fn chart_components(band: &GrayImage) -> Vec<Component> {
    if band.width() == 0 || band.height() == 0 {
        return Vec::new();
    }
    let last_column = band.width() - 1;
    label_components(band)
        .into_iter()
        .filter(|c| !(c.touches_left(0) && c.touches_right(last_column)))
        .collect()
}
