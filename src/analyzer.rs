//! 🧠 Chart analysis of a single queue item
//!
//! decode → isolate → preprocess → detect → score, synchronously. Decode and
//! preprocess failures fail the item; everything after that degrades.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::config::AnalysisConfig;
use crate::detectors::{DetectorRegistry, PatternLibrary, EARLY_STAGE, PRICE_PATTERNS, VOLUME_PROFILE};
use crate::error::StageFailure;
use crate::latency::StageTimings;
use crate::scoring::ScoreAggregator;
use crate::types::{AnalysisRecord, DetectorResult, QueueItem, Stage};
use crate::vision::{decode, isolate, preprocess};

/// Stage an in-flight item has reached, readable from another thread
#[derive(Debug, Clone, Default)]
pub struct StageProgress(Arc<AtomicU8>);

impl StageProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, stage: Stage) {
        self.0.store(stage.as_u8(), Ordering::Release);
    }

    pub fn get(&self) -> Stage {
        Stage::from_u8(self.0.load(Ordering::Acquire))
    }
}

#[derive(Debug)]
pub struct ChartAnalyzer {
    registry: DetectorRegistry,
}

impl ChartAnalyzer {
    pub fn new(registry: DetectorRegistry) -> Self {
        Self { registry }
    }

    pub fn from_config(config: &AnalysisConfig, detailed_volume: bool, patterns: Arc<PatternLibrary>) -> Self {
        Self::new(DetectorRegistry::with_defaults(config, detailed_volume, patterns))
    }

    pub fn registry(&self) -> &DetectorRegistry {
        &self.registry
    }

    /// Run one item through every stage, reporting progress as it goes
    pub fn analyze(&self, item: &QueueItem, progress: &StageProgress) -> (Result<AnalysisRecord, StageFailure>, StageTimings) {
        let mut timings = StageTimings::default();
        let result = self.run_stages(item, progress, &mut timings);
        if result.is_ok() {
            progress.set(Stage::Completed);
        }
        (result, timings)
    }

    fn run_stages(
        &self,
        item: &QueueItem,
        progress: &StageProgress,
        timings: &mut StageTimings,
    ) -> Result<AnalysisRecord, StageFailure> {
        progress.set(Stage::Decoding);
        let started = Instant::now();
        let raster = decode(&item.encoded_image)?;
        timings.decode = started.elapsed();

        progress.set(Stage::Isolating);
        let started = Instant::now();
        let region = isolate(&raster);
        timings.isolate = started.elapsed();
        drop(raster);

        progress.set(Stage::Preprocessing);
        let started = Instant::now();
        let surface = preprocess(&region)?;
        timings.preprocess = started.elapsed();

        progress.set(Stage::Detecting);
        let started = Instant::now();
        let outcomes = self.registry.run_all(&surface);
        timings.detect = started.elapsed();

        progress.set(Stage::Scoring);
        let started = Instant::now();
        let mut early_stage = None;
        let mut price_patterns = None;
        let mut volume_profile = None;
        let mut signals = BTreeMap::new();
        for (name, outcome) in outcomes {
            match (name, outcome) {
                (EARLY_STAGE, Some(DetectorResult::EarlyStage(v))) => early_stage = Some(v),
                (PRICE_PATTERNS, Some(DetectorResult::Price(v))) => price_patterns = Some(v),
                (VOLUME_PROFILE, Some(DetectorResult::Volume(v))) => volume_profile = Some(v),
                (EARLY_STAGE | PRICE_PATTERNS | VOLUME_PROFILE, _) => {}
                (other, Some(result)) => {
                    signals.insert(other.to_string(), result);
                }
                (_, None) => {}
            }
        }

        let breakdown = ScoreAggregator::breakdown(early_stage.as_ref(), price_patterns.as_ref(), volume_profile.as_ref());
        timings.score = started.elapsed();

        debug!(
            "🧠 {} analyzed: confidence={:.2} | {}",
            item.candidate_id,
            breakdown.total,
            breakdown.summary()
        );

        Ok(AnalysisRecord::new(
            item.candidate_id.clone(),
            early_stage,
            price_patterns,
            volume_profile,
            breakdown.total,
            region.bounds(),
            signals,
        ))
    }
}
