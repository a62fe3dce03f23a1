use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Encoded screenshot exactly as the capture side produced it.
///
/// The format (PNG, JPEG, ...) is implicit in the bytes; the codec sniffs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawImage {
    /// Base64 text, the usual capture transport (PNG-in-base64)
    Base64(String),
    /// Encoded bytes without a text wrapper
    Bytes(Vec<u8>),
}

impl RawImage {
    /// Size of the payload as transported (characters for base64, bytes otherwise)
    pub fn len(&self) -> usize {
        match self {
            RawImage::Base64(s) => s.len(),
            RawImage::Bytes(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A listing discovered by the capture side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub page_url: Option<String>,
    pub discovered_at: i64,
}

impl Candidate {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            page_url: None,
            discovered_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Attach the candidate's token page, `{base_url}/token/{id}`
    pub fn with_page_url(mut self, base_url: &str) -> Self {
        self.page_url = Some(format!("{}/token/{}", base_url.trim_end_matches('/'), self.id));
        self
    }
}

/// Unit of work travelling from the capture producer to the analysis consumer.
///
/// Moved into the queue on enqueue; the producer keeps nothing.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub candidate_id: String,
    pub encoded_image: RawImage,
}

impl QueueItem {
    pub fn new(candidate_id: impl Into<String>, encoded_image: RawImage) -> Self {
        Self {
            candidate_id: candidate_id.into(),
            encoded_image,
        }
    }
}

/// Processing stage of a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Queued,
    Decoding,
    Isolating,
    Preprocessing,
    Detecting,
    Scoring,
    Completed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Queued => "queued",
            Stage::Decoding => "decoding",
            Stage::Isolating => "isolating",
            Stage::Preprocessing => "preprocessing",
            Stage::Detecting => "detecting",
            Stage::Scoring => "scoring",
            Stage::Completed => "completed",
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Stage::Decoding,
            2 => Stage::Isolating,
            3 => Stage::Preprocessing,
            4 => Stage::Detecting,
            5 => Stage::Scoring,
            6 => Stage::Completed,
            _ => Stage::Queued,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of the price trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Flat,
    Unknown,
}

impl Trend {
    /// Any classified direction counts, only `Unknown` does not
    pub fn is_detected(&self) -> bool {
        !matches!(self, Trend::Unknown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeDistribution {
    Normal,
    Suspicious,
    Unknown,
}

/// Bar statistics of the volume sub-band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeProfile {
    pub distribution: VolumeDistribution,
    /// Mean bar height in pixels (never negative)
    pub average: f64,
    /// Population standard deviation of bar heights
    pub std_dev: f64,
    /// Bars taller than `average + 2 * std_dev`
    pub spikes: usize,
    pub bars: usize,
}

impl VolumeProfile {
    /// Sentinel for a sub-band with no detectable bars
    pub fn unknown() -> Self {
        Self {
            distribution: VolumeDistribution::Unknown,
            average: 0.0,
            std_dev: 0.0,
            spikes: 0,
            bars: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeBuildup {
    pub bars: usize,
    /// Height change across the band, relative to band height
    pub slope: f64,
    pub rising: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarlyStageIndicators {
    pub accumulation: bool,
    /// Continuous score in [0, 1]
    pub breakout_potential: f64,
    pub volume_buildup: VolumeBuildup,
    /// Best normalized match per loaded reference pattern
    pub template_scores: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceAction {
    /// Fraction of columns carrying a price trace
    pub coverage: f64,
    /// (max - min) of the trace relative to band height
    pub range: f64,
    /// Std deviation of the trace relative to band height
    pub volatility: f64,
    /// Last minus first trace value relative to band height
    pub net_change: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePatterns {
    pub trend: Trend,
    /// y-coordinates, ascending
    pub support_levels: Vec<u32>,
    /// y-coordinates, ascending
    pub resistance_levels: Vec<u32>,
    pub price_action: PriceAction,
}

/// Output of a single detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DetectorResult {
    Indicator(bool),
    Confidence(f64),
    EarlyStage(EarlyStageIndicators),
    Price(PricePatterns),
    Volume(VolumeProfile),
}

/// Bounds of the isolated chart region inside the original screenshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionBounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Terminal artifact of one successful analysis.
///
/// Degraded detectors show up as `null`, never as a missing key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    candidate_id: String,
    early_stage: Option<EarlyStageIndicators>,
    price_patterns: Option<PricePatterns>,
    volume_profile: Option<VolumeProfile>,
    confidence: f64,
    region: RegionBounds,
    /// Results of any additionally registered detectors, keyed by name
    signals: BTreeMap<String, DetectorResult>,
    analyzed_at: i64,
}

impl AnalysisRecord {
    pub fn new(
        candidate_id: String,
        early_stage: Option<EarlyStageIndicators>,
        price_patterns: Option<PricePatterns>,
        volume_profile: Option<VolumeProfile>,
        confidence: f64,
        region: RegionBounds,
        signals: BTreeMap<String, DetectorResult>,
    ) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            candidate_id,
            early_stage,
            price_patterns,
            volume_profile,
            confidence,
            region,
            signals,
            analyzed_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn candidate_id(&self) -> &str {
        &self.candidate_id
    }

    pub fn early_stage(&self) -> Option<&EarlyStageIndicators> {
        self.early_stage.as_ref()
    }

    pub fn price_patterns(&self) -> Option<&PricePatterns> {
        self.price_patterns.as_ref()
    }

    pub fn volume_profile(&self) -> Option<&VolumeProfile> {
        self.volume_profile.as_ref()
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn region(&self) -> RegionBounds {
        self.region
    }

    pub fn signals(&self) -> &BTreeMap<String, DetectorResult> {
        &self.signals
    }

    pub fn analyzed_at(&self) -> i64 {
        self.analyzed_at
    }
}

/// Item-scoped failure as published to sinks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEvent {
    pub candidate_id: String,
    pub stage: Stage,
    pub reason: String,
}

/// What the consumer publishes for every dequeued item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    Completed(AnalysisRecord),
    Failed(FailureEvent),
}

impl ScanEvent {
    pub fn candidate_id(&self) -> &str {
        match self {
            ScanEvent::Completed(record) => record.candidate_id(),
            ScanEvent::Failed(failure) => &failure.candidate_id,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ScanEvent::Completed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_clamps_confidence() {
        let bounds = RegionBounds { x: 0, y: 0, width: 1, height: 1 };
        let high = AnalysisRecord::new("a".into(), None, None, None, 1.3, bounds, BTreeMap::new());
        assert_eq!(high.confidence(), 1.0);

        let nan = AnalysisRecord::new("b".into(), None, None, None, f64::NAN, bounds, BTreeMap::new());
        assert_eq!(nan.confidence(), 0.0);
    }

    #[test]
    fn test_degraded_fields_serialize_as_null() {
        let bounds = RegionBounds { x: 0, y: 0, width: 4, height: 4 };
        let record = AnalysisRecord::new("mint".into(), None, None, None, 0.0, bounds, BTreeMap::new());
        let json = serde_json::to_value(ScanEvent::Completed(record)).unwrap();

        assert_eq!(json["event"], "completed");
        assert!(json.get("early_stage").unwrap().is_null());
        assert!(json.get("price_patterns").unwrap().is_null());
        assert!(json.get("volume_profile").unwrap().is_null());
    }

    #[test]
    fn test_stage_roundtrip_through_u8() {
        for stage in [
            Stage::Queued,
            Stage::Decoding,
            Stage::Isolating,
            Stage::Preprocessing,
            Stage::Detecting,
            Stage::Scoring,
            Stage::Completed,
        ] {
            assert_eq!(Stage::from_u8(stage.as_u8()), stage);
        }
    }

    #[test]
    fn test_candidate_page_url() {
        let candidate = Candidate::new("7xKp").with_page_url("https://pump.fun/");
        assert_eq!(candidate.page_url.as_deref(), Some("https://pump.fun/token/7xKp"));
    }
}
