//! Synthetic screenshots and a scripted capture source

use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::time::Duration;

use swarm_scan::detectors::Detector;
use swarm_scan::error::{CaptureError, DetectorError};
use swarm_scan::pipeline::CaptureSource;
use swarm_scan::types::{Candidate, DetectorResult, RawImage};
use swarm_scan::vision::AnalysisSurface;

const PAGE: Rgb<u8> = Rgb([90, 90, 90]);
const PANEL: Rgb<u8> = Rgb([0, 0, 0]);
const INK: Rgb<u8> = Rgb([255, 255, 255]);

/// Page origin of the dark chart panel
pub const PANEL_X: u32 = 20;
pub const PANEL_Y: u32 = 20;

fn fill(img: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    for py in y..y + h {
        for px in x..x + w {
            img.put_pixel(px, py, color);
        }
    }
}

/// 320x200 page with a 280x160 dark panel holding a rising five-step price
/// line and three equal volume bars.
pub fn staircase_chart() -> RgbImage {
    let mut img = RgbImage::from_pixel(320, 200, PAGE);
    fill(&mut img, PANEL_X, PANEL_Y, 280, 160, PANEL);

    for step in 0..5 {
        let x = PANEL_X + 30 + 45 * step;
        let y = PANEL_Y + 100 - 18 * step;
        fill(&mut img, x, y, 45, 4, INK);
    }
    for bar_x in [60, 130, 200] {
        fill(&mut img, PANEL_X + bar_x, PANEL_Y + 138, 16, 16, INK);
    }
    img
}

/// Small dark panel with nothing drawn on it
pub fn blank_chart() -> RgbImage {
    RgbImage::from_pixel(48, 32, PANEL)
}

pub fn png_bytes(img: &RgbImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// PNG-in-base64, the usual capture transport
pub fn base64_png(img: &RgbImage) -> RawImage {
    RawImage::Base64(STANDARD.encode(png_bytes(img)))
}

/// Serves a fixed list of screenshots, in order
pub struct ScriptedSource {
    shots: Vec<(String, RawImage)>,
}

impl ScriptedSource {
    pub fn new(shots: Vec<(&str, RawImage)>) -> Self {
        Self {
            shots: shots.into_iter().map(|(id, img)| (id.to_string(), img)).collect(),
        }
    }
}

#[async_trait]
impl CaptureSource for ScriptedSource {
    async fn discover(&self) -> Result<Vec<Candidate>> {
        Ok(self.shots.iter().map(|(id, _)| Candidate::new(id.clone())).collect())
    }

    async fn capture(&self, candidate: &Candidate) -> Result<RawImage, CaptureError> {
        self.shots
            .iter()
            .find(|(id, _)| *id == candidate.id)
            .map(|(_, img)| img.clone())
            .ok_or_else(|| CaptureError::Failed(format!("unknown candidate {}", candidate.id)))
    }
}

/// Detector that just takes its time
pub struct Sleepy(pub Duration);

impl Detector for Sleepy {
    fn name(&self) -> &'static str {
        "sleepy"
    }

    fn detect(&self, _surface: &AnalysisSurface) -> Result<DetectorResult, DetectorError> {
        std::thread::sleep(self.0);
        Ok(DetectorResult::Indicator(true))
    }
}
