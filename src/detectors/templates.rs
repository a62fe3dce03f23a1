//! Reference chart patterns
//!
//! Loaded once per process and shared read-only by every detector instance.

use image::imageops::{self, FilterType};
use image::GrayImage;
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::vision::preprocess::binarize;
use crate::vision::filters::INK;

/// Pattern files looked up in the pattern directory, as `<name>.png`
pub const PATTERN_NAMES: [&str; 3] = ["accumulation", "breakout", "early_stage"];

/// Longest side matching is done at; bigger inputs are scaled down first
const MAX_MATCH_SIDE: u32 = 96;

static GLOBAL: OnceCell<Arc<PatternLibrary>> = OnceCell::new();

#[derive(Debug, Clone, Default)]
pub struct PatternLibrary {
    patterns: BTreeMap<String, GrayImage>,
}

impl PatternLibrary {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load whichever known patterns exist in `dir`. Missing or unreadable
    /// files are skipped.
    pub fn load_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let mut library = Self::empty();

        for name in PATTERN_NAMES {
            let path = dir.join(format!("{}.png", name));
            if !path.exists() {
                warn!("⚠️  Pattern {} not found at {}, skipping", name, path.display());
                continue;
            }
            match image::open(&path) {
                Ok(img) => {
                    library = library.with_pattern(name, img.to_luma8());
                }
                Err(e) => warn!("⚠️  Failed to load pattern {}: {}", path.display(), e),
            }
        }

        info!("🧩 Loaded {}/{} chart patterns from {}", library.len(), PATTERN_NAMES.len(), dir.display());
        library
    }

    /// Add a pattern from a grayscale image; it is binarized like a surface
    pub fn with_pattern(mut self, name: impl Into<String>, gray: GrayImage) -> Self {
        if gray.width() > 0 && gray.height() > 0 {
            self.patterns.insert(name.into(), binarize(&gray).image().clone());
        }
        self
    }

    /// Process-wide library, loaded from `dir` on first call
    pub fn init_global(dir: impl AsRef<Path>) -> Arc<Self> {
        GLOBAL.get_or_init(|| Arc::new(Self::load_dir(dir))).clone()
    }

    /// Process-wide library, or an empty one if it was never initialised
    pub fn global() -> Arc<Self> {
        GLOBAL.get().cloned().unwrap_or_default()
    }

    pub fn get(&self, name: &str) -> Option<&GrayImage> {
        self.patterns.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.patterns.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Best normalized cross-correlation of pattern `name` anywhere in `image`,
    /// in [0, 1]. `None` if the pattern is unknown or does not fit.
    pub fn best_match(&self, name: &str, image: &GrayImage) -> Option<f64> {
        normalized_match(image, self.get(name)?)
    }
}

fn scaled(img: &GrayImage, scale: f64) -> GrayImage {
    if scale >= 1.0 {
        return img.clone();
    }
    let w = ((img.width() as f64 * scale).round() as u32).max(1);
    let h = ((img.height() as f64 * scale).round() as u32).max(1);
    imageops::resize(img, w, h, FilterType::Nearest)
}

fn ink_plane(img: &GrayImage) -> Vec<f32> {
    img.as_raw().iter().map(|&v| if v == INK { 1.0 } else { 0.0 }).collect()
}

fn normalized_match(image: &GrayImage, template: &GrayImage) -> Option<f64> {
    let longest = image.width().max(image.height());
    if longest == 0 {
        return None;
    }
    let scale = (MAX_MATCH_SIDE as f64 / longest as f64).min(1.0);
    let image = scaled(image, scale);
    let template = scaled(template, scale);

    let (iw, ih) = (image.width() as usize, image.height() as usize);
    let (tw, th) = (template.width() as usize, template.height() as usize);
    if tw > iw || th > ih {
        return None;
    }

    let img = ink_plane(&image);
    let tpl = ink_plane(&template);
    let tpl_energy: f32 = tpl.iter().map(|v| v * v).sum();

    let mut best = 0.0f64;
    for oy in 0..=ih - th {
        for ox in 0..=iw - tw {
            let mut cross = 0.0f32;
            let mut energy = 0.0f32;
            for ty in 0..th {
                let row = (oy + ty) * iw + ox;
                for tx in 0..tw {
                    let v = img[row + tx];
                    cross += v * tpl[ty * tw + tx];
                    energy += v * v;
                }
            }
            let denom = (energy * tpl_energy).sqrt();
            if denom > 0.0 {
                let score = (cross / denom) as f64;
                if score.is_finite() && score > best {
                    best = score;
                }
            }
        }
    }

    Some(best.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn block(w: u32, h: u32, x0: u32, y0: u32, bw: u32, bh: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            if (x0..x0 + bw).contains(&x) && (y0..y0 + bh).contains(&y) {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    #[test]
    fn test_exact_pattern_matches_fully() {
        // L-shaped stroke pattern
        let pattern = GrayImage::from_fn(12, 12, |x, y| if x < 3 || y > 8 { Luma([255]) } else { Luma([0]) });
        let library = PatternLibrary::empty().with_pattern("accumulation", pattern.clone());

        let mut scene = GrayImage::new(40, 30);
        imageops::replace(&mut scene, library.get("accumulation").unwrap(), 20, 10);

        let score = library.best_match("accumulation", &scene).unwrap();
        assert!(score > 0.99, "score = {}", score);
    }

    #[test]
    fn test_blank_scene_scores_zero() {
        let library = PatternLibrary::empty().with_pattern("breakout", block(10, 10, 2, 2, 6, 6));
        let scene = GrayImage::new(30, 30);
        assert_eq!(library.best_match("breakout", &scene), Some(0.0));
    }

    #[test]
    fn test_oversized_or_unknown_pattern() {
        let library = PatternLibrary::empty().with_pattern("breakout", block(50, 50, 10, 10, 20, 20));
        let scene = block(30, 30, 5, 5, 10, 10);

        assert_eq!(library.best_match("breakout", &scene), None);
        assert_eq!(library.best_match("accumulation", &scene), None);
    }

    #[test]
    fn test_load_dir_skips_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        block(16, 16, 4, 4, 8, 8).save(dir.path().join("breakout.png")).unwrap();

        let library = PatternLibrary::load_dir(dir.path());
        assert_eq!(library.names().collect::<Vec<_>>(), vec!["breakout"]);
    }

    #[test]
    fn test_global_is_loaded_once() {
        let dir = tempfile::tempdir().unwrap();
        block(16, 16, 4, 4, 8, 8).save(dir.path().join("accumulation.png")).unwrap();

        let first = PatternLibrary::init_global(dir.path());
        let again = PatternLibrary::init_global("somewhere-else");
        assert!(Arc::ptr_eq(&first, &again));
        assert!(Arc::ptr_eq(&first, &PatternLibrary::global()));
        assert_eq!(first.len(), 1);
    }
}
