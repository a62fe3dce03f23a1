//! 📂 Directory-backed capture source
//!
//! The browser side drops one screenshot per candidate into a folder, named
//! after the candidate id (`<id>.png`). Each poll lists the folder; capturing a
//! candidate reads its file back.
//!
//! A file is only offered once its size and modification time are unchanged
//! between two polls, so a screenshot still being written is never picked up.
//! Writers that rename into place (`<id>.png.part` → `<id>.png`) are offered
//! one poll after the rename; the partial name is ignored.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;
use tracing::debug;

use crate::error::CaptureError;
use crate::pipeline::producer::CaptureSource;
use crate::types::{Candidate, RawImage};

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "webp", "bmp", "gif"];

/// Size and modification time of a file when last listed
type FileSignature = (u64, Option<SystemTime>);

pub struct DirectoryCaptureSource {
    dir: PathBuf,
    /// Hand images over as base64 text instead of raw bytes
    base64_transport: bool,
    last_listing: Mutex<HashMap<PathBuf, FileSignature>>,
}

impl DirectoryCaptureSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            base64_transport: true,
            last_listing: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_base64_transport(mut self, enabled: bool) -> Self {
        self.base64_transport = enabled;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn image_extension(path: &Path) -> Option<String> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        IMAGE_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
    }

    async fn find_file(&self, candidate_id: &str) -> Result<Option<PathBuf>, CaptureError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if Self::image_extension(&path).is_none() {
                continue;
            }
            if path.file_stem().and_then(|s| s.to_str()) == Some(candidate_id) {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl CaptureSource for DirectoryCaptureSource {
    async fn discover(&self) -> Result<Vec<Candidate>> {
        if !tokio::fs::try_exists(&self.dir).await.unwrap_or(false) {
            debug!("📂 Capture directory {:?} does not exist yet", self.dir);
            return Ok(Vec::new());
        }

        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to list capture directory {:?}", self.dir))?;

        let mut listing = HashMap::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() || Self::image_extension(&path).is_none() {
                continue;
            }
            let metadata = entry.metadata().await?;
            listing.insert(path, (metadata.len(), metadata.modified().ok()));
        }

        let mut last_listing = self.last_listing.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ids = Vec::new();
        for (path, signature) in &listing {
            if signature.0 == 0 || last_listing.get(path) != Some(signature) {
                debug!("📂 {:?} not settled yet", path);
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        *last_listing = listing;
        drop(last_listing);

        ids.sort();
        ids.dedup();

        Ok(ids.into_iter().map(Candidate::new).collect())
    }

    async fn capture(&self, candidate: &Candidate) -> Result<RawImage, CaptureError> {
        let path = self
            .find_file(&candidate.id)
            .await?
            .ok_or_else(|| CaptureError::Failed(format!("no screenshot for {}", candidate.id)))?;

        let bytes = tokio::fs::read(&path).await?;
        if bytes.is_empty() {
            return Err(CaptureError::EmptyImage);
        }
        debug!("📸 Captured {} from {:?} ({} bytes)", candidate.id, path, bytes.len());

        Ok(if self.base64_transport {
            RawImage::Base64(STANDARD.encode(bytes))
        } else {
            RawImage::Bytes(bytes)
        })
    }
}
