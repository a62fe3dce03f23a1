use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Candidates the producer has already handled, persisted across restarts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeenCheckpoint {
    pub seen: BTreeSet<String>,
    pub last_updated: i64,
    #[serde(skip)]
    dirty: bool,
}

impl SeenCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when nothing has been persisted yet
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        if !path.as_ref().exists() {
            info!("📍 No seen-candidates file at {:?}, starting fresh", path.as_ref());
            return Ok(None);
        }

        let contents = fs::read_to_string(&path).context("Failed to read checkpoint file")?;
        let checkpoint: SeenCheckpoint =
            serde_json::from_str(&contents).context("Failed to parse checkpoint file")?;

        info!(
            "✅ Loaded checkpoint: {} candidates seen (updated at {})",
            checkpoint.seen.len(),
            checkpoint.last_updated
        );
        Ok(Some(checkpoint))
    }

    /// Write to a temp file first, then rename over the target
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).context("Failed to create checkpoint directory")?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize checkpoint")?;
        let temp_path = path.as_ref().with_extension("tmp");
        fs::write(&temp_path, contents).context("Failed to write temp checkpoint file")?;
        fs::rename(&temp_path, &path).context("Failed to rename checkpoint file")?;

        Ok(())
    }

    /// Returns false if the candidate was already present
    pub fn insert(&mut self, candidate_id: &str) -> bool {
        let added = self.seen.insert(candidate_id.to_string());
        if added {
            self.last_updated = chrono::Utc::now().timestamp();
            self.dirty = true;
        }
        added
    }

    pub fn contains(&self, candidate_id: &str) -> bool {
        self.seen.contains(candidate_id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Save only if something was inserted since the last save
    pub fn save_if_dirty<P: AsRef<Path>>(&mut self, path: P) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        self.save(&path)?;
        self.dirty = false;
        debug!("💾 Checkpoint saved: {} candidates seen", self.seen.len());
        Ok(true)
    }
}

/// Seen-set shared by the producer and the event path.
///
/// A candidate is claimed when the producer captures it and only settles into
/// the persisted set once its event has been emitted (or its capture was given
/// up). Claims that never settle, like items abandoned at shutdown, are not
/// written out, so the candidate is picked up again after a restart.
#[derive(Debug)]
pub struct SeenLedger {
    path: Option<PathBuf>,
    state: Mutex<LedgerState>,
}

#[derive(Debug, Default)]
struct LedgerState {
    settled: SeenCheckpoint,
    claimed: HashSet<String>,
}

impl SeenLedger {
    /// Ledger that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Load the persisted set from `path` if given. An unreadable file is
    /// logged and replaced on the next save.
    pub fn open(path: Option<PathBuf>) -> Self {
        let settled = match &path {
            Some(path) => match SeenCheckpoint::load(path) {
                Ok(loaded) => loaded.unwrap_or_default(),
                Err(e) => {
                    warn!("⚠️  Ignoring unreadable checkpoint {:?}: {:#}", path, e);
                    SeenCheckpoint::new()
                }
            },
            None => SeenCheckpoint::new(),
        };
        Self {
            path,
            state: Mutex::new(LedgerState {
                settled,
                claimed: HashSet::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// False if the candidate is already settled or claimed
    pub fn claim(&self, candidate_id: &str) -> bool {
        let mut state = self.state();
        if state.settled.contains(candidate_id) {
            return false;
        }
        state.claimed.insert(candidate_id.to_string())
    }

    /// The candidate is done with; never picked up again
    pub fn settle(&self, candidate_id: &str) {
        let mut state = self.state();
        state.claimed.remove(candidate_id);
        state.settled.insert(candidate_id);
    }

    /// Give a claim back so a later poll may pick the candidate up again
    pub fn release(&self, candidate_id: &str) {
        self.state().claimed.remove(candidate_id);
    }

    pub fn is_settled(&self, candidate_id: &str) -> bool {
        self.state().settled.contains(candidate_id)
    }

    /// Settled, or claimed and still on its way
    pub fn is_known(&self, candidate_id: &str) -> bool {
        let state = self.state();
        state.settled.contains(candidate_id) || state.claimed.contains(candidate_id)
    }

    pub fn settled(&self) -> usize {
        self.state().settled.len()
    }

    /// Claimed but not settled yet
    pub fn outstanding(&self) -> usize {
        self.state().claimed.len()
    }

    /// Write the settled set if it changed; errors are logged
    pub fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = self.state().settled.save_if_dirty(path) {
            error!("❌ Failed to save checkpoint: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_seen_set_survives_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("seen.json");

        let mut checkpoint = SeenCheckpoint::new();
        assert!(checkpoint.insert("mintA"));
        assert!(!checkpoint.insert("mintA"));
        checkpoint.insert("mintB");
        assert!(checkpoint.save_if_dirty(&path).unwrap());
        assert!(!checkpoint.save_if_dirty(&path).unwrap());

        let loaded = SeenCheckpoint::load(&path).unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.contains("mintB"));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_missing_file_starts_fresh() {
        assert!(SeenCheckpoint::load("nonexistent-seen.json").unwrap().is_none());
    }

    #[test]
    fn test_only_settled_candidates_are_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seen.json");

        let ledger = SeenLedger::open(Some(path.clone()));
        assert!(ledger.claim("done"));
        assert!(ledger.claim("queued"));
        assert!(ledger.claim("dropped"));
        assert!(!ledger.claim("queued"));
        assert!(ledger.is_known("queued"));
        ledger.settle("done");
        ledger.release("dropped");
        assert!(ledger.claim("dropped"));
        ledger.persist();

        let reopened = SeenLedger::open(Some(path));
        assert!(reopened.is_settled("done"));
        assert!(!reopened.claim("done"));
        assert!(reopened.claim("queued"));
        assert!(reopened.claim("dropped"));
        assert_eq!(reopened.settled(), 1);
        assert_eq!(reopened.outstanding(), 2);
    }
}
