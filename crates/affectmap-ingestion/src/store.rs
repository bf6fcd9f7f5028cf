//! Checkpointed artifact store.
//!
//! Layout under the data root:
//!   profiles/{author_key}.json  — full per-researcher profile
//!   cache/{author_key}.json     — analysis cache, fingerprint → entry
//!   index.json                  — cross-researcher index, sorted by key
//!
//! Every write goes through a temp file + rename so a crash leaves each
//! artifact either fully absent or fully written. Concurrent cache writes for
//! one researcher are serialized through a dedicated [`CacheWriter`] task
//! that owns the file and receives snapshots over a channel.

use std::fs;
use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument};

use affectmap_common::{AffectmapError, Result};

use crate::models::{AnalysisCache, IndexRecord, ResearcherIndex, ResearcherProfile};

pub struct CheckpointStore {
    data_root: PathBuf,
    mirror_root: Option<PathBuf>,
}

impl CheckpointStore {
    pub fn new(data_root: impl Into<PathBuf>, mirror_root: Option<PathBuf>) -> Self {
        Self { data_root: data_root.into(), mirror_root }
    }

    fn profile_path(&self, key: &str) -> PathBuf {
        self.data_root.join("profiles").join(format!("{key}.json"))
    }

    pub fn cache_path(&self, key: &str) -> PathBuf {
        self.data_root.join("cache").join(format!("{key}.json"))
    }

    fn index_path(&self) -> PathBuf {
        self.data_root.join("index.json")
    }

    // ── Loads (absence-tolerant) ──────────────────────────────────────────

    pub fn load_profile(&self, key: &str) -> Result<Option<ResearcherProfile>> {
        read_json_opt(&self.profile_path(key))
    }

    pub fn load_cache(&self, key: &str) -> Result<AnalysisCache> {
        Ok(read_json_opt(&self.cache_path(key))?.unwrap_or_default())
    }

    pub fn load_index(&self) -> Result<ResearcherIndex> {
        Ok(read_json_opt(&self.index_path())?.unwrap_or_default())
    }

    // ── Checkpoint ────────────────────────────────────────────────────────

    /// Persist one researcher's artifacts: profile, then the index rebuilt
    /// from it, then the mirror copies. Caller guarantees checkpoints are
    /// sequential across researchers.
    #[instrument(skip(self, profile, index))]
    pub fn write_checkpoint(
        &self,
        key: &str,
        profile: &ResearcherProfile,
        index: &mut ResearcherIndex,
    ) -> Result<()> {
        index.insert(key.to_string(), IndexRecord::from_profile(profile));

        write_json_atomic(&self.profile_path(key), profile)?;
        write_json_atomic(&self.index_path(), index)?;

        if let Some(mirror) = &self.mirror_root {
            write_json_atomic(&mirror.join("profiles").join(format!("{key}.json")), profile)?;
            write_json_atomic(&mirror.join("index.json"), index)?;
        }

        debug!(key, works = profile.works.len(), "Checkpoint written");
        Ok(())
    }

    /// Spawn the single-writer task for one researcher's cache file.
    pub fn spawn_cache_writer(&self, key: &str) -> CacheWriter {
        CacheWriter::spawn(self.cache_path(key))
    }
}

// ── Cache writer ──────────────────────────────────────────────────────────────

struct WriteRequest {
    payload: String,
    ack: Option<oneshot::Sender<()>>,
}

/// Owns one cache file; writes arrive over a channel and are applied in
/// order, so concurrent analysis workers never interleave partial writes.
pub struct CacheWriter {
    tx: mpsc::UnboundedSender<WriteRequest>,
    handle: JoinHandle<()>,
}

impl CacheWriter {
    fn spawn(path: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriteRequest>();
        let handle = tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                if let Err(e) = write_string_atomic(&path, &req.payload) {
                    // The snapshot will be re-sent on the next flush; the
                    // cache never moves backwards because writes are ordered.
                    error!(path = %path.display(), error = %e, "cache write failed");
                }
                if let Some(ack) = req.ack {
                    let _ = ack.send(());
                }
            }
        });
        Self { tx, handle }
    }

    /// Queue a cache snapshot; returns immediately.
    pub fn write(&self, cache: &AnalysisCache) -> Result<()> {
        let payload = serde_json::to_string_pretty(cache)?;
        self.tx
            .send(WriteRequest { payload, ack: None })
            .map_err(|_| AffectmapError::Pipeline("cache writer stopped".to_string()))
    }

    /// Queue a snapshot and wait until it has been applied to disk.
    pub async fn write_and_sync(&self, cache: &AnalysisCache) -> Result<()> {
        let payload = serde_json::to_string_pretty(cache)?;
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(WriteRequest { payload, ack: Some(ack_tx) })
            .map_err(|_| AffectmapError::Pipeline("cache writer stopped".to_string()))?;
        ack_rx
            .await
            .map_err(|_| AffectmapError::Pipeline("cache writer dropped ack".to_string()))
    }

    /// Close the channel and wait for queued writes to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.handle.await;
    }
}

// ── JSON file helpers ─────────────────────────────────────────────────────────

fn read_json_opt<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    write_string_atomic(path, &serde_json::to_string_pretty(value)?)
}

fn write_string_atomic(path: &Path, payload: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, payload)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
