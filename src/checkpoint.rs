//! Run state persistence
//!
//! Remembers when the last sync ran and how each source fared, so that the
//! continuous mode can report missed update windows after a restart and the
//! `status` command has something to show.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Final status of one source within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Complete,
    Partial,
    Failed,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

/// Last recorded run of a single source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecord {
    pub source_id: String,
    pub status: OutcomeStatus,
    pub finished_at: DateTime<Utc>,
    /// Data rows written to the store
    #[serde(default)]
    pub rows_written: usize,
    #[serde(default)]
    pub skipped: usize,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Last run that wrote the source's table
    #[serde(default)]
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Persisted run state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    /// Schema version for forward compatibility
    pub version: String,
    /// Start of the last completed run
    pub last_run_at: Option<DateTime<Utc>>,
    /// Correlation id of the last run
    #[serde(default)]
    pub last_run_id: Option<String>,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceRecord>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            last_run_at: None,
            last_run_id: None,
            sources: BTreeMap::new(),
        }
    }
}

impl RunState {
    /// Stores a source's latest result, carrying the last success time
    /// forward when this run did not write the table.
    pub fn record(&mut self, mut record: SourceRecord) {
        if record.status == OutcomeStatus::Failed && record.last_success_at.is_none() {
            record.last_success_at = self
                .sources
                .get(&record.source_id)
                .and_then(|prev| prev.last_success_at);
        }
        self.sources.insert(record.source_id.clone(), record);
    }

    pub fn source(&self, source_id: &str) -> Option<&SourceRecord> {
        self.sources.get(source_id)
    }
}

/// Loads and saves `RunState` at a fixed path
pub struct RunStateStore {
    path: PathBuf,
    state: RunState,
}

impl RunStateStore {
    /// Opens the state file. A missing file starts fresh; an unreadable one is
    /// logged and replaced on the next save.
    pub async fn open(path: &Path) -> Result<Self> {
        let state = match fs::read_to_string(path).await {
            Ok(contents) => match serde_json::from_str::<RunState>(&contents) {
                Ok(state) => {
                    info!(
                        path = %path.display(),
                        last_run_at = ?state.last_run_at,
                        sources = state.sources.len(),
                        "Loaded run state"
                    );
                    state
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Run state unreadable, starting fresh");
                    RunState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No run state yet");
                RunState::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: path.to_path_buf(),
            state,
        })
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut RunState {
        &mut self.state
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the state through a temp file and rename.
    pub async fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await?;
        }

        let json = serde_json::to_string_pretty(&self.state)?;
        let temp_path = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await?;
        debug!(path = %self.path.display(), "Run state saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, status: OutcomeStatus, success: Option<DateTime<Utc>>) -> SourceRecord {
        SourceRecord {
            source_id: id.to_string(),
            status,
            finished_at: Utc::now(),
            rows_written: 0,
            skipped: 0,
            last_error: None,
            last_success_at: success,
        }
    }

    #[test]
    fn test_failure_keeps_last_success() {
        let mut state = RunState::default();
        let earlier = Utc::now();
        state.record(record("youtube", OutcomeStatus::Complete, Some(earlier)));
        state.record(record("youtube", OutcomeStatus::Failed, None));

        let rec = state.source("youtube").unwrap();
        assert_eq!(rec.status, OutcomeStatus::Failed);
        assert_eq!(rec.last_success_at, Some(earlier));
    }

    #[tokio::test]
    async fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("run_state.json");

        let mut store = RunStateStore::open(&path).await.unwrap();
        assert!(store.state().last_run_at.is_none());

        let now = Utc::now();
        store.state_mut().last_run_at = Some(now);
        store.state_mut().record(SourceRecord {
            rows_written: 7,
            skipped: 1,
            ..record("medium", OutcomeStatus::Partial, Some(now))
        });
        store.save().await.unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = RunStateStore::open(&path).await.unwrap();
        assert_eq!(loaded.state().last_run_at, Some(now));
        let rec = loaded.state().source("medium").unwrap();
        assert_eq!(rec.status, OutcomeStatus::Partial);
        assert_eq!(rec.rows_written, 7);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"status\": \"partial\""));
        assert!(raw.contains("\"lastRunAt\""));
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = RunStateStore::open(&path).await.unwrap();
        assert!(store.state().sources.is_empty());
    }
}
