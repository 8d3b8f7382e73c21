//! Result store
//!
//! One JSON object per line in `results.jsonl`. Videos already stored with a
//! final status are skipped when a run is restarted; rate-limited entries are
//! retried.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::FetchStatus;
use crate::upstream::VideoMetadata;

pub const RESULTS_FILE: &str = "results.jsonl";

/// Outcome for one video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub video_id: String,
    pub title: String,
    pub channel: String,
    pub status: FetchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl ItemRecord {
    pub fn new(metadata: &VideoMetadata, status: FetchStatus, transcript: Option<String>) -> Self {
        Self {
            video_id: metadata.id.clone(),
            title: metadata.title.clone(),
            channel: metadata.channel.clone(),
            status,
            transcript,
            fetched_at: Utc::now(),
        }
    }

    /// Whether a restarted run can skip this video
    pub fn is_final(&self) -> bool {
        self.status != FetchStatus::RateLimitedAllProxies
    }
}

pub struct ResultStore {
    path: PathBuf,
    completed: HashSet<String>,
}

impl ResultStore {
    /// Open (or create) the store under `dir` and load finished ids
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(RESULTS_FILE);

        let mut completed = HashSet::new();
        if path.exists() {
            let reader = BufReader::new(fs::File::open(&path)?);
            for (index, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ItemRecord>(&line) {
                    Ok(record) if record.is_final() => {
                        completed.insert(record.video_id);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(
                        "Skipping malformed line {} in {}: {}",
                        index + 1,
                        path.display(),
                        e
                    ),
                }
            }
        }

        info!(
            "Result store {} has {} finished videos",
            path.display(),
            completed.len()
        );
        Ok(Self { path, completed })
    }

    pub fn is_done(&self, video_id: &str) -> bool {
        self.completed.contains(video_id)
    }

    pub fn append(&mut self, record: &ItemRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;

        debug!(
            "Stored {} as {}",
            record.video_id,
            record.status.as_str()
        );
        if record.is_final() {
            self.completed.insert(record.video_id.clone());
        }
        Ok(())
    }

    pub fn completed(&self) -> usize {
        self.completed.len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
