//! Archive of completed sessions.

use super::{Session, SessionStatus};
use crate::ids::hash_for_logging;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Immutable snapshot of a session's final state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveRecord {
    pub session_id: String,
    pub phone_digest: String,
    pub source_address: String,
    pub final_status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub pairing_code_issued: bool,
    pub error: Option<String>,
}

impl ArchiveRecord {
    pub fn from_session(session: &Session, ended_at: DateTime<Utc>) -> Self {
        Self {
            session_id: session.id.clone(),
            phone_digest: hash_for_logging(session.phone.as_str()),
            source_address: session.source_address.clone(),
            final_status: session.status,
            started_at: session.started_at,
            ended_at,
            duration_ms: (ended_at - session.started_at).num_milliseconds(),
            pairing_code_issued: session.pairing_code.is_some(),
            error: session.last_error.clone(),
        }
    }
}

/// Archive records keyed by session id, oldest evicted first.
#[derive(Debug)]
pub struct Archive {
    records: HashMap<String, ArchiveRecord>,
    order: VecDeque<String>,
    limit: usize,
    dir: Option<PathBuf>,
}

impl Archive {
    /// Create an archive keeping at most `limit` records in memory.
    pub fn new(limit: usize, dir: Option<PathBuf>) -> Self {
        Self {
            records: HashMap::new(),
            order: VecDeque::new(),
            limit: limit.max(1),
            dir,
        }
    }

    pub fn get(&self, session_id: &str) -> Option<&ArchiveRecord> {
        self.records.get(session_id)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.records.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Directory records are written to, if persistence is enabled.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Insert a record. Records are write-once: a second insert for the same
    /// session id is ignored and returns false.
    pub fn insert(&mut self, record: ArchiveRecord) -> bool {
        if self.records.contains_key(&record.session_id) {
            return false;
        }

        self.order.push_back(record.session_id.clone());
        self.records.insert(record.session_id.clone(), record);

        while self.order.len() > self.limit {
            if let Some(oldest) = self.order.pop_front() {
                self.records.remove(&oldest);
            }
        }
        true
    }
}

/// Write a record to `<dir>/<session_id>.json` via temp file and rename.
pub async fn persist(dir: &Path, record: &ArchiveRecord) -> std::io::Result<()> {
    fs::create_dir_all(dir).await?;

    let path = dir.join(format!("{}.json", record.session_id));
    let temp_path = path.with_extension("tmp");
    let data = serde_json::to_vec_pretty(record)?;

    fs::write(&temp_path, &data).await?;
    fs::rename(&temp_path, &path).await?;

    debug!(session_id = %record.session_id, path = ?path, "Archive record written");
    Ok(())
}
