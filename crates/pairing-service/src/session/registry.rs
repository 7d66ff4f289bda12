//! Live session registry with per-session expiry.

use super::archive::{self, Archive, ArchiveRecord};
use super::{Session, SessionStatus, SessionUpdate};
use crate::ids::hash_for_logging;
use crate::link::LinkClient;
use crate::phone::ValidatedPhone;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Registry limits and retention.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Time after which a live session is expired and cleaned up
    pub timeout: Duration,
    /// Maximum live sessions sharing one source address
    pub max_per_source: usize,
    /// Number of recent sessions included in stats
    pub stats_sample_size: usize,
    /// Archive records kept in memory
    pub archive_limit: usize,
    /// Directory archive records are written to
    pub archive_dir: Option<PathBuf>,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(180),
            max_per_source: 3,
            stats_sample_size: 10,
            archive_limit: 1000,
            archive_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Too many active pairing sessions from {source_address} (limit {limit})")]
    CapacityExceeded { source_address: String, limit: usize },

    #[error("Session id already in use: {0}")]
    DuplicateId(String),
}

/// Redacted view of a live session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub phone_digest: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub age_secs: i64,
    pub has_code: bool,
}

/// Registry summary for the admin facade.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub live: usize,
    pub by_status: BTreeMap<String, usize>,
    pub archived: usize,
    pub total_created: u64,
    pub total_cleaned_up: u64,
    pub max_per_source: usize,
    pub timeout_secs: u64,
    pub recent: Vec<SessionSummary>,
}

struct LiveEntry {
    session: Session,
    expiry: Option<JoinHandle<()>>,
}

struct Inner {
    live: RwLock<HashMap<String, LiveEntry>>,
    archive: RwLock<Archive>,
    link: Arc<dyn LinkClient>,
    settings: RegistrySettings,
    created: AtomicU64,
    cleaned: AtomicU64,
}

/// Owns every in-flight session.
///
/// All mutations go through the write lock of the live map. Removal from that
/// map is what makes a cleanup the first and only one: whichever of explicit
/// cleanup, delayed cleanup or expiry removes the entry performs the teardown,
/// the others find nothing.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

impl SessionRegistry {
    /// Create a registry. `link` is used to discard credential storage on cleanup.
    pub fn new(link: Arc<dyn LinkClient>, settings: RegistrySettings) -> Self {
        let archive = Archive::new(settings.archive_limit, settings.archive_dir.clone());
        Self {
            inner: Arc::new(Inner {
                live: RwLock::new(HashMap::new()),
                archive: RwLock::new(archive),
                link,
                settings,
                created: AtomicU64::new(0),
                cleaned: AtomicU64::new(0),
            }),
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.inner.settings
    }

    /// Whether another session may be created for `source_address`.
    pub async fn capacity_check(&self, source_address: &str) -> bool {
        let live = self.inner.live.read().await;
        count_for_source(&live, source_address) < self.inner.settings.max_per_source
    }

    /// Create a session, checking capacity under the same lock.
    ///
    /// Schedules the session's expiry.
    pub async fn create(
        &self,
        id: String,
        phone: ValidatedPhone,
        source_address: String,
    ) -> Result<Session, RegistryError> {
        let limit = self.inner.settings.max_per_source;
        let mut live = self.inner.live.write().await;

        if live.contains_key(&id) || self.inner.archive.read().await.contains(&id) {
            return Err(RegistryError::DuplicateId(id));
        }

        if count_for_source(&live, &source_address) >= limit {
            return Err(RegistryError::CapacityExceeded {
                source_address,
                limit,
            });
        }

        let session = Session::new(id.clone(), phone, source_address);
        let expiry = spawn_expiry(
            Arc::downgrade(&self.inner),
            id.clone(),
            self.inner.settings.timeout,
        );

        live.insert(
            id.clone(),
            LiveEntry {
                session: session.clone(),
                expiry: Some(expiry),
            },
        );
        self.inner.created.fetch_add(1, Ordering::Relaxed);

        info!(
            session_id = %id,
            phone = %hash_for_logging(session.phone.as_str()),
            source = %session.source_address,
            live = live.len(),
            "Session created"
        );

        Ok(session)
    }

    /// Merge fields into a live session and return the result.
    ///
    /// Returns `None` when the session is gone, which is expected when
    /// cleanup races with an in-flight update.
    pub async fn update(&self, id: &str, update: SessionUpdate) -> Option<Session> {
        let mut live = self.inner.live.write().await;
        let Some(entry) = live.get_mut(id) else {
            debug!(session_id = %id, "Update for unknown session ignored");
            return None;
        };

        let previous = entry.session.status;
        if let Some(refused) = entry.session.apply(update) {
            debug!(
                session_id = %id,
                from = %previous,
                to = %refused,
                "Status transition refused"
            );
        } else if previous != entry.session.status {
            debug!(session_id = %id, from = %previous, to = %entry.session.status, "Status changed");
        }

        Some(entry.session.clone())
    }

    /// Snapshot of a live session.
    pub async fn get(&self, id: &str) -> Option<Session> {
        self.inner
            .live
            .read()
            .await
            .get(id)
            .map(|entry| entry.session.clone())
    }

    /// Archive record of a cleaned-up session.
    pub async fn archived(&self, id: &str) -> Option<ArchiveRecord> {
        self.inner.archive.read().await.get(id).cloned()
    }

    pub async fn live_count(&self) -> usize {
        self.inner.live.read().await.len()
    }

    /// Tear down a session. Returns false if it was already cleaned up.
    pub async fn cleanup(&self, id: &str) -> bool {
        let entry = self.inner.live.write().await.remove(id);
        let Some(entry) = entry else {
            debug!(session_id = %id, "Cleanup skipped, session already gone");
            return false;
        };

        if let Some(expiry) = entry.expiry {
            expiry.abort();
        }

        self.finish_detached(entry.session).await;
        true
    }

    /// Expire a session that outlived its timeout.
    ///
    /// Runs inside the expiry task, so it must not abort that task.
    async fn expire(&self, id: &str) -> bool {
        let session = {
            let mut live = self.inner.live.write().await;
            let Some(entry) = live.remove(id) else {
                return false;
            };

            let mut session = entry.session;
            if session.status.can_transition_to(SessionStatus::Expired) {
                session.status = SessionStatus::Expired;
                if session.last_error.is_none() {
                    session.last_error = Some("Session timed out".to_string());
                }
            }
            session
        };

        info!(session_id = %id, "Session expired");
        self.finish_detached(session).await;
        true
    }

    /// Run [`finish`](Self::finish) on its own task and wait for it.
    ///
    /// Once a session has left the live map nothing else will tear it down,
    /// so the teardown must complete even if the caller is dropped.
    async fn finish_detached(&self, session: Session) {
        let id = session.id.clone();
        let registry = self.clone();
        let teardown = tokio::spawn(async move { registry.finish(session).await });

        if let Err(e) = teardown.await {
            warn!(session_id = %id, error = %e, "Session teardown did not complete");
        }
    }

    /// Release a removed session's resources and archive it.
    async fn finish(&self, session: Session) {
        if let Some(connection) = &session.connection {
            connection.close().await;
        }

        if let Err(e) = self.inner.link.remove_storage(&session.id).await {
            warn!(session_id = %session.id, error = %e, "Failed to remove credential storage");
        }

        let record = ArchiveRecord::from_session(&session, Utc::now());
        let dir = {
            let mut archive = self.inner.archive.write().await;
            archive.insert(record.clone());
            archive.dir().map(|d| d.to_path_buf())
        };

        if let Some(dir) = dir {
            if let Err(e) = archive::persist(&dir, &record).await {
                warn!(session_id = %session.id, error = %e, "Failed to write archive record");
            }
        }

        self.inner.cleaned.fetch_add(1, Ordering::Relaxed);

        info!(
            session_id = %session.id,
            status = %record.final_status,
            duration_ms = record.duration_ms,
            error = record.error.as_deref().unwrap_or(""),
            "Session cleaned up"
        );
    }

    /// Summary of live sessions. Phone numbers appear only as digests.
    pub async fn stats(&self) -> RegistryStats {
        let now = Utc::now();
        let live = self.inner.live.read().await;

        let mut by_status = BTreeMap::new();
        for entry in live.values() {
            *by_status
                .entry(entry.session.status.as_str().to_string())
                .or_insert(0) += 1;
        }

        let mut sessions: Vec<&Session> = live.values().map(|e| &e.session).collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        let recent = sessions
            .into_iter()
            .take(self.inner.settings.stats_sample_size)
            .map(|s| SessionSummary {
                session_id: s.id.clone(),
                phone_digest: hash_for_logging(s.phone.as_str()),
                status: s.status,
                started_at: s.started_at,
                age_secs: (now - s.started_at).num_seconds(),
                has_code: s.pairing_code.is_some(),
            })
            .collect();

        RegistryStats {
            live: live.len(),
            by_status,
            archived: self.inner.archive.read().await.len(),
            total_created: self.inner.created.load(Ordering::Relaxed),
            total_cleaned_up: self.inner.cleaned.load(Ordering::Relaxed),
            max_per_source: self.inner.settings.max_per_source,
            timeout_secs: self.inner.settings.timeout.as_secs(),
            recent,
        }
    }

    /// Clean up every live session. Returns how many were cleaned up.
    pub async fn shutdown(&self) -> usize {
        let ids: Vec<String> = self.inner.live.read().await.keys().cloned().collect();
        let mut cleaned = 0;
        for id in ids {
            if self.cleanup(&id).await {
                cleaned += 1;
            }
        }
        cleaned
    }
}

fn count_for_source(live: &HashMap<String, LiveEntry>, source_address: &str) -> usize {
    live.values()
        .filter(|entry| entry.session.source_address == source_address)
        .count()
}

fn spawn_expiry(inner: Weak<Inner>, id: String, timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if let Some(inner) = inner.upgrade() {
            SessionRegistry { inner }.expire(&id).await;
        }
    })
}
