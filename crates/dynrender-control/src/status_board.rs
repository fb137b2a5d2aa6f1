use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, Utc};
use dynrender_engine::StatusDisplay;
use dynrender_model::{RenderPhase, RenderStatus, StatusMessageId, UserProfile};

const STALE_DONE: Duration = Duration::from_secs(10 * 60);
const STALE_ANY: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusSnapshot {
    #[serde(flatten)]
    pub status: RenderStatus,
    pub title: &'static str,
    pub description: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct BoardEntry {
    status: RenderStatus,
    updated_at_unix_ms: u64,
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn cleanup_locked(map: &mut HashMap<StatusMessageId, BoardEntry>, now: u64) {
    let stale_done_ms = STALE_DONE.as_millis() as u64;
    let stale_any_ms = STALE_ANY.as_millis() as u64;

    map.retain(|_, entry| {
        let age = now.saturating_sub(entry.updated_at_unix_ms);
        if entry.status.phase.is_finished() {
            return age <= stale_done_ms;
        }
        age <= stale_any_ms
    });
}

fn snapshot(entry: &BoardEntry) -> StatusSnapshot {
    StatusSnapshot {
        title: entry.status.phase.title(),
        description: entry.status.phase.description(),
        updated_at: DateTime::from_timestamp_millis(entry.updated_at_unix_ms as i64)
            .unwrap_or_default(),
        status: entry.status.clone(),
    }
}

/// Latest status of every recent render, served to the chat bot for polling.
#[derive(Default)]
pub struct StatusBoard {
    entries: Mutex<HashMap<StatusMessageId, BoardEntry>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a placeholder so the render is visible before its task first publishes.
    pub fn begin(&self, key: &StatusMessageId, requester: &UserProfile) {
        self.record(RenderStatus {
            status_message_id: key.clone(),
            requester: requester.clone(),
            world: String::new(),
            dimension: String::new(),
            x: None,
            z: None,
            radius: 0,
            map_url: None,
            phase: RenderPhase::Initializing,
        });
    }

    pub fn record(&self, status: RenderStatus) {
        self.record_at(status, now_unix_ms());
    }

    fn record_at(&self, status: RenderStatus, now: u64) {
        let mut map = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        cleanup_locked(&mut map, now);
        map.insert(
            status.status_message_id.clone(),
            BoardEntry {
                status,
                updated_at_unix_ms: now,
            },
        );
    }

    pub fn get(&self, key: &StatusMessageId) -> Option<StatusSnapshot> {
        self.get_at(key, now_unix_ms())
    }

    fn get_at(&self, key: &StatusMessageId, now: u64) -> Option<StatusSnapshot> {
        let mut map = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        cleanup_locked(&mut map, now);
        map.get(key).map(snapshot)
    }
}

#[async_trait::async_trait]
impl StatusDisplay for StatusBoard {
    async fn publish(&self, status: &RenderStatus) -> anyhow::Result<()> {
        self.record(status.clone());
        Ok(())
    }
}
