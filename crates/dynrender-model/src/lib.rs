use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};

/// Chat-platform identity of a user (requester, canceller, staff).
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of the status message a render request owns.
///
/// NOTE: This doubles as the request key inside the render queue; no separate
/// request id is minted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct StatusMessageId(pub String);

impl StatusMessageId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for StatusMessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StatusMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub display_name: String,
}

impl UserProfile {
    pub const SYSTEM_ID: &'static str = "system";

    /// Actor used when the service itself cancels renders (shutdown).
    pub fn system() -> Self {
        Self {
            id: UserId(Self::SYSTEM_ID.to_string()),
            display_name: "dynrender".to_string(),
        }
    }
}

/// What a render is centered on, resolved once before any bound checks.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderTarget {
    Coordinates { x: i64, z: i64 },
    Player { name: String },
}

/// One queued or active render attempt, as persisted in the render queue.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RenderRequest {
    #[serde(rename = "user_id")]
    pub requester_id: UserId,
    #[serde(rename = "message_id")]
    pub status_message_id: StatusMessageId,
    #[serde(default)]
    pub cancelling_user_id: Option<UserId>,
    #[serde(default = "Utc::now")]
    pub enqueued_at: DateTime<Utc>,
}

impl RenderRequest {
    pub fn new(requester_id: UserId, status_message_id: StatusMessageId) -> Self {
        Self {
            requester_id,
            status_message_id,
            cancelling_user_id: None,
            enqueued_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RenderState {
    Validating,
    Queueing,
    Starting,
    QueuedWait,
    Running,
    Complete,
    Cancelled,
    Failed,
    TimedOut,
}

impl RenderState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RenderState::Complete | RenderState::Cancelled | RenderState::Failed | RenderState::TimedOut
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RenderPhase {
    Initializing,
    Queued { position: usize },
    Starting,
    InProgress { elapsed_secs: u64 },
    Complete { elapsed_secs: u64 },
    Failed { code: String, message: String },
    Cancelled { by: UserProfile },
}

impl RenderPhase {
    pub fn title(&self) -> &'static str {
        match self {
            RenderPhase::Initializing => "Dynmap Render Initializing",
            RenderPhase::Queued { .. } => "Dynmap Render Queued",
            RenderPhase::Starting => "Dynmap Render Starting",
            RenderPhase::InProgress { .. } => "Dynmap Render In Progress",
            RenderPhase::Complete { .. } => "Dynmap Render Complete",
            RenderPhase::Failed { .. } => "Dynmap Render Failed",
            RenderPhase::Cancelled { .. } => "Dynmap Render Cancelled",
        }
    }

    pub fn description(&self) -> String {
        match self {
            RenderPhase::Initializing | RenderPhase::Starting => "Please wait...".to_string(),
            RenderPhase::Queued { position } => format!("Position in queue: {position}"),
            RenderPhase::InProgress { elapsed_secs } | RenderPhase::Complete { elapsed_secs } => {
                format!("Time elapsed: {}", format_elapsed(Duration::from_secs(*elapsed_secs)))
            }
            RenderPhase::Failed { message, .. } => format!("Error: {message}"),
            RenderPhase::Cancelled { by } => format!("Cancelled by {}.", by.display_name),
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            RenderPhase::Complete { .. } | RenderPhase::Failed { .. } | RenderPhase::Cancelled { .. }
        )
    }
}

/// Everything a status display needs to render one render request.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RenderStatus {
    pub status_message_id: StatusMessageId,
    pub requester: UserProfile,
    pub world: String,
    pub dimension: String,
    pub x: Option<i64>,
    pub z: Option<i64>,
    pub radius: i64,
    pub map_url: Option<String>,
    #[serde(flatten)]
    pub phase: RenderPhase,
}

/// Floor-rounded `"{m}m {s}s"`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}m {}s", secs / 60, secs % 60)
}
