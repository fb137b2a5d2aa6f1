use std::sync::Arc;

use dynrender_model::{RenderPhase, RenderStatus, UserId, UserProfile};

/// Where render progress is shown (a chat message that gets edited in place).
#[async_trait::async_trait]
pub trait StatusDisplay: Send + Sync {
    async fn publish(&self, status: &RenderStatus) -> anyhow::Result<()>;
}

/// Resolves chat-platform user ids; `Ok(None)` means the user is unknown.
#[async_trait::async_trait]
pub trait UserDirectory: Send + Sync {
    async fn resolve(&self, id: &UserId) -> anyhow::Result<Option<UserProfile>>;
}

/// Holds the current status of one render and publishes it best-effort.
pub struct StatusReporter {
    display: Arc<dyn StatusDisplay>,
    status: RenderStatus,
}

impl StatusReporter {
    pub fn new(display: Arc<dyn StatusDisplay>, status: RenderStatus) -> Self {
        Self { display, status }
    }

    pub fn status(&self) -> &RenderStatus {
        &self.status
    }

    pub fn edit(&mut self, f: impl FnOnce(&mut RenderStatus)) {
        f(&mut self.status);
    }

    pub async fn set_phase(&mut self, phase: RenderPhase) {
        self.status.phase = phase;
        self.publish().await;
    }

    /// Display errors never change a render's outcome.
    pub async fn publish(&self) {
        if let Err(err) = self.display.publish(&self.status).await {
            tracing::warn!(
                error = %err,
                key = %self.status.status_message_id,
                "failed to update render status display"
            );
        }
    }
}
