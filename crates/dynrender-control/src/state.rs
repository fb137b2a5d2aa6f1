use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use dynrender_engine::{RenderCommand, RenderEngine, RenderOutcome, StatusDisplay};
use dynrender_model::{StatusMessageId, UserProfile};
use tokio::task::JoinHandle;

use crate::status_board::StatusBoard;
use crate::users::KnownUsers;

#[derive(Clone)]
pub struct AppState {
    pub engine: RenderEngine,
    pub board: Arc<StatusBoard>,
    pub users: Arc<KnownUsers>,
    pub tasks: RenderTasks,
    pub api_token: Option<String>,
}

impl AppState {
    pub fn new(engine: RenderEngine, users: Arc<KnownUsers>, api_token: Option<String>) -> Self {
        Self {
            engine,
            board: Arc::new(StatusBoard::new()),
            users,
            tasks: RenderTasks::default(),
            api_token,
        }
    }

    /// Cancels every live render and waits up to `grace` for their tasks to unwind.
    pub async fn shutdown(&self, grace: Duration) {
        self.tasks.close();
        match self.engine.cancel_all(&UserProfile::system()).await {
            Ok(marked) => tracing::info!(marked, "cancelling in-flight renders"),
            Err(err) => tracing::warn!(error = %err, "failed to mark renders for cancellation"),
        }
        let pending = self.tasks.drain();
        if pending.is_empty() {
            return;
        }
        let waiting = pending.len();
        match tokio::time::timeout(grace, futures_util::future::join_all(pending)).await {
            Ok(_) => tracing::info!(waiting, "in-flight renders finished"),
            Err(_) => tracing::warn!(
                waiting,
                grace_secs = grace.as_secs(),
                "renders still running after shutdown grace period"
            ),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SpawnError {
    AlreadyRunning,
    ShuttingDown,
}

/// Render tasks spawned by this process, keyed by status message.
#[derive(Clone, Default)]
pub struct RenderTasks {
    inner: Arc<TasksInner>,
}

#[derive(Default)]
struct TasksInner {
    live: Mutex<HashMap<StatusMessageId, JoinHandle<()>>>,
    closed: AtomicBool,
}

impl RenderTasks {
    pub fn spawn(
        &self,
        engine: RenderEngine,
        command: RenderCommand,
        display: Arc<dyn StatusDisplay>,
    ) -> Result<(), SpawnError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(SpawnError::ShuttingDown);
        }
        let key = command.status_message_id.clone();
        let mut live = self.inner.live.lock().unwrap_or_else(|e| e.into_inner());
        if live.contains_key(&key) {
            return Err(SpawnError::AlreadyRunning);
        }

        let inner = self.inner.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let outcome = engine.render(command, display).await;
            if let RenderOutcome::Failed(err) = &outcome {
                tracing::warn!(key = %task_key, code = err.code(), error = %err, "render failed");
            }
            inner
                .live
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&task_key);
        });
        live.insert(key, handle);
        Ok(())
    }

    pub fn is_live(&self, key: &StatusMessageId) -> bool {
        let live = self.inner.live.lock().unwrap_or_else(|e| e.into_inner());
        live.contains_key(key)
    }

    pub fn len(&self) -> usize {
        let live = self.inner.live.lock().unwrap_or_else(|e| e.into_inner());
        live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    fn drain(&self) -> Vec<JoinHandle<()>> {
        let mut live = self.inner.live.lock().unwrap_or_else(|e| e.into_inner());
        live.drain().map(|(_, handle)| handle).collect()
    }
}
