use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use dynrender_model::{
    RenderPhase, RenderRequest, RenderState, RenderStatus, RenderTarget, StatusMessageId,
    UserProfile,
};
use dynrender_store::SettingsStore;
use futures_util::FutureExt;
use tokio::time::Instant;
use tracing::Instrument;

use crate::display::{StatusDisplay, StatusReporter, UserDirectory};
use crate::error::{RenderError, RenderResult};
use crate::panel::CredentialSource;
use crate::queue::{CancelMark, EnqueueOutcome, RenderQueue};
use crate::resolver;
use crate::session::ConsoleSession;
use crate::settings::RenderSettings;
use crate::transport::ConsoleConnector;
use crate::waiter::{
    CancelProcedure, ConsoleResponseResult, NoObserver, QueueWatch, WaitOptions, wait_for,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderCommand {
    pub requester: UserProfile,
    pub status_message_id: StatusMessageId,
    pub target: RenderTarget,
    /// Falls back to `render_default_radius`.
    pub radius: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Complete { elapsed: Duration },
    Cancelled { by: UserProfile },
    Failed(RenderError),
    TimedOut(RenderError),
}

impl RenderOutcome {
    fn from_result(result: RenderResult<Duration>) -> Self {
        match result {
            Ok(elapsed) => RenderOutcome::Complete { elapsed },
            Err(RenderError::Cancelled(by)) => RenderOutcome::Cancelled { by },
            Err(err @ RenderError::Timeout(_)) => RenderOutcome::TimedOut(err),
            Err(err) => RenderOutcome::Failed(err),
        }
    }

    pub fn state(&self) -> RenderState {
        match self {
            RenderOutcome::Complete { .. } => RenderState::Complete,
            RenderOutcome::Cancelled { .. } => RenderState::Cancelled,
            RenderOutcome::Failed(_) => RenderState::Failed,
            RenderOutcome::TimedOut(_) => RenderState::TimedOut,
        }
    }

    pub fn phase(&self) -> RenderPhase {
        match self {
            RenderOutcome::Complete { elapsed } => RenderPhase::Complete {
                elapsed_secs: elapsed.as_secs(),
            },
            RenderOutcome::Cancelled { by } => RenderPhase::Cancelled { by: by.clone() },
            RenderOutcome::Failed(err) | RenderOutcome::TimedOut(err) => RenderPhase::Failed {
                code: err.code().to_string(),
                message: err.to_string(),
            },
        }
    }
}

/// Runs render commands against the single remote render slot.
///
/// Each call to [`RenderEngine::render`] is an independent task with its own
/// console session; tasks coordinate only through the persisted [`RenderQueue`].
#[derive(Clone)]
pub struct RenderEngine {
    store: Arc<dyn SettingsStore>,
    queue: RenderQueue,
    credentials: Arc<dyn CredentialSource>,
    connector: Arc<dyn ConsoleConnector>,
    users: Arc<dyn UserDirectory>,
}

impl RenderEngine {
    pub fn new(
        store: Arc<dyn SettingsStore>,
        credentials: Arc<dyn CredentialSource>,
        connector: Arc<dyn ConsoleConnector>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            queue: RenderQueue::new(store.clone()),
            store,
            credentials,
            connector,
            users,
        }
    }

    pub fn queue(&self) -> &RenderQueue {
        &self.queue
    }

    pub fn store(&self) -> &Arc<dyn SettingsStore> {
        &self.store
    }

    /// Asks the render for `key` to stop. Only its requester or staff may do so.
    pub async fn request_cancellation(
        &self,
        key: &StatusMessageId,
        user: &UserProfile,
        is_staff: bool,
    ) -> RenderResult<CancelMark> {
        let mark = self
            .queue
            .request_cancellation(key, &user.id, |entry| {
                is_staff || entry.requester_id == user.id
            })
            .await?;
        tracing::info!(key = %key, user = %user.id, mark = ?mark, "render cancellation requested");
        Ok(mark)
    }

    /// Marks every queued render as cancelled by `user`. Returns how many were marked.
    pub async fn cancel_all(&self, user: &UserProfile) -> RenderResult<usize> {
        let mut marked = 0;
        for entry in self.queue.list().await? {
            let mark = self
                .queue
                .request_cancellation(&entry.status_message_id, &user.id, |_| true)
                .await?;
            if mark == CancelMark::Marked {
                marked += 1;
            }
        }
        Ok(marked)
    }

    /// Drives one render to a terminal outcome.
    ///
    /// The request never outlives this call in the queue, whatever the outcome,
    /// including a panic inside the render.
    pub async fn render(
        &self,
        command: RenderCommand,
        display: Arc<dyn StatusDisplay>,
    ) -> RenderOutcome {
        let span = tracing::info_span!(
            "render",
            key = %command.status_message_id,
            requester = %command.requester.id,
        );
        self.run(command, display).instrument(span).await
    }

    async fn run(&self, command: RenderCommand, display: Arc<dyn StatusDisplay>) -> RenderOutcome {
        let status = RenderStatus {
            status_message_id: command.status_message_id.clone(),
            requester: command.requester.clone(),
            world: String::new(),
            dimension: String::new(),
            x: None,
            z: None,
            radius: command.radius.unwrap_or_default(),
            map_url: None,
            phase: RenderPhase::Initializing,
        };
        let mut run = RenderRun {
            engine: self,
            command,
            reporter: StatusReporter::new(display, status),
            state: RenderState::Validating,
            enqueued: false,
        };

        let result = match AssertUnwindSafe(run.drive()).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                tracing::error!(panic = %panic_message(&*panic), "render task panicked");
                Err(RenderError::session("The render failed unexpectedly."))
            }
        };

        if run.enqueued {
            let key = &run.command.status_message_id;
            if let Err(err) = self.queue.remove_by_key(key).await {
                tracing::error!(error = %err, "failed to remove render from queue");
            }
        }

        let outcome = RenderOutcome::from_result(result);
        tracing::info!(state = ?outcome.state(), "render finished");
        run.reporter.set_phase(outcome.phase()).await;
        outcome
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        return s.to_string();
    }
    if let Some(s) = panic.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic".to_string()
}

fn check_radius(settings: &RenderSettings, radius: i64) -> RenderResult<()> {
    let (min, max) = (settings.render_min_radius, settings.render_max_radius);
    if (min..=max).contains(&radius) {
        return Ok(());
    }
    Err(RenderError::validation(format!(
        "Radius must be between `{min}` and `{max}`."
    )))
}

fn check_coordinates(settings: &RenderSettings, x: i64, z: i64) -> RenderResult<()> {
    let max = settings.render_max_coordinate;
    let bounds = -max..=max;
    if bounds.contains(&x) && bounds.contains(&z) {
        return Ok(());
    }
    Err(RenderError::validation(format!(
        "X and Z coordinates must be between `-{max}` and `{max}`."
    )))
}

struct RenderRun<'a> {
    engine: &'a RenderEngine,
    command: RenderCommand,
    reporter: StatusReporter,
    state: RenderState,
    // Set before the enqueue attempt so a store error mid-write still triggers removal.
    enqueued: bool,
}

impl RenderRun<'_> {
    fn transition(&mut self, state: RenderState) {
        tracing::debug!(from = ?self.state, to = ?state, "render state changed");
        self.state = state;
    }

    async fn drive(&mut self) -> RenderResult<Duration> {
        let settings = RenderSettings::load(self.engine.store.as_ref()).await?;
        let radius = self.command.radius.unwrap_or(settings.render_default_radius);
        self.reporter.edit(|s| {
            s.world = settings.render_world.clone();
            s.dimension = settings.render_dimension.clone();
            s.radius = radius;
        });
        self.reporter.publish().await;

        check_radius(&settings, radius)?;
        match &self.command.target {
            RenderTarget::Coordinates { x, z } => check_coordinates(&settings, *x, *z)?,
            RenderTarget::Player { name } => resolver::validate_player_name(name)?,
        }
        let panel = settings.panel()?;

        let mut session = ConsoleSession::connect(
            self.engine.connector.as_ref(),
            self.engine.credentials.clone(),
            panel,
            settings.auth_timeout(),
        )
        .await?;

        let (x, z) = self.resolve_target(&mut session, &settings).await?;
        self.reporter.edit(|s| {
            s.x = Some(x);
            s.z = Some(z);
            s.map_url = settings.map_url(x, z);
        });

        self.transition(RenderState::Queueing);
        self.enqueue(&settings).await?;

        self.transition(RenderState::Starting);
        loop {
            let head = self.engine.queue.peek_head().await?;
            let key = &self.command.status_message_id;
            if head.is_some_and(|h| &h.status_message_id == key) {
                break;
            }
            self.transition(RenderState::QueuedWait);
            self.queued_wait(&mut session, &settings).await?;
            self.transition(RenderState::Starting);
        }
        self.start(&mut session, &settings, x, z, radius).await?;

        self.transition(RenderState::Running);
        self.running(&mut session, &settings).await
    }

    async fn resolve_target(
        &mut self,
        session: &mut ConsoleSession,
        settings: &RenderSettings,
    ) -> RenderResult<(i64, i64)> {
        let name = match &self.command.target {
            RenderTarget::Coordinates { x, z } => return Ok((*x, *z)),
            RenderTarget::Player { name } => name.clone(),
        };
        let patterns = &settings.console_patterns;
        let timeout = settings.command_timeout();

        let dimension = resolver::resolve_dimension(session, patterns, &name, timeout).await?;
        if dimension != settings.render_dimension {
            return Err(RenderError::validation(format!(
                "Player `{name}` is in `{dimension}`, but renders are limited to `{}`.",
                settings.render_dimension
            )));
        }
        let (x, z) = resolver::resolve_coordinates(session, patterns, &name, timeout).await?;
        check_coordinates(settings, x, z)?;
        Ok((x, z))
    }

    async fn enqueue(&mut self, settings: &RenderSettings) -> RenderResult<()> {
        let request = RenderRequest::new(
            self.command.requester.id.clone(),
            self.command.status_message_id.clone(),
        );
        self.enqueued = true;
        match self
            .engine
            .queue
            .try_enqueue(request, settings.render_queue_size)
            .await?
        {
            EnqueueOutcome::Queued { position } => {
                tracing::info!(position, "render queued");
                self.reporter.set_phase(RenderPhase::Queued { position }).await;
                Ok(())
            }
            EnqueueOutcome::Full { max } => Err(RenderError::validation(format!(
                "The render queue is full. Only `{max}` renders can be queued at a time."
            ))),
            EnqueueOutcome::Duplicate => {
                self.enqueued = false;
                Err(RenderError::validation(
                    "A render for this status message is already queued.",
                ))
            }
        }
    }

    /// Waits for the render holding the slot to end, or for this request to reach the head.
    async fn queued_wait(
        &mut self,
        session: &mut ConsoleSession,
        settings: &RenderSettings,
    ) -> RenderResult<()> {
        let key = &self.command.status_message_id;
        let position = self
            .engine
            .queue
            .position(key)
            .await?
            .ok_or_else(|| RenderError::session("This render is missing from the queue."))?;
        if self.reporter.status().phase != (RenderPhase::Queued { position }) {
            self.reporter.set_phase(RenderPhase::Queued { position }).await;
        }

        let patterns = &settings.console_patterns;
        let world = &settings.render_world;
        let options = WaitOptions::new()
            .cancellable(settings.cancellation_check_interval())
            .resume_at_head();
        let mut watch = QueueWatch::new(
            &self.engine.queue,
            key,
            self.engine.users.as_ref(),
            &mut self.reporter,
        );
        let response = wait_for(
            session,
            settings.render_timeout(),
            &patterns.finished(world),
            Some(&patterns.cancelled(world)),
            &options,
            &mut watch,
        )
        .await?;

        match response.result {
            ConsoleResponseResult::HeadReached => Ok(()),
            ConsoleResponseResult::Success | ConsoleResponseResult::Failure => {
                tokio::time::sleep(settings.queued_render_start_delay()).await;
                Ok(())
            }
            ConsoleResponseResult::Timeout => Err(RenderError::timeout(
                "Timed out waiting for the previous render to finish.",
            )),
        }
    }

    async fn start(
        &mut self,
        session: &mut ConsoleSession,
        settings: &RenderSettings,
        x: i64,
        z: i64,
        radius: i64,
    ) -> RenderResult<()> {
        let patterns = &settings.console_patterns;
        let world = &settings.render_world;
        self.reporter.set_phase(RenderPhase::Starting).await;

        session
            .send_command(&patterns.radius_render(world, x, z, radius))
            .await?;
        let response = wait_for(
            session,
            settings.command_timeout(),
            &patterns.started(world, radius),
            Some(&patterns.already_active(world)),
            &WaitOptions::new(),
            &mut NoObserver,
        )
        .await?;

        match response.result {
            ConsoleResponseResult::Success => Ok(()),
            ConsoleResponseResult::Failure => Err(RenderError::rejected(format!(
                "A render is already running on world `{world}` outside of the queue."
            ))),
            ConsoleResponseResult::Timeout | ConsoleResponseResult::HeadReached => Err(
                RenderError::timeout("Did not receive a response when starting the render."),
            ),
        }
    }

    async fn running(
        &mut self,
        session: &mut ConsoleSession,
        settings: &RenderSettings,
    ) -> RenderResult<Duration> {
        let patterns = &settings.console_patterns;
        let world = &settings.render_world;
        let started_at = Instant::now();
        self.reporter
            .set_phase(RenderPhase::InProgress { elapsed_secs: 0 })
            .await;

        let options = WaitOptions::new()
            .show_elapsed_time(settings.elapsed_time_interval())
            .cancellable(settings.cancellation_check_interval())
            .run_command_when_cancelled(CancelProcedure {
                command: patterns.cancel_render(world),
                acknowledgement: patterns.cancelled(world),
                timeout: settings.command_timeout(),
            });
        let mut watch = QueueWatch::new(
            &self.engine.queue,
            &self.command.status_message_id,
            self.engine.users.as_ref(),
            &mut self.reporter,
        );
        let response = wait_for(
            session,
            settings.render_timeout(),
            &patterns.finished(world),
            Some(&patterns.cancelled(world)),
            &options,
            &mut watch,
        )
        .await?;

        match response.result {
            ConsoleResponseResult::Success => Ok(started_at.elapsed()),
            ConsoleResponseResult::Failure => Err(RenderError::rejected(
                "The render was cancelled outside of the queue.",
            )),
            ConsoleResponseResult::Timeout | ConsoleResponseResult::HeadReached => {
                Err(RenderError::timeout(format!(
                    "The render did not finish within {} seconds.",
                    settings.render_timeout().as_secs()
                )))
            }
        }
    }
}
