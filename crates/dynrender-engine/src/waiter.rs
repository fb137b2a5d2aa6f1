use std::time::Duration;

use dynrender_model::{RenderPhase, StatusMessageId, UserProfile};
use tokio::time::{Instant, sleep_until};

use crate::display::{StatusReporter, UserDirectory};
use crate::error::{RenderError, RenderResult};
use crate::queue::RenderQueue;
use crate::session::ConsoleSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleResponseResult {
    Success,
    Failure,
    Timeout,
    /// The request reached the head of the queue while waiting.
    HeadReached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleResponse {
    pub result: ConsoleResponseResult,
    pub output: Option<String>,
}

impl ConsoleResponse {
    fn without_output(result: ConsoleResponseResult) -> Self {
        Self {
            result,
            output: None,
        }
    }
}

/// Console command sent when a cancellation is picked up, and the line acknowledging it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelProcedure {
    pub command: String,
    pub acknowledgement: String,
    pub timeout: Duration,
}

/// Side effects driven while waiting. The default waits for console output only.
#[derive(Debug, Clone, Default)]
pub struct WaitOptions {
    elapsed_interval: Option<Duration>,
    cancel_interval: Option<Duration>,
    cancel_procedure: Option<CancelProcedure>,
    resume_at_head: bool,
}

impl WaitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show_elapsed_time(mut self, interval: Duration) -> Self {
        self.elapsed_interval = Some(interval);
        self
    }

    pub fn cancellable(mut self, interval: Duration) -> Self {
        self.cancel_interval = Some(interval);
        self
    }

    pub fn run_command_when_cancelled(mut self, procedure: CancelProcedure) -> Self {
        self.cancel_procedure = Some(procedure);
        self
    }

    /// Stop with [`ConsoleResponseResult::HeadReached`] once a poll finds the request at the head.
    pub fn resume_at_head(mut self) -> Self {
        self.resume_at_head = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuePoll {
    Idle,
    AtHead,
    Cancel(UserProfile),
}

/// Receives the periodic callbacks of [`wait_for`].
#[async_trait::async_trait]
pub trait WaitObserver: Send {
    async fn elapsed(&mut self, elapsed: Duration);

    async fn poll_queue(&mut self) -> RenderResult<QueuePoll>;
}

pub struct NoObserver;

#[async_trait::async_trait]
impl WaitObserver for NoObserver {
    async fn elapsed(&mut self, _elapsed: Duration) {}

    async fn poll_queue(&mut self) -> RenderResult<QueuePoll> {
        Ok(QueuePoll::Idle)
    }
}

/// Observer backed by the render queue and the request's status display.
pub struct QueueWatch<'a> {
    queue: &'a RenderQueue,
    key: &'a StatusMessageId,
    users: &'a dyn UserDirectory,
    reporter: &'a mut StatusReporter,
}

impl<'a> QueueWatch<'a> {
    pub fn new(
        queue: &'a RenderQueue,
        key: &'a StatusMessageId,
        users: &'a dyn UserDirectory,
        reporter: &'a mut StatusReporter,
    ) -> Self {
        Self {
            queue,
            key,
            users,
            reporter,
        }
    }
}

#[async_trait::async_trait]
impl WaitObserver for QueueWatch<'_> {
    async fn elapsed(&mut self, elapsed: Duration) {
        self.reporter
            .set_phase(RenderPhase::InProgress {
                elapsed_secs: elapsed.as_secs(),
            })
            .await;
    }

    async fn poll_queue(&mut self) -> RenderResult<QueuePoll> {
        let list = self.queue.list().await?;
        let Some(index) = list.iter().position(|r| &r.status_message_id == self.key) else {
            return Err(RenderError::session("This render is missing from the queue."));
        };

        if let Some(user_id) = &list[index].cancelling_user_id {
            if user_id.0 == UserProfile::SYSTEM_ID {
                return Ok(QueuePoll::Cancel(UserProfile::system()));
            }
            let user = self
                .users
                .resolve(user_id)
                .await
                .map_err(|e| RenderError::session(format!("Unable to look up user `{user_id}`: {e:#}")))?
                .ok_or_else(|| {
                    RenderError::session(format!(
                        "Unable to find user `{user_id}` who cancelled the render."
                    ))
                })?;
            return Ok(QueuePoll::Cancel(user));
        }

        let position = index + 1;
        if let RenderPhase::Queued { position: shown } = self.reporter.status().phase
            && shown != position
        {
            self.reporter.set_phase(RenderPhase::Queued { position }).await;
        }

        if index == 0 {
            return Ok(QueuePoll::AtHead);
        }
        Ok(QueuePoll::Idle)
    }
}

fn matches(output: &str, pattern: &str) -> bool {
    output.to_lowercase().contains(pattern)
}

fn next_tick(deadline: Instant, ticks: &[Option<Instant>]) -> Instant {
    ticks.iter().flatten().copied().fold(deadline, Instant::min)
}

enum Wake {
    Event(crate::protocol::InboundEvent),
    Tick,
}

/// Waits up to `timeout` for a console line containing `success` or `failure`
/// (case-insensitive substring match).
///
/// A cancellation picked up by a poll ends the wait with
/// [`RenderError::Cancelled`] once the cancel procedure (if any) is acknowledged.
pub async fn wait_for(
    session: &mut ConsoleSession,
    timeout: Duration,
    success: &str,
    failure: Option<&str>,
    options: &WaitOptions,
    observer: &mut dyn WaitObserver,
) -> RenderResult<ConsoleResponse> {
    let success = success.to_lowercase();
    let failure = failure.map(str::to_lowercase);

    let started = Instant::now();
    let deadline = started + timeout;
    let mut next_elapsed = options.elapsed_interval.map(|i| started + i);
    let mut next_poll = options.cancel_interval.map(|i| started + i);

    loop {
        let wake_at = next_tick(deadline, &[next_elapsed, next_poll]);
        let wake = tokio::select! {
            event = session.next_event() => Wake::Event(event?),
            _ = sleep_until(wake_at) => Wake::Tick,
        };

        match wake {
            Wake::Event(event) => {
                let Some(output) = session.handle_event(event).await? else {
                    continue;
                };
                if matches(&output, &success) {
                    return Ok(ConsoleResponse {
                        result: ConsoleResponseResult::Success,
                        output: Some(output),
                    });
                }
                if let Some(failure) = &failure
                    && matches(&output, failure)
                {
                    return Ok(ConsoleResponse {
                        result: ConsoleResponseResult::Failure,
                        output: Some(output),
                    });
                }
            }
            Wake::Tick => {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(ConsoleResponse::without_output(ConsoleResponseResult::Timeout));
                }

                if let (Some(at), Some(interval)) = (next_elapsed, options.elapsed_interval)
                    && now >= at
                {
                    observer.elapsed(now - started).await;
                    next_elapsed = Some(at + interval);
                }

                if let (Some(at), Some(interval)) = (next_poll, options.cancel_interval)
                    && now >= at
                {
                    match observer.poll_queue().await? {
                        QueuePoll::Cancel(user) => {
                            return Err(cancel(session, options.cancel_procedure.as_ref(), user).await);
                        }
                        QueuePoll::AtHead if options.resume_at_head => {
                            return Ok(ConsoleResponse::without_output(
                                ConsoleResponseResult::HeadReached,
                            ));
                        }
                        QueuePoll::AtHead | QueuePoll::Idle => {}
                    }
                    next_poll = Some(at + interval);
                }
            }
        }

        if Instant::now() >= deadline {
            return Ok(ConsoleResponse::without_output(ConsoleResponseResult::Timeout));
        }
    }
}

/// Runs the cancellation procedure and returns the error that ends the render.
async fn cancel(
    session: &mut ConsoleSession,
    procedure: Option<&CancelProcedure>,
    user: UserProfile,
) -> RenderError {
    tracing::info!(user = %user.id, "render cancellation requested");
    let Some(procedure) = procedure else {
        return RenderError::Cancelled(user);
    };

    if let Err(err) = session.send_command(&procedure.command).await {
        return err;
    }
    match wait_for_line(session, procedure.timeout, &procedure.acknowledgement).await {
        Ok(true) => RenderError::Cancelled(user),
        Ok(false) => RenderError::timeout("Unable to verify that the render was cancelled."),
        Err(err) => err,
    }
}

/// Plain wait for one line, without ticks or polls.
async fn wait_for_line(
    session: &mut ConsoleSession,
    timeout: Duration,
    pattern: &str,
) -> RenderResult<bool> {
    let pattern = pattern.to_lowercase();
    let deadline = Instant::now() + timeout;
    loop {
        match tokio::time::timeout_at(deadline, session.next_output()).await {
            Ok(Ok(Some(line))) if matches(&line, &pattern) => return Ok(true),
            Ok(Ok(_)) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => return Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testkit::{FakeCredentials, FakeServer, panel, user};

    async fn session(server: &FakeServer) -> ConsoleSession {
        match ConsoleSession::connect(
            server.connector().as_ref(),
            Arc::new(FakeCredentials::new()),
            panel(),
            Duration::from_secs(10),
        )
        .await
        {
            Ok(s) => s,
            Err(e) => panic!("connect failed: {e}"),
        }
    }

    #[derive(Default)]
    struct Scripted {
        elapsed: Vec<Duration>,
        polls: usize,
        cancel_after_polls: Option<usize>,
        at_head_after_polls: Option<usize>,
    }

    #[async_trait::async_trait]
    impl WaitObserver for Scripted {
        async fn elapsed(&mut self, elapsed: Duration) {
            self.elapsed.push(elapsed);
        }

        async fn poll_queue(&mut self) -> RenderResult<QueuePoll> {
            self.polls += 1;
            if self.cancel_after_polls.is_some_and(|n| self.polls >= n) {
                return Ok(QueuePoll::Cancel(user("9", "Mod")));
            }
            if self.at_head_after_polls.is_some_and(|n| self.polls >= n) {
                return Ok(QueuePoll::AtHead);
            }
            Ok(QueuePoll::Idle)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_match_is_case_insensitive() {
        let server = FakeServer::new();
        let mut s = session(&server).await;
        server.broadcast_output("RADIUS RENDER OF 'NEW' FINISHED.");
        let resp = wait_for(
            &mut s,
            Duration::from_secs(5),
            "Radius render of 'new' finished.",
            None,
            &WaitOptions::new(),
            &mut NoObserver,
        )
        .await
        .unwrap();
        assert_eq!(resp.result, ConsoleResponseResult::Success);
        assert_eq!(
            resp.output.as_deref(),
            Some("[00:00:00 INFO]: RADIUS RENDER OF 'NEW' FINISHED.")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failure_pattern_and_unrelated_lines() {
        let server = FakeServer::new();
        let mut s = session(&server).await;
        server.broadcast_output("Steve joined the game");
        server.broadcast_output("Radius render of world 'new' already active.");
        let resp = wait_for(
            &mut s,
            Duration::from_secs(5),
            "starting on world 'new'",
            Some("Radius render of world 'new' already active."),
            &WaitOptions::new(),
            &mut NoObserver,
        )
        .await
        .unwrap();
        assert_eq!(resp.result, ConsoleResponseResult::Failure);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_match() {
        let server = FakeServer::new();
        let mut s = session(&server).await;
        let started = Instant::now();
        let resp = wait_for(
            &mut s,
            Duration::from_secs(7),
            "never",
            None,
            &WaitOptions::new(),
            &mut NoObserver,
        )
        .await
        .unwrap();
        assert_eq!(resp, ConsoleResponse::without_output(ConsoleResponseResult::Timeout));
        assert_eq!(started.elapsed().as_secs(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_elapsed_time_each_interval() {
        let server = FakeServer::new();
        let mut s = session(&server).await;
        let mut observer = Scripted::default();
        let resp = wait_for(
            &mut s,
            Duration::from_secs(16),
            "never",
            None,
            &WaitOptions::new().show_elapsed_time(Duration::from_secs(5)),
            &mut observer,
        )
        .await
        .unwrap();
        assert_eq!(resp.result, ConsoleResponseResult::Timeout);
        let secs: Vec<u64> = observer.elapsed.iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![5, 10, 15]);
        assert_eq!(observer.polls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reauth_mid_wait_is_transparent() {
        let server = FakeServer::new();
        let mut s = session(&server).await;
        server.broadcast_frame(r#"{"event":"token expiring"}"#);
        server.broadcast_output("Radius render of 'new' finished.");
        let resp = wait_for(
            &mut s,
            Duration::from_secs(5),
            "radius render of 'new' finished.",
            None,
            &WaitOptions::new(),
            &mut NoObserver,
        )
        .await
        .unwrap();
        assert_eq!(resp.result, ConsoleResponseResult::Success);
        assert_eq!(server.auth_tokens().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_runs_command_and_waits_for_ack() {
        let server = FakeServer::new();
        server.start_foreign_render("new");
        let mut s = session(&server).await;
        let mut observer = Scripted {
            cancel_after_polls: Some(2),
            ..Scripted::default()
        };
        let options = WaitOptions::new()
            .cancellable(Duration::from_secs(1))
            .run_command_when_cancelled(CancelProcedure {
                command: "dynmap cancelrender new".into(),
                acknowledgement: "Cancelled render for 'new'".into(),
                timeout: Duration::from_secs(10),
            });
        let err = wait_for(&mut s, Duration::from_secs(60), "finished", None, &options, &mut observer)
            .await
            .unwrap_err();
        assert_eq!(err, RenderError::Cancelled(user("9", "Mod")));
        assert_eq!(server.commands(), vec!["dynmap cancelrender new".to_string()]);
        assert!(!server.is_rendering());
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_cancellation_is_a_timeout() {
        let server = FakeServer::new();
        let mut s = session(&server).await;
        let mut observer = Scripted {
            cancel_after_polls: Some(1),
            ..Scripted::default()
        };
        let options = WaitOptions::new()
            .cancellable(Duration::from_secs(1))
            .run_command_when_cancelled(CancelProcedure {
                command: "dynmap cancelrender new".into(),
                acknowledgement: "Cancelled render for 'new'".into(),
                timeout: Duration::from_secs(3),
            });
        let err = wait_for(&mut s, Duration::from_secs(60), "finished", None, &options, &mut observer)
            .await
            .unwrap_err();
        assert_eq!(err, RenderError::timeout("Unable to verify that the render was cancelled."));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_without_procedure_is_immediate() {
        let server = FakeServer::new();
        let mut s = session(&server).await;
        let mut observer = Scripted {
            cancel_after_polls: Some(1),
            ..Scripted::default()
        };
        let options = WaitOptions::new().cancellable(Duration::from_secs(1));
        let err = wait_for(&mut s, Duration::from_secs(60), "finished", None, &options, &mut observer)
            .await
            .unwrap_err();
        assert_eq!(err, RenderError::Cancelled(user("9", "Mod")));
        assert!(server.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn head_reached_only_when_requested() {
        let server = FakeServer::new();
        let mut s = session(&server).await;

        let mut observer = Scripted {
            at_head_after_polls: Some(1),
            ..Scripted::default()
        };
        let resp = wait_for(
            &mut s,
            Duration::from_secs(3),
            "finished",
            None,
            &WaitOptions::new().cancellable(Duration::from_secs(1)),
            &mut observer,
        )
        .await
        .unwrap();
        assert_eq!(resp.result, ConsoleResponseResult::Timeout);

        let mut observer = Scripted {
            at_head_after_polls: Some(2),
            ..Scripted::default()
        };
        let resp = wait_for(
            &mut s,
            Duration::from_secs(30),
            "finished",
            None,
            &WaitOptions::new()
                .cancellable(Duration::from_secs(1))
                .resume_at_head(),
            &mut observer,
        )
        .await
        .unwrap();
        assert_eq!(resp.result, ConsoleResponseResult::HeadReached);
        assert_eq!(observer.polls, 2);
    }
}
