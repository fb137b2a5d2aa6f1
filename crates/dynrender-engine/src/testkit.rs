//! In-memory stand-ins for the panel, the console proxy and the chat platform.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use dynrender_model::{RenderStatus, UserId, UserProfile};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::display::{StatusDisplay, UserDirectory};
use crate::error::{RenderError, RenderResult};
use crate::panel::{ConsoleCredentials, CredentialSource};
use crate::settings::PanelSettings;
use crate::transport::{ConsoleConnector, ConsoleTransport};

pub fn panel() -> PanelSettings {
    PanelSettings {
        host: "https://panel.example.com".to_string(),
        key: "ptlc_key".to_string(),
        server_id: "abcd1234".to_string(),
    }
}

pub fn user(id: &str, name: &str) -> UserProfile {
    UserProfile {
        id: UserId(id.to_string()),
        display_name: name.to_string(),
    }
}

fn console_frame(line: &str) -> String {
    serde_json::json!({
        "event": "console output",
        "args": [format!("[00:00:00 INFO]: {line}")],
    })
    .to_string()
}

#[derive(Default)]
struct ServerState {
    connections: Vec<Option<mpsc::UnboundedSender<String>>>,
    origins: Vec<String>,
    auth_tokens: Vec<String>,
    commands: Vec<String>,
    no_reply_to_auth: bool,
    no_reply_to_start: bool,
    auto_finish: Option<Duration>,
    canned: HashMap<String, Vec<String>>,
    active_world: Option<String>,
    generation: u64,
    starts: usize,
    rejected_starts: usize,
}

impl ServerState {
    fn broadcast(&mut self, frame: &str) {
        for tx in self.connections.iter().flatten() {
            let _ = tx.send(frame.to_string());
        }
    }
}

/// Simulates a console proxy in front of a server running the dynmap plugin.
///
/// Console output is broadcast to every open connection, like the real proxy.
#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn connector(&self) -> Arc<FakeConnector> {
        Arc::new(FakeConnector {
            server: self.clone(),
        })
    }

    pub fn set_reply_to_auth(&self, reply: bool) {
        self.lock().no_reply_to_auth = !reply;
    }

    pub fn set_reply_to_start(&self, reply: bool) {
        self.lock().no_reply_to_start = !reply;
    }

    pub fn set_auto_finish(&self, after: Duration) {
        self.lock().auto_finish = Some(after);
    }

    /// Lines broadcast whenever `command` is sent.
    pub fn on_command(&self, command: &str, lines: &[&str]) {
        self.lock()
            .canned
            .insert(command.to_string(), lines.iter().map(|l| l.to_string()).collect());
    }

    /// Marks the render slot busy as if a render was started in-game.
    pub fn start_foreign_render(&self, world: &str) {
        let mut state = self.lock();
        state.active_world = Some(world.to_string());
        state.generation += 1;
    }

    pub fn finish_render(&self) {
        let mut state = self.lock();
        if let Some(world) = state.active_world.take() {
            let frame = console_frame(&format!("Radius render of '{world}' finished."));
            state.broadcast(&frame);
        }
    }

    pub fn broadcast_output(&self, line: &str) {
        self.lock().broadcast(&console_frame(line));
    }

    pub fn broadcast_frame(&self, frame: &str) {
        self.lock().broadcast(frame);
    }

    pub fn close_all(&self) {
        for conn in self.lock().connections.iter_mut() {
            conn.take();
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn auth_tokens(&self) -> Vec<String> {
        self.lock().auth_tokens.clone()
    }

    pub fn origins(&self) -> Vec<String> {
        self.lock().origins.clone()
    }

    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    pub fn is_rendering(&self) -> bool {
        self.lock().active_world.is_some()
    }

    pub fn starts(&self) -> usize {
        self.lock().starts
    }

    pub fn rejected_starts(&self) -> usize {
        self.lock().rejected_starts
    }

    fn handle(&self, conn: usize, text: &str) {
        let Ok(frame) = serde_json::from_str::<Value>(text) else {
            return;
        };
        let event = frame["event"].as_str().unwrap_or_default().to_string();
        let arg = frame["args"][0].as_str().unwrap_or_default().to_string();

        let mut state = self.lock();
        match event.as_str() {
            "auth" => {
                state.auth_tokens.push(arg);
                if !state.no_reply_to_auth
                    && let Some(Some(tx)) = state.connections.get(conn)
                {
                    let _ = tx.send(r#"{"event":"auth success","args":[]}"#.to_string());
                }
            }
            "send command" => {
                state.commands.push(arg.clone());
                let parts: Vec<&str> = arg.split_whitespace().collect();
                match parts.as_slice() {
                    ["dynmap", "radiusrender", world, _x, _z, radius] => {
                        if state.no_reply_to_start {
                            return;
                        }
                        if let Some(active) = state.active_world.clone() {
                            state.rejected_starts += 1;
                            let line = format!("Radius render of world '{active}' already active.");
                            state.broadcast(&console_frame(&line));
                            return;
                        }
                        state.active_world = Some(world.to_string());
                        state.generation += 1;
                        state.starts += 1;
                        let line =
                            format!("Render of {radius} block radius starting on world '{world}'...");
                        state.broadcast(&console_frame(&line));

                        if let Some(after) = state.auto_finish {
                            let generation = state.generation;
                            let server = self.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(after).await;
                                if server.lock().generation == generation {
                                    server.finish_render();
                                }
                            });
                        }
                    }
                    ["dynmap", "cancelrender", world] => {
                        if state.active_world.take().is_some() {
                            let line = format!("Cancelled render for '{world}'");
                            state.broadcast(&console_frame(&line));
                        }
                    }
                    _ => {
                        if let Some(lines) = state.canned.get(&arg).cloned() {
                            for line in lines {
                                state.broadcast(&console_frame(&line));
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

pub struct FakeConnector {
    server: FakeServer,
}

#[async_trait::async_trait]
impl ConsoleConnector for FakeConnector {
    async fn open(&self, _socket_url: &str, origin: &str) -> RenderResult<Box<dyn ConsoleTransport>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.server.lock();
            state.connections.push(Some(tx));
            state.origins.push(origin.to_string());
            state.connections.len() - 1
        };
        Ok(Box::new(FakeTransport {
            id,
            rx,
            server: self.server.clone(),
        }))
    }
}

struct FakeTransport {
    id: usize,
    rx: mpsc::UnboundedReceiver<String>,
    server: FakeServer,
}

#[async_trait::async_trait]
impl ConsoleTransport for FakeTransport {
    async fn send_text(&mut self, text: String) -> RenderResult<()> {
        self.server.handle(self.id, &text);
        Ok(())
    }

    async fn recv_text(&mut self) -> RenderResult<Option<String>> {
        Ok(self.rx.recv().await)
    }
}

#[derive(Default)]
pub struct FakeCredentials {
    fetches: AtomicUsize,
    fail: bool,
}

impl FakeCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fetches: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CredentialSource for FakeCredentials {
    async fn fetch(&self, _panel: &PanelSettings) -> RenderResult<ConsoleCredentials> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(RenderError::session(
                "Unable to get websocket credentials. Status code: `500`.",
            ));
        }
        Ok(ConsoleCredentials {
            socket: "wss://node.example.com:8080/api/servers/abcd1234/ws".to_string(),
            token: format!("token-{n}"),
        })
    }
}

#[derive(Default)]
pub struct FakeUsers {
    users: Mutex<HashMap<UserId, UserProfile>>,
}

impl FakeUsers {
    pub fn with(users: &[UserProfile]) -> Self {
        let map = users.iter().map(|u| (u.id.clone(), u.clone())).collect();
        Self {
            users: Mutex::new(map),
        }
    }
}

#[async_trait::async_trait]
impl UserDirectory for FakeUsers {
    async fn resolve(&self, id: &UserId) -> anyhow::Result<Option<UserProfile>> {
        Ok(self.users.lock().unwrap_or_else(|e| e.into_inner()).get(id).cloned())
    }
}

#[derive(Default)]
pub struct RecordingDisplay {
    published: Mutex<Vec<RenderStatus>>,
    fail: bool,
}

impl RecordingDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn published(&self) -> Vec<RenderStatus> {
        self.published.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn titles(&self) -> Vec<&'static str> {
        self.published().iter().map(|s| s.phase.title()).collect()
    }
}

#[async_trait::async_trait]
impl StatusDisplay for RecordingDisplay {
    async fn publish(&self, status: &RenderStatus) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("message edit failed");
        }
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(status.clone());
        Ok(())
    }
}
