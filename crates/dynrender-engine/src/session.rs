use std::{collections::VecDeque, sync::Arc, time::Duration};

use tokio::time::Instant;

use crate::error::{RenderError, RenderResult};
use crate::panel::CredentialSource;
use crate::protocol::{self, InboundEvent, JWT_EXP_CLAIM_INVALID};
use crate::settings::PanelSettings;
use crate::transport::{ConsoleConnector, ConsoleTransport};

/// One authenticated console-proxy connection, owned by a single render task.
pub struct ConsoleSession {
    transport: Box<dyn ConsoleTransport>,
    credentials: Arc<dyn CredentialSource>,
    panel: PanelSettings,
    auth_timeout: Duration,
    // Console lines that arrived while a re-auth handshake was in flight.
    pending: VecDeque<String>,
}

fn jwt_error(message: &str) -> RenderError {
    if message == JWT_EXP_CLAIM_INVALID {
        return RenderError::session("The console token expired and could not be renewed.");
    }
    tracing::warn!(error = %message, "console proxy reported a jwt error");
    RenderError::session(format!("Console authentication error: {message}"))
}

fn closed() -> RenderError {
    RenderError::session("The console connection was closed.")
}

impl ConsoleSession {
    /// Fetches credentials, opens the socket and authenticates on it.
    pub async fn connect(
        connector: &dyn ConsoleConnector,
        credentials: Arc<dyn CredentialSource>,
        panel: PanelSettings,
        auth_timeout: Duration,
    ) -> RenderResult<Self> {
        let creds = credentials.fetch(&panel).await?;
        let transport = connector.open(&creds.socket, &panel.host).await?;

        let mut session = Self {
            transport,
            credentials,
            panel,
            auth_timeout,
            pending: VecDeque::new(),
        };
        session.authenticate(&creds.token, false).await?;
        tracing::debug!(socket = %creds.socket, "console session authenticated");
        Ok(session)
    }

    /// Fire-and-forget; the caller waits for the answering console line separately.
    pub async fn send_command(&mut self, command: &str) -> RenderResult<()> {
        tracing::debug!(command, "sending console command");
        self.transport.send_text(protocol::send_command(command)).await
    }

    /// Receives the next inbound event. Cancel-safe.
    pub async fn next_event(&mut self) -> RenderResult<InboundEvent> {
        if let Some(line) = self.pending.pop_front() {
            return Ok(InboundEvent::ConsoleOutput(line));
        }
        match self.transport.recv_text().await? {
            Some(text) => Ok(protocol::decode(&text)),
            None => Err(closed()),
        }
    }

    /// Classifies one inbound event, returning the console line if it carried one.
    ///
    /// Token expiry is handled here by re-authenticating on the same socket, so
    /// callers never observe it.
    pub async fn handle_event(&mut self, event: InboundEvent) -> RenderResult<Option<String>> {
        match event {
            InboundEvent::ConsoleOutput(line) => Ok(Some(line)),
            InboundEvent::JwtError(message) => Err(jwt_error(&message)),
            InboundEvent::TokenExpiring | InboundEvent::TokenExpired => {
                tracing::info!(event = ?event, "console token expiring; re-authenticating");
                self.reauthenticate().await?;
                Ok(None)
            }
            InboundEvent::AuthSuccess | InboundEvent::Other(_) => Ok(None),
        }
    }

    pub async fn next_output(&mut self) -> RenderResult<Option<String>> {
        let event = self.next_event().await?;
        self.handle_event(event).await
    }

    async fn reauthenticate(&mut self) -> RenderResult<()> {
        let creds = self.credentials.fetch(&self.panel).await?;
        self.authenticate(&creds.token, true).await
    }

    async fn authenticate(&mut self, token: &str, keep_output: bool) -> RenderResult<()> {
        self.transport.send_text(protocol::auth(token)).await?;

        let deadline = Instant::now() + self.auth_timeout;
        loop {
            let text = match tokio::time::timeout_at(deadline, self.transport.recv_text()).await {
                Ok(res) => res?.ok_or_else(closed)?,
                Err(_) => {
                    return Err(RenderError::timeout(
                        "Timed out while authenticating websocket.",
                    ));
                }
            };
            match protocol::decode(&text) {
                InboundEvent::AuthSuccess => return Ok(()),
                InboundEvent::ConsoleOutput(line) if keep_output => self.pending.push_back(line),
                InboundEvent::JwtError(message) => return Err(jwt_error(&message)),
                _ => {}
            }
        }
    }
}
