//! Orchestrates dynmap radius renders over a hosting panel's console websocket.
//!
//! Renders are serialized through a persisted [`RenderQueue`]: only the head
//! of the queue may issue the start command, and every render removes itself
//! from the queue before [`RenderEngine::render`] returns.

pub mod display;
pub mod error;
pub mod orchestrator;
pub mod panel;
pub mod patterns;
pub mod protocol;
pub mod queue;
pub mod resolver;
pub mod session;
pub mod settings;
pub mod transport;
pub mod waiter;

#[cfg(test)]
mod testkit;

pub use display::{StatusDisplay, StatusReporter, UserDirectory};
pub use error::{RenderError, RenderResult};
pub use orchestrator::{RenderCommand, RenderEngine, RenderOutcome};
pub use panel::{ConsoleCredentials, CredentialSource, PanelClient};
pub use patterns::ConsolePatterns;
pub use queue::{CancelMark, EnqueueOutcome, RenderQueue};
pub use settings::{PanelSettings, RenderSettings};
pub use transport::{ConsoleConnector, ConsoleTransport, WsConnector};
