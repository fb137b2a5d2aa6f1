use dynrender_model::UserProfile;

/// Every way a render can end other than completing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// Bad input or a full queue; the message is shown to the user verbatim.
    #[error("{0}")]
    Validation(String),
    /// The console answered with a recognized failure line.
    #[error("{0}")]
    Rejected(String),
    /// No matching console line arrived before the deadline. The outcome is unknown.
    #[error("{0}")]
    Timeout(String),
    /// Credential fetch, socket, JWT or response-parsing failure.
    #[error("{0}")]
    Session(String),
    #[error("Render cancelled by {}.", .0.display_name)]
    Cancelled(UserProfile),
    #[error("settings store error: {0}")]
    Store(String),
}

impl RenderError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    pub fn session(message: impl Into<String>) -> Self {
        Self::Session(message.into())
    }

    pub fn store(err: anyhow::Error) -> Self {
        Self::Store(format!("{err:#}"))
    }

    pub fn code(&self) -> &'static str {
        match self {
            RenderError::Validation(_) => "invalid_param",
            RenderError::Rejected(_) => "rejected",
            RenderError::Timeout(_) => "timeout",
            RenderError::Session(_) => "session_failed",
            RenderError::Cancelled(_) => "cancelled",
            RenderError::Store(_) => "store_error",
        }
    }
}

pub type RenderResult<T> = Result<T, RenderError>;
