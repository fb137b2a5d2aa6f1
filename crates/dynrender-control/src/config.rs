use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::Context;

const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

/// Process bootstrap read from the environment. Render settings live in the store instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlConfig {
    pub listen: SocketAddr,
    pub database_url: Option<String>,
    pub api_token: Option<String>,
    pub settings_file: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub shutdown_grace: Duration,
}

impl ControlConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let listen = var("DYNRENDER_LISTEN")
            .unwrap_or_else(|| DEFAULT_LISTEN.to_string())
            .parse::<SocketAddr>()
            .context("DYNRENDER_LISTEN must be a socket address like 0.0.0.0:8080")?;

        let shutdown_grace_secs = var("DYNRENDER_SHUTDOWN_GRACE_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS)
            .clamp(1, 600);

        Ok(Self {
            listen,
            database_url: var("DATABASE_URL"),
            api_token: var("DYNRENDER_API_TOKEN"),
            settings_file: var("DYNRENDER_SETTINGS_FILE").map(PathBuf::from),
            log_dir: var("DYNRENDER_LOG_DIR").map(PathBuf::from),
            shutdown_grace: Duration::from_secs(shutdown_grace_secs),
        })
    }
}
