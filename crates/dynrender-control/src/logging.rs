//! Tracing setup. Always logs to stderr (filtered by `RUST_LOG`, default `info`);
//! with `DYNRENDER_LOG_DIR` set, also writes a daily-rolling `dynrender.log` there.

use std::path::Path;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Keep alive for the process lifetime so buffered file logs are flushed.
pub struct LogGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init(log_dir: Option<&Path>) -> LogGuard {
    let Some(dir) = log_dir else {
        tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
        return LogGuard { _file_guard: None };
    };

    let _ = std::fs::create_dir_all(dir);
    let file_appender = tracing_appender::rolling::daily(dir, "dynrender.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    LogGuard {
        _file_guard: Some(guard),
    }
}
