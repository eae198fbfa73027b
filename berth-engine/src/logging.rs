///! Diagnostic logging configuration
///! Sets up tracing output for the engine itself; build output goes to the per-service logs

use serde::{Deserialize, Serialize};
use std::io;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,             // log level (trace, debug, info, warn, error)
    pub file_path: Option<String>, // diagnostic log directory
    pub rotation: LogRotation,     // log rotation policy
    pub json_format: bool,         // use JSON formatting for the file output
}

/// Log rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    Daily,
    Never,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            rotation: LogRotation::Daily,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Initialize logging based on configuration
    ///
    /// The returned guard must be kept alive for as long as file output is wanted.
    pub fn init(&self) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        // Diagnostics go to stderr so they never interleave with prompts on stdout
        let console_layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_ansi(true)
            .with_writer(io::stderr);

        let Some(ref path) = self.file_path else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init()?;
            tracing::debug!("Logging initialized - level: {}", self.level);
            return Ok(None);
        };

        let file_appender = match self.rotation {
            LogRotation::Hourly => rolling::hourly(path, "berth.log"),
            LogRotation::Daily => rolling::daily(path, "berth.log"),
            LogRotation::Never => rolling::never(path, "berth.log"),
        };
        let (writer, guard) = non_blocking(file_appender);

        if self.json_format {
            let file_layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .with(file_layer)
                .try_init()?;
        } else {
            let file_layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .with(file_layer)
                .try_init()?;
        }

        tracing::debug!("Logging initialized - level: {}, directory: {}", self.level, path);

        Ok(Some(guard))
    }

    /// Initialize with default settings
    pub fn init_default() -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
        Self::default().init()
    }

    /// Initialize with environment variables
    pub fn init_from_env() -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>>
    {
        let level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let file_path = std::env::var("BERTH_LOG_PATH").ok();

        Self {
            level,
            file_path,
            ..Default::default()
        }
        .init()
    }
}
