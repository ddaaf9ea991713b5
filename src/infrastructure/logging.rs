use std::{io, path::Path};

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{
    config::{LogRotation, LoggingConfig},
    infrastructure::directories::ResolvedPaths,
};

static INIT: OnceCell<()> = OnceCell::new();
static GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Installs the global subscriber once: console output plus a rolled,
/// non-ANSI log file under the logs directory.
pub fn init_tracing(config: &LoggingConfig, paths: &ResolvedPaths) -> Result<()> {
    INIT.get_or_try_init::<_, anyhow::Error>(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let (file_writer, guard) = tracing_appender::non_blocking(log_file(config, &paths.logs_dir)?);
        let _ = GUARD.set(guard);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(io::stdout).with_target(true))
            .with(
                fmt::layer()
                    .with_writer(file_writer)
                    .with_target(true)
                    .with_ansi(false),
            )
            .try_init()?;

        tracing::info!(
            target: "lifecycle",
            logs = %paths.logs_dir.display(),
            file_prefix = %config.file_prefix,
            rotation = ?config.rotation,
            retention = config.retention,
            level = %config.level,
            "tracing initialized"
        );
        Ok(())
    })?;
    Ok(())
}

fn log_file(config: &LoggingConfig, logs_dir: &Path) -> Result<RollingFileAppender> {
    let rotation = match config.rotation {
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Never => Rotation::NEVER,
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(&config.file_prefix)
        .filename_suffix("log");
    if config.retention > 0 {
        builder = builder.max_log_files(config.retention);
    }

    builder
        .build(logs_dir)
        .with_context(|| format!("failed to open log file in {}", logs_dir.display()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn log_file_uses_configured_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            level: "info".into(),
            file_prefix: "civic".into(),
            rotation: LogRotation::Never,
            retention: 0,
        };

        let mut appender = log_file(&config, dir.path()).unwrap();
        appender.write_all(b"hello\n").unwrap();
        appender.flush().unwrap();

        let written = std::fs::read_to_string(dir.path().join("civic.log")).unwrap();
        assert_eq!(written, "hello\n");
    }
}
