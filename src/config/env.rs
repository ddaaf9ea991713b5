use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::domain::IssueType;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub detector: DetectorConfig,
    pub cache: CacheConfig,
    pub label_overrides: Vec<(String, IssueType)>,
    pub directories: DirectoryConfig,
    pub logging: LoggingConfig,
    pub intake: IntakeConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorBackendKind {
    Remote,
    Command,
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub backend: DetectorBackendKind,
    pub endpoint: String,
    pub model_id: Option<String>,
    pub api_key: Option<String>,
    pub command: Vec<String>,
    pub staging_dir: Option<PathBuf>,
    pub confidence_threshold: f32,
    pub timeout: Duration,
    pub workers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    Redis,
    Memory,
    Disabled,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    pub redis_url: String,
    pub ttl: Duration,
    pub op_timeout: Duration,
    pub namespace: String,
    pub clear_on_start: bool,
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub logs_dir: String,
    pub data_dir: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    Hourly,
    Daily,
    Never,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    /// Rolled files are named `<file_prefix>.<date>.log`.
    pub file_prefix: String,
    pub rotation: LogRotation,
    /// Rolled files kept on disk; 0 keeps everything.
    pub retention: usize,
}

#[derive(Debug, Clone)]
pub struct IntakeConfig {
    pub poll_interval: Duration,
    pub concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub stats_cron: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}
