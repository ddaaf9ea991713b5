use std::{env, path::PathBuf, thread, time::Duration};

use url::Url;

use super::env::{
    AppConfig, CacheBackendKind, CacheConfig, ConfigError, DetectorBackendKind, DetectorConfig,
    DirectoryConfig, IntakeConfig, LogRotation, LoggingConfig, SchedulerConfig,
};
use crate::{detector::DEFAULT_ENDPOINT, domain::IssueType};

pub fn load_config() -> Result<AppConfig, ConfigError> {
    AppConfig::from_env()
}

impl AppConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let backend = match non_empty("DETECTOR_BACKEND").as_deref() {
            None | Some("remote") => DetectorBackendKind::Remote,
            Some("command") => DetectorBackendKind::Command,
            Some(other) => return Err(invalid("DETECTOR_BACKEND", other, "expected remote or command")),
        };

        let command = non_empty("DETECTOR_COMMAND")
            .map(|value| value.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .unwrap_or_default();
        let model_id = non_empty("DETECTOR_MODEL_ID");
        match backend {
            DetectorBackendKind::Remote if model_id.is_none() => {
                return Err(ConfigError::Missing("DETECTOR_MODEL_ID"))
            }
            DetectorBackendKind::Command if command.is_empty() => {
                return Err(ConfigError::Missing("DETECTOR_COMMAND"))
            }
            _ => {}
        }

        let confidence_threshold = parse_or("DETECTOR_CONFIDENCE_THRESHOLD", 0.25_f32);
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(invalid(
                "DETECTOR_CONFIDENCE_THRESHOLD",
                &confidence_threshold.to_string(),
                "must be within [0, 1]",
            ));
        }

        let detector = DetectorConfig {
            backend,
            endpoint: non_empty("DETECTOR_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            model_id,
            api_key: non_empty("DETECTOR_API_KEY"),
            command,
            staging_dir: non_empty("DETECTOR_STAGING_DIR").map(PathBuf::from),
            confidence_threshold,
            timeout: Duration::from_millis(parse_or("DETECTOR_TIMEOUT_MS", 30_000)),
            workers: parse_or("DETECTOR_WORKERS", default_workers()).max(1),
        };

        let cache_backend = match non_empty("CACHE_BACKEND").as_deref() {
            None | Some("redis") => CacheBackendKind::Redis,
            Some("memory") => CacheBackendKind::Memory,
            Some("disabled") | Some("none") => CacheBackendKind::Disabled,
            Some(other) => {
                return Err(invalid("CACHE_BACKEND", other, "expected redis, memory or disabled"))
            }
        };

        let redis_url = match non_empty("REDIS_URL") {
            Some(url) => url,
            None => build_redis_url(
                &non_empty("REDIS_HOST").unwrap_or_else(|| "localhost".to_string()),
                parse_or("REDIS_PORT", 6379),
                non_empty("REDIS_PASSWORD").as_deref(),
            )?,
        };

        let cache = CacheConfig {
            backend: cache_backend,
            redis_url,
            ttl: cache_ttl(parse_or("CACHE_TTL", 3600))?,
            op_timeout: Duration::from_millis(parse_or("CACHE_TIMEOUT_MS", 5_000)),
            namespace: non_empty("CACHE_NAMESPACE").unwrap_or_else(|| "classification".to_string()),
            clear_on_start: parse_flag("CACHE_CLEAR_ON_START"),
        };

        let label_overrides = match non_empty("LABEL_MAPPING_EXTRA") {
            Some(raw) => parse_label_overrides(&raw)?,
            None => Vec::new(),
        };

        let directories = DirectoryConfig {
            logs_dir: env::var("LOGS_DIR").unwrap_or_else(|_| "logs".to_string()),
            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            file_prefix: non_empty("LOG_FILE_PREFIX").unwrap_or_else(|| "classifier".to_string()),
            rotation: parse_rotation(non_empty("LOG_ROTATION").as_deref())?,
            retention: parse_or("LOG_RETENTION", 14),
        };

        let intake = IntakeConfig {
            poll_interval: Duration::from_millis(parse_or("INTAKE_POLL_INTERVAL_MS", 500)),
            concurrency: parse_or("PROCESSOR_CONCURRENCY", 8_usize).max(1),
        };

        let scheduler = SchedulerConfig {
            stats_cron: non_empty("STATS_CRON").unwrap_or_else(|| "0 */5 * * * *".to_string()),
        };

        Ok(Self {
            detector,
            cache,
            label_overrides,
            directories,
            logging,
            intake,
            scheduler,
        })
    }
}

/// Parses `label=issue_type` pairs separated by `;` or `,`.
fn parse_label_overrides(raw: &str) -> Result<Vec<(String, IssueType)>, ConfigError> {
    raw.split([';', ','])
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (label, issue) = entry
                .split_once('=')
                .ok_or_else(|| invalid("LABEL_MAPPING_EXTRA", entry, "expected label=issue_type"))?;
            let issue = issue
                .parse::<IssueType>()
                .map_err(|err| invalid("LABEL_MAPPING_EXTRA", entry, &err.to_string()))?;
            Ok((label.trim().to_string(), issue))
        })
        .collect()
}

fn build_redis_url(host: &str, port: u16, password: Option<&str>) -> Result<String, ConfigError> {
    let mut url = Url::parse(&format!("redis://{host}:{port}/0"))
        .map_err(|err| invalid("REDIS_HOST", host, &err.to_string()))?;
    if let Some(password) = password {
        url.set_password(Some(password))
            .map_err(|_| invalid("REDIS_PASSWORD", "<redacted>", "cannot be used in a URL"))?;
    }
    Ok(url.into())
}

fn parse_rotation(raw: Option<&str>) -> Result<LogRotation, ConfigError> {
    match raw.map(str::to_ascii_lowercase).as_deref() {
        None | Some("daily") => Ok(LogRotation::Daily),
        Some("hourly") => Ok(LogRotation::Hourly),
        Some("never") => Ok(LogRotation::Never),
        Some(other) => Err(invalid("LOG_ROTATION", other, "expected hourly, daily or never")),
    }
}

fn cache_ttl(secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(invalid("CACHE_TTL", "0", "must be at least one second"));
    }
    Ok(Duration::from_secs(secs))
}

fn default_workers() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_flag(key: &str) -> bool {
    matches!(
        non_empty(key).map(|v| v.to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
