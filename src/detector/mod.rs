use std::{future::Future, time::Duration};

use anyhow::Result;
use reqwest::Client;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::{
    config::{DetectorBackendKind, DetectorConfig},
    domain::{rank_by_confidence, Detection, ImageFormat},
};

mod command;
mod remote;

pub use command::CommandDetector;
pub use remote::{RemoteDetector, DEFAULT_ENDPOINT};

/// The model could not produce a result for this image. Distinct from a
/// successful run that found nothing.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("image payload is empty")]
    EmptyImage,
    #[error("image payload is not a recognized raster format")]
    UnsupportedFormat,
    #[error("image text is not valid base64: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),
    #[error("detector did not finish within {0:?}")]
    Timeout(Duration),
    #[error("detector request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("detector endpoint returned HTTP {0}")]
    Status(u16),
    #[error("detector I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("detector process exited with {status}: {stderr}")]
    Process { status: String, stderr: String },
    #[error("detector output is invalid: {0}")]
    InvalidOutput(String),
    #[error("detector worker unavailable: {0}")]
    Worker(String),
}

/// Anything that turns image bytes into detections ranked by confidence.
///
/// Implementations are shared by every in-flight request and must not keep
/// per-request state.
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    fn predict(
        &self,
        image: &[u8],
    ) -> impl Future<Output = Result<Vec<Detection>, DetectionError>> + Send;
}

pub enum DetectorBackend {
    Remote(RemoteDetector),
    Command(CommandDetector),
}

/// The configured detector plus the permits that bound concurrent inference.
pub struct DetectorProvider {
    backend: DetectorBackend,
    permits: Semaphore,
    workers: usize,
}

impl DetectorProvider {
    pub fn new(backend: DetectorBackend, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            backend,
            permits: Semaphore::new(workers),
            workers,
        }
    }

    pub fn from_config(http: Client, config: &DetectorConfig) -> Result<Self> {
        let backend = match config.backend {
            DetectorBackendKind::Remote => {
                DetectorBackend::Remote(RemoteDetector::new(http, config)?)
            }
            DetectorBackendKind::Command => {
                DetectorBackend::Command(CommandDetector::new(config)?)
            }
        };
        Ok(Self::new(backend, config.workers))
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

impl Detector for DetectorProvider {
    fn name(&self) -> &'static str {
        match &self.backend {
            DetectorBackend::Remote(detector) => detector.name(),
            DetectorBackend::Command(detector) => detector.name(),
        }
    }

    async fn predict(&self, image: &[u8]) -> Result<Vec<Detection>, DetectionError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|err| DetectionError::Worker(err.to_string()))?;

        match &self.backend {
            DetectorBackend::Remote(detector) => detector.predict(image).await,
            DetectorBackend::Command(detector) => detector.predict(image).await,
        }
    }
}

/// Rejects payloads no detector can decode.
fn check_image(image: &[u8]) -> Result<ImageFormat, DetectionError> {
    if image.is_empty() {
        return Err(DetectionError::EmptyImage);
    }
    ImageFormat::sniff(image).ok_or(DetectionError::UnsupportedFormat)
}

/// Validates raw adapter output, drops detections under `threshold` and
/// ranks the rest.
fn finalize(detections: Vec<Detection>, threshold: f32) -> Result<Vec<Detection>, DetectionError> {
    if let Some(bad) = detections
        .iter()
        .find(|det| !(0.0..=1.0).contains(&det.confidence))
    {
        return Err(DetectionError::InvalidOutput(format!(
            "confidence {} for `{}` is outside [0, 1]",
            bad.confidence, bad.label
        )));
    }

    let kept = detections
        .into_iter()
        .filter(|det| det.confidence >= threshold)
        .collect();
    Ok(rank_by_confidence(kept))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_filters_and_ranks() {
        let out = finalize(
            vec![
                Detection::new("trash", 0.3, [0.0; 4]),
                Detection::new("cow", 0.1, [0.0; 4]),
                Detection::new("pothole", 0.8, [0.0; 4]),
            ],
            0.25,
        )
        .unwrap();
        let labels: Vec<_> = out.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["pothole", "trash"]);
    }

    #[test]
    fn finalize_rejects_out_of_range_confidence() {
        let err = finalize(vec![Detection::new("pothole", f32::NAN, [0.0; 4])], 0.0).unwrap_err();
        assert!(matches!(err, DetectionError::InvalidOutput(_)));
        let err = finalize(vec![Detection::new("pothole", 87.0, [0.0; 4])], 0.0).unwrap_err();
        assert!(matches!(err, DetectionError::InvalidOutput(_)));
    }

    #[test]
    fn check_image_rejects_empty_and_unknown_payloads() {
        assert!(matches!(check_image(&[]), Err(DetectionError::EmptyImage)));
        assert!(matches!(
            check_image(b"%PDF-1.7"),
            Err(DetectionError::UnsupportedFormat)
        ));
        assert_eq!(check_image(&[0xFF, 0xD8, 0xFF, 0xDB]).unwrap(), ImageFormat::Jpeg);
    }

    #[cfg(unix)]
    mod workers {
        use std::{path::Path, time::Instant};

        use super::*;

        const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 4, 5, 6];
        const HOLD: Duration = Duration::from_millis(300);

        /// Each run takes an exclusive lock directory for `HOLD`, so two runs
        /// overlapping in time make one of them exit with status 7.
        fn exclusive_provider(lock: &Path, staging: &Path, workers: usize) -> DetectorProvider {
            let script = format!(
                r#"mkdir "{}" 2>/dev/null || exit 7; sleep {}; rmdir "{}""#,
                lock.display(),
                HOLD.as_secs_f32(),
                lock.display()
            );
            let config = DetectorConfig {
                backend: DetectorBackendKind::Command,
                endpoint: String::new(),
                model_id: None,
                api_key: None,
                command: vec!["sh".into(), "-c".into(), script, "detector".into()],
                staging_dir: Some(staging.to_path_buf()),
                confidence_threshold: 0.25,
                timeout: Duration::from_secs(10),
                workers,
            };
            DetectorProvider::from_config(Client::new(), &config).unwrap()
        }

        #[tokio::test]
        async fn single_worker_runs_inference_one_at_a_time() {
            let dir = tempfile::tempdir().unwrap();
            let provider = exclusive_provider(&dir.path().join("lock"), dir.path(), 1);
            assert_eq!(provider.workers(), 1);

            let started = Instant::now();
            let (first, second) = tokio::join!(provider.predict(PNG), provider.predict(PNG));

            assert!(first.unwrap().is_empty());
            assert!(second.unwrap().is_empty());
            assert!(started.elapsed() >= HOLD * 2);
        }

        #[tokio::test]
        async fn extra_workers_run_inference_in_parallel() {
            let dir = tempfile::tempdir().unwrap();
            let provider = exclusive_provider(&dir.path().join("lock"), dir.path(), 2);

            let (first, second) = tokio::join!(provider.predict(PNG), provider.predict(PNG));

            let collided = [first, second]
                .into_iter()
                .filter(|outcome| matches!(outcome, Err(DetectionError::Process { .. })))
                .count();
            assert_eq!(collided, 1);
        }
    }
}
