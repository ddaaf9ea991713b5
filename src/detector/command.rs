use std::{io::Write, path::PathBuf, process::Stdio};

use anyhow::{Context, Result};
use tempfile::TempPath;
use tokio::process::Command;

use crate::{
    config::DetectorConfig,
    domain::{Detection, ImageFormat},
};

use super::{check_image, finalize, DetectionError, Detector};

const STDERR_LIMIT: usize = 512;

/// Runs a local model CLI that takes an image path and prints a JSON array
/// of `{class_name, confidence, bbox}` on stdout.
pub struct CommandDetector {
    program: String,
    args: Vec<String>,
    staging_dir: Option<PathBuf>,
    confidence_threshold: f32,
}

impl CommandDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self> {
        let (program, args) = config
            .command
            .split_first()
            .context("DETECTOR_COMMAND must be configured for the command detector")?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            staging_dir: config.staging_dir.clone(),
            confidence_threshold: config.confidence_threshold,
        })
    }

    /// Copies the image into a temp file that is deleted when the returned
    /// guard drops.
    async fn stage(&self, image: &[u8], format: ImageFormat) -> Result<TempPath, DetectionError> {
        let bytes = image.to_vec();
        let staging_dir = self.staging_dir.clone();
        let suffix = format!(".{}", format.extension());

        tokio::task::spawn_blocking(move || -> std::io::Result<TempPath> {
            let mut builder = tempfile::Builder::new();
            builder.prefix("civic-").suffix(&suffix);
            let mut file = match &staging_dir {
                Some(dir) => builder.tempfile_in(dir)?,
                None => builder.tempfile()?,
            };
            file.write_all(&bytes)?;
            file.flush()?;
            Ok(file.into_temp_path())
        })
        .await
        .map_err(|err| DetectionError::Worker(err.to_string()))?
        .map_err(DetectionError::from)
    }

    async fn run(&self, staged: &TempPath) -> Result<Vec<Detection>, DetectionError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(staged.as_os_str())
            .env("CONFIDENCE_THRESHOLD", self.confidence_threshold.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.len() > STDERR_LIMIT {
                let mut cut = STDERR_LIMIT;
                while !stderr.is_char_boundary(cut) {
                    cut -= 1;
                }
                stderr.truncate(cut);
            }
            return Err(DetectionError::Process {
                status: output.status.to_string(),
                stderr,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(stdout.trim())
            .map_err(|err| DetectionError::InvalidOutput(err.to_string()))
    }
}

impl Detector for CommandDetector {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn predict(&self, image: &[u8]) -> Result<Vec<Detection>, DetectionError> {
        let format = check_image(image)?;
        let staged = self.stage(image, format).await?;
        let outcome = self.run(&staged).await;

        if let Err(err) = staged.close() {
            tracing::warn!(target: "detector", error = %err, "failed to remove staged image");
        }

        finalize(outcome?, self.confidence_threshold)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::{path::Path, time::Duration};

    use super::*;
    use crate::config::DetectorBackendKind;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 1, 2, 3];

    fn detector(script: &str, staging: &Path) -> CommandDetector {
        let config = DetectorConfig {
            backend: DetectorBackendKind::Command,
            endpoint: String::new(),
            model_id: None,
            api_key: None,
            command: vec!["sh".into(), "-c".into(), script.into(), "detector".into()],
            staging_dir: Some(staging.to_path_buf()),
            confidence_threshold: 0.25,
            timeout: Duration::from_secs(10),
            workers: 1,
        };
        CommandDetector::new(&config).unwrap()
    }

    #[tokio::test]
    async fn parses_stdout_and_removes_staged_file() {
        let staging = tempfile::tempdir().unwrap();
        let script = r#"test -f "$1" || exit 9
printf '[{"class_name":"%s","confidence":0.9,"bbox":[0,0,4,4]},{"class_name":"noise","confidence":0.1,"bbox":[0,0,1,1]}]' "$1""#;
        let detections = detector(script, staging.path()).predict(PNG).await.unwrap();

        assert_eq!(detections.len(), 1);
        let staged_path = Path::new(&detections[0].label);
        assert!(staged_path.starts_with(staging.path()));
        assert_eq!(staged_path.extension().and_then(|e| e.to_str()), Some("png"));
        assert!(!staged_path.exists());
    }

    #[tokio::test]
    async fn failed_run_reports_stderr_and_still_cleans_up() {
        let staging = tempfile::tempdir().unwrap();
        let err = detector(r#"echo "$1" >&2; exit 3"#, staging.path())
            .predict(PNG)
            .await
            .unwrap_err();

        let DetectionError::Process { stderr, .. } = err else {
            panic!("expected process failure, got {err:?}");
        };
        assert!(!Path::new(&stderr).exists());
        assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn empty_stdout_is_zero_detections() {
        let staging = tempfile::tempdir().unwrap();
        let detections = detector("true", staging.path()).predict(PNG).await.unwrap();
        assert!(detections.is_empty());
    }

    #[tokio::test]
    async fn garbage_stdout_is_invalid_output() {
        let staging = tempfile::tempdir().unwrap();
        let err = detector("echo not-json", staging.path())
            .predict(PNG)
            .await
            .unwrap_err();
        assert!(matches!(err, DetectionError::InvalidOutput(_)));
    }
}
