use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tokio::{fs, task::JoinHandle, time::sleep};

use crate::{
    classifier::ConfidenceLevel,
    detector::Detector,
    domain::{ClassificationResult, ImageInput, Submission, SubmissionKind},
    infrastructure::shutdown::ShutdownListener,
    orchestrator::Orchestrator,
    tasks::queue::SubmissionQueue,
};

const IDLE_WAIT: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
pub struct ClassificationReport<'a> {
    pub submission: &'a str,
    pub classified_at: DateTime<Utc>,
    pub confidence_level: ConfidenceLevel,
    pub result: &'a ClassificationResult,
}

#[derive(Debug, Serialize)]
pub struct FailureReport<'a> {
    pub submission: &'a str,
    pub failed_at: DateTime<Utc>,
    pub error: String,
}

pub struct SubmissionProcessor<D> {
    queue: Arc<SubmissionQueue<Submission>>,
    orchestrator: Arc<Orchestrator<D>>,
    outbox: PathBuf,
    concurrency: usize,
}

impl<D: Detector + 'static> SubmissionProcessor<D> {
    pub fn new(
        queue: Arc<SubmissionQueue<Submission>>,
        orchestrator: Arc<Orchestrator<D>>,
        outbox: PathBuf,
        concurrency: usize,
    ) -> Self {
        Self {
            queue,
            orchestrator,
            outbox,
            concurrency: concurrency.max(1),
        }
    }

    pub fn spawn(self: Arc<Self>, mut shutdown: ShutdownListener) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop(&mut shutdown).await;
        })
    }

    async fn run_loop(&self, shutdown: &mut ShutdownListener) {
        loop {
            if shutdown.is_triggered() {
                break;
            }

            let batch = self.queue.drain();
            if batch.is_empty() {
                tokio::select! {
                    _ = sleep(IDLE_WAIT) => {}
                    _ = shutdown.notified() => break,
                }
                continue;
            }

            tracing::info!(target: "processor", total = batch.len(), "processing batch");
            tokio::select! {
                _ = self.handle_batch(batch) => {}
                _ = shutdown.notified() => {
                    tracing::info!(
                        target: "processor",
                        "shutdown requested mid-batch; unfinished submissions stay claimed"
                    );
                    break;
                }
            }
        }
        tracing::info!(target: "processor", "submission processor stopped");
    }

    async fn handle_batch(&self, batch: Vec<Submission>) {
        futures::stream::iter(batch)
            .for_each_concurrent(self.concurrency, |submission| async move {
                if let Err(err) = self.process(&submission).await {
                    tracing::error!(
                        target: "processor",
                        submission = %submission.name,
                        error = %err,
                        "failed to process submission"
                    );
                }
            })
            .await;
    }

    /// Classifies one claimed file and writes its report. The claimed file is
    /// removed once a report exists.
    pub async fn process(&self, submission: &Submission) -> Result<()> {
        let raw = fs::read(&submission.path)
            .await
            .with_context(|| format!("failed to read {}", submission.path.display()))?;

        let outcome = match submission.kind {
            SubmissionKind::Bytes => Ok(ImageInput::Bytes(raw)),
            SubmissionKind::Base64 => String::from_utf8(raw)
                .map(ImageInput::Base64)
                .map_err(|_| "base64 submission is not valid UTF-8 text".to_string()),
        };

        let outcome = match outcome {
            Ok(input) => self
                .orchestrator
                .handle(&input)
                .await
                .map_err(|err| err.to_string()),
            Err(reason) => Err(reason),
        };

        match outcome {
            Ok(result) => {
                let report = ClassificationReport {
                    submission: &submission.name,
                    classified_at: Utc::now(),
                    confidence_level: ConfidenceLevel::from_confidence(result.confidence),
                    result: &result,
                };
                self.write_report(&format!("{}.json", submission.name), &report)
                    .await?;
                tracing::info!(
                    target: "processor",
                    submission = %submission.name,
                    issue_type = ?result.issue_type,
                    elapsed_ms = (Utc::now() - submission.claimed_at).num_milliseconds(),
                    "submission classified"
                );
            }
            Err(error) => {
                tracing::warn!(
                    target: "processor",
                    submission = %submission.name,
                    error = %error,
                    "detection failed"
                );
                let report = FailureReport {
                    submission: &submission.name,
                    failed_at: Utc::now(),
                    error,
                };
                self.write_report(&format!("{}.error.json", submission.name), &report)
                    .await?;
            }
        }

        fs::remove_file(&submission.path)
            .await
            .with_context(|| format!("failed to remove {}", submission.path.display()))?;
        Ok(())
    }

    /// Writes through a hidden temp file so readers never see partial JSON.
    async fn write_report<T: Serialize>(&self, file_name: &str, report: &T) -> Result<()> {
        let body = serde_json::to_vec_pretty(report)?;
        let staging = self.outbox.join(format!(".{file_name}.tmp"));
        let target = self.outbox.join(file_name);
        fs::write(&staging, body)
            .await
            .with_context(|| format!("failed to write {}", staging.display()))?;
        fs::rename(&staging, &target)
            .await
            .with_context(|| format!("failed to publish {}", target.display()))?;
        Ok(())
    }
}
