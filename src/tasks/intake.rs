use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::{fs, task::JoinHandle, time::sleep};

use crate::{
    domain::{Submission, SubmissionKind},
    infrastructure::{directories::ResolvedPaths, shutdown::ShutdownListener},
    tasks::queue::SubmissionQueue,
};

/// Claims files dropped into the inbox by moving them to `processing/`.
///
/// Writers should create files under a dot-prefixed name and rename them
/// when complete; hidden files are never claimed.
#[derive(Debug, Clone)]
pub struct InboxScanner {
    inbox: PathBuf,
    processing: PathBuf,
}

impl InboxScanner {
    pub fn new(paths: &ResolvedPaths) -> Self {
        Self {
            inbox: paths.inbox_dir.clone(),
            processing: paths.processing_dir.clone(),
        }
    }

    /// Puts back anything a previous run claimed but never finished.
    pub async fn recover_stale(&self) -> Result<usize> {
        let stale = list_files(&self.processing).await?;
        for name in &stale {
            fs::rename(self.processing.join(name), self.inbox.join(name))
                .await
                .with_context(|| format!("failed to requeue {name}"))?;
        }
        if !stale.is_empty() {
            tracing::info!(target: "intake", count = stale.len(), "requeued unfinished submissions");
        }
        Ok(stale.len())
    }

    pub async fn claim_pending(&self) -> Result<Vec<Submission>> {
        let mut claimed = Vec::new();
        for name in list_files(&self.inbox).await? {
            let path = self.processing.join(&name);
            match fs::rename(self.inbox.join(&name), &path).await {
                Ok(()) => claimed.push(Submission {
                    kind: SubmissionKind::from_file_name(&name),
                    name,
                    path,
                    claimed_at: Utc::now(),
                }),
                Err(err) => {
                    tracing::warn!(target: "intake", file = %name, error = %err, "failed to claim submission");
                }
            }
        }
        Ok(claimed)
    }

    pub fn spawn(
        self,
        queue: Arc<SubmissionQueue<Submission>>,
        poll_interval: Duration,
        mut shutdown: ShutdownListener,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if shutdown.is_triggered() {
                    break;
                }
                match self.claim_pending().await {
                    Ok(claimed) if !claimed.is_empty() => {
                        tracing::info!(target: "intake", count = claimed.len(), "claimed submissions");
                        queue.extend(claimed);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::error!(target: "intake", error = %err, "inbox scan failed");
                    }
                }
                tokio::select! {
                    _ = sleep(poll_interval) => {}
                    _ = shutdown.notified() => break,
                }
            }
            tracing::info!(target: "intake", "intake stopped");
        })
    }
}

/// Regular, non-hidden files in `dir`, sorted by name.
async fn list_files(dir: &Path) -> Result<Vec<String>> {
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read {}", dir.display()))?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            tracing::warn!(target: "intake", path = %entry.path().display(), "skipping non UTF-8 file name");
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}
