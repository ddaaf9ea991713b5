use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use tokio_cron_scheduler::{Job, JobScheduler};

pub type StatsCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub async fn configure_stats_job(cron_spec: &str, callback: StatsCallback) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;
    let label = cron_spec.to_string();
    let job = Job::new_async(cron_spec, move |_id, _l| {
        let cb = callback.clone();
        let cron_label = label.clone();
        Box::pin(async move {
            tracing::debug!(target: "scheduler", cron = %cron_label, "stats job triggered");
            cb().await;
        })
    })?;
    scheduler.add(job).await?;
    tracing::info!(target: "scheduler", cron = %cron_spec, "stats job registered");
    scheduler.start().await?;
    Ok(scheduler)
}
