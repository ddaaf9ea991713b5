use std::{sync::Arc, time::Duration};

use anyhow::Result;
use futures::FutureExt;
use reqwest::Client;
use tokio::{task::JoinHandle, time::timeout};
use tokio_cron_scheduler::JobScheduler;

use crate::{
    cache::ResultCache,
    classifier::{Classifier, LabelMapping},
    config::AppConfig,
    detector::{Detector, DetectorProvider},
    domain::Submission,
    infrastructure::{directories::ResolvedPaths, shutdown::Shutdown},
    orchestrator::Orchestrator,
    tasks::{
        intake::InboxScanner,
        processor::SubmissionProcessor,
        queue::SubmissionQueue,
        scheduler::{configure_stats_job, StatsCallback},
    },
};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ClassifierApp {
    paths: ResolvedPaths,
    scheduler: JobScheduler,
    intake_handle: JoinHandle<()>,
    processor_handle: JoinHandle<()>,
    shutdown: Shutdown,
}

impl ClassifierApp {
    pub async fn initialize(config: AppConfig, paths: ResolvedPaths, shutdown: Shutdown) -> Result<Self> {
        let config = Arc::new(config);

        let http_client = Client::builder()
            .user_agent(format!("civic-classifier/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        let detector = Arc::new(DetectorProvider::from_config(http_client, &config.detector)?);
        tracing::info!(
            target: "lifecycle",
            detector = detector.name(),
            workers = detector.workers(),
            threshold = config.detector.confidence_threshold,
            "detector ready"
        );

        let mapping = LabelMapping::builtin().with_overrides(&config.label_overrides);
        tracing::info!(target: "lifecycle", labels = mapping.len(), "label mapping loaded");
        let classifier = Arc::new(Classifier::new(mapping));

        let cache = Arc::new(ResultCache::connect(&config.cache).await);
        if cache.is_enabled() && config.cache.clear_on_start {
            cache.clear().await;
        }

        let orchestrator = Arc::new(Orchestrator::new(
            detector,
            classifier,
            cache.clone(),
            config.detector.timeout,
        ));

        let queue = Arc::new(SubmissionQueue::<Submission>::new());
        let scanner = InboxScanner::new(&paths);
        scanner.recover_stale().await?;
        let intake_handle = scanner.spawn(
            queue.clone(),
            config.intake.poll_interval,
            shutdown.subscribe(),
        );

        let processor = Arc::new(SubmissionProcessor::new(
            queue.clone(),
            orchestrator,
            paths.outbox_dir.clone(),
            config.intake.concurrency,
        ));
        let processor_handle = processor.spawn(shutdown.subscribe());

        let scheduler = configure_stats_job(
            &config.scheduler.stats_cron,
            build_stats_callback(cache, queue),
        )
        .await?;

        Ok(Self {
            paths,
            scheduler,
            intake_handle,
            processor_handle,
            shutdown,
        })
    }

    pub async fn run(self) -> Result<()> {
        let ClassifierApp {
            paths,
            mut scheduler,
            intake_handle,
            processor_handle,
            shutdown,
        } = self;

        tracing::info!(
            target: "lifecycle",
            inbox = %paths.inbox_dir.display(),
            outbox = %paths.outbox_dir.display(),
            "civic issue classifier started"
        );

        shutdown.subscribe().notified().await;
        tracing::info!(target: "lifecycle", "shutdown signal received (CTRL+C / SIGTERM)");
        shutdown.trigger();

        match timeout(SHUTDOWN_TIMEOUT, scheduler.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::error!(target: "scheduler", ?err, "scheduler shutdown failed");
            }
            Err(_) => {
                tracing::warn!(
                    target: "scheduler",
                    "scheduler did not stop within {:?}",
                    SHUTDOWN_TIMEOUT
                );
            }
        }

        stop_task("intake", intake_handle).await;
        stop_task("processor", processor_handle).await;

        tracing::info!(target: "lifecycle", "classifier stopped");
        Ok(())
    }
}

async fn stop_task(name: &'static str, mut handle: JoinHandle<()>) {
    let wait = tokio::time::sleep(SHUTDOWN_TIMEOUT);
    tokio::pin!(wait);
    tokio::select! {
        res = &mut handle => {
            if let Err(err) = res {
                if err.is_panic() {
                    tracing::error!(target: "lifecycle", task = name, "task ended with a panic");
                }
            }
        }
        _ = &mut wait => {
            tracing::warn!(
                target: "lifecycle",
                task = name,
                "task did not stop within {:?}; aborting",
                SHUTDOWN_TIMEOUT
            );
            handle.abort();
        }
    }
}

fn build_stats_callback(
    cache: Arc<ResultCache>,
    queue: Arc<SubmissionQueue<Submission>>,
) -> StatsCallback {
    Arc::new(move || {
        let cache = cache.clone();
        let queue = queue.clone();
        async move {
            let stats = cache.stats().await;
            tracing::info!(
                target: "scheduler",
                cache_enabled = stats.enabled,
                cache_connected = stats.connected,
                cached_results = stats.total_keys,
                hits = stats.hit_count,
                misses = stats.miss_count,
                hit_rate = stats.hit_rate,
                queued = queue.snapshot().pending,
                "classifier stats"
            );
        }
        .boxed()
    })
}
