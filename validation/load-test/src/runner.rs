//! Load test orchestration.

use crate::client::{Outcome, TileClient};
use crate::config::TestConfig;
use crate::error::ConfigError;
use crate::generator::TileGenerator;
use crate::metrics::{MetricsCollector, TestResults};
use crate::worker::{RequestBudget, Worker};
use indicatif::ProgressBar;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Log a progress line every this many outcomes.
const PROGRESS_EVERY: u64 = 1000;

/// Where a [`LoadRunner`] is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Configuring,
    Armed,
    Running,
    Draining,
    Done,
}

/// Runs one load test: spawns the workers, drains their outcomes into the
/// metrics collector and stops on deadline, cancellation, or when every
/// worker has exited.
pub struct LoadRunner {
    config: TestConfig,
    client: TileClient,
    duration_limit: Option<Duration>,
    master_seed: u64,
    progress: ProgressBar,
    phase: RunPhase,
}

impl LoadRunner {
    /// Validate the configuration and prepare the HTTP client.
    ///
    /// Nothing is spawned yet; an invalid config fails here.
    pub fn new(config: TestConfig) -> Result<Self, ConfigError> {
        debug!(phase = ?RunPhase::Configuring, "Validating configuration");
        config.validate()?;

        let duration_limit = config.duration_limit()?;
        let client = TileClient::new(&config)?;
        let master_seed = config.seed.unwrap_or_else(rand::random);

        Ok(Self {
            config,
            client,
            duration_limit,
            master_seed,
            progress: ProgressBar::hidden(),
            phase: RunPhase::Armed,
        })
    }

    /// Report each ingested outcome on `progress`.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    /// Seed every worker generator derives from. Set it in the config to
    /// replay a run.
    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Run the load test with no external cancellation.
    pub async fn run(&mut self) -> anyhow::Result<TestResults> {
        self.run_with_cancel(CancellationToken::new()).await
    }

    /// Run the load test until the deadline, `cancel` firing, or all workers
    /// finishing.
    pub async fn run_with_cancel(&mut self, cancel: CancellationToken) -> anyhow::Result<TestResults> {
        if self.phase != RunPhase::Armed {
            anyhow::bail!("load runner already used (phase {:?})", self.phase);
        }
        self.set_phase(RunPhase::Running);

        info!(
            name = %self.config.name,
            environment = %self.config.environment,
            url_template = %self.config.url_template,
            pattern = %self.config.pattern,
            threads = self.config.threads,
            duration = ?self.duration_limit,
            requests = ?self.config.requests,
            seed = self.master_seed,
            "Starting load test"
        );
        if self.duration_limit.is_none() && self.config.requests.is_none() {
            info!("No duration or request limit set; running until cancelled");
        }

        let (tx, mut rx) = mpsc::channel(self.config.channel_capacity());
        let budget = self.config.requests.map(|n| Arc::new(RequestBudget::new(n)));

        let mut workers = JoinSet::new();
        for id in 0..self.config.threads {
            let worker = Worker::new(
                id,
                self.client.clone(),
                TileGenerator::for_worker(&self.config, id, self.master_seed),
                tx.clone(),
                cancel.clone(),
                budget.clone(),
            );
            workers.spawn(worker.run());
        }
        // Channel closes once the last worker drops its sender
        drop(tx);

        let mut metrics = MetricsCollector::new();
        metrics.start();

        let limit = self.duration_limit;
        let deadline = async move {
            match limit {
                Some(limit) => sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Run cancelled, stopping workers");
                    break;
                }
                _ = &mut deadline => {
                    info!("Test duration reached, stopping workers");
                    cancel.cancel();
                    break;
                }
                received = rx.recv() => match received {
                    Some(outcome) => {
                        metrics.ingest(outcome);
                        self.progress.inc(1);
                        if metrics.total_requests() % PROGRESS_EVERY == 0 {
                            info!(
                                processed = metrics.total_requests(),
                                failed = metrics.failed_requests(),
                                "Processed requests"
                            );
                        }
                    }
                    None => {
                        info!("All workers finished");
                        break;
                    }
                },
            }
        }

        self.set_phase(RunPhase::Draining);

        let late = drain_buffered(&mut rx, &mut metrics);
        if late > 0 {
            debug!(late, "Ingested buffered outcomes after stop");
        }
        metrics.finalize();

        cancel.cancel();
        drop(rx);
        workers.shutdown().await;
        self.progress.finish_and_clear();

        self.set_phase(RunPhase::Done);

        let results = metrics.results(self.config.threads)?;
        info!(
            total = results.total_requests,
            failed = results.failed_requests,
            duration_secs = results.duration_secs,
            "Load test complete"
        );
        Ok(results)
    }

    fn set_phase(&mut self, phase: RunPhase) {
        debug!(from = ?self.phase, to = ?phase, "Run phase");
        self.phase = phase;
    }
}

/// One non-blocking pass over outcomes already sitting in the channel.
/// Returns how many were ingested.
fn drain_buffered(rx: &mut mpsc::Receiver<Outcome>, metrics: &mut MetricsCollector) -> u64 {
    let mut drained = 0u64;
    while let Ok(outcome) = rx.try_recv() {
        metrics.ingest(outcome);
        drained += 1;
    }
    drained
}
