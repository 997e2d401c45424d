//! Sync orchestration
//!
//! Runs every enabled source in order. Each source gets its own failure
//! boundary: identity resolution, fetch and save either all succeed or the
//! source is reported as failed while the others carry on. Results are
//! recorded in the run state and the metrics registry.

use chrono::{DateTime, Local, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn, Span};

use crate::checkpoint::{OutcomeStatus, RunState, RunStateStore, SourceRecord};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::http_client::ResilientHttpClient;
use crate::metrics;
use crate::schedule::{is_update_window, missed_windows, DailyTrigger};
use crate::sources::{
    BudgetSource, EventbriteSource, LinkedInSource, MediumSource, ScholarSource, SkippedItem,
    Source, YouTubeSource,
};
use crate::storage::Sink;

/// Result of one source within a run
#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    /// Every item was normalized and the tables were replaced
    Complete { rows_written: usize, items: usize },
    /// Tables were replaced but some items were skipped
    Partial {
        rows_written: usize,
        items: usize,
        skipped: Vec<SkippedItem>,
    },
    /// The primary table was not replaced. Auxiliary tables saved before the
    /// failing write keep their new contents.
    Failed { error: String },
}

impl SourceOutcome {
    pub fn status(&self) -> OutcomeStatus {
        match self {
            Self::Complete { .. } => OutcomeStatus::Complete,
            Self::Partial { .. } => OutcomeStatus::Partial,
            Self::Failed { .. } => OutcomeStatus::Failed,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn rows_written(&self) -> usize {
        match self {
            Self::Complete { rows_written, .. } | Self::Partial { rows_written, .. } => *rows_written,
            Self::Failed { .. } => 0,
        }
    }

    fn skipped_count(&self) -> usize {
        match self {
            Self::Partial { skipped, .. } => skipped.len(),
            _ => 0,
        }
    }
}

/// Per-source results of one run, in run order
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub outcomes: Vec<(String, SourceOutcome)>,
}

impl RunReport {
    pub fn outcome(&self, source_id: &str) -> Option<&SourceOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == source_id)
            .map(|(_, outcome)| outcome)
    }

    pub fn failed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.is_failed())
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|(_, o)| !o.is_failed())
    }
}

/// Builds the enabled sources in `ENABLED_SOURCES` order.
pub fn build_sources(config: &Config, http_client: &Arc<ResilientHttpClient>) -> Result<Vec<Arc<dyn Source>>> {
    let mut sources: Vec<Arc<dyn Source>> = Vec::new();
    for id in config.enabled_sources()? {
        let source: Arc<dyn Source> = match id.as_str() {
            "budget" => Arc::new(BudgetSource::new(config)),
            "linkedin" => Arc::new(LinkedInSource::new(http_client.clone(), config)?),
            "eventbrite" => Arc::new(EventbriteSource::new(http_client.clone(), config)?),
            "scholar" => Arc::new(ScholarSource::new(http_client.clone(), config)?),
            "youtube" => Arc::new(YouTubeSource::new(http_client.clone(), config)?),
            "medium" => Arc::new(MediumSource::new(http_client.clone(), config)?),
            other => {
                return Err(SyncError::InvalidConfig {
                    key: "ENABLED_SOURCES".to_string(),
                    message: format!("unknown source '{other}'"),
                })
            }
        };
        info!(source = %id, table = %source.metadata().table, "Source initialized");
        sources.push(source);
    }
    Ok(sources)
}

/// Coordinates sources, the sink and the run state
pub struct Harvester {
    config: Config,
    sink: Arc<dyn Sink>,
    sources: Vec<Arc<dyn Source>>,
    state: Mutex<RunStateStore>,
}

impl Harvester {
    /// Creates a harvester with every enabled source.
    pub async fn new(config: Config, sink: Arc<dyn Sink>, http_client: Arc<ResilientHttpClient>) -> Result<Self> {
        let sources = build_sources(&config, &http_client)?;
        Self::with_sources(config, sink, sources).await
    }

    /// Creates a harvester over an explicit source list.
    pub async fn with_sources(config: Config, sink: Arc<dyn Sink>, sources: Vec<Arc<dyn Source>>) -> Result<Self> {
        let state = RunStateStore::open(&config.state_file).await?;
        info!(sink = %sink.describe(), sources = sources.len(), "Harvester ready");
        Ok(Self {
            config,
            sink,
            sources,
            state: Mutex::new(state),
        })
    }

    pub fn source_ids(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.id()).collect()
    }

    /// Snapshot of the persisted run state
    pub async fn run_state(&self) -> RunState {
        self.state.lock().await.state().clone()
    }

    /// Syncs every enabled source once.
    #[instrument(skip(self), fields(run_id = tracing::field::Empty))]
    pub async fn run_once(&self) -> RunReport {
        let run_id = uuid::Uuid::new_v4().to_string();
        Span::current().record("run_id", run_id.as_str());
        let started_at = Utc::now();
        info!(sources = self.sources.len(), "Starting sync run");

        let mut outcomes = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let outcome = self.sync_source(source.clone()).await;
            outcomes.push((source.id().to_string(), outcome));
        }

        let report = RunReport {
            run_id,
            started_at,
            outcomes,
        };
        self.finish_run(&report).await;

        let failed = report.failed();
        if failed.is_empty() {
            info!(sources = report.outcomes.len(), "Sync run finished");
        } else {
            warn!(failed = ?failed, "Sync run finished with failed sources");
        }
        report
    }

    /// Syncs a single source by id.
    #[instrument(skip(self))]
    pub async fn run_source(&self, source_id: &str) -> Result<SourceOutcome> {
        let source = self
            .sources
            .iter()
            .find(|s| s.id() == source_id)
            .cloned()
            .ok_or_else(|| SyncError::SourceNotConfigured(format!("{source_id} is not enabled")))?;

        let report = RunReport {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            outcomes: vec![(source_id.to_string(), self.sync_source(source).await)],
        };
        self.finish_run(&report).await;

        let (_, outcome) = report
            .outcomes
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::SourceNotConfigured(source_id.to_string()))?;
        Ok(outcome)
    }

    /// Runs once at startup, then syncs daily at the configured time while
    /// the date is in an update window, until `shutdown` fires.
    #[instrument(skip(self, shutdown))]
    pub async fn run_continuous(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let months = self.config.update_months()?;
        let at = self.config.update_time()?;
        let poll = self.config.poll_interval()?;

        self.report_missed_windows(&months, at).await;

        info!("Running startup sync");
        self.run_once().await;

        let mut trigger = DailyTrigger::new(at, Local::now().naive_local());
        let mut ticker = interval(poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(
            update_time = %at,
            months = ?months,
            next_check = %trigger.next_fire(Local::now().naive_local()),
            "Waiting for the next update window"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown requested, leaving scheduler loop");
                    break;
                }
                _ = ticker.tick() => {
                    let now = Local::now().naive_local();
                    if !trigger.poll(now) {
                        continue;
                    }
                    if is_update_window(now.date(), &months) {
                        info!(date = %now.date(), "Update window open, starting scheduled sync");
                        self.run_once().await;
                    } else {
                        debug!(date = %now.date(), "Outside update window, skipping");
                    }
                }
            }
        }

        Ok(())
    }

    async fn report_missed_windows(&self, months: &[u32], at: chrono::NaiveTime) {
        let last_run = self.state.lock().await.state().last_run_at;
        let Some(last_run) = last_run else {
            return;
        };
        let last_local = last_run.with_timezone(&Local).naive_local();
        for window in missed_windows(last_local, Local::now().naive_local(), months, at) {
            warn!(%window, last_run = %last_run, "Update window passed without a sync; not catching up");
        }
    }

    /// Resolve, fetch and save one source. Errors and panics both end up as
    /// `Failed`.
    async fn sync_source(&self, source: Arc<dyn Source>) -> SourceOutcome {
        let source_id = source.id().to_string();
        let table = source.metadata().table.clone();
        let start = Instant::now();
        info!(source = %source_id, table = %table, "Syncing source");

        let sink = self.sink.clone();
        let task = tokio::spawn(async move {
            let fetched = source.fetch(sink.as_ref()).await?;
            let rows = source.save(sink.as_ref(), &fetched).await?;
            Ok::<_, SyncError>((fetched, rows))
        });

        let outcome = match task.await {
            Ok(Ok((fetched, rows_written))) => {
                metrics::record_rows_written(&table, rows_written);
                if fetched.is_partial() {
                    metrics::record_items_skipped(&source_id, fetched.skipped.len());
                    SourceOutcome::Partial {
                        rows_written,
                        items: fetched.items,
                        skipped: fetched.skipped,
                    }
                } else {
                    SourceOutcome::Complete {
                        rows_written,
                        items: fetched.items,
                    }
                }
            }
            Ok(Err(e)) => {
                error!(source = %source_id, error = %e, "Source sync failed");
                SourceOutcome::Failed { error: e.to_string() }
            }
            Err(e) => {
                error!(source = %source_id, error = %e, "Source task aborted");
                SourceOutcome::Failed {
                    error: format!("task aborted: {e}"),
                }
            }
        };

        let elapsed = start.elapsed().as_secs_f64();
        metrics::record_source_run(&source_id, outcome.status().as_str(), elapsed);
        info!(
            source = %source_id,
            outcome = outcome.status().as_str(),
            rows = outcome.rows_written(),
            skipped = outcome.skipped_count(),
            elapsed_secs = elapsed,
            "Source finished"
        );
        outcome
    }

    /// Persists the run state and exports metrics. Failures here are logged
    /// and never fail the run.
    async fn finish_run(&self, report: &RunReport) {
        let finished_at = Utc::now();
        {
            let mut store = self.state.lock().await;
            let state = store.state_mut();
            state.last_run_at = Some(report.started_at);
            state.last_run_id = Some(report.run_id.clone());
            for (source_id, outcome) in &report.outcomes {
                state.record(SourceRecord {
                    source_id: source_id.clone(),
                    status: outcome.status(),
                    finished_at,
                    rows_written: outcome.rows_written(),
                    skipped: outcome.skipped_count(),
                    last_error: match outcome {
                        SourceOutcome::Failed { error } => Some(error.clone()),
                        _ => None,
                    },
                    last_success_at: (!outcome.is_failed()).then_some(finished_at),
                });
            }
            if let Err(e) = store.save().await {
                error!(path = %store.path().display(), error = %e, "Failed to save run state");
            }
        }

        metrics::record_run_finished(finished_at.timestamp());
        if let Some(path) = &self.config.metrics_textfile {
            if let Err(e) = metrics::write_textfile(path).await {
                warn!(path = %path.display(), error = %e, "Failed to write metrics textfile");
            }
        }
    }
}
