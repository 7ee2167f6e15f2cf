use crate::cascade::ExtractionCascade;
use crate::clock::{Sleeper, TokioSleeper};
use crate::database::TrendStore;
use crate::enrichment::{annotation_for, TrendAnalyzer};
use crate::error::{PipelineError, Result};
use crate::models::RawRecord;
use crate::scraper_trait::ScraperRegistry;
use crate::source::{filter_sources, SourceDescriptor};
use crate::tracker::{ProgressTracker, SourceProgress, SourceStatus, SourceUpdate};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Bounds of the randomized pause between two sources.
#[derive(Debug, Clone, Copy)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    fn pick(&self) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

impl Default for DelayRange {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(30))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub sources: Vec<SourceProgress>,
    pub total_records: usize,
    pub persisted: usize,
    pub persistence_failures: usize,
    pub summary: String,
    pub errors: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn count(&self, status: SourceStatus) -> usize {
        self.sources.iter().filter(|s| s.status == status).count()
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub records: Vec<RawRecord>,
    pub report: RunReport,
}

#[derive(Default)]
struct PersistStats {
    persisted: usize,
    failures: usize,
}

/// Releases the run slot even if the run unwinds.
struct RunSlot<'a>(&'a ProgressTracker);

impl Drop for RunSlot<'_> {
    fn drop(&mut self) {
        self.0.end();
    }
}

/// Drives one run over the configured sources, strictly one source at a time.
pub struct ScrapeOrchestrator {
    tracker: Arc<ProgressTracker>,
    registry: ScraperRegistry,
    cascade: ExtractionCascade,
    analyzer: Arc<dyn TrendAnalyzer>,
    store: Arc<dyn TrendStore>,
    sleeper: Arc<dyn Sleeper>,
    delay: DelayRange,
}

impl ScrapeOrchestrator {
    pub fn new(
        tracker: Arc<ProgressTracker>,
        registry: ScraperRegistry,
        cascade: ExtractionCascade,
        analyzer: Arc<dyn TrendAnalyzer>,
        store: Arc<dyn TrendStore>,
    ) -> Self {
        Self {
            tracker,
            registry,
            cascade,
            analyzer,
            store,
            sleeper: Arc::new(TokioSleeper),
            delay: DelayRange::default(),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_delay(mut self, delay: DelayRange) -> Self {
        self.delay = delay;
        self
    }

    /// Run every selected source once.
    ///
    /// Per-source failures are recorded in the session and never abort the
    /// run. Only a concurrent run (`AlreadyRunning`) or a failing cleanup
    /// step reach the caller.
    pub async fn run_all(
        &self,
        sources: &[Arc<SourceDescriptor>],
        platform_filter: &[String],
    ) -> Result<RunOutcome> {
        if !self.tracker.try_begin() {
            tracing::warn!("Rejecting run request: a run is already in progress");
            return Err(PipelineError::AlreadyRunning);
        }
        let slot = RunSlot(&self.tracker);

        // cleanup must run even if a source or the summary panics
        let collected = AssertUnwindSafe(self.collect(sources, platform_filter))
            .catch_unwind()
            .await;
        let cleanup = self.registry.cleanup_all().await;
        drop(slot);

        let (records, stats, summary) = match collected {
            Ok(collected) => collected,
            Err(panic) => {
                if let Err(e) = cleanup {
                    tracing::error!("Cleanup after aborted run failed: {}", e);
                }
                std::panic::resume_unwind(panic);
            }
        };
        cleanup.map_err(|e| match e {
            PipelineError::Cleanup(_) => e,
            other => PipelineError::Cleanup(other.to_string()),
        })?;

        let session = self.tracker.snapshot();
        let report = RunReport {
            sources: session.sources,
            total_records: records.len(),
            persisted: stats.persisted,
            persistence_failures: stats.failures,
            summary,
            errors: session.errors,
            started_at: session.started_at,
            finished_at: Utc::now(),
        };
        tracing::info!(
            records = report.total_records,
            persisted = report.persisted,
            errors = report.errors.len(),
            "Run finished"
        );

        Ok(RunOutcome { records, report })
    }

    /// Visit every selected source, then build the summary.
    async fn collect(
        &self,
        sources: &[Arc<SourceDescriptor>],
        platform_filter: &[String],
    ) -> (Vec<RawRecord>, PersistStats, String) {
        let selected = filter_sources(sources, platform_filter);
        let names: Vec<String> = selected.iter().map(|s| s.name.clone()).collect();
        self.tracker.initialize(&names);
        tracing::info!("Starting run over {} source(s): {:?}", names.len(), names);

        let mut records = Vec::new();
        let mut stats = PersistStats::default();

        for (index, source) in selected.iter().enumerate() {
            match self.process_source(source, &mut stats).await {
                Ok(found) => {
                    tracing::info!(source = %source.name, records = found.len(), "Source completed");
                    self.progress(&source.name, SourceUpdate::completed(found.len()));
                    records.extend(found);
                }
                Err(e) => {
                    let message = format!("{}: {}", source.name, e);
                    if e.is_soft() {
                        tracing::warn!("{}", message);
                    } else {
                        tracing::error!("{}", message);
                    }
                    self.tracker.record_error(&message);
                    self.progress(&source.name, SourceUpdate::failed(&message));
                }
            }

            if index + 1 < selected.len() {
                self.pause_after(source).await;
            }
        }

        self.tracker.finish(&records);
        let summary = self.summarize(&records, names.len()).await;
        (records, stats, summary)
    }

    async fn process_source(
        &self,
        source: &SourceDescriptor,
        stats: &mut PersistStats,
    ) -> Result<Vec<RawRecord>> {
        self.progress(&source.name, SourceUpdate::running(10, "fetching"));
        let scraper = self.registry.get(source.access)?;
        let content = scraper.fetch(source).await?;

        self.progress(&source.name, SourceUpdate::running(40, "extracting"));
        let mut records = self.cascade.primary(&content, source);

        // hosted-job datasets have no document left to re-parse
        let primary_min = self.cascade.config().primary_min.max(1);
        if records.len() < primary_min && content.is_document() && !content.is_empty() {
            tracing::info!(
                source = %source.name,
                found = records.len(),
                primary_min,
                "Structured extraction below threshold, running cascade"
            );
            let outcome = self.cascade.run(&content, source).await;
            for (strategy, added) in &outcome.contributions {
                tracing::debug!(source = %source.name, strategy = strategy.name(), added, "Cascade contribution");
            }
            records = outcome.records;
        }

        self.progress(
            &source.name,
            SourceUpdate::running(60, "enriching").with_records(records.len()),
        );
        let annotations = if records.is_empty() {
            HashMap::new()
        } else {
            match self.analyzer.analyze_trends(&records).await {
                Ok(annotations) => annotations,
                Err(e) => {
                    tracing::warn!(source = %source.name, "Enrichment failed, using neutral annotations: {}", e);
                    HashMap::new()
                }
            }
        };

        self.progress(
            &source.name,
            SourceUpdate::running(80, "persisting").with_records(records.len()),
        );
        for record in &records {
            let annotation = annotation_for(&annotations, record);
            match self.store.create(record, &annotation) {
                Ok(id) => {
                    tracing::trace!(source = %source.name, tag = %record.tag, %id, "Stored trend");
                    stats.persisted += 1;
                }
                Err(e) => {
                    tracing::error!(source = %source.name, tag = %record.tag, "Failed to store trend: {}", e);
                    stats.failures += 1;
                }
            }
        }

        Ok(records)
    }

    /// Random pause, never shorter than the source's rate-limit spacing.
    async fn pause_after(&self, source: &SourceDescriptor) {
        let delay = self.delay.pick().max(source.rate_limit.min_interval());
        tracing::debug!(source = %source.name, "Waiting {:?} before the next source", delay);
        self.sleeper.sleep(delay).await;
    }

    async fn summarize(&self, records: &[RawRecord], source_count: usize) -> String {
        match self.analyzer.summarize(records).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!("Summary generation failed: {}", e);
                format!(
                    "Summary unavailable: collected {} trend(s) from {} source(s)",
                    records.len(),
                    source_count
                )
            }
        }
    }

    fn progress(&self, source: &str, update: SourceUpdate) {
        if let Err(e) = self.tracker.update(source, update) {
            tracing::warn!("Progress update rejected: {}", e);
        }
    }
}
