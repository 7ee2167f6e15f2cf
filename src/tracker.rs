use crate::models::RawRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SourceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SourceStatus::Completed | SourceStatus::Failed)
    }

    /// Legal moves: Pending → Running → {Completed, Failed}. Terminal states
    /// accept terminal corrections but never reopen.
    fn can_become(&self, next: SourceStatus) -> bool {
        match (self, next) {
            (SourceStatus::Pending, SourceStatus::Running) => true,
            (SourceStatus::Running, SourceStatus::Running) => true,
            (SourceStatus::Running, s) if s.is_terminal() => true,
            (s, n) if s.is_terminal() && n.is_terminal() => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceProgress {
    pub name: String,
    pub status: SourceStatus,
    pub percent: u8,
    pub record_count: usize,
    pub detail: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SourceProgress {
    fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: SourceStatus::Pending,
            percent: 0,
            record_count: 0,
            detail: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct RunSession {
    pub is_running: bool,
    pub sources: Vec<SourceProgress>,
    /// `100 * completed_sources / total_sources`, recomputed on every source update.
    pub percent: u8,
    pub completed_sources: usize,
    pub aggregate_records: Vec<RawRecord>,
    pub errors: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
}

impl RunSession {
    fn recompute(&mut self) {
        self.completed_sources = self.sources.iter().filter(|s| s.status.is_terminal()).count();
        self.percent = if self.sources.is_empty() {
            0
        } else {
            (100 * self.completed_sources / self.sources.len()) as u8
        };
        self.last_update = Some(Utc::now());
    }
}

/// One progress update for a source.
#[derive(Debug, Clone)]
pub struct SourceUpdate {
    pub status: SourceStatus,
    pub percent: u8,
    pub record_count: usize,
    pub detail: Option<String>,
    pub error: Option<String>,
}

impl SourceUpdate {
    pub fn running(percent: u8, detail: &str) -> Self {
        Self {
            status: SourceStatus::Running,
            percent,
            record_count: 0,
            detail: Some(detail.to_string()),
            error: None,
        }
    }

    pub fn completed(record_count: usize) -> Self {
        Self {
            status: SourceStatus::Completed,
            percent: 100,
            record_count,
            detail: Some(format!("{} trends", record_count)),
            error: None,
        }
    }

    pub fn failed(error: &str) -> Self {
        Self {
            status: SourceStatus::Failed,
            percent: 100,
            record_count: 0,
            detail: None,
            error: Some(error.to_string()),
        }
    }

    pub fn with_records(mut self, record_count: usize) -> Self {
        self.record_count = record_count;
        self
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ProgressError {
    #[error("No source named '{0}' in the current session")]
    UnknownSource(String),

    #[error("'{0}' matches more than one source")]
    AmbiguousSource(String),

    #[error("Illegal transition for {name}: {from:?} -> {to:?}")]
    IllegalTransition {
        name: String,
        from: SourceStatus,
        to: SourceStatus,
    },
}

/// Single-writer run state shared with the reporting surface.
///
/// Writers go through `initialize`/`update`/`finish`/`record_error`; readers
/// take `snapshot()`, which clones under a short read lock.
#[derive(Default)]
pub struct ProgressTracker {
    running: AtomicBool,
    session: RwLock<RunSession>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> RwLockWriteGuard<'_, RunSession> {
        self.session.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(&self) -> RwLockReadGuard<'_, RunSession> {
        self.session.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the single run slot. Returns false if a run is already active.
    pub fn try_begin(&self) -> bool {
        let claimed = self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if claimed {
            self.write().is_running = true;
        }
        claimed
    }

    /// Release the run slot.
    pub fn end(&self) {
        self.write().is_running = false;
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Reset the session for a new run over `source_names`.
    pub fn initialize(&self, source_names: &[String]) {
        let mut session = self.write();
        *session = RunSession {
            is_running: self.running.load(Ordering::Acquire),
            sources: source_names.iter().map(|n| SourceProgress::pending(n)).collect(),
            started_at: Some(Utc::now()),
            ..RunSession::default()
        };
        session.recompute();
    }

    pub fn update(&self, source_name: &str, update: SourceUpdate) -> Result<(), ProgressError> {
        let mut session = self.write();
        let index = find_source(&session.sources, source_name)?;
        let progress = &mut session.sources[index];

        if !progress.status.can_become(update.status) {
            tracing::warn!(
                source = %progress.name,
                "Ignoring progress update {:?} -> {:?}",
                progress.status,
                update.status
            );
            return Err(ProgressError::IllegalTransition {
                name: progress.name.clone(),
                from: progress.status,
                to: update.status,
            });
        }

        if progress.status.is_terminal() {
            tracing::debug!(source = %progress.name, "Correcting finished source progress");
        }

        let now = Utc::now();
        if update.status == SourceStatus::Running && progress.started_at.is_none() {
            progress.started_at = Some(now);
        }
        if update.status.is_terminal() {
            progress.completed_at = Some(now);
        }
        progress.status = update.status;
        progress.percent = update.percent.min(100);
        progress.record_count = update.record_count;
        progress.detail = update.detail;
        progress.error = update.error;

        session.recompute();
        Ok(())
    }

    pub fn record_error(&self, message: &str) {
        let mut session = self.write();
        session.errors.push(message.to_string());
        session.last_update = Some(Utc::now());
    }

    pub fn finish(&self, records: &[RawRecord]) {
        let mut session = self.write();
        session.aggregate_records = records.to_vec();
        session.last_update = Some(Utc::now());
    }

    /// Owned copy of the current session.
    pub fn snapshot(&self) -> RunSession {
        self.read().clone()
    }
}

/// Exact (case-insensitive) name match first. Falls back to matching the
/// first whitespace-delimited word of configured names, but only when that
/// word identifies a single source.
fn find_source(sources: &[SourceProgress], name: &str) -> Result<usize, ProgressError> {
    let wanted = name.trim();
    if let Some(i) = sources.iter().position(|s| s.name.eq_ignore_ascii_case(wanted)) {
        return Ok(i);
    }

    let first_word = |s: &str| s.split_whitespace().next().unwrap_or("").to_lowercase();
    let key = first_word(wanted);
    if key.is_empty() {
        return Err(ProgressError::UnknownSource(name.to_string()));
    }

    let matches: Vec<usize> = sources
        .iter()
        .enumerate()
        .filter(|(_, s)| first_word(&s.name) == key)
        .map(|(i, _)| i)
        .collect();

    match matches.as_slice() {
        [i] => Ok(*i),
        [] => Err(ProgressError::UnknownSource(name.to_string())),
        _ => Err(ProgressError::AmbiguousSource(name.to_string())),
    }
}
