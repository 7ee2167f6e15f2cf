//! In-memory collaborators for unit tests.

use crate::clock::Sleeper;
use crate::database::TrendStore;
use crate::enrichment::{SuggestedTrend, TrendAnalyzer};
use crate::error::{PipelineError, Result};
use crate::job_client::{JobApi, JobStatus, RunState};
use crate::models::{join_key, Annotation, RawContent, RawRecord};
use crate::scraper_trait::SourceScraper;
use crate::scrapers::browser::{Browser, BrowserSession};
use crate::source::{AccessMethod, SourceDescriptor};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Records requested sleeps without waiting.
#[derive(Default)]
pub struct InstantSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl InstantSleeper {
    pub fn total(&self) -> Duration {
        self.slept.lock().unwrap().iter().sum()
    }

    pub fn calls(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for InstantSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

struct Script {
    statuses: Vec<std::result::Result<JobStatus, String>>,
    cursor: usize,
    items: Vec<Value>,
}

impl Script {
    fn new(statuses: Vec<std::result::Result<JobStatus, String>>) -> Self {
        Self {
            statuses,
            cursor: 0,
            items: Vec::new(),
        }
    }

    /// Entries are consumed in order; the last one repeats.
    fn next(&mut self) -> std::result::Result<JobStatus, String> {
        if self.statuses.is_empty() {
            return Ok(JobStatus::Running);
        }
        let index = self.cursor.min(self.statuses.len() - 1);
        self.cursor += 1;
        self.statuses[index].clone()
    }
}

const DEFAULT_SCRIPT: &str = "";

/// Hosted-job API that replays scripted statuses per actor.
pub struct ScriptedJobApi {
    scripts: Mutex<HashMap<String, Script>>,
    polls: AtomicUsize,
    runs: AtomicUsize,
    fail_submission: bool,
}

impl ScriptedJobApi {
    pub fn new(statuses: Vec<std::result::Result<JobStatus, String>>) -> Self {
        let mut scripts = HashMap::new();
        scripts.insert(DEFAULT_SCRIPT.to_string(), Script::new(statuses));
        Self {
            scripts: Mutex::new(scripts),
            polls: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
            fail_submission: false,
        }
    }

    pub fn with_items(self, items: Vec<Value>) -> Self {
        if let Some(script) = self.scripts.lock().unwrap().get_mut(DEFAULT_SCRIPT) {
            script.items = items;
        }
        self
    }

    /// Script a specific actor instead of the default sequence.
    pub fn with_actor(
        self,
        actor: &str,
        statuses: Vec<std::result::Result<JobStatus, String>>,
        items: Vec<Value>,
    ) -> Self {
        let mut script = Script::new(statuses);
        script.items = items;
        self.scripts.lock().unwrap().insert(actor.to_string(), script);
        self
    }

    pub fn failing_submission(mut self) -> Self {
        self.fail_submission = true;
        self
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    fn script_key(&self, actor: &str) -> String {
        let scripts = self.scripts.lock().unwrap();
        if scripts.contains_key(actor) {
            actor.to_string()
        } else {
            DEFAULT_SCRIPT.to_string()
        }
    }
}

#[async_trait]
impl JobApi for ScriptedJobApi {
    async fn start_run(&self, actor: &str, _input: &Value) -> Result<RunState> {
        if self.fail_submission {
            return Err(PipelineError::Submission {
                actor: actor.to_string(),
                message: "quota exceeded".to_string(),
            });
        }
        let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        let key = self.script_key(actor);
        Ok(RunState {
            run_id: format!("run-{}", n),
            status: JobStatus::Submitted,
            dataset_ref: Some(format!("ds-{}", if key.is_empty() { "1" } else { key.as_str() })),
        })
    }

    async fn run_status(&self, actor: &str, run_id: &str) -> Result<RunState> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let key = self.script_key(actor);
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&key)
            .map(Script::next)
            .unwrap_or(Ok(JobStatus::Running));

        let status = next.map_err(PipelineError::Fetch)?;
        Ok(RunState {
            run_id: run_id.to_string(),
            status,
            dataset_ref: None,
        })
    }

    async fn dataset_items(&self, dataset_ref: &str) -> Result<Vec<Value>> {
        let key = dataset_ref.trim_start_matches("ds-");
        let scripts = self.scripts.lock().unwrap();
        let script = scripts
            .get(key)
            .or_else(|| scripts.get(DEFAULT_SCRIPT))
            .ok_or_else(|| PipelineError::Fetch(format!("unknown dataset {}", dataset_ref)))?;
        Ok(script.items.clone())
    }
}

/// Analyzer with canned answers and call counters.
#[derive(Default)]
pub struct RecordingAnalyzer {
    suggestions: Vec<SuggestedTrend>,
    annotations: HashMap<String, Annotation>,
    failing: bool,
    failing_summary: bool,
    extract_calls: AtomicUsize,
    analyze_calls: AtomicUsize,
    snippets: Mutex<Vec<String>>,
}

impl RecordingAnalyzer {
    pub fn with_suggestions(mut self, suggestions: Vec<(&str, f32)>) -> Self {
        self.suggestions = suggestions
            .into_iter()
            .map(|(tag, confidence)| SuggestedTrend {
                tag: tag.to_string(),
                confidence,
                popularity: None,
            })
            .collect();
        self
    }

    pub fn with_annotation(mut self, tag: &str, platform: &str, annotation: Annotation) -> Self {
        self.annotations.insert(join_key(tag, platform), annotation);
        self
    }

    /// Every call fails.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self.failing_summary = true;
        self
    }

    pub fn failing_summary(mut self) -> Self {
        self.failing_summary = true;
        self
    }

    pub fn extract_calls(&self) -> usize {
        self.extract_calls.load(Ordering::SeqCst)
    }

    pub fn analyze_calls(&self) -> usize {
        self.analyze_calls.load(Ordering::SeqCst)
    }

    pub fn snippets(&self) -> Vec<String> {
        self.snippets.lock().unwrap().clone()
    }
}

#[async_trait]
impl TrendAnalyzer for RecordingAnalyzer {
    async fn analyze_trends(&self, _records: &[RawRecord]) -> Result<HashMap<String, Annotation>> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(PipelineError::Enrichment("analyzer unavailable".to_string()));
        }
        Ok(self.annotations.clone())
    }

    async fn summarize(&self, records: &[RawRecord]) -> Result<String> {
        if self.failing_summary {
            return Err(PipelineError::Enrichment("analyzer unavailable".to_string()));
        }
        Ok(format!("{} trends", records.len()))
    }

    async fn extract_trends(&self, snippet: &str, _platform: &str) -> Result<Vec<SuggestedTrend>> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        self.snippets.lock().unwrap().push(snippet.to_string());
        if self.failing {
            return Err(PipelineError::Enrichment("analyzer unavailable".to_string()));
        }
        Ok(self.suggestions.clone())
    }
}

enum Scripted {
    Content(RawContent),
    Error(fn() -> PipelineError),
    Panic,
}

/// Scraper returning scripted content per source name.
pub struct StaticScraper {
    method: AccessMethod,
    responses: HashMap<String, Scripted>,
    fetched: Mutex<Vec<String>>,
    cleanups: AtomicUsize,
    fail_cleanup: bool,
}

impl StaticScraper {
    pub fn new(method: AccessMethod) -> Self {
        Self {
            method,
            responses: HashMap::new(),
            fetched: Mutex::new(Vec::new()),
            cleanups: AtomicUsize::new(0),
            fail_cleanup: false,
        }
    }

    pub fn with_content(mut self, source: &str, content: RawContent) -> Self {
        self.responses.insert(source.to_string(), Scripted::Content(content));
        self
    }

    pub fn with_error(mut self, source: &str, error: fn() -> PipelineError) -> Self {
        self.responses.insert(source.to_string(), Scripted::Error(error));
        self
    }

    /// Fetching `source` panics instead of returning.
    pub fn with_panic(mut self, source: &str) -> Self {
        self.responses.insert(source.to_string(), Scripted::Panic);
        self
    }

    pub fn failing_cleanup(mut self) -> Self {
        self.fail_cleanup = true;
        self
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceScraper for StaticScraper {
    fn method(&self) -> AccessMethod {
        self.method
    }

    async fn fetch(&self, source: &SourceDescriptor) -> Result<RawContent> {
        self.fetched.lock().unwrap().push(source.name.clone());
        match self.responses.get(&source.name) {
            Some(Scripted::Content(content)) => Ok(content.clone()),
            Some(Scripted::Error(make)) => Err(make()),
            Some(Scripted::Panic) => panic!("scripted fetch panic for {}", source.name),
            None => Ok(RawContent::Html(String::new())),
        }
    }

    async fn cleanup(&self) -> Result<()> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        if self.fail_cleanup {
            return Err(PipelineError::Cleanup("session still open".to_string()));
        }
        Ok(())
    }
}

/// Store that keeps everything in a vector and can reject chosen tags.
#[derive(Default)]
pub struct MemoryStore {
    stored: Mutex<Vec<(RawRecord, Annotation)>>,
    rejected_tags: HashSet<String>,
}

impl MemoryStore {
    pub fn rejecting(mut self, tag: &str) -> Self {
        self.rejected_tags.insert(tag.to_string());
        self
    }

    pub fn stored(&self) -> Vec<(RawRecord, Annotation)> {
        self.stored.lock().unwrap().clone()
    }
}

impl TrendStore for MemoryStore {
    fn create(&self, record: &RawRecord, annotation: &Annotation) -> Result<Uuid> {
        if self.rejected_tags.contains(&record.tag) {
            return Err(PipelineError::Persistence(format!("constraint violation on {}", record.tag)));
        }
        self.stored
            .lock()
            .unwrap()
            .push((record.clone(), annotation.clone()));
        Ok(Uuid::new_v4())
    }
}

#[derive(Default)]
struct BrowserState {
    opened: AtomicUsize,
    closed: AtomicUsize,
    waited_for: Mutex<Vec<Option<String>>>,
}

/// Browser serving a fixed page.
pub struct FakeBrowser {
    html: String,
    fail_content: bool,
    state: Arc<BrowserState>,
}

impl FakeBrowser {
    pub fn new(html: &str) -> Self {
        Self {
            html: html.to_string(),
            fail_content: false,
            state: Arc::new(BrowserState::default()),
        }
    }

    pub fn failing_content(mut self) -> Self {
        self.fail_content = true;
        self
    }

    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn waited_for(&self) -> Vec<Option<String>> {
        self.state.waited_for.lock().unwrap().clone()
    }
}

struct FakeSession {
    html: String,
    fail_content: bool,
    state: Arc<BrowserState>,
    closed: AtomicBool,
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn open(&self) -> Result<Box<dyn BrowserSession>> {
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            html: self.html.clone(),
            fail_content: self.fail_content,
            state: self.state.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        if self.opened() != self.closed() {
            return Err(PipelineError::Cleanup("session leaked".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&mut self, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn settle(&mut self, wait_selector: Option<&str>, _timeout: Duration) -> Result<()> {
        self.state
            .waited_for
            .lock()
            .unwrap()
            .push(wait_selector.map(str::to_string));
        Ok(())
    }

    async fn content(&mut self) -> Result<String> {
        if self.fail_content {
            return Err(PipelineError::Browser("selector never appeared".to_string()));
        }
        Ok(self.html.clone())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
