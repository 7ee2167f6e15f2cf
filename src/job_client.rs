use crate::clock::Sleeper;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const APIFY_BASE_URL: &str = "https://api.apify.com/v2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Submitted,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Aborted,
}

impl JobStatus {
    /// Map the hosted API's status vocabulary. Transitional states
    /// (`READY`, `TIMING-OUT`, `ABORTING`) still count as running.
    pub fn from_api(status: &str) -> Self {
        match status.trim().to_uppercase().as_str() {
            "SUCCEEDED" => JobStatus::Succeeded,
            "FAILED" => JobStatus::Failed,
            "TIMED_OUT" | "TIMED-OUT" => JobStatus::TimedOut,
            "ABORTED" => JobStatus::Aborted,
            _ => JobStatus::Running,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut | JobStatus::Aborted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Submitted => "SUBMITTED",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::TimedOut => "TIMED_OUT",
            JobStatus::Aborted => "ABORTED",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AsyncJob {
    pub id: String,
    pub actor: String,
    pub status: JobStatus,
    pub dataset_ref: Option<String>,
    pub attempt_count: u32,
    pub started_at: DateTime<Utc>,
}

/// Run metadata as reported by the hosted API.
#[derive(Debug, Clone, PartialEq)]
pub struct RunState {
    pub run_id: String,
    pub status: JobStatus,
    pub dataset_ref: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_attempts: 60,
        }
    }
}

/// Result of waiting on a job.
#[derive(Debug, Clone)]
pub enum Completion {
    /// The job reached a terminal status.
    Terminal(AsyncJob),
    /// Attempts ran out while the job was still running.
    Exhausted(AsyncJob),
}

impl Completion {
    pub fn job(&self) -> &AsyncJob {
        match self {
            Completion::Terminal(job) | Completion::Exhausted(job) => job,
        }
    }
}

/// Wire-level operations of a hosted-job API.
#[async_trait]
pub trait JobApi: Send + Sync {
    async fn start_run(&self, actor: &str, input: &Value) -> Result<RunState>;
    async fn run_status(&self, actor: &str, run_id: &str) -> Result<RunState>;
    async fn dataset_items(&self, dataset_ref: &str) -> Result<Vec<Value>>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunData {
    id: String,
    status: String,
    #[serde(default)]
    default_dataset_id: Option<String>,
}

impl From<RunData> for RunState {
    fn from(run: RunData) -> Self {
        RunState {
            status: JobStatus::from_api(&run.status),
            run_id: run.id,
            dataset_ref: run.default_dataset_id,
        }
    }
}

/// Apify REST client.
pub struct ApifyApi {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl ApifyApi {
    pub fn new(token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.to_string(),
            base_url: APIFY_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PipelineError::Fetch(format!(
                "API error (status {}): {}",
                status.as_u16(),
                body
            )));
        }
        Ok(resp)
    }
}

#[async_trait]
impl JobApi for ApifyApi {
    async fn start_run(&self, actor: &str, input: &Value) -> Result<RunState> {
        let url = format!("{}/acts/{}/runs", self.base_url, actor);
        let submission = |message: String| PipelineError::Submission {
            actor: actor.to_string(),
            message,
        };

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(input)
            .send()
            .await
            .map_err(|e| submission(e.to_string()))?;

        let resp = Self::check(resp).await.map_err(|e| submission(e.to_string()))?;
        let api_resp: ApiResponse<RunData> =
            resp.json().await.map_err(|e| submission(e.to_string()))?;
        Ok(api_resp.data.into())
    }

    async fn run_status(&self, actor: &str, run_id: &str) -> Result<RunState> {
        let url = format!("{}/acts/{}/runs/{}", self.base_url, actor, run_id);
        let resp = self.client.get(&url).bearer_auth(&self.token).send().await?;
        let resp = Self::check(resp).await?;
        let api_resp: ApiResponse<RunData> = resp.json().await?;
        Ok(api_resp.data.into())
    }

    async fn dataset_items(&self, dataset_ref: &str) -> Result<Vec<Value>> {
        let url = format!("{}/datasets/{}/items?format=json", self.base_url, dataset_ref);
        let resp = self.client.get(&url).bearer_auth(&self.token).send().await?;
        let resp = Self::check(resp).await?;
        Ok(resp.json().await?)
    }
}

/// Drives submit → poll → fetch for a hosted job.
pub struct AsyncJobClient {
    api: Arc<dyn JobApi>,
    sleeper: Arc<dyn Sleeper>,
}

impl AsyncJobClient {
    pub fn new(api: Arc<dyn JobApi>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { api, sleeper }
    }

    pub async fn submit(&self, actor: &str, input: &Value) -> Result<AsyncJob> {
        let run = self.api.start_run(actor, input).await.map_err(|e| match e {
            PipelineError::Submission { .. } => e,
            other => PipelineError::Submission {
                actor: actor.to_string(),
                message: other.to_string(),
            },
        })?;

        tracing::info!(actor, run_id = %run.run_id, "Job submitted");

        Ok(AsyncJob {
            id: run.run_id,
            actor: actor.to_string(),
            status: JobStatus::Submitted,
            dataset_ref: run.dataset_ref,
            attempt_count: 0,
            started_at: Utc::now(),
        })
    }

    /// Poll on a fixed interval until the job is terminal or `max_attempts`
    /// polls have been spent. A failed poll still consumes an attempt.
    pub async fn await_completion(&self, mut job: AsyncJob, policy: PollPolicy) -> Completion {
        while job.attempt_count < policy.max_attempts {
            self.sleeper.sleep(policy.poll_interval).await;
            job.attempt_count += 1;

            match self.api.run_status(&job.actor, &job.id).await {
                Ok(state) => {
                    job.status = state.status;
                    if state.dataset_ref.is_some() {
                        job.dataset_ref = state.dataset_ref;
                    }
                    if job.status.is_terminal() {
                        tracing::info!(
                            run_id = %job.id,
                            status = job.status.as_str(),
                            attempts = job.attempt_count,
                            "Job finished"
                        );
                        return Completion::Terminal(job);
                    }
                    tracing::debug!(run_id = %job.id, attempt = job.attempt_count, "Job still in progress");
                }
                Err(e) => {
                    tracing::warn!(run_id = %job.id, attempt = job.attempt_count, "Status poll failed: {}", e);
                }
            }
        }

        tracing::warn!(
            run_id = %job.id,
            attempts = job.attempt_count,
            "Job did not finish within the poll budget"
        );
        Completion::Exhausted(job)
    }

    /// Dataset items of a succeeded job.
    pub async fn fetch_results(&self, job: &AsyncJob) -> Result<Vec<Value>> {
        if job.status != JobStatus::Succeeded {
            return Err(PipelineError::JobFailed {
                job_id: job.id.clone(),
                status: job.status.as_str().to_string(),
            });
        }
        let dataset_ref = job.dataset_ref.as_deref().ok_or_else(|| {
            PipelineError::Fetch(format!("Job {} has no dataset reference", job.id))
        })?;

        let items = self.api.dataset_items(dataset_ref).await?;
        tracing::info!(run_id = %job.id, count = items.len(), "Fetched job results");
        Ok(items)
    }

    /// Submit, wait, and fetch. Running out of polls surfaces as the soft
    /// `PollTimeout`; any other terminal non-success as `JobFailed`.
    pub async fn run(&self, actor: &str, input: &Value, policy: PollPolicy) -> Result<Vec<Value>> {
        let job = self.submit(actor, input).await?;
        match self.await_completion(job, policy).await {
            Completion::Terminal(job) if job.status == JobStatus::Succeeded => {
                self.fetch_results(&job).await
            }
            Completion::Terminal(job) => Err(PipelineError::JobFailed {
                job_id: job.id,
                status: job.status.as_str().to_string(),
            }),
            Completion::Exhausted(job) => Err(PipelineError::PollTimeout {
                job_id: job.id,
                attempts: job.attempt_count,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InstantSleeper, ScriptedJobApi};
    use serde_json::json;

    fn policy(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            poll_interval: Duration::from_millis(100),
            max_attempts,
        }
    }

    #[test]
    fn test_status_vocabulary() {
        assert_eq!(JobStatus::from_api("RUNNING"), JobStatus::Running);
        assert_eq!(JobStatus::from_api("READY"), JobStatus::Running);
        assert_eq!(JobStatus::from_api("SUCCEEDED"), JobStatus::Succeeded);
        assert_eq!(JobStatus::from_api("TIMED-OUT"), JobStatus::TimedOut);
        assert_eq!(JobStatus::from_api("TIMED_OUT"), JobStatus::TimedOut);
        assert_eq!(JobStatus::from_api("ABORTED"), JobStatus::Aborted);
        assert!(!JobStatus::Submitted.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[tokio::test]
    async fn test_await_completion_stops_on_success() {
        let api = Arc::new(ScriptedJobApi::new(vec![
            Ok(JobStatus::Running),
            Ok(JobStatus::Running),
            Ok(JobStatus::Succeeded),
        ]));
        let sleeper = Arc::new(InstantSleeper::default());
        let client = AsyncJobClient::new(api.clone(), sleeper.clone());

        let job = client.submit("actor", &json!({})).await.unwrap();
        let completion = client.await_completion(job, policy(10)).await;

        assert!(matches!(completion, Completion::Terminal(_)));
        assert_eq!(completion.job().status, JobStatus::Succeeded);
        assert_eq!(completion.job().attempt_count, 3);
        assert_eq!(api.polls(), 3);
        assert_eq!(sleeper.total(), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_await_completion_exhausts_softly() {
        let api = Arc::new(ScriptedJobApi::new(vec![Ok(JobStatus::Running)]));
        let client = AsyncJobClient::new(api.clone(), Arc::new(InstantSleeper::default()));

        let job = client.submit("actor", &json!({})).await.unwrap();
        let completion = client.await_completion(job, policy(2)).await;

        assert!(matches!(completion, Completion::Exhausted(_)));
        assert_eq!(completion.job().status, JobStatus::Running);
        assert_eq!(api.polls(), 2);
    }

    #[tokio::test]
    async fn test_poll_errors_consume_attempts_without_aborting() {
        let api = Arc::new(ScriptedJobApi::new(vec![
            Err("connection reset".to_string()),
            Err("connection reset".to_string()),
            Ok(JobStatus::Succeeded),
        ]));
        let client = AsyncJobClient::new(api.clone(), Arc::new(InstantSleeper::default()));

        let job = client.submit("actor", &json!({})).await.unwrap();
        let completion = client.await_completion(job, policy(3)).await;
        assert_eq!(completion.job().status, JobStatus::Succeeded);
        assert_eq!(api.polls(), 3);

        let job = client.submit("actor", &json!({})).await.unwrap();
        let api2 = Arc::new(ScriptedJobApi::new(vec![Err("boom".to_string())]));
        let client2 = AsyncJobClient::new(api2.clone(), Arc::new(InstantSleeper::default()));
        let completion = client2.await_completion(job, policy(2)).await;
        assert!(matches!(completion, Completion::Exhausted(_)));
        assert_eq!(api2.polls(), 2);
    }

    #[tokio::test]
    async fn test_stops_on_failed_terminal_status() {
        let api = Arc::new(ScriptedJobApi::new(vec![
            Ok(JobStatus::Running),
            Ok(JobStatus::Aborted),
            Ok(JobStatus::Succeeded),
        ]));
        let client = AsyncJobClient::new(api.clone(), Arc::new(InstantSleeper::default()));

        let err = client.run("actor", &json!({}), policy(10)).await.unwrap_err();
        assert!(matches!(err, PipelineError::JobFailed { ref status, .. } if status == "ABORTED"));
        assert_eq!(api.polls(), 2);
    }

    #[tokio::test]
    async fn test_run_returns_items_on_success() {
        let api = Arc::new(
            ScriptedJobApi::new(vec![Ok(JobStatus::Succeeded)])
                .with_items(vec![json!({"name": "#rust"}), json!({"name": "#tokio"})]),
        );
        let client = AsyncJobClient::new(api, Arc::new(InstantSleeper::default()));

        let items = client.run("actor", &json!({}), policy(5)).await.unwrap();
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_run_maps_exhaustion_to_poll_timeout() {
        let api = Arc::new(ScriptedJobApi::new(vec![Ok(JobStatus::Running)]));
        let client = AsyncJobClient::new(api, Arc::new(InstantSleeper::default()));

        let err = client.run("actor", &json!({}), policy(2)).await.unwrap_err();
        assert!(matches!(err, PipelineError::PollTimeout { attempts: 2, .. }));
        assert!(err.is_soft());
    }

    #[tokio::test]
    async fn test_submission_failure() {
        let api = Arc::new(ScriptedJobApi::new(vec![]).failing_submission());
        let client = AsyncJobClient::new(api, Arc::new(InstantSleeper::default()));

        let err = client.submit("actor", &json!({})).await.unwrap_err();
        assert!(matches!(err, PipelineError::Submission { .. }));
    }

    #[tokio::test]
    async fn test_fetch_results_requires_success() {
        let client = AsyncJobClient::new(
            Arc::new(ScriptedJobApi::new(vec![])),
            Arc::new(InstantSleeper::default()),
        );
        let job = AsyncJob {
            id: "run-1".to_string(),
            actor: "actor".to_string(),
            status: JobStatus::Running,
            dataset_ref: Some("ds-1".to_string()),
            attempt_count: 1,
            started_at: Utc::now(),
        };
        assert!(client.fetch_results(&job).await.is_err());
    }

    #[tokio::test]
    async fn test_apify_api_round_trip() {
        let mut server = mockito::Server::new_async().await;
        let _start = server
            .mock("POST", "/acts/user~trends/runs")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":{"id":"run-42","status":"READY","defaultDatasetId":"ds-7"}}"#)
            .create_async()
            .await;
        let _status = server
            .mock("GET", "/acts/user~trends/runs/run-42")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":{"id":"run-42","status":"SUCCEEDED","defaultDatasetId":"ds-7"}}"#)
            .create_async()
            .await;
        let _items = server
            .mock("GET", "/datasets/ds-7/items?format=json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r##"[{"name":"#WorldCup","volume":"120K"}]"##)
            .create_async()
            .await;

        let api = ApifyApi::new("token").with_base_url(&server.url());
        let client = AsyncJobClient::new(Arc::new(api), Arc::new(InstantSleeper::default()));

        let items = client.run("user~trends", &json!({}), policy(3)).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["name"], "#WorldCup");
    }

    #[tokio::test]
    async fn test_apify_api_auth_failure_is_submission_error() {
        let mut server = mockito::Server::new_async().await;
        let _start = server
            .mock("POST", "/acts/user~trends/runs")
            .with_status(401)
            .with_body("unauthorized")
            .create_async()
            .await;

        let api = ApifyApi::new("bad").with_base_url(&server.url());
        let err = api.start_run("user~trends", &json!({})).await.unwrap_err();
        assert!(matches!(err, PipelineError::Submission { .. }));
        assert!(err.to_string().contains("401"));
    }
}
