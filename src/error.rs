use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Job could not be created. Fatal for that source only.
    #[error("Job submission failed for {actor}: {message}")]
    Submission { actor: String, message: String },

    /// Polling ran out of attempts while the job was still running.
    #[error("Job {job_id} still running after {attempts} polls")]
    PollTimeout { job_id: String, attempts: u32 },

    #[error("Job {job_id} ended with status {status}")]
    JobFailed { job_id: String, status: String },

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Extraction strategy {strategy} failed: {message}")]
    Extraction { strategy: String, message: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Enrichment error: {0}")]
    Enrichment(String),

    #[error("A scrape run is already in progress")]
    AlreadyRunning,

    #[error("Cleanup failed: {0}")]
    Cleanup(String),
}

impl PipelineError {
    pub fn extraction(strategy: &str, message: impl std::fmt::Display) -> Self {
        PipelineError::Extraction {
            strategy: strategy.to_string(),
            message: message.to_string(),
        }
    }

    /// Soft failures are logged at `warn` rather than `error`.
    pub fn is_soft(&self) -> bool {
        matches!(self, PipelineError::PollTimeout { .. })
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Fetch(err.to_string())
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        PipelineError::Persistence(err.to_string())
    }
}
