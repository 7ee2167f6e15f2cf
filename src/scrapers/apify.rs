use crate::error::{PipelineError, Result};
use crate::job_client::{AsyncJobClient, PollPolicy};
use crate::models::RawContent;
use crate::scraper_trait::SourceScraper;
use crate::source::{AccessMethod, SourceDescriptor};
use async_trait::async_trait;

/// Hosted-job access path: submit the source's actor, wait, read the dataset.
pub struct JobScraper {
    client: AsyncJobClient,
    policy: PollPolicy,
}

impl JobScraper {
    pub fn new(client: AsyncJobClient, policy: PollPolicy) -> Self {
        Self { client, policy }
    }
}

#[async_trait]
impl SourceScraper for JobScraper {
    fn method(&self) -> AccessMethod {
        AccessMethod::AsyncJob
    }

    async fn fetch(&self, source: &SourceDescriptor) -> Result<RawContent> {
        let job = source.job.as_ref().ok_or_else(|| PipelineError::Submission {
            actor: source.name.clone(),
            message: "source has no job definition".to_string(),
        })?;

        tracing::info!(source = %source.name, actor = %job.actor, "Running hosted job");
        let items = self.client.run(&job.actor, &job.input, self.policy).await?;
        Ok(RawContent::Items(items))
    }
}
