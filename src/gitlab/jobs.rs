use log::debug;

use super::client::GitLabClient;
use super::types::ApiJob;
use crate::ci::JobExecution;
use crate::error::{CiGraphError, Result};

const PER_PAGE: usize = 100;

impl GitLabClient {
    /// Fetches every job of a pipeline, following `x-next-page` pagination.
    pub async fn fetch_pipeline_jobs(&self, project: &str, pipeline_id: &str) -> Result<Vec<ApiJob>> {
        let mut all_jobs = Vec::new();
        let mut page = 1;

        loop {
            let mut url = self
                .project_url(project)?
                .join(&format!("pipelines/{pipeline_id}/jobs"))
                .map_err(|e| CiGraphError::Config(format!("Invalid jobs URL: {e}")))?;
            url.query_pairs_mut()
                .append_pair("per_page", &PER_PAGE.to_string())
                .append_pair("page", &page.to_string());

            let (jobs, headers): (Vec<ApiJob>, _) = self.get_json(url).await?;
            debug!("Fetched {} jobs from page {page} of pipeline {pipeline_id}", jobs.len());
            all_jobs.extend(jobs);

            let next_page = headers
                .get("x-next-page")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<usize>().ok());

            match next_page {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }

        Ok(all_jobs)
    }

    /// Fetches the timed job runs of a pipeline, ready for critical path analysis.
    pub async fn fetch_job_executions(
        &self,
        project: &str,
        pipeline_id: &str,
    ) -> Result<Vec<JobExecution>> {
        let jobs = self.fetch_pipeline_jobs(project, pipeline_id).await?;
        let total = jobs.len();

        let executions: Vec<JobExecution> =
            jobs.into_iter().filter_map(ApiJob::into_execution).collect();

        debug!(
            "Pipeline {pipeline_id}: {} of {total} jobs have timing data",
            executions.len()
        );
        Ok(executions)
    }
}
