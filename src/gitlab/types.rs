use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::ci::{JobExecution, JobStatus};

/// A job as returned by `GET /projects/:id/pipelines/:pipeline_id/jobs`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiJob {
    pub id: u64,
    pub name: String,
    pub stage: String,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ApiJob {
    /// Jobs that never started or never finished (skipped, manual, still
    /// running) carry no timing and are left out of the analysis.
    pub fn into_execution(self) -> Option<JobExecution> {
        let start = self.started_at?;
        let end = self.finished_at?;
        Some(JobExecution::new(
            self.id, self.name, self.stage, self.status, start, end,
        ))
    }
}
