use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::graph::ExecutionGraph;
use crate::error::{CiGraphError, Result};

/// GitLab's implicit stage that runs after every other stage.
pub const POST_STAGE: &str = ".post";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    Failed,
    Canceled,
    Skipped,
    Manual,
    Running,
    Pending,
    Created,
    WaitingForResource,
    Preparing,
    Scheduled,
    #[serde(other)]
    Unknown,
}

/// One job run of one pipeline, as reported by the CI provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobExecution {
    pub name: String,
    pub stage: String,
    pub status: JobStatus,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Seconds between `start` and `end`
    pub duration: f64,
    pub job_id: u64,
}

impl JobExecution {
    pub fn new(
        job_id: u64,
        name: impl Into<String>,
        stage: impl Into<String>,
        status: JobStatus,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            stage: stage.into(),
            status,
            start,
            end,
            duration: seconds_between(start, end),
            job_id,
        }
    }
}

/// Idle time between two consecutive jobs of the critical path.
///
/// Negative gaps come from clock skew between runners; they are reported but
/// never counted as wait time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Gap {
    pub from: String,
    pub to: String,
    pub gap_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriticalPathResult {
    pub pipeline_id: String,
    pub pipeline_start: DateTime<Utc>,
    pub pipeline_end: DateTime<Utc>,
    pub pipeline_duration: f64,
    /// Chronological chain of jobs that bounded the pipeline duration
    pub critical_path: Vec<JobExecution>,
    pub total_job_duration: f64,
    pub total_wait_time: f64,
    pub efficiency: f64,
    pub gaps: Vec<Gap>,
}

/// A pipeline of a batch analysis that could not be analyzed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineFailure {
    pub pipeline_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub results: Vec<CriticalPathResult>,
    pub failures: Vec<PipelineFailure>,
}

/// Reconstructs critical paths of one pipeline run against its execution graph.
pub struct CriticalPathAnalyzer<'a> {
    graph: &'a ExecutionGraph,
    job_by_name: HashMap<String, JobExecution>,
}

impl<'a> CriticalPathAnalyzer<'a> {
    /// Indexes the jobs that actually ran. A retried job keeps its latest run.
    ///
    /// # Errors
    ///
    /// Returns `EmptyPipeline` when there are no job records.
    pub fn new(
        pipeline_id: &str,
        graph: &'a ExecutionGraph,
        jobs: Vec<JobExecution>,
    ) -> Result<Self> {
        if jobs.is_empty() {
            return Err(CiGraphError::EmptyPipeline(pipeline_id.to_string()));
        }

        let mut job_by_name: HashMap<String, JobExecution> = HashMap::with_capacity(jobs.len());
        for job in jobs {
            match job_by_name.get(&job.name) {
                Some(existing) if existing.job_id >= job.job_id => {}
                _ => {
                    job_by_name.insert(job.name.clone(), job);
                }
            }
        }

        Ok(Self { graph, job_by_name })
    }

    /// Dependencies of `job_name` that ran in this pipeline.
    ///
    /// Jobs unknown to the configured graph (drift from remote includes, for
    /// instance) fall back to stage ordering over the jobs that ran.
    pub fn dependencies(&self, job_name: &str) -> Vec<&JobExecution> {
        match self.graph.dependencies(job_name) {
            Some(names) => names
                .iter()
                .filter_map(|name| self.job_by_name.get(name))
                .collect(),
            None => self.stage_dependencies(job_name),
        }
    }

    fn stage_dependencies(&self, job_name: &str) -> Vec<&JobExecution> {
        let Some(job) = self.job_by_name.get(job_name) else {
            return vec![];
        };

        let mut by_stage: BTreeMap<usize, Vec<&JobExecution>> = BTreeMap::new();
        for other in self.job_by_name.values() {
            if let Some(index) = self.graph.stage_index(&other.stage) {
                by_stage.entry(index).or_default().push(other);
            }
        }

        match self.graph.stage_index(&job.stage) {
            Some(index) => by_stage
                .range(..index)
                .next_back()
                .map(|(_, jobs)| jobs.clone())
                .unwrap_or_default(),
            None => by_stage
                .into_values()
                .flatten()
                .filter(|other| other.name != job.name)
                .collect(),
        }
    }

    /// Walks back from `start_job`, always following the dependency that
    /// finished last, and returns the chain in chronological order.
    pub fn trace_critical_path(&self, start_job: &str) -> Vec<&JobExecution> {
        let Some(start) = self.job_by_name.get(start_job) else {
            return vec![];
        };

        let mut path = vec![start];
        let mut visited: HashSet<&str> = HashSet::from([start.name.as_str()]);
        let mut current = start;

        loop {
            let latest = self
                .dependencies(&current.name)
                .into_iter()
                .filter(|dep| !visited.contains(dep.name.as_str()))
                .max_by(|a, b| cmp_by_end(a, b));

            let Some(next) = latest else {
                break;
            };
            visited.insert(&next.name);
            path.push(next);
            current = next;
        }

        path.reverse();
        path
    }

    /// Traces the critical path ending at the last job of the pipeline.
    pub fn analyze(&self, pipeline_id: &str) -> CriticalPathResult {
        let jobs: Vec<&JobExecution> = self.job_by_name.values().collect();

        let pipeline_start = jobs.iter().map(|j| j.start).min().unwrap_or_default();
        let pipeline_end = jobs.iter().map(|j| j.end).max().unwrap_or_default();
        let pipeline_duration = seconds_between(pipeline_start, pipeline_end);

        let last_job = jobs.iter().copied().max_by(|a, b| cmp_by_end(a, b));
        let latest_non_post = jobs
            .iter()
            .copied()
            .filter(|j| j.stage != POST_STAGE)
            .max_by(|a, b| cmp_by_end(a, b));

        let mut path = match latest_non_post.or(last_job) {
            Some(anchor) => self.trace_critical_path(&anchor.name),
            None => vec![],
        };

        // .post jobs sit outside the needs/stage edges, they close the pipeline
        if let Some(last) = last_job {
            let is_distinct_post = last.stage == POST_STAGE
                && latest_non_post.is_some_and(|anchor| anchor.name != last.name)
                && !path.iter().any(|j| j.name == last.name);
            if is_distinct_post {
                path.push(last);
            }
        }

        let total_job_duration: f64 = path.iter().map(|j| j.duration).sum();
        let gaps: Vec<Gap> = path
            .windows(2)
            .map(|pair| Gap {
                from: pair[0].name.clone(),
                to: pair[1].name.clone(),
                gap_seconds: seconds_between(pair[0].end, pair[1].start),
            })
            .collect();
        let total_wait_time: f64 = gaps.iter().map(|g| g.gap_seconds.max(0.0)).sum();

        let efficiency = if pipeline_duration > 0.0 {
            total_job_duration / pipeline_duration
        } else {
            0.0
        };

        debug!(
            "Pipeline {pipeline_id}: critical path of {} jobs, {total_wait_time:.0}s waiting",
            path.len()
        );

        CriticalPathResult {
            pipeline_id: pipeline_id.to_string(),
            pipeline_start,
            pipeline_end,
            pipeline_duration,
            critical_path: path.into_iter().cloned().collect(),
            total_job_duration,
            total_wait_time,
            efficiency,
            gaps,
        }
    }
}

/// Computes the critical path of a single pipeline.
///
/// # Errors
///
/// Returns `EmptyPipeline` when the pipeline has no job records.
pub fn analyze_pipeline(
    pipeline_id: &str,
    graph: &ExecutionGraph,
    jobs: Vec<JobExecution>,
) -> Result<CriticalPathResult> {
    Ok(CriticalPathAnalyzer::new(pipeline_id, graph, jobs)?.analyze(pipeline_id))
}

/// Analyzes pipelines one after the other against one shared execution graph.
///
/// A pipeline that fails to fetch or analyze is logged and reported in
/// `failures`; the remaining pipelines are still analyzed.
pub async fn analyze_multiple_pipelines<F, Fut>(
    pipeline_ids: &[String],
    graph: &ExecutionGraph,
    mut fetch_jobs: F,
) -> BatchOutcome
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Vec<JobExecution>>>,
{
    let mut outcome = BatchOutcome::default();

    for pipeline_id in pipeline_ids {
        let analysis = match fetch_jobs(pipeline_id.clone()).await {
            Ok(jobs) => analyze_pipeline(pipeline_id, graph, jobs),
            Err(e) => Err(e),
        };

        match analysis {
            Ok(result) => outcome.results.push(result),
            Err(e) => {
                warn!("Skipping pipeline {pipeline_id}: {e}");
                outcome.failures.push(PipelineFailure {
                    pipeline_id: pipeline_id.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        "Analyzed {} pipelines, {} failed",
        outcome.results.len(),
        outcome.failures.len()
    );

    outcome
}

fn cmp_by_end(a: &JobExecution, b: &JobExecution) -> Ordering {
    a.end.cmp(&b.end).then_with(|| b.name.cmp(&a.name))
}

#[allow(clippy::cast_precision_loss)]
fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}
