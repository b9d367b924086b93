use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::{debug, warn};

use super::matrix::{matrix_variants, variant_name, MatrixVariant};
use super::pipeline_config::CiConfig;
use super::value::Value;
use crate::error::Result;
use crate::report::{EdgeExport, GraphExport, NodeExport};

const DEFAULT_STAGE: &str = "test";

/// One entry of a job's `needs` clause that refers to a job of this pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Need {
    /// Base job name as written, possibly a matrix job that got expanded
    pub job: String,
    /// `optional: true` needs tolerate a missing job
    pub optional: bool,
    /// Variants selected with `needs:parallel:matrix`; empty means every variant
    pub variants: Vec<MatrixVariant>,
}

/// A job of the resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiJob {
    pub name: String,
    pub stage: String,
    pub needs: Vec<Need>,
    /// Distinguishes `needs: []` (no dependencies) from a missing `needs` (stage order)
    pub has_explicit_needs: bool,
}

impl CiJob {
    /// Reads the scheduling-relevant parts of a job definition.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a malformed `needs:parallel:matrix`.
    pub fn from_definition(name: &str, definition: &Value) -> Result<Self> {
        let stage = definition
            .get("stage")
            .and_then(Value::scalar_text)
            .unwrap_or_else(|| DEFAULT_STAGE.to_string());

        let (needs, has_explicit_needs) = match definition.get("needs") {
            None => (vec![], false),
            Some(Value::Sequence(entries)) => {
                let mut needs = Vec::new();
                for entry in entries {
                    if let Some(need) = parse_need(name, entry)? {
                        needs.push(need);
                    }
                }
                (needs, true)
            }
            Some(Value::Null) => (vec![], true),
            Some(other) => {
                warn!("{name}: ignoring malformed needs {other:?}");
                (vec![], true)
            }
        };

        Ok(Self {
            name: name.to_string(),
            stage,
            needs,
            has_explicit_needs,
        })
    }
}

fn parse_need(job_name: &str, entry: &Value) -> Result<Option<Need>> {
    match entry {
        Value::String(job) => Ok(Some(Need {
            job: job.clone(),
            optional: false,
            variants: vec![],
        })),
        Value::Mapping(map) => {
            // Needs on other pipelines or projects don't gate jobs of this one
            if map.contains_key("pipeline") || map.contains_key("project") {
                debug!("{job_name}: ignoring cross-pipeline need {map:?}");
                return Ok(None);
            }
            let Some(job) = map.get("job").and_then(Value::scalar_text) else {
                warn!("{job_name}: ignoring need without a job name {map:?}");
                return Ok(None);
            };
            let optional = matches!(map.get("optional"), Some(Value::Bool(true)));
            let variants = match map.get("parallel").and_then(|p| p.get("matrix")) {
                Some(matrix) => matrix_variants(&job, matrix)?,
                None => vec![],
            };
            Ok(Some(Need {
                job,
                optional,
                variants,
            }))
        }
        other => {
            warn!("{job_name}: ignoring malformed need {other:?}");
            Ok(None)
        }
    }
}

/// Job nodes plus `(dependency, dependent)` edges of one resolved configuration.
///
/// Nodes and edges are kept ordered so exports are stable across runs.
#[derive(Debug, Clone, Default)]
pub struct ExecutionGraph {
    pub stages: Vec<String>,
    pub nodes: BTreeMap<String, CiJob>,
    pub edges: BTreeSet<(String, String)>,
    dependencies: HashMap<String, BTreeSet<String>>,
}

impl ExecutionGraph {
    /// Direct dependencies of `job`, or `None` if the job is not part of the graph.
    pub fn dependencies(&self, job: &str) -> Option<&BTreeSet<String>> {
        if !self.nodes.contains_key(job) {
            return None;
        }
        static EMPTY: BTreeSet<String> = BTreeSet::new();
        Some(self.dependencies.get(job).unwrap_or(&EMPTY))
    }

    pub fn stage_index(&self, stage: &str) -> Option<usize> {
        self.stages.iter().position(|s| s == stage)
    }

    pub fn to_export(&self) -> GraphExport {
        GraphExport {
            nodes: self
                .nodes
                .values()
                .map(|job| NodeExport {
                    name: job.name.clone(),
                    stage: job.stage.clone(),
                })
                .collect(),
            edges: self
                .edges
                .iter()
                .map(|(from, to)| EdgeExport {
                    from: from.clone(),
                    to: to.clone(),
                })
                .collect(),
        }
    }

    fn add_edge(&mut self, from: String, to: String) {
        if from == to {
            return;
        }
        self.dependencies
            .entry(to.clone())
            .or_default()
            .insert(from.clone());
        self.edges.insert((from, to));
    }
}

/// Computes the dependency edges of every job in `config`.
///
/// A job with a `needs` clause depends on exactly the jobs it names, where a
/// name that was expanded as a matrix job stands for all of its variants. A
/// job without `needs` waits for every job of the nearest earlier stage that
/// has jobs; a job whose stage is not declared (e.g. `.post`) waits for all
/// jobs of all declared stages.
///
/// # Errors
///
/// Returns `InvalidConfig` when a job's `needs` clause is malformed.
pub fn build_execution_graph(config: &CiConfig) -> Result<ExecutionGraph> {
    let mut graph = ExecutionGraph {
        stages: config.stages.clone(),
        ..ExecutionGraph::default()
    };

    for (name, definition) in &config.jobs {
        graph
            .nodes
            .insert(name.clone(), CiJob::from_definition(name, definition)?);
    }

    let mut jobs_by_stage: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
    for job in graph.nodes.values() {
        if let Some(index) = graph.stage_index(&job.stage) {
            jobs_by_stage.entry(index).or_default().push(&job.name);
        }
    }

    let mut edges = Vec::new();
    for job in graph.nodes.values() {
        let dependencies = if job.has_explicit_needs {
            resolve_needs(job, &graph.nodes)
        } else {
            match graph.stage_index(&job.stage) {
                Some(index) => jobs_by_stage
                    .range(..index)
                    .next_back()
                    .map(|(_, jobs)| jobs.iter().map(ToString::to_string).collect())
                    .unwrap_or_default(),
                None => jobs_by_stage
                    .values()
                    .flatten()
                    .map(ToString::to_string)
                    .collect(),
            }
        };

        edges.extend(
            dependencies
                .into_iter()
                .map(|dependency| (dependency, job.name.clone())),
        );
    }

    for (from, to) in edges {
        graph.add_edge(from, to);
    }

    debug!(
        "Built execution graph with {} nodes and {} edges",
        graph.nodes.len(),
        graph.edges.len()
    );

    Ok(graph)
}

fn resolve_needs(job: &CiJob, nodes: &BTreeMap<String, CiJob>) -> Vec<String> {
    let mut resolved = Vec::new();

    for need in &job.needs {
        let matches = expansions_of(need, nodes);
        if matches.is_empty() {
            if !need.optional {
                warn!("{}: needs unknown job {}", job.name, need.job);
            }
            continue;
        }
        resolved.extend(matches);
    }

    resolved
}

/// Jobs a need refers to: the selected matrix variants, the job itself, or
/// every expansion of a matrix job named by its base name.
fn expansions_of(need: &Need, nodes: &BTreeMap<String, CiJob>) -> Vec<String> {
    if !need.variants.is_empty() {
        return need
            .variants
            .iter()
            .map(|variant| variant_name(&need.job, variant))
            .filter(|name| nodes.contains_key(name))
            .collect();
    }

    if nodes.contains_key(&need.job) {
        return vec![need.job.clone()];
    }

    let prefix = format!("{}:", need.job);
    nodes
        .keys()
        .filter(|name| name.starts_with(&prefix))
        .cloned()
        .collect()
}
