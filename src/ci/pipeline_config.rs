use std::path::Path;

use log::info;
use serde::Serialize;

use super::clean::clean_configuration;
use super::loader::resolve_configuration;
use super::matrix::expand_matrix_jobs;
use super::value::{Mapping, Value};
use crate::error::{CiGraphError, Result};

/// Stage order GitLab uses when a configuration declares no `stages`.
pub const DEFAULT_STAGES: [&str; 3] = ["build", "test", "deploy"];

/// A fully resolved CI configuration: stage order plus concrete jobs.
///
/// Resolving can be expensive, so batch analyses build this once and share it
/// across pipelines.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CiConfig {
    pub stages: Vec<String>,
    pub jobs: Mapping,
}

impl CiConfig {
    /// Resolves includes and references, cleans the job set and expands matrix jobs.
    ///
    /// # Errors
    ///
    /// Propagates any resolution failure; there is no partial result.
    pub fn load(root_file: &Path) -> Result<Self> {
        let resolved = resolve_configuration(root_file)?;
        let config = Self::from_resolved(&resolved)?;
        info!(
            "Resolved {} jobs across {} stages from {}",
            config.jobs.len(),
            config.stages.len(),
            root_file.display()
        );
        Ok(config)
    }

    pub fn from_resolved(resolved: &Mapping) -> Result<Self> {
        let stages = match resolved.get("stages") {
            None | Some(Value::Null) => DEFAULT_STAGES.iter().map(ToString::to_string).collect(),
            Some(value) => parse_stages(value)?,
        };

        let jobs = expand_matrix_jobs(&clean_configuration(resolved)?)?;

        Ok(Self { stages, jobs })
    }
}

fn parse_stages(value: &Value) -> Result<Vec<String>> {
    let mut stages = Vec::new();
    collect_stages(value, &mut stages)?;
    Ok(stages)
}

// Anchored stage lists show up as nested sequences.
fn collect_stages(value: &Value, stages: &mut Vec<String>) -> Result<()> {
    match value {
        Value::Sequence(items) => items.iter().try_for_each(|item| collect_stages(item, stages)),
        other => {
            let stage = other.scalar_text().ok_or_else(|| {
                CiGraphError::InvalidConfig(format!("invalid stage entry: {other:?}"))
            })?;
            if !stages.contains(&stage) {
                stages.push(stage);
            }
            Ok(())
        }
    }
}
