use super::value::{deep_merge, Mapping, Value};
use crate::error::{CiGraphError, Result};

/// Top-level keywords that configure the pipeline instead of defining a job.
const SPECIAL_OBJECTS: [&str; 10] = [
    "stages",
    "variables",
    "default",
    "workflow",
    "include",
    "image",
    "services",
    "cache",
    "before_script",
    "after_script",
];

const SCRIPT_KEYS: [&str; 3] = ["script", "before_script", "after_script"];

/// GitLab allows eleven levels of `extends` inheritance.
const MAX_EXTENDS_DEPTH: usize = 11;

pub fn is_job_name(name: &str) -> bool {
    !name.starts_with('.') && !SPECIAL_OBJECTS.contains(&name)
}

/// Reduces a resolved configuration to its concrete jobs.
///
/// Global keywords and hidden (`.`-prefixed) jobs are dropped, `extends:` is
/// flattened by deep-merging the extended jobs under the child, and nested
/// script lists produced by anchors or references are flattened.
///
/// # Errors
///
/// Returns `InvalidConfig` when a job extends a job that does not exist or
/// when `extends` chains form a cycle.
pub fn clean_configuration(config: &Mapping) -> Result<Mapping> {
    let mut jobs = Mapping::new();

    for (name, value) in config {
        if !is_job_name(name) || !matches!(value, Value::Mapping(_)) {
            continue;
        }

        let mut job = flatten_extends(name, config, &mut Vec::new())?;
        flatten_scripts(&mut job);
        jobs.insert(name.clone(), job);
    }

    Ok(jobs)
}

fn flatten_extends(name: &str, config: &Mapping, chain: &mut Vec<String>) -> Result<Value> {
    if chain.iter().any(|seen| seen == name) {
        return Err(CiGraphError::InvalidConfig(format!(
            "extends cycle: {} -> {name}",
            chain.join(" -> ")
        )));
    }
    if chain.len() > MAX_EXTENDS_DEPTH {
        return Err(CiGraphError::InvalidConfig(format!(
            "{name}: extends nests deeper than {MAX_EXTENDS_DEPTH} levels"
        )));
    }

    let mut job = config.get(name).cloned().ok_or_else(|| {
        CiGraphError::InvalidConfig(format!(
            "{} extends unknown job {name}",
            chain.last().map_or("<root>", String::as_str)
        ))
    })?;

    let parents = match job.as_mapping_mut().and_then(|map| map.shift_remove("extends")) {
        None => return Ok(job),
        Some(Value::String(parent)) => vec![parent],
        Some(Value::Sequence(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(ToString::to_string).ok_or_else(|| {
                    CiGraphError::InvalidConfig(format!("{name}: extends entries must be strings"))
                })
            })
            .collect::<Result<_>>()?,
        Some(other) => {
            return Err(CiGraphError::InvalidConfig(format!(
                "{name}: invalid extends value {other:?}"
            )))
        }
    };

    chain.push(name.to_string());
    let mut merged = Value::Mapping(Mapping::new());
    for parent in &parents {
        let parent_job = flatten_extends(parent, config, chain)?;
        deep_merge(&mut merged, parent_job);
    }
    chain.pop();

    deep_merge(&mut merged, job);
    Ok(merged)
}

fn flatten_scripts(job: &mut Value) {
    let Some(map) = job.as_mapping_mut() else {
        return;
    };

    for key in SCRIPT_KEYS {
        if let Some(Value::Sequence(items)) = map.get_mut(key) {
            let mut flat = Vec::with_capacity(items.len());
            flatten_into(std::mem::take(items), &mut flat);
            *items = flat;
        }
    }
}

fn flatten_into(items: Vec<Value>, out: &mut Vec<Value>) {
    for item in items {
        match item {
            Value::Sequence(nested) => flatten_into(nested, out),
            other => out.push(other),
        }
    }
}
