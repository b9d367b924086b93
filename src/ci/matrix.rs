use super::value::{Mapping, Value};
use crate::error::{CiGraphError, Result};

/// One concrete variant of a matrix job: variable assignments in declaration order.
pub type MatrixVariant = Vec<(String, String)>;

/// Expands every job carrying `parallel: matrix:` into one job per variant.
///
/// Variants are named `"<job>: [v1, v2, ...]"`, values in the order the
/// variables are declared in their matrix entry, which is also how GitLab names
/// them at runtime. Each expanded job is a copy of the base job with the
/// variant's variables merged into `variables` and `parallel` removed. Jobs
/// without a matrix are kept unchanged and in place.
///
/// # Errors
///
/// Returns `InvalidConfig` when a matrix is not a list of mappings of scalars
/// or lists of scalars.
pub fn expand_matrix_jobs(jobs: &Mapping) -> Result<Mapping> {
    let mut expanded = Mapping::with_capacity(jobs.len());

    for (name, job) in jobs {
        let Some(matrix) = job.get("parallel").and_then(|p| p.get("matrix")) else {
            expanded.insert(name.clone(), job.clone());
            continue;
        };

        for variant in matrix_variants(name, matrix)? {
            let job_name = variant_name(name, &variant);
            expanded.insert(job_name, variant_job(job, variant));
        }
    }

    Ok(expanded)
}

/// Computes the variants of a `parallel: matrix:` list.
///
/// Each entry contributes the Cartesian product of its list-valued variables;
/// scalar variables take part in every combination of their entry.
pub fn matrix_variants(job_name: &str, matrix: &Value) -> Result<Vec<MatrixVariant>> {
    let entries = matrix.as_sequence().ok_or_else(|| {
        CiGraphError::InvalidConfig(format!("{job_name}: parallel:matrix must be a list"))
    })?;

    let mut variants = Vec::new();
    for entry in entries {
        let assignments = entry.as_mapping().ok_or_else(|| {
            CiGraphError::InvalidConfig(format!(
                "{job_name}: parallel:matrix entries must be mappings"
            ))
        })?;

        let mut combinations: Vec<MatrixVariant> = vec![vec![]];
        for (variable, value) in assignments {
            let choices = variable_values(job_name, variable, value)?;
            combinations = combinations
                .into_iter()
                .flat_map(|prefix| {
                    choices.iter().map(move |choice| {
                        let mut combination = prefix.clone();
                        combination.push((variable.clone(), choice.clone()));
                        combination
                    })
                })
                .collect();
        }
        variants.extend(combinations);
    }

    Ok(variants)
}

pub fn variant_name(job_name: &str, variant: &MatrixVariant) -> String {
    let values: Vec<&str> = variant.iter().map(|(_, value)| value.as_str()).collect();
    format!("{job_name}: [{}]", values.join(", "))
}

fn variable_values(job_name: &str, variable: &str, value: &Value) -> Result<Vec<String>> {
    let invalid = || {
        CiGraphError::InvalidConfig(format!(
            "{job_name}: matrix variable {variable} must be a scalar or a list of scalars"
        ))
    };

    match value {
        Value::Sequence(items) => items
            .iter()
            .map(|item| item.scalar_text().ok_or_else(invalid))
            .collect(),
        other => Ok(vec![other.scalar_text().ok_or_else(invalid)?]),
    }
}

fn variant_job(base: &Value, variant: MatrixVariant) -> Value {
    let mut job = base.clone();
    let Some(map) = job.as_mapping_mut() else {
        return job;
    };
    map.shift_remove("parallel");

    let variables = map
        .entry("variables".to_string())
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if !matches!(variables, Value::Mapping(_)) {
        *variables = Value::Mapping(Mapping::new());
    }
    if let Some(variables) = variables.as_mapping_mut() {
        for (name, value) in variant {
            variables.insert(name, Value::String(value));
        }
    }

    job
}
