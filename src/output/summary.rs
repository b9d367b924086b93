use std::fmt::Write;

use comfy_table::Cell;
use indexmap::IndexMap;

use crate::ci::{BatchOutcome, CriticalPathResult};
use crate::impact::ImpactOutcome;

use super::styling::{bright_red, bright_yellow, cyan, dim, heading, styled_status};
use super::tables::{
    color_coded_duration_cell, color_coded_efficiency_cell, color_coded_wait_cell, create_cyan_header,
    create_table,
};

const NAME_WIDTH: usize = 50;
const STAGE_WIDTH: usize = 22;
const TIME_FORMAT: &str = "%H:%M:%S";

/// Prints the critical path of one pipeline as a fixed-width table.
pub fn print_critical_path(result: &CriticalPathResult) {
    println!("{}", render_critical_path(result));
}

/// Prints one table row per analyzed pipeline, then a line per failed pipeline.
pub fn print_batch_summary(outcome: &BatchOutcome) {
    println!("{}", render_batch_summary(outcome));
}

/// Prints the impacted modules as `- module: [targets]` lines.
pub fn print_impact(outcome: &ImpactOutcome) {
    print!("{}", render_impact(outcome));
}

fn truncate(text: &str, width: usize) -> String {
    text.chars().take(width).collect()
}

pub fn render_critical_path(result: &CriticalPathResult) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "{}", heading("🛤️", "Critical Path"));
    let _ = writeln!(
        output,
        "  {} {}\n  {} {:.0}s\n  {} {:.0}s\n  {} {:.0}s\n  {} {:.1}%\n",
        dim("Pipeline:"),
        cyan(&result.pipeline_id),
        dim("Pipeline duration:"),
        result.pipeline_duration,
        dim("Critical path duration:"),
        result.total_job_duration,
        dim("Wait time:"),
        result.total_wait_time,
        dim("Efficiency:"),
        result.efficiency * 100.0,
    );

    let _ = writeln!(
        output,
        "{:>3}  {:<NAME_WIDTH$}  {:<STAGE_WIDTH$}  {:>10}  {:<8}  {:<8}",
        "#", "Job", "Stage", "Duration", "Start", "End"
    );
    for (index, job) in result.critical_path.iter().enumerate() {
        let _ = writeln!(
            output,
            "{:>3}  {:<NAME_WIDTH$}  {:<STAGE_WIDTH$}  {:>9.1}s  {:<8}  {:<8}",
            index + 1,
            truncate(&job.name, NAME_WIDTH),
            truncate(&job.stage, STAGE_WIDTH),
            job.duration,
            job.start.format(TIME_FORMAT),
            job.end.format(TIME_FORMAT),
        );
    }

    let waits: Vec<_> = result.gaps.iter().filter(|gap| gap.gap_seconds > 0.0).collect();
    if !waits.is_empty() {
        let _ = writeln!(output, "\n{}", heading("⏳", "Waits"));
        for gap in waits {
            let _ = writeln!(
                output,
                "  {} → {}: {}",
                gap.from,
                gap.to,
                bright_yellow(format!("{:.0}s", gap.gap_seconds))
            );
        }
    }

    output
}

pub fn render_batch_summary(outcome: &BatchOutcome) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "{}", heading("📊", "Critical Paths"));

    if outcome.results.is_empty() {
        let _ = writeln!(output, "{}", bright_yellow("No pipeline could be analyzed."));
    } else {
        let mut table = create_table();
        table.set_header(create_cyan_header(&[
            "Pipeline",
            "Duration",
            "Critical Path",
            "Wait",
            "Efficiency",
            "Last Job",
        ]));

        for result in &outcome.results {
            let last = result.critical_path.last();
            table.add_row(vec![
                Cell::new(&result.pipeline_id),
                color_coded_duration_cell(result.pipeline_duration),
                Cell::new(result.critical_path.len()),
                color_coded_wait_cell(result.total_wait_time),
                color_coded_efficiency_cell(result.efficiency),
                Cell::new(last.map_or_else(String::new, |job| {
                    format!("{} ({})", job.name, styled_status(job.status))
                })),
            ]);
        }
        let _ = writeln!(output, "{table}");
    }

    for failure in &outcome.failures {
        let _ = writeln!(
            output,
            "  {} pipeline {}: {}",
            bright_red("✗"),
            failure.pipeline_id,
            failure.error
        );
    }

    output
}

pub fn render_impact(outcome: &ImpactOutcome) -> String {
    match outcome {
        ImpactOutcome::Targets { targets } => render_targets(targets),
        ImpactOutcome::AllTests { reason, targets } => {
            format!("# all tests: {reason}\n{}", render_targets(targets))
        }
        ImpactOutcome::NothingToTest => "# nothing to test\n".to_string(),
    }
}

fn render_targets(targets: &IndexMap<String, Vec<String>>) -> String {
    targets
        .iter()
        .map(|(module, module_targets)| format!("- {module}: [{}]\n", module_targets.join(", ")))
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::ci::{JobExecution, JobStatus};

    fn result() -> CriticalPathResult {
        let at = |secs| Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs);
        let long_name = "x".repeat(70);
        CriticalPathResult {
            pipeline_id: "42".to_string(),
            pipeline_start: at(0),
            pipeline_end: at(100),
            pipeline_duration: 100.0,
            critical_path: vec![
                JobExecution::new(1, "build", "build", JobStatus::Success, at(0), at(30)),
                JobExecution::new(
                    2,
                    long_name,
                    "a-very-long-stage-name-for-tests",
                    JobStatus::Success,
                    at(40),
                    at(100),
                ),
            ],
            total_job_duration: 90.0,
            total_wait_time: 10.0,
            efficiency: 0.9,
            gaps: vec![crate::ci::critical_path::Gap {
                from: "build".to_string(),
                to: "x".to_string(),
                gap_seconds: 10.0,
            }],
        }
    }

    #[test]
    fn test_critical_path_columns_are_truncated() {
        let rendered = console::strip_ansi_codes(&render_critical_path(&result())).to_string();

        assert!(rendered.contains(&"x".repeat(NAME_WIDTH)));
        assert!(!rendered.contains(&"x".repeat(NAME_WIDTH + 1)));
        assert!(rendered.contains("a-very-long-stage-name"));
        assert!(!rendered.contains("a-very-long-stage-name-"));
        assert!(rendered.contains("12:00:40"));
    }

    #[test]
    fn test_critical_path_header_precedes_table() {
        let rendered = console::strip_ansi_codes(&render_critical_path(&result())).to_string();

        assert!(rendered.contains("Efficiency:"));
        assert!(rendered.contains("%\n\n  #  Job"));
    }

    #[test]
    fn test_batch_summary_lists_failures() {
        let outcome = BatchOutcome {
            results: vec![result()],
            failures: vec![crate::ci::critical_path::PipelineFailure {
                pipeline_id: "43".to_string(),
                error: "Pipeline 43 has no job execution records".to_string(),
            }],
        };

        let rendered = console::strip_ansi_codes(&render_batch_summary(&outcome)).to_string();

        assert!(rendered.contains("42"));
        assert!(rendered.contains("pipeline 43: Pipeline 43 has no job execution records"));
    }

    #[test]
    fn test_impact_lines() {
        let outcome = ImpactOutcome::Targets {
            targets: IndexMap::from([
                (".".to_string(), vec!["./pkg/a".to_string(), "./cmd".to_string()]),
                ("pkg/util/log".to_string(), vec![".".to_string()]),
            ]),
        };

        assert_eq!(
            render_impact(&outcome),
            "- .: [./pkg/a, ./cmd]\n- pkg/util/log: [.]\n"
        );
        assert_eq!(render_impact(&ImpactOutcome::NothingToTest), "# nothing to test\n");
    }
}
