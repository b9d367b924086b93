use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use log::debug;
use tokio::process::Command;

use crate::error::{CiGraphError, Result};

const LIST_FORMAT: &str = "{{.ImportPath}} {{.Imports}} {{.TestImports}} {{.XTestImports}}";
const NO_PACKAGES_MARKER: &str = "matched no packages";

/// Source of `go list` output for a module directory.
pub trait PackageLister {
    /// Lists every package below `module_dir`, one line per package in
    /// `<import path> [imports] [test imports] [external test imports]` form.
    fn list_packages(
        &self,
        module_dir: &Path,
        build_tags: &[String],
    ) -> impl Future<Output = Result<String>>;
}

/// Runs the Go toolchain.
#[derive(Debug, Clone)]
pub struct GoLister {
    timeout: Duration,
}

impl GoLister {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl PackageLister for GoLister {
    async fn list_packages(&self, module_dir: &Path, build_tags: &[String]) -> Result<String> {
        let module = module_dir.display().to_string();
        let mut command = Command::new("go");
        command.arg("list").arg("-f").arg(LIST_FORMAT);
        if !build_tags.is_empty() {
            command.arg("-tags").arg(build_tags.join(","));
        }
        command
            .arg("./...")
            .current_dir(module_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Listing Go packages in {module}");

        match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => classify_listing(
                &module,
                output.status.success(),
                &String::from_utf8_lossy(&output.stdout),
                &String::from_utf8_lossy(&output.stderr),
            ),
            Ok(Err(e)) => Err(CiGraphError::SubprocessFailure {
                module,
                reason: format!("failed to run go list: {e}"),
            }),
            Err(_) => Err(CiGraphError::SubprocessFailure {
                module,
                reason: format!("go list timed out after {}s", self.timeout.as_secs()),
            }),
        }
    }
}

/// Maps the outcome of a `go list` run to its output or a typed failure.
///
/// A module with no package matching the build tags is not a failure of the
/// toolchain; it gets its own error so callers can skip it quietly.
pub fn classify_listing(module: &str, success: bool, stdout: &str, stderr: &str) -> Result<String> {
    let no_packages = stderr.contains(NO_PACKAGES_MARKER);

    if success && !(no_packages && stdout.trim().is_empty()) {
        return Ok(stdout.to_string());
    }

    if no_packages {
        return Err(CiGraphError::NoPackagesMatched {
            module: module.to_string(),
        });
    }

    Err(CiGraphError::SubprocessFailure {
        module: module.to_string(),
        reason: stderr.trim().to_string(),
    })
}

/// One line of `go list` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageImports {
    pub import_path: String,
    pub imports: Vec<String>,
}

/// Parses `path [a b] [c] []`; imports of all bracket groups are merged.
pub fn parse_package_line(line: &str) -> Option<PackageImports> {
    let line = line.trim();
    let (import_path, rest) = match line.split_once(' ') {
        Some((path, rest)) => (path, rest),
        None => (line, ""),
    };
    if import_path.is_empty() {
        return None;
    }

    let mut imports = Vec::new();
    let mut remaining = rest;
    while let Some(open) = remaining.find('[') {
        let after_open = &remaining[open + 1..];
        let Some(close) = after_open.find(']') else {
            break;
        };
        imports.extend(after_open[..close].split_whitespace().map(str::to_string));
        remaining = &after_open[close + 1..];
    }

    Some(PackageImports {
        import_path: import_path.to_string(),
        imports,
    })
}
