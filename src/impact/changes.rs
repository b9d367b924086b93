use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use log::debug;
use tokio::process::Command;

use super::modules::{normalize_dir, ROOT_MODULE};
use crate::error::{CiGraphError, Result};

const GO_MOD: &str = "go.mod";
const GO_SUM: &str = "go.sum";

/// Files changed between `base_ref` and `HEAD`, relative to the repository root.
pub async fn modified_files(repo_root: &Path, base_ref: &str, timeout: Duration) -> Result<Vec<String>> {
    let output = Command::new("git")
        .arg("diff")
        .arg("--name-only")
        .arg(format!("{base_ref}...HEAD"))
        .current_dir(repo_root)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let failure = |reason: String| CiGraphError::SubprocessFailure {
        module: repo_root.display().to_string(),
        reason,
    };

    match tokio::time::timeout(timeout, output).await {
        Ok(Ok(output)) if output.status.success() => {
            let files: Vec<String> = String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect();
            debug!("{} files modified since {base_ref}", files.len());
            Ok(files)
        }
        Ok(Ok(output)) => Err(failure(format!(
            "git diff exited with {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        ))),
        Ok(Err(e)) => Err(failure(format!("failed to run git diff: {e}"))),
        Err(_) => Err(failure(format!(
            "git diff timed out after {}s",
            timeout.as_secs()
        ))),
    }
}

/// What a set of modified files touches on the Go side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedPackages {
    /// Import paths of packages with a modified `.go` file.
    pub packages: BTreeSet<String>,
    /// Module directories whose `go.mod` or `go.sum` changed.
    pub modules: BTreeSet<String>,
}

impl ChangedPackages {
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty() && self.modules.is_empty()
    }
}

/// Maps modified files to the Go packages and modules they belong to.
///
/// Files of deleted directories are skipped. Non-Go files are ignored.
///
/// # Errors
///
/// Returns [`CiGraphError::MissingModule`] when a modified Go file has no
/// `go.mod` between its directory and the repository root.
pub fn changed_packages(
    modified_files: &[String],
    repo_root: &Path,
    import_prefix: &str,
) -> Result<ChangedPackages> {
    let mut changed = ChangedPackages::default();

    for file in modified_files {
        let relative = PathBuf::from(file.replace('\\', "/"));
        let Some(file_name) = relative.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let dir = relative
            .parent()
            .map(|parent| normalize_dir(&parent.to_string_lossy()))
            .unwrap_or_else(|| ROOT_MODULE.to_string());

        if !repo_root.join(&dir).is_dir() {
            debug!("Skipping {file}, its directory was deleted");
            continue;
        }

        if file_name == GO_MOD || file_name == GO_SUM {
            changed.modules.insert(dir);
            continue;
        }

        if !file_name.ends_with(".go") {
            continue;
        }

        if find_module_root(repo_root, &dir).is_none() {
            return Err(CiGraphError::MissingModule(relative));
        }
        changed.packages.insert(import_path(import_prefix, &dir));
    }

    Ok(changed)
}

/// Closest directory at or above `dir` holding a `go.mod`, without leaving `repo_root`.
pub fn find_module_root(repo_root: &Path, dir: &str) -> Option<String> {
    let mut current = Some(Path::new(dir));

    while let Some(candidate) = current {
        let absolute = if candidate.as_os_str().is_empty() {
            repo_root.to_path_buf()
        } else {
            repo_root.join(candidate)
        };
        if absolute.join(GO_MOD).is_file() {
            return Some(normalize_dir(&candidate.to_string_lossy()));
        }
        current = candidate.parent();
    }

    None
}

/// Import path of the package living in the repository-relative `dir`.
pub fn import_path(import_prefix: &str, dir: &str) -> String {
    if dir == ROOT_MODULE {
        import_prefix.to_string()
    } else {
        format!("{import_prefix}/{dir}")
    }
}
