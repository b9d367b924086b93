use std::path::Path;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use log::debug;
use walkdir::WalkDir;

use crate::error::{CiGraphError, Result};

/// Globs whose modification means the whole test suite must run.
#[derive(Debug, Clone)]
pub struct TriggerPaths {
    globs: GlobSet,
}

impl TriggerPaths {
    /// Compiles the trigger globs and checks that each one still matches a
    /// file under `repo_root`, so a renamed target is caught at startup.
    ///
    /// # Errors
    ///
    /// Returns [`CiGraphError::UnmatchedTriggerGlob`] for the first glob that
    /// matches nothing, or a configuration error for an invalid pattern.
    pub fn new(patterns: &[String], repo_root: &Path) -> Result<Self> {
        let files = repository_files(repo_root);
        let mut builder = GlobSetBuilder::new();

        for pattern in patterns {
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| CiGraphError::Config(format!("Invalid trigger glob '{pattern}': {e}")))?;
            let matcher = glob.compile_matcher();
            if !files.iter().any(|file| matcher.is_match(file)) {
                return Err(CiGraphError::UnmatchedTriggerGlob(pattern.clone()));
            }
            builder.add(glob);
        }

        let globs = builder
            .build()
            .map_err(|e| CiGraphError::Config(format!("Invalid trigger globs: {e}")))?;
        Ok(Self { globs })
    }

    /// The modified files that hit a trigger glob.
    pub fn matching<'a>(&self, modified_files: &'a [String]) -> Vec<&'a str> {
        modified_files
            .iter()
            .map(String::as_str)
            .filter(|file| self.globs.is_match(file.trim_start_matches("./")))
            .collect()
    }
}

/// Repository-relative paths of every file, with forward slashes. `.git` is skipped.
fn repository_files(repo_root: &Path) -> Vec<String> {
    let files: Vec<String> = WalkDir::new(repo_root)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(repo_root)
                .ok()
                .map(|relative| relative.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    debug!("Indexed {} files under {}", files.len(), repo_root.display());
    files
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn repo() -> TempDir {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join(".gitlab-ci.yml"), "stages: []\n").unwrap();
        fs::create_dir_all(root.path().join(".gitlab/tests")).unwrap();
        fs::write(root.path().join(".gitlab/tests/unit.yml"), "{}\n").unwrap();
        root
    }

    fn patterns(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_matching_files() {
        let root = repo();
        let triggers =
            TriggerPaths::new(&patterns(&[".gitlab-ci.yml", ".gitlab/tests/*.yml"]), root.path()).unwrap();
        let modified = patterns(&["pkg/a/a.go", ".gitlab/tests/unit.yml"]);

        let hits = triggers.matching(&modified);

        assert_eq!(hits, vec![".gitlab/tests/unit.yml"]);
    }

    #[test]
    fn test_star_does_not_cross_directories() {
        let root = repo();
        fs::create_dir_all(root.path().join(".gitlab/tests/nested")).unwrap();
        fs::write(root.path().join(".gitlab/tests/nested/deep.yml"), "{}\n").unwrap();
        let triggers = TriggerPaths::new(&patterns(&[".gitlab/tests/*.yml"]), root.path()).unwrap();

        let paths = patterns(&[".gitlab/tests/nested/deep.yml", ".gitlab/tests/unit.yml"]);
        let hits = triggers.matching(&paths);

        assert_eq!(hits, vec![".gitlab/tests/unit.yml"]);
    }

    #[test]
    fn test_unmatched_glob_fails_fast() {
        let root = repo();

        let err = TriggerPaths::new(&patterns(&[".gitlab/renamed/*.yml"]), root.path()).unwrap_err();

        assert!(matches!(err, CiGraphError::UnmatchedTriggerGlob(glob) if glob == ".gitlab/renamed/*.yml"));
    }

    #[test]
    fn test_invalid_glob() {
        let root = repo();

        let err = TriggerPaths::new(&patterns(&["[unclosed"]), root.path()).unwrap_err();

        assert!(matches!(err, CiGraphError::Config(_)));
    }

    #[test]
    fn test_no_trigger_globs() {
        let root = repo();
        let triggers = TriggerPaths::new(&[], root.path()).unwrap();

        assert!(triggers.matching(&patterns(&[".gitlab-ci.yml"])).is_empty());
    }
}
