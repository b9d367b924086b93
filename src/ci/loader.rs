use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use globset::GlobBuilder;
use log::{debug, warn};
use walkdir::WalkDir;

use super::value::{Mapping, Value};
use crate::error::{CiGraphError, Result};

/// GitLab caps nested `!reference` resolution at ten levels.
const MAX_REFERENCE_DEPTH: usize = 10;

const SKIPPED_INCLUDE_KINDS: [&str; 4] = ["remote", "project", "template", "component"];

/// Loads a root CI configuration and resolves every local `include:` and
/// `!reference` in it.
///
/// Included files are merged first, in declaration order, then the including
/// file's own keys; each merge is last-wins per top-level key. Remote,
/// project, template and component includes are skipped since only the CI
/// provider can resolve them, so jobs defined there are missing from the
/// result.
///
/// # Errors
///
/// * `ConfigParse` when any loaded document is not valid YAML or not a mapping
/// * `Include` when a local include does not exist
/// * `UnresolvedReference` when a `!reference` path does not exist
pub fn resolve_configuration(root_file: &Path) -> Result<Mapping> {
    let mut loader = IncludeLoader {
        repo_root: include_root(root_file),
        visited: HashSet::new(),
    };
    let merged = loader.load_file(root_file)?;

    resolve_references(&merged)
}

/// Replaces every `!reference` in `config` by the value it points to.
///
/// # Errors
///
/// Returns `UnresolvedReference` for a path that does not exist in `config`, and
/// `InvalidConfig` when references nest deeper than GitLab allows.
pub fn resolve_references(config: &Mapping) -> Result<Mapping> {
    config
        .iter()
        .map(|(key, value)| Ok((key.clone(), resolve_value(value, config, 0)?)))
        .collect()
}

/// Directory local includes are relative to: the root file's parent, or `.`
/// for a bare file name.
fn include_root(root_file: &Path) -> PathBuf {
    root_file
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

fn resolve_value(value: &Value, root: &Mapping, depth: usize) -> Result<Value> {
    match value {
        Value::Reference(path) => {
            if depth >= MAX_REFERENCE_DEPTH {
                return Err(CiGraphError::InvalidConfig(format!(
                    "!reference [{}] nests deeper than {MAX_REFERENCE_DEPTH} levels",
                    path.join(", ")
                )));
            }
            let target = lookup(root, path).ok_or_else(|| CiGraphError::UnresolvedReference {
                path: path.clone(),
            })?;
            resolve_value(target, root, depth + 1)
        }
        Value::Sequence(items) => Ok(Value::Sequence(
            items
                .iter()
                .map(|item| resolve_value(item, root, depth))
                .collect::<Result<_>>()?,
        )),
        Value::Mapping(map) => Ok(Value::Mapping(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), resolve_value(v, root, depth)?)))
                .collect::<Result<_>>()?,
        )),
        other => Ok(other.clone()),
    }
}

fn lookup<'a>(root: &'a Mapping, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    rest.iter()
        .try_fold(root.get(first)?, |current, key| current.get(key))
}

struct IncludeLoader {
    repo_root: PathBuf,
    visited: HashSet<PathBuf>,
}

impl IncludeLoader {
    fn load_file(&mut self, path: &Path) -> Result<Mapping> {
        self.visited.insert(normalize(path));
        debug!("Loading CI configuration from {}", path.display());

        let mut own = parse_document(path)?;

        let mut merged = Mapping::new();
        if let Some(include) = own.shift_remove("include") {
            for local in self.local_includes(&include)? {
                if !self.visited.insert(normalize(&local)) {
                    debug!("Skipping already included file {}", local.display());
                    continue;
                }
                let included = self.load_file(&local)?;
                merged.extend(included);
            }
        }
        merged.extend(own);

        Ok(merged)
    }

    fn local_includes(&self, include: &Value) -> Result<Vec<PathBuf>> {
        match include {
            Value::Sequence(items) => {
                let mut paths = Vec::new();
                for item in items {
                    paths.extend(self.local_includes(item)?);
                }
                Ok(paths)
            }
            Value::String(location) => {
                if location.starts_with("http://") || location.starts_with("https://") {
                    warn!("Skipping remote include {location}");
                    return Ok(vec![]);
                }
                self.expand_local(location)
            }
            Value::Mapping(map) => {
                if let Some(local) = map.get("local").and_then(Value::as_str) {
                    return self.expand_local(local);
                }
                match SKIPPED_INCLUDE_KINDS.iter().find(|kind| map.contains_key(**kind)) {
                    Some(kind) => warn!("Skipping {kind} include, it is resolved by GitLab"),
                    None => warn!("Skipping unsupported include entry: {map:?}"),
                }
                Ok(vec![])
            }
            Value::Null => Ok(vec![]),
            other => Err(CiGraphError::Include {
                path: format!("{other:?}"),
                reason: "include entries must be strings, maps or lists".to_string(),
            }),
        }
    }

    fn expand_local(&self, location: &str) -> Result<Vec<PathBuf>> {
        let relative = location.trim_start_matches('/');

        if !relative.contains(['*', '?', '[']) {
            let path = self.repo_root.join(relative);
            if !path.is_file() {
                return Err(CiGraphError::Include {
                    path: location.to_string(),
                    reason: "local file does not exist".to_string(),
                });
            }
            return Ok(vec![path]);
        }

        let matcher = GlobBuilder::new(relative)
            .literal_separator(true)
            .build()
            .map_err(|e| CiGraphError::Include {
                path: location.to_string(),
                reason: e.to_string(),
            })?
            .compile_matcher();

        let mut matches: Vec<PathBuf> = WalkDir::new(&self.repo_root)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .strip_prefix(&self.repo_root)
                    .is_ok_and(|rel| matcher.is_match(rel))
            })
            .map(walkdir::DirEntry::into_path)
            .collect();
        matches.sort();

        if matches.is_empty() {
            return Err(CiGraphError::Include {
                path: location.to_string(),
                reason: "wildcard include matches no file".to_string(),
            });
        }
        Ok(matches)
    }
}

fn parse_document(path: &Path) -> Result<Mapping> {
    let parse_error = |reason: String| CiGraphError::ConfigParse {
        path: path.to_path_buf(),
        reason,
    };

    let source = fs::read_to_string(path).map_err(|e| parse_error(e.to_string()))?;
    let mut document: serde_yaml::Value =
        serde_yaml::from_str(&source).map_err(|e| parse_error(e.to_string()))?;
    document
        .apply_merge()
        .map_err(|e| parse_error(e.to_string()))?;

    match Value::from_yaml(document).map_err(|e| parse_error(e.to_string()))? {
        Value::Mapping(map) => Ok(map),
        Value::Null => Ok(Mapping::new()),
        _ => Err(parse_error("top-level document is not a mapping".to_string())),
    }
}

fn normalize(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    mod resolve_configuration_tests {
        use super::*;

        #[test]
        fn test_local_includes_are_merged() {
            // Arrange
            let dir = TempDir::new().unwrap();
            write(&dir, ".gitlab/build.yml", "build:\n  stage: build\n  script: [make]\n");
            let root = write(
                &dir,
                ".gitlab-ci.yml",
                "include:\n  - local: .gitlab/build.yml\ntest:\n  script: [make test]\n",
            );

            // Act
            let config = resolve_configuration(&root).unwrap();

            // Assert
            assert!(config.contains_key("build"));
            assert!(config.contains_key("test"));
            assert!(!config.contains_key("include"));
        }

        #[test]
        fn test_including_file_wins_over_included() {
            let dir = TempDir::new().unwrap();
            write(&dir, "base.yml", "variables:\n  FROM: base\n");
            let root = write(
                &dir,
                ".gitlab-ci.yml",
                "include: base.yml\nvariables:\n  FROM: root\n",
            );

            let config = resolve_configuration(&root).unwrap();

            assert_eq!(
                config["variables"].get("FROM").and_then(Value::as_str),
                Some("root")
            );
        }

        #[test]
        fn test_later_include_wins() {
            let dir = TempDir::new().unwrap();
            write(&dir, "a.yml", "job:\n  stage: build\n");
            write(&dir, "b.yml", "job:\n  stage: deploy\n");
            let root = write(&dir, ".gitlab-ci.yml", "include: [a.yml, b.yml]\n");

            let config = resolve_configuration(&root).unwrap();

            assert_eq!(config["job"].get("stage").and_then(Value::as_str), Some("deploy"));
        }

        #[test]
        fn test_nested_and_wildcard_includes() {
            let dir = TempDir::new().unwrap();
            write(&dir, ".gitlab/one.yml", "include: /.gitlab/nested/three.yml\none: {}\n");
            write(&dir, ".gitlab/two.yml", "two: {}\n");
            write(&dir, ".gitlab/nested/three.yml", "three: {}\n");
            let root = write(&dir, ".gitlab-ci.yml", "include:\n  - local: .gitlab/*.yml\n");

            let config = resolve_configuration(&root).unwrap();

            let keys: Vec<&str> = config.keys().map(String::as_str).collect();
            assert_eq!(keys, vec!["three", "one", "two"]);
        }

        #[test]
        fn test_wildcard_include_from_relative_root_file() {
            // Arrange
            let dir = TempDir::new().unwrap();
            write(&dir, ".gitlab/a.yml", "a: {}\n");
            write(&dir, ".gitlab-ci.yml", "include:\n  - local: .gitlab/*.yml\n");
            let previous = std::env::current_dir().unwrap();
            std::env::set_current_dir(dir.path()).unwrap();

            // Act
            let result = resolve_configuration(Path::new(".gitlab-ci.yml"));
            std::env::set_current_dir(previous).unwrap();

            // Assert
            assert!(result.unwrap().contains_key("a"));
        }

        #[test]
        fn test_remote_and_template_includes_are_skipped() {
            let dir = TempDir::new().unwrap();
            let root = write(
                &dir,
                ".gitlab-ci.yml",
                "include:\n  - https://example.com/ci.yml\n  - template: Security/SAST.gitlab-ci.yml\n  - remote: https://example.com/other.yml\njob: {}\n",
            );

            let config = resolve_configuration(&root).unwrap();

            assert_eq!(config.len(), 1);
        }

        #[test]
        fn test_include_cycle_terminates() {
            let dir = TempDir::new().unwrap();
            write(&dir, "a.yml", "include: b.yml\na: {}\n");
            write(&dir, "b.yml", "include: a.yml\nb: {}\n");
            let root = write(&dir, ".gitlab-ci.yml", "include: a.yml\n");

            let config = resolve_configuration(&root).unwrap();

            assert!(config.contains_key("a"));
            assert!(config.contains_key("b"));
        }

        #[test]
        fn test_missing_local_include_fails() {
            let dir = TempDir::new().unwrap();
            let root = write(&dir, ".gitlab-ci.yml", "include: missing.yml\n");

            let err = resolve_configuration(&root).unwrap_err();

            assert!(matches!(err, CiGraphError::Include { .. }));
        }

        #[test]
        fn test_malformed_yaml_is_fatal() {
            let dir = TempDir::new().unwrap();
            write(&dir, "broken.yml", "job: [unclosed\n");
            let root = write(&dir, ".gitlab-ci.yml", "include: broken.yml\nok: {}\n");

            let err = resolve_configuration(&root).unwrap_err();

            match err {
                CiGraphError::ConfigParse { path, .. } => assert!(path.ends_with("broken.yml")),
                other => panic!("unexpected error: {other}"),
            }
        }

        #[test]
        fn test_yaml_merge_keys_are_applied() {
            let dir = TempDir::new().unwrap();
            let root = write(
                &dir,
                ".gitlab-ci.yml",
                ".defaults: &defaults\n  stage: build\njob:\n  <<: *defaults\n  script: [make]\n",
            );

            let config = resolve_configuration(&root).unwrap();

            assert_eq!(config["job"].get("stage").and_then(Value::as_str), Some("build"));
        }

        #[test]
        fn test_resolution_is_idempotent() {
            let dir = TempDir::new().unwrap();
            write(&dir, "common.yml", ".setup:\n  script: [echo setup]\n");
            let root = write(
                &dir,
                ".gitlab-ci.yml",
                "include: common.yml\njob:\n  script:\n    - !reference [.setup, script]\n    - make\n",
            );

            let first = serde_yaml::to_string(&Value::Mapping(resolve_configuration(&root).unwrap()))
                .unwrap();
            let second =
                serde_yaml::to_string(&Value::Mapping(resolve_configuration(&root).unwrap()))
                    .unwrap();

            assert_eq!(first, second);
        }
    }

    mod include_root_tests {
        use super::*;

        #[test]
        fn test_bare_file_name_resolves_from_current_dir() {
            assert_eq!(include_root(Path::new(".gitlab-ci.yml")), PathBuf::from("."));
        }

        #[test]
        fn test_nested_file_resolves_from_its_parent() {
            assert_eq!(
                include_root(Path::new("ci/.gitlab-ci.yml")),
                PathBuf::from("ci")
            );
        }
    }

    mod resolve_references_tests {
        use super::*;

        fn mapping(source: &str) -> Mapping {
            match Value::from_yaml(serde_yaml::from_str(source).unwrap()).unwrap() {
                Value::Mapping(map) => map,
                _ => unreachable!(),
            }
        }

        #[test]
        fn test_reference_to_list_keeps_sequence() {
            let config = mapping(
                ".setup:\n  script: [a, b]\njob:\n  script:\n    - !reference [.setup, script]\n    - c\n",
            );

            let resolved = resolve_references(&config).unwrap();

            assert_eq!(
                resolved["job"].get("script"),
                Some(&Value::Sequence(vec![
                    Value::Sequence(vec![
                        Value::String("a".to_string()),
                        Value::String("b".to_string())
                    ]),
                    Value::String("c".to_string()),
                ]))
            );
        }

        #[test]
        fn test_nested_references_resolve() {
            let config = mapping(
                ".a:\n  vars: {X: 1}\n.b:\n  vars: !reference [.a, vars]\njob:\n  variables: !reference [.b, vars]\n",
            );

            let resolved = resolve_references(&config).unwrap();

            assert_eq!(
                resolved["job"].get("variables"),
                Some(&Value::Mapping(mapping("X: 1")))
            );
        }

        #[test]
        fn test_unresolved_reference_is_an_error() {
            let config = mapping("job:\n  script: !reference [.missing, script]\n");

            let err = resolve_references(&config).unwrap_err();

            match err {
                CiGraphError::UnresolvedReference { path } => {
                    assert_eq!(path, vec![".missing".to_string(), "script".to_string()]);
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[test]
        fn test_self_referencing_value_is_bounded() {
            let config = mapping(".loop:\n  x: !reference [.loop, x]\n");

            let err = resolve_references(&config).unwrap_err();

            assert!(matches!(err, CiGraphError::InvalidConfig(_)));
        }
    }
}
