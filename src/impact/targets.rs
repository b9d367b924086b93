use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use indexmap::IndexMap;
use log::{debug, warn};

use super::modules::{GoModule, ModuleRegistry, ROOT_MODULE};

/// Turns impacted import paths into per-module test targets.
///
/// A package is kept when a testable module owns it, one of that module's
/// test targets covers it, and its directory still exists. Targets are
/// relative to the module directory and nested ones are collapsed.
pub fn format_packages(
    impacted: &BTreeSet<String>,
    registry: &ModuleRegistry,
    repo_root: &Path,
    import_prefix: &str,
) -> IndexMap<String, Vec<String>> {
    let mut by_module: IndexMap<String, Vec<String>> = IndexMap::new();
    let mut matchers: HashMap<String, TargetMatcher> = HashMap::new();

    for package in impacted {
        let Some(dir) = package_dir(package, import_prefix) else {
            debug!("Ignoring package outside {import_prefix}: {package}");
            continue;
        };

        let Some(module) = registry.owning_module(&dir) else {
            debug!("No module owns {dir}");
            continue;
        };
        if !module.should_test() {
            continue;
        }

        let target = module.relative_target(&dir);
        let matcher = matchers
            .entry(module.path.clone())
            .or_insert_with(|| TargetMatcher::for_module(module));
        if !matcher.covers(&target) {
            debug!("{target} is not a test target of module {}", module.path);
            continue;
        }
        if !repo_root.join(&dir).is_dir() {
            debug!("Package directory {dir} no longer exists");
            continue;
        }

        by_module.entry(module.path.clone()).or_default().push(target);
    }

    // Registry order, not discovery order.
    registry
        .iter()
        .filter_map(|module| {
            by_module
                .swap_remove(&module.path)
                .map(|targets| (module.path.clone(), clean_nested_paths(targets)))
        })
        .filter(|(_, targets)| !targets.is_empty())
        .collect()
}

/// Repository-relative directory of an import path below `import_prefix`.
pub fn package_dir(package: &str, import_prefix: &str) -> Option<String> {
    if package == import_prefix {
        return Some(ROOT_MODULE.to_string());
    }
    package
        .strip_prefix(import_prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .map(str::to_string)
}

/// Test targets a module declares, as a matcher over module-relative targets.
struct TargetMatcher {
    covers_root: bool,
    globs: GlobSet,
}

impl TargetMatcher {
    fn for_module(module: &GoModule) -> Self {
        let mut covers_root = false;
        let mut builder = GlobSetBuilder::new();

        for configured in &module.test_targets {
            let base = configured
                .trim_start_matches("./")
                .trim_end_matches("/...")
                .trim_end_matches('/');

            if base.is_empty() || base == ROOT_MODULE || base == "..." {
                covers_root = true;
                continue;
            }

            for pattern in [base.to_string(), format!("{base}/**")] {
                match Glob::new(&pattern) {
                    Ok(glob) => {
                        builder.add(glob);
                    }
                    Err(e) => warn!(
                        "Invalid test target '{configured}' in module {}: {e}",
                        module.path
                    ),
                }
            }
        }

        let globs = builder.build().unwrap_or_else(|e| {
            warn!("Failed to build test target matcher for module {}: {e}", module.path);
            GlobSet::empty()
        });
        Self { covers_root, globs }
    }

    fn covers(&self, target: &str) -> bool {
        self.covers_root || (target != ROOT_MODULE && self.globs.is_match(target.trim_start_matches("./")))
    }
}

/// Drops every path that lies below another path of the list.
///
/// Trailing slashes are ignored, nesting is component-aware and `.` covers
/// everything. Shorter paths come first in the result.
pub fn clean_nested_paths(paths: Vec<String>) -> Vec<String> {
    let mut normalized: Vec<String> = paths
        .into_iter()
        .map(|path| {
            let trimmed = path.trim_end_matches('/');
            if trimmed.is_empty() {
                ROOT_MODULE.to_string()
            } else {
                trimmed.to_string()
            }
        })
        .collect();
    normalized.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    normalized.dedup();

    if normalized.iter().any(|path| path == ROOT_MODULE) {
        return vec![ROOT_MODULE.to_string()];
    }

    let mut kept: Vec<String> = Vec::new();
    for path in normalized {
        let nested = kept.iter().any(|parent| {
            path.strip_prefix(parent.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
        });
        if !nested {
            kept.push(path);
        }
    }
    kept
}

/// Replaces a module's targets with its configured defaults when the joined
/// target list would not fit on one command line.
pub fn guard_command_line(
    targets: IndexMap<String, Vec<String>>,
    registry: &ModuleRegistry,
    limit: usize,
) -> IndexMap<String, Vec<String>> {
    targets
        .into_iter()
        .map(|(module, module_targets)| {
            let length = module_targets.join(" ").len();
            if length <= limit {
                return (module, module_targets);
            }
            match registry.get(&module) {
                Some(definition) => {
                    warn!(
                        "Target list of module {module} is {length} characters long, testing its default targets"
                    );
                    (module, definition.test_targets.clone())
                }
                None => (module, module_targets),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    mod clean_nested_paths_tests {
        use super::*;

        fn strings(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        }

        #[test]
        fn test_nested_paths_are_dropped() {
            let cleaned = clean_nested_paths(strings(&[
                "./pkg/utils/toto",
                "./pkg/utils/",
                "./pkg",
                "./toto/pkg",
            ]));

            assert_eq!(cleaned, strings(&["./pkg", "./toto/pkg"]));
        }

        #[test]
        fn test_shared_prefix_is_not_nesting() {
            let cleaned = clean_nested_paths(strings(&["./pkg/util", "./pkg/utils"]));

            assert_eq!(cleaned, strings(&["./pkg/util", "./pkg/utils"]));
        }

        #[test]
        fn test_root_covers_everything() {
            let cleaned = clean_nested_paths(strings(&["./pkg/a", ".", "./cmd"]));

            assert_eq!(cleaned, strings(&["."]));
        }

        #[test]
        fn test_duplicates_collapse() {
            let cleaned = clean_nested_paths(strings(&["./pkg/a", "./pkg/a/"]));

            assert_eq!(cleaned, strings(&["./pkg/a"]));
        }
    }

    mod format_packages_tests {
        use super::*;

        const PREFIX: &str = "example.com/repo";

        fn repo(dirs: &[&str]) -> TempDir {
            let root = TempDir::new().unwrap();
            for dir in dirs {
                fs::create_dir_all(root.path().join(dir)).unwrap();
            }
            root
        }

        fn impacted(packages: &[&str]) -> BTreeSet<String> {
            packages.iter().map(|p| format!("{PREFIX}/{p}")).collect()
        }

        #[test]
        fn test_groups_targets_by_owning_module() {
            // Arrange
            let root = repo(&["pkg/a", "pkg/a/b", "pkg/util/log/setup", "cmd/agent"]);
            let registry = ModuleRegistry::from_modules([
                GoModule::new("."),
                GoModule::new("pkg/util/log"),
            ]);

            // Act
            let targets = format_packages(
                &impacted(&["pkg/a", "pkg/a/b", "pkg/util/log/setup", "cmd/agent"]),
                &registry,
                root.path(),
                PREFIX,
            );

            // Assert
            assert_eq!(targets.get("."), Some(&vec!["./pkg/a".to_string(), "./cmd/agent".to_string()]));
            assert_eq!(targets.get("pkg/util/log"), Some(&vec!["./setup".to_string()]));
        }

        #[test]
        fn test_filters_missing_dirs_and_foreign_targets() {
            let root = repo(&["pkg/a", "internal/tools"]);
            let mut root_module = GoModule::new(".");
            root_module.test_targets = vec!["./pkg".to_string(), "./cmd/...".to_string()];
            let registry = ModuleRegistry::from_modules([root_module]);

            let targets = format_packages(
                &impacted(&["pkg/a", "pkg/deleted", "internal/tools"]),
                &registry,
                root.path(),
                PREFIX,
            );

            assert_eq!(targets.get("."), Some(&vec!["./pkg/a".to_string()]));
        }

        #[test]
        fn test_untestable_module_is_dropped() {
            let root = repo(&["tools/gen"]);
            let mut tools = GoModule::new("tools");
            tools.should_test_condition = crate::impact::modules::ShouldTestCondition::Never;
            let registry = ModuleRegistry::from_modules([GoModule::new("."), tools]);

            let targets = format_packages(&impacted(&["tools/gen"]), &registry, root.path(), PREFIX);

            assert!(targets.is_empty());
        }

        #[test]
        fn test_module_root_package() {
            let root = repo(&["pkg/util/log"]);
            let registry = ModuleRegistry::from_modules([
                GoModule::new("."),
                GoModule::new("pkg/util/log"),
            ]);

            let targets = format_packages(&impacted(&["pkg/util/log"]), &registry, root.path(), PREFIX);

            assert_eq!(targets.get("pkg/util/log"), Some(&vec![".".to_string()]));
        }
    }

    mod guard_command_line_tests {
        use super::*;

        #[test]
        fn test_long_target_lists_fall_back_to_defaults() {
            let mut module = GoModule::new(".");
            module.test_targets = vec!["./pkg".to_string(), "./cmd".to_string()];
            let registry = ModuleRegistry::from_modules([module, GoModule::new("small")]);
            let long: Vec<String> = (0..50).map(|i| format!("./pkg/package_{i}")).collect();
            let targets = IndexMap::from([
                (".".to_string(), long),
                ("small".to_string(), vec!["./a".to_string()]),
            ]);

            let guarded = guard_command_line(targets, &registry, 100);

            assert_eq!(guarded["."], vec!["./pkg", "./cmd"]);
            assert_eq!(guarded["small"], vec!["./a"]);
        }
    }

    #[test]
    fn test_package_dir() {
        assert_eq!(package_dir("example.com/repo/pkg/a", "example.com/repo").as_deref(), Some("pkg/a"));
        assert_eq!(package_dir("example.com/repo", "example.com/repo").as_deref(), Some("."));
        assert_eq!(package_dir("example.com/repository/x", "example.com/repo"), None);
    }
}
