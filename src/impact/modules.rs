use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use log::{debug, info};
use serde::Deserialize;

use crate::error::{CiGraphError, Result};

pub const ROOT_MODULE: &str = ".";

const DEFAULT_ENTRY: &str = "default";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShouldTestCondition {
    #[default]
    Always,
    Never,
    IsLinux,
    IsWindows,
    IsMacos,
}

impl ShouldTestCondition {
    pub fn holds(self) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::IsLinux => cfg!(target_os = "linux"),
            Self::IsWindows => cfg!(windows),
            Self::IsMacos => cfg!(target_os = "macos"),
        }
    }
}

/// A Go module of the repository, identified by its directory relative to the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoModule {
    pub path: String,
    pub test_targets: Vec<String>,
    pub lint_targets: Vec<String>,
    pub should_test_condition: ShouldTestCondition,
}

impl GoModule {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: normalize_dir(&path.into()),
            test_targets: default_targets(),
            lint_targets: default_targets(),
            should_test_condition: ShouldTestCondition::Always,
        }
    }

    pub fn should_test(&self) -> bool {
        self.should_test_condition.holds()
    }

    /// Whether `dir` (relative to the repository root) lies inside this module.
    pub fn contains_dir(&self, dir: &str) -> bool {
        self.path == ROOT_MODULE
            || dir == self.path
            || dir.strip_prefix(&self.path).is_some_and(|rest| rest.starts_with('/'))
    }

    /// `dir` relative to the module directory, as a `./`-prefixed Go target.
    pub fn relative_target(&self, dir: &str) -> String {
        let relative = if self.path == ROOT_MODULE {
            dir
        } else {
            dir.strip_prefix(&self.path)
                .map_or(dir, |rest| rest.trim_start_matches('/'))
        };

        if relative.is_empty() || relative == ROOT_MODULE {
            ROOT_MODULE.to_string()
        } else {
            format!("./{relative}")
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModulesFile {
    #[serde(default)]
    modules: IndexMap<String, ModuleEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ModuleEntry {
    /// `pkg/foo: default`
    Default(String),
    Custom(ModuleSettings),
}

#[derive(Debug, Deserialize)]
struct ModuleSettings {
    #[serde(default = "default_targets")]
    test_targets: Vec<String>,
    #[serde(default = "default_targets")]
    lint_targets: Vec<String>,
    #[serde(default)]
    should_test_condition: ShouldTestCondition,
}

fn default_targets() -> Vec<String> {
    vec![ROOT_MODULE.to_string()]
}

/// The Go modules of the repository, in declaration order.
///
/// Loaded once per invocation and handed to every component that needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRegistry {
    modules: IndexMap<String, GoModule>,
}

impl ModuleRegistry {
    /// Loads `modules.yml`, or a registry holding only the root module when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No module file at {}, using the root module", path.display());
            return Ok(Self::root_only());
        }

        let contents = fs::read_to_string(path)?;
        let registry = Self::from_yaml_str(&contents).map_err(|e| {
            CiGraphError::Config(format!("Failed to parse {}: {e}", path.display()))
        })?;
        info!("Loaded {} Go modules from {}", registry.len(), path.display());
        Ok(registry)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let file: ModulesFile = serde_yaml::from_str(contents)?;

        let modules = file
            .modules
            .into_iter()
            .map(|(path, entry)| {
                let mut module = GoModule::new(path);
                match entry {
                    ModuleEntry::Default(keyword) if keyword == DEFAULT_ENTRY => {}
                    ModuleEntry::Default(keyword) => {
                        return Err(CiGraphError::Config(format!(
                            "Module {} has unknown setting '{keyword}', expected '{DEFAULT_ENTRY}' or a mapping",
                            module.path
                        )));
                    }
                    ModuleEntry::Custom(settings) => {
                        module.test_targets = settings.test_targets;
                        module.lint_targets = settings.lint_targets;
                        module.should_test_condition = settings.should_test_condition;
                    }
                }
                Ok((module.path.clone(), module))
            })
            .collect::<Result<_>>()?;

        Ok(Self { modules })
    }

    pub fn root_only() -> Self {
        Self::from_modules([GoModule::new(ROOT_MODULE)])
    }

    pub fn from_modules(modules: impl IntoIterator<Item = GoModule>) -> Self {
        Self {
            modules: modules
                .into_iter()
                .map(|module| (module.path.clone(), module))
                .collect(),
        }
    }

    pub fn get(&self, path: &str) -> Option<&GoModule> {
        self.modules.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GoModule> {
        self.modules.values()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// The most specific module containing `dir`.
    pub fn owning_module(&self, dir: &str) -> Option<&GoModule> {
        self.modules
            .values()
            .filter(|module| module.contains_dir(dir))
            .max_by_key(|module| {
                if module.path == ROOT_MODULE {
                    0
                } else {
                    module.path.len()
                }
            })
    }

    /// Every testable module with its configured test targets.
    pub fn default_targets(&self) -> IndexMap<String, Vec<String>> {
        self.modules
            .values()
            .filter(|module| module.should_test())
            .map(|module| (module.path.clone(), module.test_targets.clone()))
            .collect()
    }
}

/// Normalizes a repository-relative directory: forward slashes, no `./` prefix,
/// no trailing slash, `.` for the root.
pub fn normalize_dir(dir: &str) -> String {
    let dir = dir.replace('\\', "/");
    let trimmed = dir.trim_start_matches("./").trim_end_matches('/');
    if trimmed.is_empty() {
        ROOT_MODULE.to_string()
    } else {
        trimmed.to_string()
    }
}
