//! Go package impact analysis: which test targets a change requires.

mod changes;
mod deps;
mod golist;
mod modules;
mod targets;
mod trigger;

use std::path::PathBuf;

use indexmap::IndexMap;
use log::info;
use serde::Serialize;

pub use changes::{changed_packages, modified_files};
pub use deps::{build_package_dependency_graph, find_impacted_packages, ImpactCache};
pub use golist::{GoLister, PackageLister};
pub use modules::ModuleRegistry;
pub use targets::{format_packages, guard_command_line};
pub use trigger::TriggerPaths;

use crate::error::Result;

/// Result of an impact analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ImpactOutcome {
    /// Test targets per module directory.
    Targets { targets: IndexMap<String, Vec<String>> },
    /// A trigger file changed; every module runs its default targets.
    AllTests {
        reason: String,
        targets: IndexMap<String, Vec<String>>,
    },
    NothingToTest,
}

#[derive(Debug, Clone)]
pub struct ImpactSettings {
    pub repo_root: PathBuf,
    pub import_prefix: String,
    pub build_tags: Vec<String>,
    pub trigger_globs: Vec<String>,
    pub batch_size: usize,
    /// Maximum length of one module's joined target list, when enforced.
    pub command_line_limit: Option<usize>,
}

pub struct ImpactAnalyzer<'a, L> {
    settings: ImpactSettings,
    registry: &'a ModuleRegistry,
    lister: L,
    triggers: TriggerPaths,
}

impl<'a, L: PackageLister> ImpactAnalyzer<'a, L> {
    /// # Errors
    ///
    /// Fails when a trigger glob is invalid or matches no file of the repository.
    pub fn new(settings: ImpactSettings, registry: &'a ModuleRegistry, lister: L) -> Result<Self> {
        let triggers = TriggerPaths::new(&settings.trigger_globs, &settings.repo_root)?;
        Ok(Self {
            settings,
            registry,
            lister,
            triggers,
        })
    }

    pub async fn analyze(&self, modified_files: &[String]) -> Result<ImpactOutcome> {
        let hits = self.triggers.matching(modified_files);
        if let Some(first) = hits.first() {
            info!("{first} was modified, running all tests");
            return Ok(ImpactOutcome::AllTests {
                reason: format!("{first} was modified"),
                targets: self.registry.default_targets(),
            });
        }

        let changed = changed_packages(
            modified_files,
            &self.settings.repo_root,
            &self.settings.import_prefix,
        )?;
        if changed.is_empty() {
            info!("No Go package affected by {} modified files", modified_files.len());
            return Ok(ImpactOutcome::NothingToTest);
        }

        let mut targets = IndexMap::new();

        if !changed.packages.is_empty() {
            let graph = build_package_dependency_graph(
                &self.lister,
                &self.settings.repo_root,
                self.registry,
                &self.settings.build_tags,
                &self.settings.import_prefix,
                self.settings.batch_size,
            )
            .await;

            let mut cache = ImpactCache::new();
            let impacted =
                find_impacted_packages(&graph, changed.packages.iter().map(String::as_str), &mut cache);
            info!(
                "{} changed packages impact {} packages",
                changed.packages.len(),
                impacted.len()
            );

            targets = format_packages(
                &impacted,
                self.registry,
                &self.settings.repo_root,
                &self.settings.import_prefix,
            );
        }

        for module_dir in &changed.modules {
            match self.registry.get(module_dir) {
                Some(module) if module.should_test() => {
                    info!("Dependencies of module {module_dir} changed, testing its default targets");
                    targets.insert(module.path.clone(), module.test_targets.clone());
                }
                Some(_) => {}
                None => info!("{module_dir} is not a registered module, ignoring its go.mod change"),
            }
        }

        if let Some(limit) = self.settings.command_line_limit {
            targets = guard_command_line(targets, self.registry, limit);
        }

        if targets.is_empty() {
            Ok(ImpactOutcome::NothingToTest)
        } else {
            Ok(ImpactOutcome::Targets { targets })
        }
    }
}
