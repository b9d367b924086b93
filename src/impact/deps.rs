use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::Path;

use futures::future::join_all;
use log::{debug, info, warn};

use super::golist::{parse_package_line, PackageLister};
use super::modules::ModuleRegistry;
use crate::error::CiGraphError;

/// Reverse import graph: every internal package mapped to the packages that import it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageDependencyGraph {
    importers: BTreeMap<String, BTreeSet<String>>,
}

impl PackageDependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the graph from a forward `package -> imported packages` listing.
    #[cfg(test)]
    pub fn from_imports<I, P, D>(imports: I) -> Self
    where
        I: IntoIterator<Item = (P, D)>,
        P: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        let mut graph = Self::new();
        for (package, deps) in imports {
            let package = package.into();
            graph.add_package(&package);
            for dep in deps {
                graph.add_import(&package, dep.into());
            }
        }
        graph
    }

    pub fn add_package(&mut self, package: &str) {
        self.importers.entry(package.to_string()).or_default();
    }

    /// Records that `importer` imports `imported`.
    pub fn add_import(&mut self, importer: &str, imported: String) {
        if importer == imported {
            return;
        }
        self.importers
            .entry(imported)
            .or_default()
            .insert(importer.to_string());
    }

    pub fn importers_of(&self, package: &str) -> Option<&BTreeSet<String>> {
        self.importers.get(package)
    }

    pub fn len(&self) -> usize {
        self.importers.len()
    }
}

/// Lists the packages of every module, `batch_size` modules at a time, and
/// collects the imports that stay inside `import_prefix`.
///
/// A module whose listing fails is logged and left out; the graph is built
/// from the remaining modules.
pub async fn build_package_dependency_graph<L: PackageLister>(
    lister: &L,
    repo_root: &Path,
    modules: &ModuleRegistry,
    build_tags: &[String],
    import_prefix: &str,
    batch_size: usize,
) -> PackageDependencyGraph {
    let module_paths: Vec<&str> = modules.iter().map(|module| module.path.as_str()).collect();
    let mut graph = PackageDependencyGraph::new();

    for batch in module_paths.chunks(batch_size.max(1)) {
        let listings = join_all(batch.iter().map(|module| {
            let module_dir = repo_root.join(module);
            async move { lister.list_packages(&module_dir, build_tags).await }
        }))
        .await;

        for (module, listing) in batch.iter().zip(listings) {
            match listing {
                Ok(output) => {
                    let before = graph.len();
                    add_listing(&mut graph, &output, import_prefix);
                    debug!("Module {module}: {} new packages", graph.len() - before);
                }
                Err(CiGraphError::NoPackagesMatched { .. }) => {
                    debug!("Module {module} has no package for the current build tags");
                }
                Err(e) => warn!("Skipping module {module}: {e}"),
            }
        }
    }

    info!(
        "Built package dependency graph with {} packages from {} modules",
        graph.len(),
        module_paths.len()
    );
    graph
}

fn add_listing(graph: &mut PackageDependencyGraph, output: &str, import_prefix: &str) {
    for package in output.lines().filter_map(parse_package_line) {
        graph.add_package(&package.import_path);
        for import in package.imports {
            if is_internal(&import, import_prefix) {
                graph.add_import(&package.import_path, import);
            }
        }
    }
}

fn is_internal(import: &str, import_prefix: &str) -> bool {
    import == import_prefix
        || import
            .strip_prefix(import_prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Impacted set per changed package, reused across calls.
pub type ImpactCache = HashMap<String, BTreeSet<String>>;

/// Every package that transitively imports one of `changed`, the changed
/// packages included. Import cycles are traversed once.
pub fn find_impacted_packages<'a, I>(
    graph: &PackageDependencyGraph,
    changed: I,
    cache: &mut ImpactCache,
) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut impacted = BTreeSet::new();

    for package in changed {
        if let Some(cached) = cache.get(package) {
            impacted.extend(cached.iter().cloned());
            continue;
        }

        let closure = importer_closure(graph, package);
        impacted.extend(closure.iter().cloned());
        cache.insert(package.to_string(), closure);
    }

    impacted
}

fn importer_closure(graph: &PackageDependencyGraph, package: &str) -> BTreeSet<String> {
    let mut seen = BTreeSet::from([package.to_string()]);
    let mut queue = VecDeque::from([package.to_string()]);

    while let Some(current) = queue.pop_front() {
        let Some(importers) = graph.importers_of(&current) else {
            continue;
        };
        for importer in importers {
            if seen.insert(importer.clone()) {
                queue.push_back(importer.clone());
            }
        }
    }

    seen
}
