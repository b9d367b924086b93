use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::Token;
use crate::ci::{
    analyze_multiple_pipelines, analyze_pipeline, build_execution_graph, CiConfig, ExecutionGraph,
};
use crate::config::{Config, ImpactConfig, OutputFormat};
use crate::gitlab::{ClientOptions, GitLabClient};
use crate::impact::{modified_files, GoLister, ImpactAnalyzer, ImpactSettings, ModuleRegistry};
use crate::output::{self, PhaseProgress};
use crate::report::{diff_execution_graphs, GraphExport};

#[derive(Parser)]
#[command(name = "cigraph")]
#[command(author, version, about = "CI pipeline graph and test impact tool", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./cigraph.{toml,json,yaml,yml})
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Write the result to this file instead of stdout
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,

    #[arg(short, long, global = true, value_enum)]
    format: Option<OutputFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the fully resolved CI configuration
    Resolve {
        /// Root CI configuration file
        #[arg(long)]
        ci_file: Option<PathBuf>,
    },

    /// Export the job execution graph as JSON
    Graph {
        #[arg(long)]
        ci_file: Option<PathBuf>,

        /// Previously exported graph to compare against
        #[arg(long)]
        diff: Option<PathBuf>,
    },

    /// Compute the critical path of one or more pipelines
    CriticalPath {
        #[arg(long = "pipeline", required = true, num_args = 1..)]
        pipelines: Vec<String>,

        #[arg(short, long, env = "GITLAB_TOKEN")]
        token: Option<String>,

        #[arg(short, long)]
        url: Option<String>,

        #[arg(short = 'P', long)]
        project: Option<String>,

        #[arg(long)]
        ci_file: Option<PathBuf>,
    },

    /// List the Go test targets impacted by a change
    Impact {
        /// Modified files; computed from `git diff` against the base ref when omitted
        #[arg(long, num_args = 1..)]
        files: Option<Vec<String>>,

        #[arg(long)]
        base_ref: Option<String>,

        #[arg(long)]
        repo_root: Option<PathBuf>,

        #[arg(long)]
        import_prefix: Option<String>,

        #[arg(long)]
        modules_file: Option<PathBuf>,

        #[arg(long, value_delimiter = ',')]
        build_tags: Option<Vec<String>>,
    },
}

impl Cli {
    pub async fn execute(&self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;

        match &self.command {
            Commands::Resolve { ci_file } => self.execute_resolve(&config, ci_file.as_deref()),
            Commands::Graph { ci_file, diff } => {
                self.execute_graph(&config, ci_file.as_deref(), diff.as_deref())
            }
            Commands::CriticalPath {
                pipelines,
                token,
                url,
                project,
                ci_file,
            } => {
                self.execute_critical_path(
                    &config,
                    pipelines,
                    token.as_deref(),
                    url.as_deref(),
                    project.as_deref(),
                    ci_file.as_deref(),
                )
                .await
            }
            Commands::Impact {
                files,
                base_ref,
                repo_root,
                import_prefix,
                modules_file,
                build_tags,
            } => {
                let mut impact = config.impact.clone();
                if let Some(base_ref) = base_ref {
                    impact.base_ref.clone_from(base_ref);
                }
                if let Some(repo_root) = repo_root {
                    impact.repo_root.clone_from(repo_root);
                }
                if let Some(import_prefix) = import_prefix {
                    impact.import_prefix = Some(import_prefix.clone());
                }
                if let Some(modules_file) = modules_file {
                    impact.modules_file.clone_from(modules_file);
                }
                if let Some(build_tags) = build_tags {
                    impact.build_tags.clone_from(build_tags);
                }
                self.execute_impact(&config, &impact, files.as_deref()).await
            }
        }
    }

    fn format(&self, config: &Config) -> OutputFormat {
        self.format.unwrap_or(config.output.format)
    }

    fn pretty(&self, config: &Config) -> bool {
        self.pretty || config.output.pretty
    }

    fn ci_file(config: &Config, ci_file: Option<&Path>) -> PathBuf {
        ci_file.map_or_else(|| config.ci.config_file.clone(), Path::to_path_buf)
    }

    fn load_graph(ci_file: &Path) -> Result<ExecutionGraph> {
        let ci_config = CiConfig::load(ci_file)
            .with_context(|| format!("Failed to resolve CI configuration {}", ci_file.display()))?;
        let graph = build_execution_graph(&ci_config)
            .with_context(|| format!("Failed to build execution graph of {}", ci_file.display()))?;
        Ok(graph)
    }

    fn execute_resolve(&self, config: &Config, ci_file: Option<&Path>) -> Result<()> {
        let ci_file = Self::ci_file(config, ci_file);
        let ci_config = CiConfig::load(&ci_file)
            .with_context(|| format!("Failed to resolve CI configuration {}", ci_file.display()))?;

        let rendered = match self.format(config) {
            OutputFormat::Json => output::to_json(&ci_config, self.pretty(config))?,
            OutputFormat::Summary => serde_yaml::to_string(&ci_config)?,
        };
        output::emit(rendered.trim_end(), self.output.as_deref())
    }

    fn execute_graph(&self, config: &Config, ci_file: Option<&Path>, diff: Option<&Path>) -> Result<()> {
        let ci_file = Self::ci_file(config, ci_file);
        let graph = Self::load_graph(&ci_file)?;
        let export = graph.to_export();
        info!(
            "Execution graph has {} jobs and {} edges",
            export.nodes.len(),
            export.edges.len()
        );

        let Some(old_path) = diff else {
            let json = output::to_json(&export, self.pretty(config))?;
            return output::emit(&json, self.output.as_deref());
        };

        let old_contents = std::fs::read_to_string(old_path)
            .with_context(|| format!("Failed to read graph export {}", old_path.display()))?;
        let old: GraphExport = serde_json::from_str(&old_contents)
            .with_context(|| format!("Failed to parse graph export {}", old_path.display()))?;
        let graph_diff = diff_execution_graphs(&old, &export);

        let rendered = match self.format(config) {
            OutputFormat::Json => output::to_json(&graph_diff, self.pretty(config))?,
            OutputFormat::Summary => output::render_graph_diff(&graph_diff),
        };
        output::emit(&rendered, self.output.as_deref())
    }

    async fn execute_critical_path(
        &self,
        config: &Config,
        pipelines: &[String],
        token: Option<&str>,
        url: Option<&str>,
        project: Option<&str>,
        ci_file: Option<&Path>,
    ) -> Result<()> {
        let gitlab = &config.gitlab;
        let Some(project) = project.or(gitlab.project.as_deref()) else {
            bail!("No GitLab project given, use --project or set gitlab.project in the config file");
        };
        let token = token.or(gitlab.token.as_deref()).map(Token::from);
        let url = url.unwrap_or(&gitlab.base_url);
        let client = GitLabClient::new(
            url,
            token,
            ClientOptions {
                timeout: Duration::from_secs(gitlab.timeout_secs),
                max_retries: gitlab.max_retries,
                retry_delay: Duration::from_secs(gitlab.retry_delay_secs),
            },
        )?;

        info!(
            "Analyzing {} pipelines of project {project}",
            pipelines.len()
        );

        let progress = PhaseProgress::start(2, "Resolving CI configuration");
        let ci_file = Self::ci_file(config, ci_file);
        let graph = Self::load_graph(&ci_file)?;
        let progress = progress.next("Resolved CI configuration", "Fetching pipeline jobs");

        let format = self.format(config);
        let pretty = self.pretty(config);

        if let [pipeline_id] = pipelines {
            let jobs = client
                .fetch_job_executions(project, pipeline_id)
                .await
                .with_context(|| format!("Failed to fetch jobs of pipeline {pipeline_id}"))?;
            let result = analyze_pipeline(pipeline_id, &graph, jobs)
                .with_context(|| format!("Failed to analyze pipeline {pipeline_id}"))?;
            progress.finish("Analyzed pipeline");

            return match format {
                OutputFormat::Json => output::emit(&output::to_json(&result, pretty)?, self.output.as_deref()),
                OutputFormat::Summary => {
                    output::print_critical_path(&result);
                    Ok(())
                }
            };
        }

        let outcome = analyze_multiple_pipelines(pipelines, &graph, |pipeline_id| {
            let client = &client;
            async move { client.fetch_job_executions(project, &pipeline_id).await }
        })
        .await;
        progress.finish("Analyzed pipelines");

        match format {
            OutputFormat::Json => output::emit(&output::to_json(&outcome, pretty)?, self.output.as_deref())?,
            OutputFormat::Summary => output::print_batch_summary(&outcome),
        }

        if outcome.results.is_empty() {
            bail!("None of the {} pipelines could be analyzed", pipelines.len());
        }
        Ok(())
    }

    async fn execute_impact(
        &self,
        config: &Config,
        impact: &ImpactConfig,
        files: Option<&[String]>,
    ) -> Result<()> {
        let Some(import_prefix) = impact.import_prefix.clone() else {
            bail!("No Go import prefix given, use --import-prefix or set impact.import-prefix in the config file");
        };

        let registry = ModuleRegistry::load(&impact.repo_root.join(&impact.modules_file))?;
        let settings = ImpactSettings {
            repo_root: impact.repo_root.clone(),
            import_prefix,
            build_tags: impact.build_tags.clone(),
            trigger_globs: impact.trigger_globs(),
            batch_size: impact.batch_size,
            command_line_limit: cfg!(windows).then_some(impact.command_line_limit),
        };
        let timeout = Duration::from_secs(impact.subprocess_timeout_secs);
        let analyzer = ImpactAnalyzer::new(settings, &registry, GoLister::new(timeout))
            .context("Invalid impact analysis configuration")?;

        let progress = PhaseProgress::start(2, "Collecting modified files");
        let files = match files {
            Some(files) => files.to_vec(),
            None => modified_files(&impact.repo_root, &impact.base_ref, timeout)
                .await
                .with_context(|| format!("Failed to list files modified since {}", impact.base_ref))?,
        };
        progress.println(format!("{} modified files", files.len()));
        let progress = progress.next("Collected modified files", "Listing Go packages");

        let outcome = analyzer.analyze(&files).await?;
        progress.finish("Computed impacted packages");

        match self.format(config) {
            OutputFormat::Json => {
                output::emit(&output::to_json(&outcome, self.pretty(config))?, self.output.as_deref())
            }
            OutputFormat::Summary => {
                output::print_impact(&outcome);
                Ok(())
            }
        }
    }
}
