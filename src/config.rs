use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CANDIDATES: [&str; 4] = ["cigraph.toml", "cigraph.json", "cigraph.yaml", "cigraph.yml"];

/// Configuration file structure for cigraph.
///
/// Every value can be overridden from the command line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub gitlab: GitLabConfig,

    #[serde(default)]
    pub ci: CiFileConfig,

    #[serde(default)]
    pub impact: ImpactConfig,

    /// Output format preferences
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GitLabConfig {
    /// GitLab personal access token
    pub token: Option<String>,

    /// GitLab instance base URL
    #[serde(default = "default_gitlab_base_url")]
    pub base_url: String,

    /// GitLab project path (e.g., 'group/project') or numeric id
    pub project: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CiFileConfig {
    /// Root CI configuration file
    #[serde(default = "default_ci_file")]
    pub config_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ImpactConfig {
    #[serde(default = "default_repo_root")]
    pub repo_root: PathBuf,

    /// Go import path of the repository root module
    pub import_prefix: Option<String>,

    /// Module registry, relative to the repository root
    #[serde(default = "default_modules_file")]
    pub modules_file: PathBuf,

    #[serde(default)]
    pub build_tags: Vec<String>,

    /// Files whose modification runs every test
    #[serde(default = "default_trigger_globs")]
    pub trigger_globs: Vec<String>,

    /// Modules listed concurrently
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Longest target list passed on one command line (Windows only)
    #[serde(default = "default_command_line_limit")]
    pub command_line_limit: usize,

    #[serde(default = "default_base_ref")]
    pub base_ref: String,

    #[serde(default = "default_subprocess_timeout_secs")]
    pub subprocess_timeout_secs: u64,
}

impl ImpactConfig {
    /// The configured trigger globs plus the module registry file, when it exists.
    ///
    /// A change to the registry can move targets between modules, so it runs everything.
    pub fn trigger_globs(&self) -> Vec<String> {
        let mut globs = self.trigger_globs.clone();
        if self.repo_root.join(&self.modules_file).is_file() {
            let modules_file = self.modules_file.to_string_lossy().replace('\\', "/");
            if !globs.contains(&modules_file) {
                globs.push(modules_file);
            }
        }
        globs
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Default output format
    #[serde(default)]
    pub format: OutputFormat,

    /// Pretty-print JSON output
    #[serde(default)]
    pub pretty: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Summary,
    Json,
}

impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            token: None,
            base_url: default_gitlab_base_url(),
            project: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl Default for CiFileConfig {
    fn default() -> Self {
        Self {
            config_file: default_ci_file(),
        }
    }
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            repo_root: default_repo_root(),
            import_prefix: None,
            modules_file: default_modules_file(),
            build_tags: Vec::new(),
            trigger_globs: default_trigger_globs(),
            batch_size: default_batch_size(),
            command_line_limit: default_command_line_limit(),
            base_ref: default_base_ref(),
            subprocess_timeout_secs: default_subprocess_timeout_secs(),
        }
    }
}

fn default_gitlab_base_url() -> String {
    "https://gitlab.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_ci_file() -> PathBuf {
    PathBuf::from(".gitlab-ci.yml")
}

fn default_repo_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_modules_file() -> PathBuf {
    PathBuf::from("modules.yml")
}

fn default_trigger_globs() -> Vec<String> {
    vec![".gitlab-ci.yml".to_string()]
}

fn default_batch_size() -> usize {
    8
}

fn default_command_line_limit() -> usize {
    8000
}

fn default_base_ref() -> String {
    "main".to_string()
}

fn default_subprocess_timeout_secs() -> u64 {
    300
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./cigraph.toml
    /// 3. ./cigraph.json
    /// 4. ./cigraph.yaml
    /// 5. ./cigraph.yml
    /// 6. <user config dir>/cigraph/config.toml
    ///
    /// Returns default configuration if no file is found. A specified path
    /// that does not exist is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let user_config = dirs::config_dir().map(|dir| dir.join("cigraph").join("config.toml"));
        Self::load_from_candidates(Path::new("."), user_config.as_deref())
    }

    fn load_from_candidates(dir: &Path, user_config: Option<&Path>) -> Result<Self> {
        let local = CANDIDATES.iter().map(|candidate| dir.join(candidate));

        for path in local.chain(user_config.map(Path::to_path_buf)) {
            if path.exists() {
                log::debug!("Loading configuration from {}", path.display());
                return Self::load_from_path(&path);
            }
        }

        // No config file found, return defaults
        Ok(Self::default())
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => {
                // Try TOML first, then JSON, then YAML
                toml::from_str(&contents)
                    .or_else(|_| serde_json::from_str(&contents))
                    .or_else(|_| serde_yaml::from_str(&contents))
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.gitlab.base_url, "https://gitlab.com");
        assert_eq!(config.gitlab.timeout_secs, 30);
        assert_eq!(config.gitlab.max_retries, 5);
        assert_eq!(config.ci.config_file, PathBuf::from(".gitlab-ci.yml"));
        assert_eq!(config.impact.batch_size, 8);
        assert_eq!(config.impact.trigger_globs, vec![".gitlab-ci.yml"]);
        assert_eq!(config.output.format, OutputFormat::Summary);
    }

    #[test]
    fn test_load_toml_config() {
        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        let toml_content = r#"
[gitlab]
token = "glpat-test-token"
base-url = "https://gitlab.example.com"
project = "group/project"
max-retries = 2

[impact]
import-prefix = "github.com/example/agent"
build-tags = ["linux", "test"]
batch-size = 4

[output]
format = "json"
pretty = true
"#;
        write!(temp_file, "{}", toml_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.gitlab.token, Some("glpat-test-token".to_string()));
        assert_eq!(config.gitlab.base_url, "https://gitlab.example.com");
        assert_eq!(config.gitlab.project, Some("group/project".to_string()));
        assert_eq!(config.gitlab.max_retries, 2);
        assert_eq!(config.gitlab.timeout_secs, 30);
        assert_eq!(
            config.impact.import_prefix,
            Some("github.com/example/agent".to_string())
        );
        assert_eq!(config.impact.build_tags, vec!["linux", "test"]);
        assert_eq!(config.impact.batch_size, 4);
        assert_eq!(config.impact.base_ref, "main");
        assert_eq!(config.output.format, OutputFormat::Json);
        assert!(config.output.pretty);
    }

    #[test]
    fn test_load_yaml_config() {
        let mut temp_file = NamedTempFile::with_suffix(".yml").unwrap();
        let yaml_content = r#"
ci:
  config-file: ci/root.yml
impact:
  trigger-globs: [".gitlab-ci.yml", ".gitlab/**/*.yml"]
"#;
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.ci.config_file, PathBuf::from("ci/root.yml"));
        assert_eq!(config.impact.trigger_globs.len(), 2);
    }

    #[test]
    fn test_load_json_config() {
        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        let json_content = r#"{
  "gitlab": {
    "token": "glpat-json-token",
    "base-url": "https://gitlab.json.com"
  },
  "output": {
    "format": "json"
  }
}"#;
        write!(temp_file, "{}", json_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.gitlab.token, Some("glpat-json-token".to_string()));
        assert_eq!(config.gitlab.base_url, "https://gitlab.json.com");
        assert_eq!(config.output.format, OutputFormat::Json);
    }

    #[test]
    fn test_explicit_missing_config_is_an_error() {
        let result = Config::load(Some(Path::new("nonexistent-cigraph.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_from_candidates() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            temp_dir.path().join("cigraph.yaml"),
            "gitlab:\n  base-url: https://yaml.gitlab.com\n",
        )
        .unwrap();
        std::fs::write(
            temp_dir.path().join("cigraph.toml"),
            "[gitlab]\nbase-url = \"https://toml.gitlab.com\"\n",
        )
        .unwrap();

        let config = Config::load_from_candidates(temp_dir.path(), None).unwrap();
        assert_eq!(config.gitlab.base_url, "https://toml.gitlab.com");
    }

    #[test]
    fn test_user_config_is_the_last_candidate() {
        let temp_dir = tempfile::tempdir().unwrap();
        let user_config = temp_dir.path().join("user.toml");
        std::fs::write(&user_config, "[impact]\nbase-ref = \"develop\"\n").unwrap();

        let config = Config::load_from_candidates(temp_dir.path(), Some(&user_config)).unwrap();
        assert_eq!(config.impact.base_ref, "develop");

        let empty_dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_candidates(empty_dir.path(), None).unwrap();
        assert_eq!(config.impact.base_ref, "main");
    }

    #[test]
    fn test_existing_modules_file_is_a_trigger() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut impact = ImpactConfig {
            repo_root: temp_dir.path().to_path_buf(),
            ..ImpactConfig::default()
        };
        assert_eq!(impact.trigger_globs(), vec![".gitlab-ci.yml"]);

        std::fs::write(temp_dir.path().join("modules.yml"), "modules: {}\n").unwrap();
        assert_eq!(impact.trigger_globs(), vec![".gitlab-ci.yml", "modules.yml"]);

        impact.trigger_globs.push("modules.yml".to_string());
        assert_eq!(impact.trigger_globs(), vec![".gitlab-ci.yml", "modules.yml"]);
    }
}
