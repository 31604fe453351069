//! Configuration for claimflow paths and workflow tuning.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CLAIMFLOW_HOME)
//! 2. Config file (.claimflow/config.yaml)
//! 3. Defaults (~/.claimflow)
//!
//! Config file discovery:
//! - Searches current directory and parents for .claimflow/config.yaml
//! - Paths in config file are relative to the config file's parent directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::WorkflowConfig;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub workflow: Option<WorkflowConfig>,
    #[serde(default)]
    pub stages: Option<StageEndpoints>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to config file)
    pub home: Option<String>,
    /// Policy catalog YAML (relative to config file)
    pub policies: Option<String>,
    /// Intake drop directory for the watcher (relative to config file)
    pub intake: Option<String>,
}

/// Optional remote endpoints, one per stage. A stage without an endpoint
/// runs its built-in local implementation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StageEndpoints {
    pub intake: Option<StageEndpoint>,
    pub policy: Option<StageEndpoint>,
    pub damage: Option<StageEndpoint>,
    pub valuation: Option<StageEndpoint>,
    pub decision: Option<StageEndpoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StageEndpoint {
    pub url: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to claimflow home (engine state)
    pub home: PathBuf,
    /// Policy catalog YAML, if configured (otherwise the seed catalog)
    pub policies: Option<PathBuf>,
    /// Intake drop directory for the watcher
    pub intake: PathBuf,
    /// Engine tuning (retry, timeouts, payload cap)
    pub workflow: WorkflowConfig,
    /// Remote stage endpoints
    pub stages: StageEndpoints,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl ResolvedConfig {
    /// Directory holding one subdirectory per claim
    pub fn claims_dir(&self) -> PathBuf {
        self.home.join("claims")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".claimflow").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    // Default home directory
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".claimflow");

    // Check for config file
    let config_file = find_config_file();

    let (home, policies, intake, workflow, stages) = if let Some(ref config_path) = config_file {
        // Config file found - use it as base
        let config = load_config_file(config_path)?;

        // Base directory is the parent of .claimflow/ (i.e., grandparent of config.yaml)
        let base_dir = config_path
            .parent() // .claimflow/
            .and_then(|p| p.parent()) // project root
            .unwrap_or(Path::new("."));

        // Resolve home path
        let home = if let Ok(env_home) = std::env::var("CLAIMFLOW_HOME") {
            PathBuf::from(env_home)
        } else if let Some(ref home_path) = config.paths.home {
            // home is relative to .claimflow/ directory
            let claimflow_dir = config_path.parent().unwrap_or(Path::new("."));
            resolve_path(claimflow_dir, home_path)
        } else {
            default_home.clone()
        };

        let policies = config
            .paths
            .policies
            .as_ref()
            .map(|p| resolve_path(base_dir, p));

        let intake = match config.paths.intake {
            Some(ref intake_path) => resolve_path(base_dir, intake_path),
            None => home.join("intake"),
        };

        let workflow = config.workflow.unwrap_or_default();
        let stages = config.stages.unwrap_or_default();

        (home, policies, intake, workflow, stages)
    } else {
        // No config file - use env vars or defaults
        let home = std::env::var("CLAIMFLOW_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_home.clone());

        let intake = home.join("intake");

        (
            home,
            None,
            intake,
            WorkflowConfig::default(),
            StageEndpoints::default(),
        )
    };

    Ok(ResolvedConfig {
        home,
        policies,
        intake,
        workflow,
        stages,
        config_file,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

// ============================================================================
// Convenience functions
// ============================================================================

/// Get the claimflow home directory (engine state)
pub fn claimflow_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the claims directory ($CLAIMFLOW_HOME/claims)
pub fn claims_dir() -> Result<PathBuf> {
    Ok(config()?.claims_dir())
}

/// Get the intake drop directory
pub fn intake_dir() -> Result<PathBuf> {
    Ok(config()?.intake.clone())
}

/// Get the policy catalog path, if one is configured
pub fn policies_path() -> Result<Option<PathBuf>> {
    Ok(config()?.policies.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_without_file() {
        // Without a config file or env vars, should use defaults
        let config = load_config().unwrap();

        // Should fall back to ~/.claimflow
        let expected_home = dirs::home_dir().unwrap().join(".claimflow");
        assert_eq!(config.home, expected_home);
        assert_eq!(config.intake, expected_home.join("intake"));
        assert_eq!(config.claims_dir(), expected_home.join("claims"));
        assert!(config.policies.is_none());
        assert!(config.config_file.is_none());
        assert_eq!(config.workflow.retry.max_attempts, 3);
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let claimflow_dir = temp.path().join(".claimflow");
        std::fs::create_dir_all(&claimflow_dir).unwrap();

        let config_path = claimflow_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: ./
  policies: ./policies.yaml
  intake: ./drop
workflow:
  stage_timeout_seconds: 15
  retry:
    max_attempts: 5
stages:
  damage:
    url: http://localhost:8081/damage
    bearer_token: sekrit
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.paths.home, Some("./".to_string()));
        assert_eq!(config.paths.policies, Some("./policies.yaml".to_string()));
        assert_eq!(config.paths.intake, Some("./drop".to_string()));

        let workflow = config.workflow.unwrap();
        assert_eq!(workflow.stage_timeout_seconds, 15);
        assert_eq!(workflow.retry.max_attempts, 5);
        // Unspecified retry fields keep their defaults
        assert_eq!(workflow.retry.initial_delay_ms, 1000);

        let stages = config.stages.unwrap();
        let damage = stages.damage.unwrap();
        assert_eq!(damage.url, "http://localhost:8081/damage");
        assert_eq!(damage.bearer_token, Some("sekrit".to_string()));
        assert!(stages.policy.is_none());
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "../sibling"),
            PathBuf::from("/home/user/project/../sibling")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
