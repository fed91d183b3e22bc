use std::collections::HashMap;
use std::path::{Path, PathBuf};

use deepresearch_common::config::SystemConfig;

use super::validation;

/// Complete engine configuration loaded from the config directory.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Parsed system.toml.
    pub system: SystemConfig,
    /// Prompt templates keyed by filename stem (e.g. "initial_plan",
    /// "judge_and_refine", "final_report", "html_to_markdown").
    pub prompts: HashMap<String, String>,
    /// Base config directory path (used for future config reload).
    #[allow(dead_code)]
    pub config_dir: PathBuf,
}

/// Load all configuration from the given config directory.
///
/// Fails loudly with clear error messages if anything is misconfigured.
/// The service refuses to start on validation failure.
pub fn load_config(config_dir: &Path) -> Result<EngineConfig, ConfigError> {
    tracing::info!(config_dir = %config_dir.display(), "Loading configuration");

    let system_path = config_dir.join("system.toml");
    let mut system = load_system_config(&system_path)?;
    apply_env_overrides(&mut system);

    let prompts = load_prompts(&config_dir.join("prompts"))?;

    let config = EngineConfig {
        system,
        prompts,
        config_dir: config_dir.to_path_buf(),
    };

    validation::validate(&config)?;

    tracing::info!(prompts = config.prompts.len(), "Configuration loaded successfully");

    Ok(config)
}

/// Secrets should never live in a checked-in system.toml; let a handful of
/// environment variables override them after parsing.
fn apply_env_overrides(system: &mut SystemConfig) {
    if let Ok(key) = std::env::var("DEEPRESEARCH_LLM_API_KEY") {
        system.llm.api_key = key;
    }
    if let Ok(url) = std::env::var("DEEPRESEARCH_DATABASE_URL") {
        system.persistence.database_url = url;
    }
    if let Ok(key) = std::env::var("DEEPRESEARCH_READER_API_KEY") {
        system.fetch.reader_api_key = key;
    }
}

fn load_system_config(path: &Path) -> Result<SystemConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

fn load_prompts(prompts_dir: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let mut prompts = HashMap::new();

    if !prompts_dir.exists() {
        tracing::warn!(
            path = %prompts_dir.display(),
            "Prompts directory does not exist, no prompts loaded"
        );
        return Ok(prompts);
    }

    let entries = std::fs::read_dir(prompts_dir).map_err(|e| ConfigError::FileRead {
        path: prompts_dir.to_path_buf(),
        source: e,
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::FileRead {
            path: prompts_dir.to_path_buf(),
            source: e,
        })?;

        let path = entry.path();
        if path
            .extension()
            .is_some_and(|ext| ext == "md" || ext == "txt")
        {
            let name = path
                .file_stem()
                .and_then(|n| n.to_str())
                .unwrap_or("unknown")
                .to_string();

            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileRead {
                path: path.clone(),
                source: e,
            })?;

            tracing::debug!(prompt = %name, "Loaded prompt template");
            prompts.insert(name, content);
        }
    }

    Ok(prompts)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    #[error("Validation failed: {0}")]
    Validation(String),
}
