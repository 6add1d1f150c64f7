use std::path::{Path, PathBuf};

use llmverse_common::{Error, Result};
use tracing::{info, warn};

use crate::model::AppConfig;

/// Environment variables that override values from the settings file.
const ENV_BOT_TOKEN: &str = "DISCORD_BOT_TOKEN";
const ENV_OPENWEATHER_KEY: &str = "OPENWEATHER_KEY";
const ENV_IMGUR_CLIENT_ID: &str = "IMGUR_CLIENT_ID";
const ENV_SYSTEM_PROMPT: &str = "LLMVERSE_SYSTEM_PROMPT";

/// Loads [`AppConfig`] from a JSON, YAML or TOML file plus the process
/// environment.
pub struct ConfigLoader {
    config_path: PathBuf,
    env_file: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            env_file: None,
        }
    }

    pub fn with_env_file(mut self, env_file: impl Into<PathBuf>) -> Self {
        self.env_file = Some(env_file.into());
        self
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn load(&self) -> Result<AppConfig> {
        if let Some(env_file) = &self.env_file {
            match dotenvy::from_path(env_file) {
                Ok(()) => info!("loaded environment from {}", env_file.display()),
                Err(e) if e.not_found() => {
                    warn!("env file {} not found, skipping", env_file.display())
                }
                Err(e) => {
                    return Err(Error::Config(format!(
                        "cannot load env file {}: {e}",
                        env_file.display()
                    )));
                }
            }
        }

        let raw = std::fs::read_to_string(&self.config_path).map_err(|e| {
            Error::Config(format!(
                "cannot read settings file {}: {e}",
                self.config_path.display()
            ))
        })?;

        let mut config = parse_settings(&self.config_path, &raw)?;
        apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        config.validate()?;

        info!(
            "loaded settings from {} ({} enabled model(s))",
            self.config_path.display(),
            config.enabled_models().count()
        );
        Ok(config)
    }
}

fn parse_settings(path: &Path, raw: &str) -> Result<AppConfig> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("json")
        .to_ascii_lowercase();

    match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(raw)
            .map_err(|e| Error::Config(format!("invalid yaml settings: {e}"))),
        "toml" => {
            toml::from_str(raw).map_err(|e| Error::Config(format!("invalid toml settings: {e}")))
        }
        _ => serde_json::from_str(raw)
            .map_err(|e| Error::Config(format!("invalid json settings: {e}"))),
    }
}

fn apply_env_overrides(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(token) = non_empty(ENV_BOT_TOKEN) {
        config.discord_bot_token = token;
    }
    if let Some(key) = non_empty(ENV_OPENWEATHER_KEY) {
        config.openweather_key = Some(key);
    }
    if let Some(id) = non_empty(ENV_IMGUR_CLIENT_ID) {
        config.imgur_client_id = Some(id);
    }
    if let Some(prompt) = non_empty(ENV_SYSTEM_PROMPT) {
        config.system_prompt = prompt;
    }
}
