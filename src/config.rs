use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    // LLM configuration (OpenAI-compatible: OpenAI, Ollama, LM Studio, vLLM, ...)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    /// Cheaper model used after a 404/401 on the primary and for fast-mode
    /// streaming.
    #[serde(default = "default_fallback_model")]
    pub llm_fallback_model: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,

    /// App-level language setting; "en" forces English, anything else lets
    /// per-message detection decide.
    #[serde(default = "default_language")]
    pub app_language: String,

    /// Soft daily cap on outbound LLM calls.
    #[serde(default = "default_daily_call_limit")]
    pub daily_call_limit: u32,

    /// SQLite file location. Unset means "<data dir>/innerlog.db".
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

fn default_llm_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o".to_string()
}

fn default_fallback_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_language() -> String {
    "uk".to_string()
}

fn default_daily_call_limit() -> u32 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_fallback_model: default_fallback_model(),
            llm_api_key: None,
            app_language: default_language(),
            daily_call_limit: default_daily_call_limit(),
            database_path: None,
        }
    }
}

impl AppConfig {
    fn base_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("innerlog")
    }

    pub fn config_path() -> PathBuf {
        Self::base_dir().join("innerlog.toml")
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| Self::base_dir().join("innerlog.db"))
    }

    /// Load config from innerlog.toml, falling back to env vars + defaults.
    pub fn load() -> Self {
        let path = Self::config_path();

        if let Ok(contents) = fs::read_to_string(&path) {
            match toml::from_str::<AppConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config.with_env_overrides();
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                }
            }
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::default().with_env_overrides()
    }

    /// Save config into the app data dir.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config dir {:?}", parent))?;
        }

        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = env::var("LLM_API_URL") {
            self.llm_api_url = url;
        }
        if let Ok(model) = env::var("LLM_MODEL") {
            self.llm_model = model;
        }
        if let Ok(model) = env::var("LLM_FALLBACK_MODEL") {
            self.llm_fallback_model = model;
        }
        if let Ok(key) = env::var("LLM_API_KEY") {
            if !key.trim().is_empty() {
                self.llm_api_key = Some(key);
            }
        }
        if let Ok(lang) = env::var("INNERLOG_LANGUAGE") {
            self.app_language = lang;
        }
        if let Ok(limit) = env::var("INNERLOG_DAILY_LIMIT") {
            if let Ok(parsed) = limit.parse() {
                self.daily_call_limit = parsed;
            }
        }
        if let Ok(path) = env::var("INNERLOG_DB_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: AppConfig = toml::from_str("llm_model = \"local-model\"").expect("parse");
        assert_eq!(config.llm_model, "local-model");
        assert_eq!(config.daily_call_limit, 30);
        assert_eq!(config.app_language, "uk");
        assert!(config.llm_api_key.is_none());
    }

    #[test]
    fn round_trips_through_toml() {
        let config = AppConfig::default();
        let serialized = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&serialized).expect("parse");
        assert_eq!(parsed.llm_api_url, config.llm_api_url);
        assert_eq!(parsed.llm_fallback_model, config.llm_fallback_model);
    }
}
