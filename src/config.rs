use std::collections::HashMap;
use std::path::PathBuf;

use config::{Config, ConfigError};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::languages::LanguageOverride;

/// Which isolation backend runs submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SandboxKind {
    /// Plain child process in its own process group, limited with rlimits.
    #[default]
    Process,
    /// hakoniwa container with namespaces and a seccomp filter.
    Container,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub workspace_root: PathBuf,
    pub max_code_bytes: usize,
    pub max_input_bytes: usize,
    pub default_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub compile_timeout_ms: u64,
    pub max_output_bytes: usize,
    pub sandbox: SandboxKind,
    pub api_key: Option<String>,
    pub batch_case_delay_ms: u64,
    pub batch_concurrency: usize,
    pub languages: HashMap<String, LanguageOverride>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            workspace_root: std::env::temp_dir().join("judge-workspaces"),
            max_code_bytes: 64 * 1024,
            max_input_bytes: 1024 * 1024,
            default_timeout_ms: 5_000,
            max_timeout_ms: 30_000,
            compile_timeout_ms: 30_000,
            max_output_bytes: 1024 * 1024,
            sandbox: SandboxKind::default(),
            api_key: None,
            batch_case_delay_ms: 0,
            batch_concurrency: 1,
            languages: HashMap::new(),
        }
    }
}

impl AppConfig {
    /// Reads `.env`, an optional `Settings` file and `APP_*` variables, in
    /// increasing order of precedence.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv().ok();

        let settings = Config::builder()
            .add_source(config::File::with_name("Settings").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app_config: AppConfig = settings.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_code_bytes == 0 || self.max_input_bytes == 0 || self.max_output_bytes == 0 {
            return Err(ConfigError::Message(
                "max_code_bytes, max_input_bytes and max_output_bytes must be positive".to_string(),
            ));
        }
        if self.default_timeout_ms == 0 || self.default_timeout_ms > self.max_timeout_ms {
            return Err(ConfigError::Message(format!(
                "default_timeout_ms must be within 1..={}",
                self.max_timeout_ms
            )));
        }
        if self.batch_concurrency == 0 {
            return Err(ConfigError::Message(
                "batch_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn api_key(&self) -> Option<String> {
        self.api_key.clone().filter(|key| !key.is_empty())
    }
}
