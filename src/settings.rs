use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

pub const SETTINGS_FILE: &str = "settings.toml";
pub const TOKEN_ENV: &str = "SLACK_TOKEN";

const MEGABYTE: u64 = 1024 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub slack: SlackSettings,
    #[serde(default)]
    pub export: ExportSettings,
    #[serde(default)]
    pub archive: ArchiveSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SlackSettings {
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExportSettings {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_list_limit")]
    pub list_limit: u32,
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ArchiveSettings {
    #[serde(default = "default_split_mb")]
    pub split_threshold_mb: u64,
    #[serde(default = "default_split_mb")]
    pub split_chunk_mb: u64,
}

fn default_api_base_url() -> String {
    "https://slack.com/api".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("json_data")
}

fn default_list_limit() -> u32 {
    1000
}

fn default_history_limit() -> u32 {
    999
}

fn default_concurrency() -> usize {
    1
}

fn default_split_mb() -> u64 {
    500
}

impl Default for SlackSettings {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            list_limit: default_list_limit(),
            history_limit: default_history_limit(),
            concurrency: default_concurrency(),
        }
    }
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            split_threshold_mb: default_split_mb(),
            split_chunk_mb: default_split_mb(),
        }
    }
}

impl Settings {
    /// Loads settings from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| AppError::ReadFile {
            path: path.display().to_string(),
            source: e,
        })?;

        let settings: Settings =
            toml::from_str(&content).map_err(|e| AppError::TomlParse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.export.concurrency == 0 {
            return Err(AppError::InvalidSettings(
                "export.concurrency must be at least 1".to_string(),
            ));
        }
        if self.archive.split_chunk_mb == 0 {
            return Err(AppError::InvalidSettings(
                "archive.split-chunk-mb must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The environment variable wins over the settings file.
    pub fn resolve_token(&self) -> Result<String> {
        resolve_token_from(std::env::var(TOKEN_ENV).ok(), &self.slack.token)
    }
}

fn resolve_token_from(env_token: Option<String>, configured: &str) -> Result<String> {
    match env_token {
        Some(token) if !token.trim().is_empty() => Ok(token),
        _ if !configured.trim().is_empty() => Ok(configured.to_string()),
        _ => Err(AppError::MissingToken),
    }
}

impl SlackSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ArchiveSettings {
    pub fn split_threshold_bytes(&self) -> u64 {
        self.split_threshold_mb.saturating_mul(MEGABYTE)
    }

    pub fn split_chunk_bytes(&self) -> u64 {
        self.split_chunk_mb.saturating_mul(MEGABYTE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_settings_file_constant() {
        assert_eq!(SETTINGS_FILE, "settings.toml");
    }

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();

        assert!(settings.slack.token.is_empty());
        assert_eq!(settings.slack.api_base_url, "https://slack.com/api");
        assert_eq!(settings.slack.max_retries, 3);
        assert_eq!(settings.export.output_dir, PathBuf::from("json_data"));
        assert_eq!(settings.export.list_limit, 1000);
        assert_eq!(settings.export.history_limit, 999);
        assert_eq!(settings.export.concurrency, 1);
        assert_eq!(settings.archive.split_threshold_mb, 500);
    }

    #[test]
    fn test_settings_deserialization() {
        let toml_content = r#"
[slack]
token = "xoxb-test"
api-base-url = "http://localhost:9000/api"
request-timeout-secs = 5
max-retries = 1

[export]
output-dir = "/tmp/export"
list-limit = 200
history-limit = 100
concurrency = 4

[archive]
split-threshold-mb = 10
split-chunk-mb = 2
"#;

        let settings: Settings = toml::from_str(toml_content).unwrap();

        assert_eq!(settings.slack.token, "xoxb-test");
        assert_eq!(settings.slack.api_base_url, "http://localhost:9000/api");
        assert_eq!(settings.slack.request_timeout(), Duration::from_secs(5));
        assert_eq!(settings.slack.max_retries, 1);
        assert_eq!(settings.export.output_dir, PathBuf::from("/tmp/export"));
        assert_eq!(settings.export.list_limit, 200);
        assert_eq!(settings.export.concurrency, 4);
        assert_eq!(settings.archive.split_threshold_bytes(), 10 * 1024 * 1024);
        assert_eq!(settings.archive.split_chunk_bytes(), 2 * 1024 * 1024);
    }

    #[test]
    fn test_settings_deserialization_partial() {
        let toml_content = r#"
[export]
concurrency = 2
"#;

        let settings: Settings = toml::from_str(toml_content).unwrap();

        assert_eq!(settings.export.concurrency, 2);
        assert_eq!(settings.export.history_limit, 999);
        assert_eq!(settings.slack.api_base_url, "https://slack.com/api");
        assert_eq!(settings.archive.split_chunk_mb, 500);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(settings.export.concurrency, 1);
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "invalid toml {{{").unwrap();

        let result = Settings::load(&path);
        assert!(matches!(result, Err(AppError::TomlParse(_))));
    }

    #[test]
    fn test_load_rejects_zero_concurrency() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "[export]\nconcurrency = 0\n").unwrap();

        let result = Settings::load(&path);
        assert!(matches!(result, Err(AppError::InvalidSettings(_))));
    }

    #[test]
    fn test_resolve_token_prefers_env() {
        let token = resolve_token_from(Some("xoxb-env".to_string()), "xoxb-file").unwrap();
        assert_eq!(token, "xoxb-env");
    }

    #[test]
    fn test_resolve_token_falls_back_to_settings() {
        let token = resolve_token_from(None, "xoxb-file").unwrap();
        assert_eq!(token, "xoxb-file");

        let token = resolve_token_from(Some("  ".to_string()), "xoxb-file").unwrap();
        assert_eq!(token, "xoxb-file");
    }

    #[test]
    fn test_resolve_token_missing() {
        let result = resolve_token_from(None, "");
        assert!(matches!(result, Err(AppError::MissingToken)));
    }
}
