//! Service configuration loaded from TOML.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

/// Tunables of the task service.
///
/// ```toml
/// max_position_retries = 3
/// title_max_len = 200
/// description_max_len = 10000
/// idempotency_key_max_len = 255
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Extra attempts after a position race (total attempts = 1 + this).
    #[serde(default = "default_max_position_retries")]
    pub max_position_retries: u32,

    #[serde(default = "default_title_max_len")]
    pub title_max_len: usize,

    #[serde(default = "default_description_max_len")]
    pub description_max_len: usize,

    #[serde(default = "default_idempotency_key_max_len")]
    pub idempotency_key_max_len: usize,
}

fn default_max_position_retries() -> u32 {
    3
}

fn default_title_max_len() -> usize {
    200
}

fn default_description_max_len() -> usize {
    10_000
}

fn default_idempotency_key_max_len() -> usize {
    255
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_position_retries: default_max_position_retries(),
            title_max_len: default_title_max_len(),
            description_max_len: default_description_max_len(),
            idempotency_key_max_len: default_idempotency_key_max_len(),
        }
    }
}

impl ServiceConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=10).contains(&self.max_position_retries) {
            return Err(ConfigError::Invalid {
                field: "max_position_retries",
                message: format!("{} is outside 1..=10", self.max_position_retries),
            });
        }
        let lengths = [
            ("title_max_len", self.title_max_len),
            ("description_max_len", self.description_max_len),
            ("idempotency_key_max_len", self.idempotency_key_max_len),
        ];
        for (field, value) in lengths {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    message: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;

    #[test]
    fn empty_document_uses_defaults() {
        assert_eq!(ServiceConfig::from_toml("").unwrap(), ServiceConfig::default());
    }

    #[test]
    fn load_parses_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("trellis.toml");
        fs::write(&path, "max_position_retries = 5\ntitle_max_len = 80\n").expect("write config");

        let cfg = ServiceConfig::load(&path).unwrap();
        assert_eq!(cfg.max_position_retries, 5);
        assert_eq!(cfg.title_max_len, 80);
        assert_eq!(cfg.description_max_len, 10_000);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = ServiceConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[rstest]
    #[case::no_retries("max_position_retries = 0", "max_position_retries")]
    #[case::too_many("max_position_retries = 11", "max_position_retries")]
    #[case::zero_title("title_max_len = 0", "title_max_len")]
    fn rejects_invalid_values(#[case] doc: &str, #[case] expected_field: &str) {
        match ServiceConfig::from_toml(doc).unwrap_err() {
            ConfigError::Invalid { field, .. } => assert_eq!(field, expected_field),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            ServiceConfig::from_toml("max_retries = 3").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }
}
