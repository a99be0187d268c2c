//! Probe configuration.

use lighter_nonce::{AccountIndex, ApiKeyIndex};
use lighter_telemetry::LogFormat;
use serde::{Deserialize, Serialize};

use crate::error::{ProbeError, ProbeResult};

fn default_base_url() -> String {
    lighter_client::DEFAULT_BASE_URL.to_string()
}

/// Probe configuration loaded from TOML.
///
/// ```toml
/// base_url = "https://mainnet.zklighter.elliot.ai"
/// account_index = 12345
/// api_key_indices = [2, 3, 4]
/// log_format = "json"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// REST base URL of the venue.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Account whose nonce slots are tracked.
    pub account_index: AccountIndex,
    /// Credential slots eligible for rotation.
    pub api_key_indices: Vec<ApiKeyIndex>,
    /// Log output format. Falls back to `RUST_ENV` when unset.
    #[serde(default)]
    pub log_format: Option<LogFormat>,
}

impl ProbeConfig {
    /// Load from a specific file.
    pub fn from_file(path: &str) -> ProbeResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProbeError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML content.
    pub fn from_toml(content: &str) -> ProbeResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ProbeError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the coordinator cannot run with.
    pub fn validate(&self) -> ProbeResult<()> {
        if self.api_key_indices.is_empty() {
            return Err(ProbeError::Config(
                "api_key_indices must list at least one api key index".to_string(),
            ));
        }
        if self.base_url.trim().is_empty() {
            return Err(ProbeError::Config("base_url must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = ProbeConfig::from_toml(
            r#"
            base_url = "https://testnet.zklighter.elliot.ai"
            account_index = 281
            api_key_indices = [4, 2, 3]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.base_url, "https://testnet.zklighter.elliot.ai");
        assert_eq!(config.account_index, AccountIndex::new(281));
        assert_eq!(config.api_key_indices.len(), 3);
        assert_eq!(config.log_format, Some(LogFormat::Json));
    }

    #[test]
    fn test_defaults_applied() {
        let config = ProbeConfig::from_toml(
            r#"
            account_index = 1
            api_key_indices = [0]
            "#,
        )
        .unwrap();

        assert_eq!(config.base_url, lighter_client::DEFAULT_BASE_URL);
        assert_eq!(config.log_format, None);
    }

    #[test]
    fn test_empty_key_list_rejected() {
        let result = ProbeConfig::from_toml(
            r#"
            account_index = 1
            api_key_indices = []
            "#,
        );
        assert!(matches!(result, Err(ProbeError::Config(_))));
    }

    #[test]
    fn test_missing_account_rejected() {
        let result = ProbeConfig::from_toml("api_key_indices = [1]");
        assert!(matches!(result, Err(ProbeError::Config(_))));
    }

    #[test]
    fn test_out_of_range_key_index_rejected() {
        let result = ProbeConfig::from_toml(
            r#"
            account_index = 1
            api_key_indices = [256]
            "#,
        );
        assert!(matches!(result, Err(ProbeError::Config(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = ProbeConfig::from_file("/nonexistent/lighter-probe.toml");
        assert!(matches!(result, Err(ProbeError::Config(_))));
    }

    #[test]
    fn test_shipped_default_config_parses() {
        let config = ProbeConfig::from_toml(include_str!("../../../config/default.toml")).unwrap();
        assert!(!config.api_key_indices.is_empty());
    }
}
