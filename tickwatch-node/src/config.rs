//! Node configuration.
//!
//! Loaded once at startup from a JSON file with kebab-case keys. Every
//! validation failure produces a human-readable message and exit code 1.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use tickwatch_pipeline::{PipelineConfig, TickStorageMode};
use tickwatch_types::identity::{is_wellformed_identity, public_key_from_identity};
use tickwatch_types::PublicKey;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct NodeConfig {
    #[serde(default)]
    pub trusted_node: Vec<String>,
    #[serde(default)]
    pub p2p_node: Vec<String>,
    pub arbitrator_identity: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_keydb_url")]
    pub keydb_url: String,
    #[serde(default)]
    pub kvrocks_url: Option<String>,

    #[serde(default = "default_request_cycle_ms")]
    pub request_cycle_ms: u64,
    #[serde(default = "default_request_logging_cycle_ms")]
    pub request_logging_cycle_ms: u64,
    #[serde(default = "default_future_offset")]
    pub future_offset: u32,

    #[serde(default = "default_server_port")]
    pub server_port: u32,
    #[serde(default)]
    pub run_server: bool,
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub is_trusted_node: bool,
    #[serde(default)]
    pub node_seed: Option<String>,
    #[serde(default)]
    pub is_testnet: bool,
    #[serde(default)]
    pub not_save_tickvote: bool,

    #[serde(default)]
    pub trusted_entities: Vec<String>,

    #[serde(default = "default_tick_storage_mode")]
    pub tick_storage_mode: String,
    #[serde(default = "default_last_n_tick_storage")]
    pub last_n_tick_storage: u32,

    #[serde(default)]
    pub peer_directory_url: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_keydb_url() -> String {
    "tcp://127.0.0.1:6379".to_string()
}

fn default_request_cycle_ms() -> u64 {
    1000
}

fn default_request_logging_cycle_ms() -> u64 {
    100
}

fn default_future_offset() -> u32 {
    1
}

fn default_server_port() -> u32 {
    21842
}

fn default_api_port() -> u16 {
    40420
}

fn default_tick_storage_mode() -> String {
    "none".to_string()
}

fn default_last_n_tick_storage() -> u32 {
    100_000
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = fs::read_to_string(path)
            .map_err(|err| format!("cannot open '{}': {}", path.display(), err))?;
        let config: NodeConfig =
            serde_json::from_str(&raw).map_err(|err| format!("invalid JSON: {err}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.trusted_node.is_empty() && self.p2p_node.is_empty() {
            return Err("at least one of 'trusted-node' / 'p2p-node' is required".to_string());
        }

        if !is_wellformed_identity(&self.arbitrator_identity) {
            return Err(
                "'arbitrator-identity' must be 60 uppercase letters".to_string(),
            );
        }
        public_key_from_identity(&self.arbitrator_identity)
            .map_err(|err| format!("'arbitrator-identity' is invalid: {err}"))?;

        if self.run_server && (self.server_port == 0 || self.server_port > 65535) {
            return Err(format!(
                "invalid server-port {}. Must be in 1..65535",
                self.server_port
            ));
        }

        if self.is_trusted_node && self.node_seed.as_deref().map_or(true, str::is_empty) {
            return Err("'node-seed' is required when 'is-trusted-node' is set".to_string());
        }

        for entity in &self.trusted_entities {
            if !is_wellformed_identity(entity) {
                return Err(format!(
                    "invalid trusted entity '{entity}': must be 60 uppercase letters"
                ));
            }
        }

        self.storage_mode()?;
        if self.storage_mode()? == TickStorageMode::ColdTier
            && self.kvrocks_url.as_deref().map_or(true, str::is_empty)
        {
            return Err("'kvrocks-url' is required when tick-storage-mode is cold-tier".to_string());
        }

        Ok(())
    }

    pub fn storage_mode(&self) -> Result<TickStorageMode, String> {
        match self.tick_storage_mode.as_str() {
            "none" => Ok(TickStorageMode::None),
            "last-n" => Ok(TickStorageMode::LastN),
            "cold-tier" => Ok(TickStorageMode::ColdTier),
            other => Err(format!(
                "invalid tick-storage-mode '{other}': expected none, last-n or cold-tier"
            )),
        }
    }

    pub fn arbitrator_public_key(&self) -> PublicKey {
        // Checked by validate().
        public_key_from_identity(&self.arbitrator_identity).unwrap_or([0u8; 32])
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            request_cycle_ms: self.request_cycle_ms,
            request_logging_cycle_ms: self.request_logging_cycle_ms,
            future_offset: self.future_offset,
            storage_mode: self.storage_mode().unwrap_or(TickStorageMode::None),
            last_n_ticks: self.last_n_tick_storage,
            arbitrator: self.arbitrator_public_key(),
            not_save_tick_vote: self.not_save_tickvote,
            trusted_entities: self.trusted_entities.iter().cloned().collect::<HashSet<_>>(),
        }
    }
}

/// The store drivers expect redis:// URLs; configs traditionally carry
/// tcp:// ones.
pub fn redis_url(raw: &str) -> String {
    match raw.strip_prefix("tcp://") {
        Some(rest) => format!("redis://{rest}"),
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickwatch_types::identity::identity_from_public_key;

    fn arbitrator() -> String {
        identity_from_public_key(&[5u8; 32], false)
    }

    fn minimal_json() -> String {
        format!(
            r#"{{"trusted-node": ["10.0.0.1:21842"], "arbitrator-identity": "{}"}}"#,
            arbitrator()
        )
    }

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: NodeConfig = serde_json::from_str(&minimal_json()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.request_cycle_ms, 1000);
        assert_eq!(config.request_logging_cycle_ms, 100);
        assert_eq!(config.future_offset, 1);
        assert_eq!(config.keydb_url, "tcp://127.0.0.1:6379");
        assert_eq!(config.storage_mode().unwrap(), TickStorageMode::None);
    }

    #[test]
    fn missing_peers_rejected() {
        let raw = format!(r#"{{"arbitrator-identity": "{}"}}"#, arbitrator());
        let config: NodeConfig = serde_json::from_str(&raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_arbitrator_rejected() {
        let raw = r#"{"trusted-node": ["a:1"], "arbitrator-identity": "SHORT"}"#;
        let config: NodeConfig = serde_json::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn trusted_node_without_seed_rejected() {
        let raw = format!(
            r#"{{"trusted-node": ["a:1"], "arbitrator-identity": "{}", "is-trusted-node": true}}"#,
            arbitrator()
        );
        let config: NodeConfig = serde_json::from_str(&raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn cold_tier_requires_kvrocks_url() {
        let raw = format!(
            r#"{{"trusted-node": ["a:1"], "arbitrator-identity": "{}", "tick-storage-mode": "cold-tier"}}"#,
            arbitrator()
        );
        let config: NodeConfig = serde_json::from_str(&raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn tcp_urls_become_redis_urls() {
        assert_eq!(redis_url("tcp://127.0.0.1:6379"), "redis://127.0.0.1:6379");
        assert_eq!(redis_url("redis://h:1"), "redis://h:1");
    }
}
