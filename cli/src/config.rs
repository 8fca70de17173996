// Configuration management for the meshbase CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/meshbase/config.json
// - Linux: ~/.config/meshbase/config.json
// - Windows: %APPDATA%\meshbase\config.json

use anyhow::{Context, Result};
use meshbase_core::{CoherenceSpecification, NetMeshBaseIdentifier, PeerRole};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const DEFAULT_IDENTIFIER: &str = "tcp://127.0.0.1:7420";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identifier of the local mesh base; for `serve` it is also the listen address
    pub identifier: String,

    /// Storage path for objects and proxies
    pub storage_path: Option<String>,

    /// Encrypts stored objects and proxies when set
    pub passphrase: Option<String>,

    /// Number of recently used objects kept in memory
    pub cache_capacity: usize,

    /// Role of proxies towards new partners
    pub role: String,

    /// Whether partners may push replicas to this mesh base
    pub writable: bool,

    /// Default coherence of new proxies
    pub coherence: String,

    /// Log filter used when RUST_LOG is not set
    pub log_level: String,

    /// Mesh bases whose home objects `serve` keeps replicated
    pub peers: Vec<String>,

    /// Entity types known to this node, with their property types
    pub types: BTreeMap<String, Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        let mut types = BTreeMap::new();
        types.insert(
            "cli/Note".to_string(),
            vec!["cli/Note_Title".to_string(), "cli/Note_Text".to_string()],
        );
        Self {
            identifier: DEFAULT_IDENTIFIER.to_string(),
            storage_path: None,
            passphrase: None,
            cache_capacity: 1024,
            role: PeerRole::FullDuplex.to_string(),
            writable: true,
            coherence: CoherenceSpecification::OneTimeOnly.to_external_form(),
            log_level: "warn".to_string(),
            peers: Vec::new(),
            types,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("meshbase");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("meshbase");

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        let config_file = Self::config_file()?;

        if config_file.exists() {
            let contents = std::fs::read_to_string(&config_file).context("Failed to read config file")?;
            let config: Config = serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_file = Self::config_file()?;
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_file, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Where the sled database lives
    pub fn storage_dir(&self) -> Result<PathBuf> {
        match &self.storage_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => Ok(Self::data_dir()?.join("storage")),
        }
    }

    pub fn mesh_base_identifier(&self) -> Result<NetMeshBaseIdentifier> {
        NetMeshBaseIdentifier::guess_from_external_form(&self.identifier)
            .with_context(|| format!("Invalid identifier in config: {}", self.identifier))
    }

    pub fn peer_role(&self) -> Result<PeerRole> {
        self.role.parse().with_context(|| format!("Invalid role in config: {}", self.role))
    }

    pub fn default_coherence(&self) -> Result<CoherenceSpecification> {
        self.coherence
            .parse()
            .with_context(|| format!("Invalid coherence in config: {}", self.coherence))
    }

    pub fn add_peer(&mut self, peer: String) -> Result<()> {
        if !self.peers.contains(&peer) {
            self.peers.push(peer);
        }
        Ok(())
    }

    /// Set a config value without saving
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "identifier" => {
                let identifier = NetMeshBaseIdentifier::guess_from_external_form(value)
                    .context("Invalid mesh base identifier")?;
                self.identifier = identifier.to_external_form();
            }
            "storage_path" => {
                self.storage_path = if value.is_empty() { None } else { Some(value.to_string()) };
            }
            "passphrase" => {
                self.passphrase = if value.is_empty() { None } else { Some(value.to_string()) };
            }
            "cache_capacity" => {
                self.cache_capacity = value.parse().context("Invalid number")?;
            }
            "role" => {
                let role: PeerRole = value.parse().context("Invalid role")?;
                self.role = role.to_string();
            }
            "writable" => {
                self.writable = value.parse().context("Invalid boolean value")?;
            }
            "coherence" => {
                let coherence: CoherenceSpecification = value.parse().context("Invalid coherence")?;
                self.coherence = coherence.to_external_form();
            }
            "log_level" => {
                self.log_level = value.to_string();
            }
            "peers" => {
                self.peers = value
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect();
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "identifier" => Some(self.identifier.clone()),
            "storage_path" => self.storage_path.clone(),
            "passphrase" => self.passphrase.as_ref().map(|_| "(set)".to_string()),
            "cache_capacity" => Some(self.cache_capacity.to_string()),
            "role" => Some(self.role.clone()),
            "writable" => Some(self.writable.to_string()),
            "coherence" => Some(self.coherence.clone()),
            "log_level" => Some(self.log_level.clone()),
            "peers" => Some(self.peers.join(",")),
            _ => None,
        }
    }

    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            ("identifier".to_string(), self.identifier.clone()),
            (
                "storage_path".to_string(),
                self.storage_path.clone().unwrap_or_else(|| "(auto)".to_string()),
            ),
            (
                "passphrase".to_string(),
                if self.passphrase.is_some() { "(set)" } else { "(none)" }.to_string(),
            ),
            ("cache_capacity".to_string(), self.cache_capacity.to_string()),
            ("role".to_string(), self.role.clone()),
            ("writable".to_string(), self.writable.to_string()),
            ("coherence".to_string(), self.coherence.clone()),
            ("log_level".to_string(), self.log_level.clone()),
            ("peers".to_string(), self.peers.len().to_string()),
            ("types".to_string(), self.types.len().to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.identifier, DEFAULT_IDENTIFIER);
        assert!(config.writable);
        assert_eq!(config.peer_role().unwrap(), PeerRole::FullDuplex);
        assert_eq!(config.default_coherence().unwrap(), CoherenceSpecification::OneTimeOnly);
        assert!(config.types.contains_key("cli/Note"));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config.identifier, deserialized.identifier);
        assert_eq!(config.types, deserialized.types);
    }

    #[test]
    fn test_missing_keys_take_defaults() {
        let config: Config = serde_json::from_str(r#"{"identifier":"tcp://10.0.0.1:9000"}"#).unwrap();
        assert_eq!(config.identifier, "tcp://10.0.0.1:9000");
        assert_eq!(config.cache_capacity, 1024);
    }

    #[test]
    fn test_set_validates_values() {
        let mut config = Config::default();
        config.set("role", "shadow").unwrap();
        assert_eq!(config.get("role").as_deref(), Some("shadow"));
        assert!(config.set("role", "bogus").is_err());

        config.set("coherence", "periodic:5000").unwrap();
        assert_eq!(
            config.default_coherence().unwrap(),
            CoherenceSpecification::Periodic { period: 5000 }
        );

        config.set("peers", "tcp://a:1, tcp://b:2").unwrap();
        assert_eq!(config.peers, vec!["tcp://a:1", "tcp://b:2"]);
        assert!(config.set("nonsense", "1").is_err());
    }

    #[test]
    fn test_passphrase_is_masked() {
        let mut config = Config::default();
        config.set("passphrase", "secret").unwrap();
        assert_eq!(config.get("passphrase").as_deref(), Some("(set)"));
    }
}
