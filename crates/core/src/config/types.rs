use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::converter::ConverterConfig;
use crate::orchestrator::OrchestratorConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub converter: ConverterConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest accepted upload, in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

fn default_max_upload_bytes() -> usize {
    512 * 1024 * 1024
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("docbatch.db")
}

/// Where job workspaces and converter scratch directories live.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root holding one directory per job (upload, input, output, result).
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    /// Parent of the per-(job, unit) converter profile directories.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            scratch_dir: default_scratch_dir(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./storage")
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("docbatch-profiles")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sections() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.max_upload_bytes, 512 * 1024 * 1024);
        assert_eq!(config.database.path, PathBuf::from("docbatch.db"));
        assert_eq!(config.storage.root, PathBuf::from("./storage"));
        assert!(config.storage.scratch_dir.ends_with("docbatch-profiles"));
    }

    #[test]
    fn test_partial_storage_section() {
        let toml = r#"
[storage]
root = "/var/lib/docbatch"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.storage.root, PathBuf::from("/var/lib/docbatch"));
        assert_eq!(config.storage.scratch_dir, default_scratch_dir());
    }

    #[test]
    fn test_serializes_back_to_json() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(json["server"]["port"], 8080);
        assert_eq!(json["converter"]["target_format"], "pdf");
        assert_eq!(json["orchestrator"]["accepted_extensions"][0], "docx");
    }
}
