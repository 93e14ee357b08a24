use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{AuthorityRef, ProfileRef};
use crate::context::{ExchangeContext, ProfilePolicy, ProtectionScheme};
use crate::polling::PollPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cmp: CmpConfig,
    #[serde(default = "default_root_ca")]
    pub root_ca: CaConfig,
    #[serde(default = "default_issuing_ca")]
    pub issuing_ca: CaConfig,
    #[serde(default)]
    pub authority: AuthorityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            cmp: CmpConfig::default(),
            root_ca: default_root_ca(),
            issuing_ca: default_issuing_ca(),
            authority: AuthorityConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    /// Largest accepted request frame in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/cmp_socket")
}

fn default_max_frame_size() -> u32 {
    1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct CmpConfig {
    #[serde(default = "default_authority")]
    pub authority: String,
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default)]
    pub protection: ProtectionScheme,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_true")]
    pub include_ca_chain: bool,
    #[serde(default = "default_true")]
    pub require_public_key: bool,
    #[serde(default)]
    pub max_validity_days: Option<u32>,
}

impl Default for CmpConfig {
    fn default() -> Self {
        Self {
            authority: default_authority(),
            profile: default_profile(),
            protection: ProtectionScheme::default(),
            poll_timeout_ms: default_poll_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            include_ca_chain: true,
            require_public_key: true,
            max_validity_days: None,
        }
    }
}

fn default_authority() -> String {
    "default".to_string()
}

fn default_profile() -> String {
    "default".to_string()
}

fn default_poll_timeout_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_true() -> bool {
    true
}

/// Distinguished name, key size and lifetime of a bootstrap CA.
#[derive(Debug, Deserialize, Clone)]
pub struct CaConfig {
    pub common_name: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub organizational_unit: String,
    #[serde(default)]
    pub locality: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub country: String,
    #[serde(default = "default_key_size")]
    pub key_size: u32,
    #[serde(default = "default_ca_validity")]
    pub validity_days: u32,
}

fn default_key_size() -> u32 {
    4096
}

fn default_ca_validity() -> u32 {
    3650 // 10 years
}

fn default_root_ca() -> CaConfig {
    CaConfig {
        common_name: "CMP Engine Root CA".to_string(),
        organization: "CMP Engine".to_string(),
        organizational_unit: "PKI".to_string(),
        locality: String::new(),
        state: String::new(),
        country: "US".to_string(),
        key_size: default_key_size(),
        validity_days: default_ca_validity(),
    }
}

fn default_issuing_ca() -> CaConfig {
    CaConfig {
        common_name: "CMP Engine Issuing CA".to_string(),
        validity_days: 1825, // 5 years
        ..default_root_ca()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthorityConfig {
    /// Profile name -> validity of issued certificates in days.
    #[serde(default = "default_profiles")]
    pub profiles: HashMap<String, u32>,
    #[serde(default)]
    pub issue_delay_ms: u64,
    /// How long a completed transaction stays readable.
    #[serde(default = "default_transaction_retention_secs")]
    pub transaction_retention_secs: u64,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            profiles: default_profiles(),
            issue_delay_ms: 0,
            transaction_retention_secs: default_transaction_retention_secs(),
        }
    }
}

fn default_transaction_retention_secs() -> u64 {
    600
}

fn default_profiles() -> HashMap<String, u32> {
    HashMap::from([("default".to_string(), 365)])
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let config_str =
            fs::read_to_string(path).context(format!("Failed to read config file: {}", path))?;

        let config: AppConfig =
            toml::from_str(&config_str).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration with default path (config.toml)
    pub fn load() -> Result<Self> {
        Self::from_file("config.toml")
    }

    /// Template for the per-exchange context; every request gets its own
    /// copy through [`ExchangeContext::for_new_exchange`].
    pub fn exchange_context(&self) -> ExchangeContext {
        let cmp = &self.cmp;
        ExchangeContext::new(
            AuthorityRef(cmp.authority.clone()),
            ProfileRef(cmp.profile.clone()),
        )
        .with_protection(cmp.protection)
        .with_policy(Arc::new(ProfilePolicy {
            require_public_key: cmp.require_public_key,
            max_validity_days: cmp.max_validity_days,
        }))
        .with_poll_policy(PollPolicy {
            timeout: Duration::from_millis(cmp.poll_timeout_ms),
            interval: Duration::from_millis(cmp.poll_interval_ms),
        })
        .with_ca_chain(cmp.include_ca_chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_apply_to_empty_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# nothing configured").unwrap();
        let config = AppConfig::from_file(file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.server.socket_path, PathBuf::from("/tmp/cmp_socket"));
        assert_eq!(config.cmp.protection, ProtectionScheme::None);
        assert_eq!(config.cmp.poll_timeout_ms, 10_000);
        assert_eq!(config.root_ca.common_name, "CMP Engine Root CA");
        assert_eq!(config.issuing_ca.common_name, "CMP Engine Issuing CA");
        assert_eq!(config.authority.profiles.get("default"), Some(&365));
    }

    #[test]
    fn test_sections_override_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
socket_path = "/run/cmp.sock"

[cmp]
authority = "edge"
profile = "tls-server"
protection = "password_based_mac"
poll_timeout_ms = 500
include_ca_chain = false
max_validity_days = 90

[issuing_ca]
common_name = "Edge Issuing CA"
key_size = 2048

[authority]
issue_delay_ms = 20
transaction_retention_secs = 30
profiles = {{ tls-server = 90 }}
"#
        )
        .unwrap();
        let config = AppConfig::from_file(file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.server.max_frame_size, 1024 * 1024);
        assert_eq!(config.issuing_ca.key_size, 2048);
        assert_eq!(config.issuing_ca.validity_days, 3650);
        assert_eq!(config.authority.profiles.get("tls-server"), Some(&90));
        assert_eq!(config.authority.transaction_retention_secs, 30);

        let ctx = config.exchange_context();
        assert_eq!(ctx.authority, AuthorityRef("edge".to_string()));
        assert_eq!(ctx.profile, ProfileRef("tls-server".to_string()));
        assert_eq!(ctx.protection, ProtectionScheme::PasswordBasedMac);
        assert_eq!(ctx.poll.timeout, Duration::from_millis(500));
        assert!(!ctx.include_ca_chain);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[cmp]\nprotection = \"rot13\"\n").unwrap();
        assert!(AppConfig::from_file(file.path().to_str().unwrap()).is_err());
        assert!(AppConfig::from_file("/nonexistent/config.toml").is_err());
    }
}
