//! Configuration parsing.
//!
//! The config file is TOML with four optional sections. Secrets are never
//! stored in it: each section names the environment variable that holds its
//! secret, and the value is resolved when the client is built.
//!
//! ```toml
//! [identity]
//! url = "https://xyz.supabase.co"
//! anon_key_env = "SUPABASE_ANON_KEY"
//! password_reset_redirect = "https://app.example/change-password"
//!
//! [ledger]
//! rpc_url = "http://127.0.0.1:8545"
//! contract_address = "0x5fbdb2315678afecb367f032d93f642f64180aa3"
//!
//! [content]
//! api_key_env = "PINATA_API_KEY"
//! api_secret_env = "PINATA_API_SECRET"
//!
//! [session]
//! require_wallet = false
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::content::{DEFAULT_PINATA_API_URL, DEFAULT_PINATA_GATEWAY_URL, PinataSettings};
use crate::identity::SupabaseSettings;
use crate::ledger::{
    ContractLedgerClient, DEFAULT_RECEIPT_POLL_ATTEMPTS, JsonRpcBridge, WalletAddress,
    WalletBridge,
};
use crate::records::WalletRequirement;

/// Overrides the identity provider URL.
pub const IDENTITY_URL_ENV: &str = "HEALTHLINK_IDENTITY_URL";

/// Overrides the wallet bridge RPC URL.
pub const LEDGER_RPC_URL_ENV: &str = "HEALTHLINK_LEDGER_RPC_URL";

/// Overrides the contract address.
pub const CONTRACT_ADDRESS_ENV: &str = "HEALTHLINK_CONTRACT_ADDRESS";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthlinkConfig {
    /// Identity provider.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Wallet bridge and contract.
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Content store.
    #[serde(default)]
    pub content: ContentConfig,

    /// Session policy.
    #[serde(default)]
    pub session: SessionConfig,
}

/// `[identity]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Project URL.
    #[serde(default)]
    pub url: String,

    /// Environment variable holding the anon key.
    #[serde(default = "default_anon_key_env")]
    pub anon_key_env: String,

    /// Redirect target for password-reset emails.
    #[serde(default)]
    pub password_reset_redirect: Option<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key_env: default_anon_key_env(),
            password_reset_redirect: None,
        }
    }
}

/// `[ledger]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint standing in for the wallet. Unset means no wallet.
    #[serde(default)]
    pub rpc_url: Option<String>,

    /// Deployed health-record contract.
    #[serde(default)]
    pub contract_address: Option<WalletAddress>,

    /// Delay between receipt polls, in milliseconds.
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,

    /// Receipt polls before giving up.
    #[serde(default = "default_receipt_poll_attempts")]
    pub receipt_poll_attempts: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            contract_address: None,
            receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
            receipt_poll_attempts: default_receipt_poll_attempts(),
        }
    }
}

/// `[content]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Pinning API base URL.
    #[serde(default = "default_content_api_url")]
    pub api_url: String,

    /// Gateway base URL.
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Environment variable holding the API secret.
    #[serde(default = "default_api_secret_env")]
    pub api_secret_env: String,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            api_url: default_content_api_url(),
            gateway_url: default_gateway_url(),
            api_key_env: default_api_key_env(),
            api_secret_env: default_api_secret_env(),
        }
    }
}

/// `[session]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Refuse profile submission without a connected wallet.
    #[serde(default)]
    pub require_wallet: bool,
}

fn default_anon_key_env() -> String {
    "SUPABASE_ANON_KEY".to_string()
}

const fn default_receipt_poll_interval_ms() -> u64 {
    1000
}

const fn default_receipt_poll_attempts() -> u32 {
    DEFAULT_RECEIPT_POLL_ATTEMPTS
}

fn default_content_api_url() -> String {
    DEFAULT_PINATA_API_URL.to_string()
}

fn default_gateway_url() -> String {
    DEFAULT_PINATA_GATEWAY_URL.to_string()
}

fn default_api_key_env() -> String {
    "PINATA_API_KEY".to_string()
}

fn default_api_secret_env() -> String {
    "PINATA_API_SECRET".to_string()
}

/// Resolves an environment variable with empty treated as unset.
fn resolve(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Option<String> {
    lookup(var).filter(|v| !v.trim().is_empty())
}

impl HealthlinkConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Serialize configuration to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Applies `HEALTHLINK_*` overrides read through `lookup`.
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(url) = resolve(&lookup, IDENTITY_URL_ENV) {
            self.identity.url = url;
        }
        if let Some(url) = resolve(&lookup, LEDGER_RPC_URL_ENV) {
            self.ledger.rpc_url = Some(url);
        }
        if let Some(address) = resolve(&lookup, CONTRACT_ADDRESS_ENV) {
            let parsed = address.trim().parse().map_err(|err| {
                ConfigError::Validation(format!("{CONTRACT_ADDRESS_ENV}: {err}"))
            })?;
            self.ledger.contract_address = Some(parsed);
        }
        Ok(self)
    }

    /// Checks the settings are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity.url.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "identity.url is required (or set {IDENTITY_URL_ENV})"
            )));
        }
        if let Some(rpc_url) = &self.ledger.rpc_url {
            if rpc_url.trim().is_empty() {
                return Err(ConfigError::Validation("ledger.rpc_url is empty".into()));
            }
            if self.ledger.contract_address.is_none() {
                return Err(ConfigError::Validation(
                    "ledger.contract_address is required when ledger.rpc_url is set".into(),
                ));
            }
        }
        if self.ledger.receipt_poll_interval_ms == 0 || self.ledger.receipt_poll_attempts == 0 {
            return Err(ConfigError::Validation(
                "ledger receipt polling interval and attempts must be non-zero".into(),
            ));
        }
        if self.content.api_url.trim().is_empty() || self.content.gateway_url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "content.api_url and content.gateway_url must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Identity provider settings; the anon key must be set.
    pub fn supabase_settings(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<SupabaseSettings, ConfigError> {
        let anon_key = resolve(&lookup, &self.identity.anon_key_env).ok_or_else(|| {
            ConfigError::MissingSecret {
                var: self.identity.anon_key_env.clone(),
            }
        })?;
        Ok(SupabaseSettings {
            url: self.identity.url.clone(),
            anon_key: SecretString::from(anon_key),
            password_reset_redirect: self.identity.password_reset_redirect.clone(),
        })
    }

    /// Content store settings; missing credentials leave the client
    /// unconfigured rather than failing here.
    #[must_use]
    pub fn pinata_settings(&self, lookup: impl Fn(&str) -> Option<String>) -> PinataSettings {
        PinataSettings {
            api_url: self.content.api_url.clone(),
            gateway_url: self.content.gateway_url.clone(),
            api_key: resolve(&lookup, &self.content.api_key_env).map(SecretString::from),
            api_secret: resolve(&lookup, &self.content.api_secret_env).map(SecretString::from),
        }
    }

    /// Builds the ledger client. Without `rpc_url` the client behaves as if
    /// no wallet is installed.
    pub fn ledger_client(&self) -> Result<ContractLedgerClient, ConfigError> {
        let bridge = match &self.ledger.rpc_url {
            Some(url) => {
                let bridge = JsonRpcBridge::new(url.as_str())
                    .map_err(|err| ConfigError::Validation(format!("ledger.rpc_url: {err}")))?;
                Some(Arc::new(bridge) as Arc<dyn WalletBridge>)
            },
            None => None,
        };
        let contract = self.ledger.contract_address.unwrap_or(WalletAddress::ZERO);
        Ok(ContractLedgerClient::new(bridge, contract).with_receipt_polling(
            Duration::from_millis(self.ledger.receipt_poll_interval_ms),
            self.ledger.receipt_poll_attempts,
        ))
    }

    /// Wallet policy for profile submission.
    #[must_use]
    pub const fn wallet_requirement(&self) -> WalletRequirement {
        if self.session.require_wallet {
            WalletRequirement::Required
        } else {
            WalletRequirement::Optional
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),

    /// A secret's environment variable is unset or empty.
    #[error("environment variable {var} is not set")]
    MissingSecret {
        /// Variable name.
        var: String,
    },
}
