//! Wallet configuration
//!
//! Loaded from an optional TOML file. Every field has a default; CLI flags
//! override whatever the file says.

use crate::constants::{Network, USER_AGENT};
use crate::error::{Result, WalletError};
use crate::session::SessionOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub network: Network,
    /// Peer host; the network's DNS seed when unset
    pub peer: Option<String>,
    /// Peer port; the network's default when unset
    pub port: Option<u16>,
    /// Deadline for a whole `balance` or `send` session
    pub timeout_secs: u64,
    /// Fee paid by `send`, in satoshis
    pub fee: u64,
    pub false_positive_rate: f64,
    pub keys_file: PathBuf,
    pub data_file: PathBuf,
    pub user_agent: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        WalletConfig {
            network: Network::Testnet,
            peer: None,
            port: None,
            timeout_secs: 30,
            fee: 0,
            false_positive_rate: 0.0001,
            keys_file: PathBuf::from("keys"),
            data_file: PathBuf::from("data"),
            user_agent: USER_AGENT.to_string(),
        }
    }
}

impl WalletConfig {
    /// Read `path`, or fall back to defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let config = Self::from_toml(&contents)
                    .map_err(|e| WalletError::Config(format!("{}: {}", path.display(), e)))?;
                tracing::debug!("loaded config from {}", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(WalletError::Config(format!("cannot read {}: {}", path.display(), e))),
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| WalletError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(WalletError::Config("timeout_secs must be positive".to_string()));
        }
        if !(self.false_positive_rate > 0.0 && self.false_positive_rate < 1.0) {
            return Err(WalletError::Config(format!(
                "false_positive_rate {} is not between 0 and 1",
                self.false_positive_rate
            )));
        }
        Ok(())
    }

    pub fn peer_host(&self) -> &str {
        self.peer.as_deref().unwrap_or_else(|| self.network.dns_seed())
    }

    pub fn peer_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.network.default_port())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            network: self.network,
            user_agent: self.user_agent.clone(),
            timeout: self.timeout(),
            false_positive_rate: self.false_positive_rate,
        }
    }
}
