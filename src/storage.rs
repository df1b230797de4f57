//! Key and chain-state persistence

use crate::chain::ChainState;
use crate::error::{Result, WalletError};
use crate::key::Keypair;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Named keypairs, ordered by name
pub type KeyMap = BTreeMap<String, Keypair>;

/// Where the wallet keeps its keys and scan state between runs
pub trait WalletStore {
    fn load_keys(&self) -> Result<KeyMap>;
    fn save_keys(&self, keys: &KeyMap) -> Result<()>;
    /// `None` when nothing has been saved yet
    fn load_chain(&self) -> Result<Option<ChainState>>;
    fn save_chain(&self, chain: &ChainState) -> Result<()>;
}

/// Pretty-printed JSON files. Missing files read as empty.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    keys_path: PathBuf,
    data_path: PathBuf,
}

impl JsonFileStore {
    pub fn new(keys_path: impl Into<PathBuf>, data_path: impl Into<PathBuf>) -> Self {
        Self {
            keys_path: keys_path.into(),
            data_path: data_path.into(),
        }
    }

    pub fn keys_path(&self) -> &Path {
        &self.keys_path
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }
}

fn read_json<V: DeserializeOwned>(path: &Path) -> Result<Option<V>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(WalletError::Storage(format!("cannot read {}: {}", path.display(), e))),
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| WalletError::Storage(format!("{} is corrupt: {}", path.display(), e)))
}

/// Write through a temporary file so a crash never leaves half a file
fn write_json<V: Serialize>(path: &Path, value: &V) -> Result<()> {
    let storage_err = |e: std::io::Error| WalletError::Storage(format!("cannot write {}: {}", path.display(), e));

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(storage_err)?;
    }
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| WalletError::Storage(format!("cannot encode {}: {}", path.display(), e)))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, json).map_err(storage_err)?;
    fs::rename(&tmp, path).map_err(storage_err)?;
    debug!("wrote {}", path.display());
    Ok(())
}

impl WalletStore for JsonFileStore {
    fn load_keys(&self) -> Result<KeyMap> {
        Ok(read_json(&self.keys_path)?.unwrap_or_default())
    }

    fn save_keys(&self, keys: &KeyMap) -> Result<()> {
        write_json(&self.keys_path, keys)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.keys_path, fs::Permissions::from_mode(0o600))
                .map_err(|e| WalletError::Storage(format!("cannot protect {}: {}", self.keys_path.display(), e)))?;
        }
        Ok(())
    }

    fn load_chain(&self) -> Result<Option<ChainState>> {
        read_json(&self.data_path)
    }

    fn save_chain(&self, chain: &ChainState) -> Result<()> {
        write_json(&self.data_path, chain)
    }
}
