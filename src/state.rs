use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::{fmt, fs};

use crate::domain::{SnipeStatus, SnipeTarget};
use crate::error::ValidationError;

/// A JSON document on disk, rewritten wholesale on every save.
///
/// There is no locking: concurrent writers (e.g. a watcher persisting FILLED while the
/// user edits the snipe list) race and the last save wins.
pub struct JsonStore<T> {
    path: PathBuf,
    _doc: PhantomData<fn() -> T>,
}

impl<T> Clone for JsonStore<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            _doc: PhantomData,
        }
    }
}

impl<T> fmt::Debug for JsonStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonStore").field("path", &self.path).finish()
    }
}

impl<T: Serialize + DeserializeOwned + Default> JsonStore<T> {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            _doc: PhantomData,
        }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<T>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        let doc = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        Ok(Some(doc))
    }

    pub fn load_or_default(&self) -> Result<T> {
        Ok(self.load()?.unwrap_or_default())
    }

    pub fn save(&self, doc: &T) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let raw = serde_json::to_string_pretty(doc)?;
        fs::write(&self.path, raw).with_context(|| format!("writing {}", self.path.display()))?;
        Ok(())
    }

    /// Load, apply `edit`, save.
    pub fn update<R>(&self, edit: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut doc = self.load_or_default()?;
        let out = edit(&mut doc);
        self.save(&doc)?;
        Ok(out)
    }
}

/// User-editable settings kept in `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct CliSettings {
    #[serde(default)]
    pub rpc_url: String,
    #[serde(default)]
    pub discord_webhook: Option<String>,
    #[serde(default)]
    pub telegram_bot_token: Option<String>,
    #[serde(default)]
    pub telegram_chat_id: Option<String>,
    #[serde(default)]
    pub last_wallet_selected: Option<u32>,
    #[serde(default = "first_login_default")]
    pub first_login: bool,
}

fn first_login_default() -> bool {
    true
}

impl Default for CliSettings {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            discord_webhook: None,
            telegram_bot_token: None,
            telegram_chat_id: None,
            last_wallet_selected: None,
            first_login: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRecord {
    pub wallet_name: String,
    pub pubkey: String,
    /// Base58 64-byte keypair.
    pub private_key: String,
}

/// `wallets.json`: registry id -> stored wallet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletRegistry(BTreeMap<u32, WalletRecord>);

impl WalletRegistry {
    pub fn add(&mut self, name: &str, wallet_keypair: &Keypair) -> u32 {
        let id = next_id(&self.0);
        self.0.insert(
            id,
            WalletRecord {
                wallet_name: name.to_string(),
                pubkey: wallet_keypair.pubkey().to_string(),
                private_key: wallet_keypair.to_base58_string(),
            },
        );
        id
    }

    pub fn rename(&mut self, id: u32, name: &str) -> bool {
        match self.0.get_mut(&id) {
            Some(record) => {
                record.wallet_name = name.to_string();
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: u32) -> Option<WalletRecord> {
        self.0.remove(&id)
    }

    pub fn get(&self, id: u32) -> Option<&WalletRecord> {
        self.0.get(&id)
    }

    pub fn contains_pubkey(&self, pubkey: &Pubkey) -> bool {
        let key = pubkey.to_string();
        self.0.values().any(|r| r.pubkey == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &WalletRecord)> {
        self.0.iter().map(|(id, r)| (*id, r))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Loads the signing wallet for `id`.
    pub fn wallet(&self, id: u32) -> Result<Wallet> {
        let record = self
            .get(id)
            .with_context(|| format!("wallet {id} is not registered"))?;
        Wallet::from_record(id, record).with_context(|| format!("wallet {id} has an unusable key"))
    }
}

/// `snipes.json`: target id -> snipe target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnipeBook(BTreeMap<u32, SnipeTarget>);

impl SnipeBook {
    pub fn add(&mut self, target: SnipeTarget) -> u32 {
        let id = next_id(&self.0);
        self.0.insert(id, target);
        id
    }

    pub fn get(&self, id: u32) -> Option<&SnipeTarget> {
        self.0.get(&id)
    }

    pub fn set_status(&mut self, id: u32, status: SnipeStatus) -> bool {
        match self.0.get_mut(&id) {
            Some(target) => {
                target.status = status;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: u32) -> Option<SnipeTarget> {
        self.0.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &SnipeTarget)> {
        self.0.iter().map(|(id, t)| (*id, t))
    }

    pub fn unfilled(&self) -> impl Iterator<Item = (u32, &SnipeTarget)> {
        self.iter().filter(|(_, t)| t.status != SnipeStatus::Filled)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn next_id<V>(map: &BTreeMap<u32, V>) -> u32 {
    map.keys().next_back().map_or(1, |max| max + 1)
}

/// The three documents under the CLI home directory.
#[derive(Debug, Clone)]
pub struct Stores {
    pub settings: JsonStore<CliSettings>,
    pub wallets: JsonStore<WalletRegistry>,
    pub snipes: JsonStore<SnipeBook>,
}

impl Stores {
    pub fn open(home: impl AsRef<Path>) -> Self {
        let home = home.as_ref();
        Self {
            settings: JsonStore::new(home.join("config.json")),
            wallets: JsonStore::new(home.join("wallets.json")),
            snipes: JsonStore::new(home.join("snipes.json")),
        }
    }
}

/// A loaded signing wallet. Replaced, never mutated, when the user switches.
pub struct Wallet {
    id: u32,
    name: String,
    keypair: Keypair,
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("pubkey", &self.pubkey())
            .finish()
    }
}

impl Wallet {
    pub fn from_private_key(id: u32, name: &str, private_key: &str) -> Result<Self, ValidationError> {
        let bytes = bs58::decode(private_key.trim())
            .into_vec()
            .map_err(|_| ValidationError::InvalidPrivateKey)?;
        let keypair = Keypair::try_from(bytes.as_slice()).map_err(|_| ValidationError::InvalidPrivateKey)?;
        Ok(Self {
            id,
            name: name.to_string(),
            keypair,
        })
    }

    pub fn from_record(id: u32, record: &WalletRecord) -> Result<Self, ValidationError> {
        Self::from_private_key(id, &record.wallet_name, &record.private_key)
    }

    #[cfg(test)]
    pub fn generate(id: u32, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            keypair: Keypair::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }
}
