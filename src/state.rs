use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use dam_core::{logic_for_version, AccountLedger, MarketProxy, ProxyBuilder, ProxySnapshot};

use crate::config::MarketConfig;

/// Everything the CLI keeps between invocations.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u8,
    pub market: Option<ProxySnapshot>,
    #[serde(default)]
    pub accounts: AccountLedger,
}

impl StateFile {
    pub const VERSION: u8 = 1;

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                version: Self::VERSION,
                ..Self::default()
            });
        }
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let state: Self = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing {}", path.display()))?;
        if state.version != Self::VERSION {
            return Err(anyhow!(
                "state file version {} is not supported (expected {})",
                state.version,
                Self::VERSION
            ));
        }
        Ok(state)
    }

    /// Take the state lock, then load. The returned lock must be held until
    /// the matching `save`.
    pub fn load_locked(path: &Path) -> Result<(StateLock, Self)> {
        let lock = StateLock::acquire(path)?;
        let state = Self::load(path)?;
        Ok((lock, state))
    }

    /// Write through a sibling temp file so a crash never leaves half a state.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        let json = serde_json::to_vec_pretty(self).context("encoding state")?;
        fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}

/// Exclusive lock on a state file, held from load through save.
///
/// The lock lives on a sibling `.lock` file because `save` replaces the
/// state file by rename.
pub struct StateLock {
    file: File,
    path: PathBuf,
}

impl StateLock {
    /// Block until no other invocation holds the lock for `state_path`.
    pub fn acquire(state_path: &Path) -> Result<Self> {
        if let Some(parent) = state_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let path = state_path.with_extension("lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("opening {}", path.display()))?;
        file.lock().with_context(|| format!("locking {}", path.display()))?;
        debug!(lock = %path.display(), "state lock acquired");
        Ok(Self { file, path })
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            warn!(lock = %self.path.display(), error = %err, "releasing state lock failed");
        }
    }
}

/// A live market attached to the persisted account ledger.
pub struct Session {
    pub proxy: MarketProxy,
    pub ledger: Arc<Mutex<AccountLedger>>,
}

impl Session {
    pub fn open(state: StateFile, config: &MarketConfig) -> Result<Self> {
        let snapshot = state
            .market
            .ok_or_else(|| anyhow!("no market deployed yet; run `dam deploy` first"))?;
        let logic = logic_for_version(snapshot.logic_version, config.strict_share_percent)
            .ok_or_else(|| anyhow!("unknown logic version {}", snapshot.logic_version))?;
        let ledger = Arc::new(Mutex::new(state.accounts));
        let proxy = ProxyBuilder::new(snapshot.admin, ledger.clone())
            .event_capacity(config.event_capacity)
            .restore(snapshot.address, logic, snapshot.storage);
        Ok(Self { proxy, ledger })
    }

    pub fn into_state(self) -> StateFile {
        StateFile {
            version: StateFile::VERSION,
            market: Some(self.proxy.snapshot()),
            accounts: self.ledger.lock().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dam_core::{MarketError, MarketV1};

    #[test]
    fn missing_file_loads_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateFile::load(&dir.path().join("absent.json")).unwrap();
        assert!(state.market.is_none());
        assert_eq!(state.version, StateFile::VERSION);
    }

    #[test]
    fn session_survives_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dam.state.json");
        let config = MarketConfig::default();

        let ledger = Arc::new(Mutex::new(AccountLedger::new()));
        ledger
            .lock()
            .deposit(&"buyer".to_string(), 100, None)
            .unwrap();
        let proxy = ProxyBuilder::new("owner", ledger.clone())
            .deploy(Arc::new(MarketV1::default()), 50)
            .unwrap();
        proxy.add_asset(&"seller".to_string(), "a", 40).unwrap();
        proxy.buy(&"buyer".to_string(), 0, 40).unwrap();
        let digest = proxy.storage_digest();
        Session { proxy, ledger }.into_state().save(&path).unwrap();

        let session = Session::open(StateFile::load(&path).unwrap(), &config).unwrap();
        assert_eq!(session.proxy.storage_digest(), digest);
        assert_eq!(session.proxy.balance(), 40);
        assert_eq!(session.ledger.lock().balance(&"buyer".to_string()), 60);
        assert_eq!(
            session.ledger.lock().balance(session.proxy.address()),
            40
        );
    }

    #[test]
    fn overlapping_sessions_run_one_after_another() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dam.state.json");
        let config = MarketConfig::default();

        let ledger = Arc::new(Mutex::new(AccountLedger::new()));
        for buyer in ["b1", "b2"] {
            ledger
                .lock()
                .deposit(&buyer.to_string(), 100, None)
                .unwrap();
        }
        let proxy = ProxyBuilder::new("owner", ledger.clone())
            .deploy(Arc::new(MarketV1::default()), 50)
            .unwrap();
        proxy.add_asset(&"seller".to_string(), "a", 40).unwrap();
        Session { proxy, ledger }.into_state().save(&path).unwrap();

        let held = StateLock::acquire(&path).unwrap();
        let first = Session::open(StateFile::load(&path).unwrap(), &config).unwrap();

        let second = {
            let path = path.clone();
            std::thread::spawn(move || {
                let _lock = StateLock::acquire(&path).unwrap();
                let session =
                    Session::open(StateFile::load(&path).unwrap(), &MarketConfig::default())
                        .unwrap();
                let outcome = session.proxy.buy(&"b2".to_string(), 0, 40);
                session.into_state().save(&path).unwrap();
                outcome
            })
        };

        first.proxy.buy(&"b1".to_string(), 0, 40).unwrap();
        first.into_state().save(&path).unwrap();
        drop(held);

        assert_eq!(
            second.join().unwrap(),
            Err(MarketError::NotForSale { index: 0 })
        );
        let state = StateFile::load(&path).unwrap();
        let market = state.market.unwrap();
        assert_eq!(market.storage.assets[0].buyer.as_deref(), Some("b1"));
        assert_eq!(market.storage.balance, 40);
        assert_eq!(state.accounts.balance(&"b1".to_string()), 60);
        assert_eq!(state.accounts.balance(&"b2".to_string()), 100);
    }

    #[test]
    fn opening_without_market_fails() {
        let err = Session::open(StateFile::default(), &MarketConfig::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("dam deploy"));
    }
}
