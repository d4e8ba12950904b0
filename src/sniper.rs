use anyhow::{Context, Result};
use rand::Rng;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::balance::BalanceResolver;
use crate::domain::{SnipeStatus, SnipeTarget};
use crate::error::ResolveError;
use crate::ledger::Ledger;
use crate::notifier::Notifier;
use crate::state::{JsonStore, SnipeBook, Stores};
use crate::time::now_unix;

/// Bounds of the uniformly jittered delay between polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollWindow {
    pub min: Duration,
    pub max: Duration,
}

impl PollWindow {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max: max.max(min) }
    }

    fn next_delay(&self) -> Duration {
        let min = u64::try_from(self.min.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    Filled,
    Cancelled,
}

/// Polls one wallet's balance of a snipe target's token until it turns nonzero.
///
/// Observation only: take-profit and stop-loss are carried on the target but nothing
/// here trades on them.
pub struct SnipeWatcher {
    id: u32,
    target: SnipeTarget,
    owner: Pubkey,
    resolver: BalanceResolver,
    snipes: JsonStore<SnipeBook>,
    notifier: Notifier,
    window: PollWindow,
    status: watch::Sender<SnipeStatus>,
}

impl SnipeWatcher {
    /// Loads target `id` and re-reads its wallet's public key from the wallet store.
    pub fn from_store(
        id: u32,
        stores: &Stores,
        ledger: Arc<dyn Ledger>,
        notifier: Notifier,
        window: PollWindow,
    ) -> Result<Self> {
        let book = stores.snipes.load_or_default()?;
        let target = book
            .get(id)
            .cloned()
            .with_context(|| format!("snipe {id} does not exist"))?;

        let wallets = stores.wallets.load_or_default()?;
        let record = wallets
            .get(target.wallet_id)
            .with_context(|| format!("snipe {id} watches unknown wallet {}", target.wallet_id))?;
        let owner = Pubkey::from_str(&record.pubkey)
            .with_context(|| format!("wallet {} has a malformed pubkey", target.wallet_id))?;

        let (status, _) = watch::channel(target.status);
        Ok(Self {
            id,
            target,
            owner,
            resolver: BalanceResolver::new(ledger),
            snipes: stores.snipes.clone(),
            notifier,
            window,
            status,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Latest phase observed by the watcher.
    pub fn subscribe(&self) -> watch::Receiver<SnipeStatus> {
        self.status.subscribe()
    }

    /// One balance check. A token that does not exist yet counts as a zero balance.
    pub async fn poll_once(&self, now: i64) -> Result<SnipeStatus, ResolveError> {
        let held = match self.resolver.resolve(&self.owner, self.target.token_mint()).await {
            Ok(account) => !account.balance.is_zero(),
            Err(ResolveError::NotFound(_)) => false,
            Err(err) => return Err(err),
        };
        Ok(if held {
            SnipeStatus::Filled
        } else if self.target.launch_at.is_some_and(|launch| now < launch) {
            SnipeStatus::NotIn
        } else {
            SnipeStatus::Watching
        })
    }

    pub async fn run(self, cancel: CancellationToken) -> WatchOutcome {
        info!(snipe = self.id, mint = self.target.token_mint(), wallet = %self.owner, "sniper.start");
        loop {
            if cancel.is_cancelled() {
                info!(snipe = self.id, "sniper.cancelled");
                return WatchOutcome::Cancelled;
            }

            match self.poll_once(now_unix()).await {
                Ok(SnipeStatus::Filled) => {
                    self.status.send_replace(SnipeStatus::Filled);
                    self.on_filled().await;
                    return WatchOutcome::Filled;
                }
                Ok(status) => {
                    info!(snipe = self.id, %status, "sniper.poll");
                    self.status.send_replace(status);
                }
                Err(err) => warn!(snipe = self.id, error = %err, "sniper.poll_failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(snipe = self.id, "sniper.cancelled");
                    return WatchOutcome::Cancelled;
                }
                _ = tokio::time::sleep(self.window.next_delay()) => {}
            }
        }
    }

    async fn on_filled(&self) {
        info!(snipe = self.id, mint = self.target.token_mint(), "sniper.filled");

        let id = self.id;
        match self.snipes.update(|book| book.set_status(id, SnipeStatus::Filled)) {
            Ok(true) => {}
            Ok(false) => warn!(snipe = id, "sniper.target_removed_before_fill"),
            Err(err) => warn!(snipe = id, error = %err, "sniper.persist_failed"),
        }

        let text = format!(
            "Snipe #{id} FILLED: {} ({}) is now held by wallet {}",
            self.target.pair.output_symbol,
            self.target.token_mint(),
            self.target.wallet_id,
        );
        if !self.notifier.is_configured() {
            return;
        }
        if let Err(err) = self.notifier.alert(&text).await {
            warn!(snipe = id, error = %err, "sniper.notify_failed");
        }
    }
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<WatchOutcome>,
    status: watch::Receiver<SnipeStatus>,
}

/// Owns every background watcher task.
pub struct WatcherRegistry {
    root: CancellationToken,
    running: HashMap<u32, Running>,
}

impl Default for WatcherRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            running: HashMap::new(),
        }
    }

    /// Starts `watcher` unless one is already running for the same target.
    pub fn spawn(&mut self, watcher: SnipeWatcher) -> bool {
        let id = watcher.id();
        if self.is_running(id) {
            return false;
        }
        let cancel = self.root.child_token();
        let status = watcher.subscribe();
        let handle = tokio::spawn(watcher.run(cancel.clone()));
        self.running.insert(id, Running { cancel, handle, status });
        true
    }

    /// Stops the watcher for `id`; the persisted target is left as is.
    pub fn cancel(&mut self, id: u32) -> bool {
        match self.running.remove(&id) {
            Some(running) => {
                running.cancel.cancel();
                !running.handle.is_finished()
            }
            None => false,
        }
    }

    pub fn is_running(&self, id: u32) -> bool {
        self.running.get(&id).is_some_and(|r| !r.handle.is_finished())
    }

    /// Latest phase reported by the watcher for `id`, running or finished.
    pub fn status(&self, id: u32) -> Option<SnipeStatus> {
        self.running.get(&id).map(|r| *r.status.borrow())
    }

    pub fn running_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .running
            .iter()
            .filter(|(_, r)| !r.handle.is_finished())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Cancels every watcher and waits for all of them to stop.
    pub async fn shutdown(&mut self) {
        self.root.cancel();
        for (id, running) in self.running.drain() {
            match running.handle.await {
                Ok(outcome) => info!(snipe = id, ?outcome, "sniper.stopped"),
                Err(err) => warn!(snipe = id, error = %err, "sniper.join_failed"),
            }
        }
    }
}
