use anyhow::Result;
use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::builder::TradeBuilder;
use crate::config::Config;
use crate::display::{self, TokenLookup};
use crate::domain::{SnipeStatus, NATIVE_MINT};
use crate::engine::{explorer_url, Engine};
use crate::error::{ValidationError, WorkflowError};
use crate::jupiter::{Aggregator, MAX_CANCEL_BATCH};
use crate::ledger::{Ledger, TxOutcome};
use crate::notifier::Notifier;
use crate::session::Session;
use crate::sniper::{PollWindow, SnipeWatcher, WatcherRegistry};
use crate::state::{CliSettings, Stores, Wallet};
use crate::time::now_unix;
use crate::workflow::{collect, InputStep, Prompter, Step};

pub const DEFAULT_RPC_URL: &str = "https://api.mainnet-beta.solana.com";

/// Opens a ledger connection for an RPC URL.
pub type LedgerFactory = Arc<dyn Fn(&str) -> Arc<dyn Ledger> + Send + Sync>;

fn items(labels: &[&str]) -> Vec<String> {
    labels.iter().map(|s| s.to_string()).collect()
}

/// Asks for an RPC URL until one answers a health check.
struct RpcUrlStep<'a> {
    connect: &'a LedgerFactory,
}

#[async_trait]
impl<'a> Step for RpcUrlStep<'a> {
    type Output = String;

    async fn attempt(&mut self, prompter: &mut dyn Prompter) -> Result<String, WorkflowError> {
        let url = prompter.input("Enter your RPC URL endpoint or press ENTER:")?;
        let url = match url.trim() {
            "" => DEFAULT_RPC_URL.to_string(),
            url => url.to_string(),
        };
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ValidationError::Other("RPC URL must start with http:// or https://".into()).into());
        }
        let ledger = (self.connect)(&url);
        if let Err(err) = ledger.health().await {
            warn!(url = %url, error = %err, "cli.rpc_unreachable");
            return Err(ValidationError::RpcUnreachable.into());
        }
        Ok(url)
    }

    fn confirmation(&self, url: &String) -> Option<String> {
        Some(format!("Confirm RPC URL: {url}?"))
    }
}

/// Interactive menus over the stores, the aggregator and the selected wallet.
pub struct App<A: Aggregator> {
    cfg: Config,
    stores: Stores,
    aggregator: Arc<A>,
    prompter: Box<dyn Prompter>,
    connect: LedgerFactory,
    registry: WatcherRegistry,
    ledger: Option<Arc<dyn Ledger>>,
    session: Option<Session>,
}

impl<A: Aggregator> App<A> {
    pub fn new(cfg: Config, stores: Stores, aggregator: Arc<A>, prompter: Box<dyn Prompter>, connect: LedgerFactory) -> Self {
        Self {
            cfg,
            stores,
            aggregator,
            prompter,
            connect,
            registry: WatcherRegistry::new(),
            ledger: None,
            session: None,
        }
    }

    /// Runs until the user exits; watchers are shut down on the way out.
    pub async fn run(&mut self) -> Result<()> {
        let result = self.run_menus().await;
        self.registry.shutdown().await;
        result
    }

    async fn run_menus(&mut self) -> Result<()> {
        if self.stores.settings.load_or_default()?.first_login {
            self.first_login().await?;
        }
        self.start_watchers()?;
        if let Err(err) = self.session() {
            info!(reason = %err, "cli.no_wallet_selected");
        }

        loop {
            let selected = self
                .session
                .as_ref()
                .map(|s| (s.wallet().name().to_string(), s.wallet().pubkey().to_string()));
            display::banner(selected.as_ref().map(|(name, address)| (name.as_str(), address.as_str())));
            let choice = self.prompter.select(
                "Select menu:",
                &items(&["Jupiter Exchange", "Manage Wallets", "CLI Settings", "About", "Exit CLI"]),
            )?;
            let outcome = match choice {
                0 => self.exchange_menu().await,
                1 => self.wallets_menu().await,
                2 => self.settings_menu().await,
                3 => {
                    self.about();
                    Ok(())
                }
                _ => {
                    info!("cli.exit");
                    return Ok(());
                }
            };
            report(outcome)?;
        }
    }

    fn ledger(&mut self) -> Result<Arc<dyn Ledger>> {
        if let Some(ledger) = &self.ledger {
            return Ok(ledger.clone());
        }
        let settings = self.stores.settings.load_or_default()?;
        let url = if settings.rpc_url.is_empty() {
            DEFAULT_RPC_URL
        } else {
            settings.rpc_url.as_str()
        };
        let ledger = (self.connect)(url);
        self.ledger = Some(ledger.clone());
        Ok(ledger)
    }

    /// Session for the last selected wallet, opened on first use.
    fn session(&mut self) -> Result<Session, WorkflowError> {
        if let Some(session) = &self.session {
            return Ok(session.clone());
        }
        let settings = self.stores.settings.load_or_default()?;
        let registry = self.stores.wallets.load_or_default()?;
        let id = settings
            .last_wallet_selected
            .filter(|id| registry.get(*id).is_some())
            .or_else(|| registry.iter().next().map(|(id, _)| id))
            .ok_or_else(|| ValidationError::Other("no wallet registered, add one under Manage Wallets".into()))?;
        let wallet = registry.wallet(id)?;
        self.open_session(wallet)
    }

    fn open_session(&mut self, wallet: Wallet) -> Result<Session, WorkflowError> {
        let ledger = self.ledger()?;
        let engine = Engine::new(ledger.clone(), self.cfg.confirm_poll_interval(), self.cfg.confirm_timeout());
        info!(wallet_id = wallet.id(), wallet = %wallet.pubkey(), "cli.session_opened");
        let session = Session::new(Arc::new(wallet), ledger, engine);
        self.session = Some(session.clone());
        Ok(session)
    }

    async fn first_login(&mut self) -> Result<()> {
        self.prompter.notice("Welcome to Jupiter CLI! This is your first login, let's set things up.");
        let url = collect(self.prompter.as_mut(), &mut RpcUrlStep { connect: &self.connect }).await?;
        self.stores.settings.update(|s| s.rpc_url = url)?;
        self.ledger = None;

        let id = loop {
            match self.add_wallet().await? {
                Some(id) => break id,
                None => self.prompter.warn("A wallet is required to continue."),
            }
        };
        self.stores.settings.update(|s| {
            s.first_login = false;
            s.last_wallet_selected = Some(id);
        })?;
        info!(wallet_id = id, "cli.first_login_complete");
        Ok(())
    }

    /// Spawns a watcher for every target that is not filled yet.
    fn start_watchers(&mut self) -> Result<()> {
        let book = self.stores.snipes.load_or_default()?;
        let ids: Vec<u32> = book.unfilled().map(|(id, _)| id).collect();
        for id in ids {
            if let Err(err) = self.spawn_watcher(id) {
                warn!(snipe = id, error = %err, "cli.watcher_not_started");
            }
        }
        Ok(())
    }

    /// Rebuilds running watchers so they pick up the current RPC URL and alert settings.
    fn restart_watchers(&mut self) {
        for id in self.registry.running_ids() {
            self.registry.cancel(id);
            match self.spawn_watcher(id) {
                Ok(_) => info!(snipe = id, "cli.watcher_restarted"),
                Err(err) => warn!(snipe = id, error = %err, "cli.watcher_not_started"),
            }
        }
    }

    fn spawn_watcher(&mut self, id: u32) -> Result<bool> {
        let settings = self.stores.settings.load_or_default()?;
        let (min, max) = self.cfg.snipe_poll_window();
        let ledger = self.ledger()?;
        let watcher = SnipeWatcher::from_store(
            id,
            &self.stores,
            ledger,
            Notifier::from_settings(&settings),
            PollWindow::new(min, max),
        )?;
        Ok(self.registry.spawn(watcher))
    }

    fn about(&mut self) {
        self.prompter.notice(
            "Command-line interface to Jupiter: swaps, limit orders, DCA accounts and token snipes \
             from your local wallets.",
        );
        self.prompter.notice(
            "Use at your own risk. Nothing here is financial advice and the authors are not liable for lost funds.",
        );
    }

    async fn exchange_menu(&mut self) -> Result<(), WorkflowError> {
        self.session()?;
        loop {
            let choice = self.prompter.select(
                "Select menu:",
                &items(&["Swap", "Limit Order", "DCA", "Snipe Token", "Change wallet", "Back to main menu"]),
            )?;
            let outcome = match choice {
                0 => self.swap().await,
                1 => self.limit_order_menu().await,
                2 => self.dca_menu().await,
                3 => self.snipe_menu().await,
                4 => self.change_wallet(),
                _ => return Ok(()),
            };
            report(outcome)?;
        }
    }

    async fn swap(&mut self) -> Result<(), WorkflowError> {
        let session = self.session()?;
        let owner = session.wallet().pubkey();
        let request = TradeBuilder::new(self.prompter.as_mut(), session.resolver(), &*self.aggregator, owner)
            .swap()
            .await?;
        let Some(request) = request else {
            return Ok(());
        };

        let spinner = display::spinner("Sending swap transaction...");
        let result = session.execute_swap(&*self.aggregator, &request).await;
        spinner.finish_and_clear();
        let signature = result?;
        self.after_submit(&session, &signature).await
    }

    /// Prints the transaction and, on request, waits for its confirmation.
    async fn after_submit(&mut self, session: &Session, signature: &Signature) -> Result<(), WorkflowError> {
        display::success(&format!("Transaction sent: {}", explorer_url(signature)));
        if !self.prompter.confirm("Check transaction status?")? {
            return Ok(());
        }
        let spinner = display::spinner("Waiting for confirmation...");
        let outcome = session.engine().poll_status(signature).await;
        spinner.finish_and_clear();
        match outcome? {
            TxOutcome::Success => display::success("Transaction confirmed"),
            TxOutcome::Failed(reason) => display::failure(&format!("Transaction failed: {reason}")),
        }
        Ok(())
    }

    async fn limit_order_menu(&mut self) -> Result<(), WorkflowError> {
        loop {
            let session = self.session()?;
            let owner = session.wallet().pubkey();
            let spinner = display::spinner("Loading open orders...");
            let fetched = async {
                let orders = self.aggregator.list_open_orders(&owner).await?;
                let tokens = self.aggregator.tradable_tokens().await?;
                Ok::<_, anyhow::Error>((orders, tokens))
            }
            .await;
            spinner.finish_and_clear();
            let (orders, tokens) = fetched?;
            let lookup = TokenLookup::new(&tokens);
            if !orders.is_empty() {
                println!("{}", display::open_orders_table(&orders, &lookup, &self.cfg.tz));
            }

            let mut labels = vec!["Open Limit Order"];
            if !orders.is_empty() {
                labels.push("Cancel Limit Order(s)");
            }
            labels.extend(["Display Canceled Orders History", "Display Filled Orders History", "Back"]);
            let choice = labels[self.prompter.select("Select menu:", &items(&labels))?];

            let outcome = match choice {
                "Open Limit Order" => self.open_limit_order(&session).await,
                "Cancel Limit Order(s)" => {
                    let keys: Vec<String> = orders.iter().map(|o| o.public_key.clone()).collect();
                    let rows: Vec<String> = orders
                        .iter()
                        .enumerate()
                        .map(|(i, o)| {
                            format!(
                                "ID {} - {} {} -> {} {} ({})",
                                i + 1,
                                lookup.amount(&o.input_mint, o.in_amount),
                                lookup.symbol(&o.input_mint),
                                lookup.amount(&o.output_mint, o.out_amount),
                                lookup.symbol(&o.output_mint),
                                o.public_key
                            )
                        })
                        .collect();
                    self.cancel_orders(&session, &keys, &rows).await
                }
                "Display Canceled Orders History" => self.show_history(&owner, &lookup, false).await,
                "Display Filled Orders History" => self.show_history(&owner, &lookup, true).await,
                _ => return Ok(()),
            };
            report(outcome)?;
        }
    }

    async fn show_history(&self, owner: &Pubkey, lookup: &TokenLookup<'_>, filled: bool) -> Result<(), WorkflowError> {
        let spinner = display::spinner("Loading order history...");
        let history = if filled {
            self.aggregator.list_trade_history(owner).await
        } else {
            self.aggregator.list_order_history(owner).await
        };
        spinner.finish_and_clear();
        let history = history?;
        if history.is_empty() {
            println!("No orders to display.");
        } else {
            println!("{}", display::history_table(&history, lookup));
        }
        Ok(())
    }

    async fn open_limit_order(&mut self, session: &Session) -> Result<(), WorkflowError> {
        let request = TradeBuilder::new(
            self.prompter.as_mut(),
            session.resolver(),
            &*self.aggregator,
            session.wallet().pubkey(),
        )
        .limit_order(now_unix())
        .await?;
        let Some(request) = request else {
            return Ok(());
        };
        let spinner = display::spinner("Opening limit order...");
        let result = session.open_limit_order(&*self.aggregator, &request).await;
        spinner.finish_and_clear();
        let (order_key, signature) = result?;
        self.prompter.notice(&format!("Order account: {order_key}"));
        self.after_submit(session, &signature).await
    }

    async fn cancel_orders(&mut self, session: &Session, keys: &[String], rows: &[String]) -> Result<(), WorkflowError> {
        let picked = loop {
            let picked = self
                .prompter
                .multi_select(&format!("Select orders to cancel (max {MAX_CANCEL_BATCH}) or press ENTER:"), rows)?;
            if picked.len() > MAX_CANCEL_BATCH {
                self.prompter.warn(&ValidationError::TooManySelected(MAX_CANCEL_BATCH).to_string());
                continue;
            }
            break picked;
        };
        if picked.is_empty() || !self.prompter.confirm("Cancel selected orders?")? {
            return Ok(());
        }
        let selected: Vec<String> = picked.iter().filter_map(|i| keys.get(*i).cloned()).collect();

        let spinner = display::spinner("Cancelling orders...");
        let result = session.cancel_orders(&*self.aggregator, &selected).await;
        spinner.finish_and_clear();
        for signature in result? {
            display::success(&format!("Cancel transaction sent: {}", explorer_url(&signature)));
        }
        Ok(())
    }

    async fn dca_menu(&mut self) -> Result<(), WorkflowError> {
        loop {
            let choice = self.prompter.select(
                "Select menu:",
                &items(&["Open DCA Account", "Manage DCA Accounts", "Back"]),
            )?;
            let outcome = match choice {
                0 => self.open_dca().await,
                1 => self.manage_dca().await,
                _ => return Ok(()),
            };
            report(outcome)?;
        }
    }

    async fn open_dca(&mut self) -> Result<(), WorkflowError> {
        let session = self.session()?;
        let request = TradeBuilder::new(
            self.prompter.as_mut(),
            session.resolver(),
            &*self.aggregator,
            session.wallet().pubkey(),
        )
        .dca(now_unix())
        .await?;
        let Some(request) = request else {
            return Ok(());
        };
        let spinner = display::spinner("Opening DCA account...");
        let result = session.open_dca(&*self.aggregator, &request).await;
        spinner.finish_and_clear();
        let signature = result?;
        self.after_submit(&session, &signature).await
    }

    async fn manage_dca(&mut self) -> Result<(), WorkflowError> {
        let session = self.session()?;
        let owner = session.wallet().pubkey();
        let spinner = display::spinner("Loading DCA accounts...");
        let fetched = async {
            let accounts = self.aggregator.list_dca_accounts(&owner).await?;
            let tokens = self.aggregator.tradable_tokens().await?;
            Ok::<_, anyhow::Error>((accounts, tokens))
        }
        .await;
        spinner.finish_and_clear();
        let (accounts, tokens) = fetched?;
        if accounts.is_empty() {
            self.prompter.notice("No open DCA accounts.");
            return Ok(());
        }
        println!("{}", display::dca_table(&accounts, &TokenLookup::new(&tokens), &self.cfg.tz));

        let rows: Vec<String> = accounts
            .iter()
            .enumerate()
            .map(|(i, a)| format!("ID {} (DCA account: {})", i + 1, a.key))
            .collect();
        let picked = self
            .prompter
            .multi_select("Select DCA accounts to close or press ENTER:", &rows)?;
        for i in picked {
            let Some(account) = accounts.get(i) else { continue };
            match session.close_dca(&*self.aggregator, &account.key).await {
                Ok(signature) => display::success(&format!("Closed DCA account #{}: {}", i + 1, explorer_url(&signature))),
                Err(err) => display::failure(&format!("Failed to close DCA account #{}: {err}", i + 1)),
            }
        }
        Ok(())
    }

    async fn snipe_menu(&mut self) -> Result<(), WorkflowError> {
        loop {
            let book = self.stores.snipes.load_or_default()?;
            if !book.is_empty() {
                let registry = &self.registry;
                println!("{}", display::snipes_table(book.iter(), |id| registry.status(id), &self.cfg.tz));
            }
            let choice = self.prompter.select(
                "Select menu:",
                &items(&["Add snipe target", "Start watcher", "Stop watcher", "Delete snipe target(s)", "Back"]),
            )?;
            let outcome = match choice {
                0 => self.add_snipe().await,
                1 => self.start_snipe(),
                2 => self.stop_snipe(),
                3 => self.delete_snipes(),
                _ => return Ok(()),
            };
            report(outcome)?;
        }
    }

    async fn add_snipe(&mut self) -> Result<(), WorkflowError> {
        let session = self.session()?;
        let sol_price = self.aggregator.token_price_usd(NATIVE_MINT).await?;
        let target = TradeBuilder::new(
            self.prompter.as_mut(),
            session.resolver(),
            &*self.aggregator,
            session.wallet().pubkey(),
        )
        .snipe(session.wallet().id(), sol_price, now_unix())
        .await?;
        let Some(target) = target else {
            return Ok(());
        };
        let id = self.stores.snipes.update(|book| book.add(target))?;
        info!(snipe = id, "cli.snipe_added");
        self.spawn_watcher(id)?;
        display::success(&format!("Snipe #{id} added, watcher started"));
        Ok(())
    }

    fn pick_snipe(&mut self, prompt: &str, filter: impl Fn(u32, SnipeStatus) -> bool) -> Result<Option<u32>, WorkflowError> {
        let book = self.stores.snipes.load_or_default()?;
        let ids: Vec<u32> = book.iter().filter(|(id, t)| filter(*id, t.status)).map(|(id, _)| id).collect();
        if ids.is_empty() {
            self.prompter.notice("No matching snipe targets.");
            return Ok(None);
        }
        let mut labels: Vec<String> = ids
            .iter()
            .filter_map(|id| book.get(*id).map(|t| format!("#{id} {} ({})", t.pair.output_symbol, t.token_mint())))
            .collect();
        labels.push("Back".to_string());
        let choice = self.prompter.select(prompt, &labels)?;
        Ok(ids.get(choice).copied())
    }

    fn start_snipe(&mut self) -> Result<(), WorkflowError> {
        let running = self.registry.running_ids();
        let Some(id) = self.pick_snipe("Start watching:", |id, status| {
            status != SnipeStatus::Filled && !running.contains(&id)
        })?
        else {
            return Ok(());
        };
        if self.spawn_watcher(id)? {
            display::success(&format!("Watcher #{id} started"));
        }
        Ok(())
    }

    fn stop_snipe(&mut self) -> Result<(), WorkflowError> {
        let running = self.registry.running_ids();
        let Some(id) = self.pick_snipe("Stop watching:", |id, _| running.contains(&id))? else {
            return Ok(());
        };
        if self.registry.cancel(id) {
            display::success(&format!("Watcher #{id} stopped"));
        }
        Ok(())
    }

    fn delete_snipes(&mut self) -> Result<(), WorkflowError> {
        let book = self.stores.snipes.load_or_default()?;
        if book.is_empty() {
            self.prompter.notice("No snipe targets.");
            return Ok(());
        }
        let ids: Vec<u32> = book.iter().map(|(id, _)| id).collect();
        let rows: Vec<String> = book
            .iter()
            .map(|(id, t)| format!("#{id} {} ({}) {}", t.pair.output_symbol, t.token_mint(), t.status))
            .collect();
        let picked = self.prompter.multi_select("Select targets to delete or press ENTER:", &rows)?;
        if picked.is_empty() || !self.prompter.confirm("Delete selected targets?")? {
            return Ok(());
        }
        let doomed: Vec<u32> = picked.iter().filter_map(|i| ids.get(*i).copied()).collect();
        for id in &doomed {
            self.registry.cancel(*id);
        }
        self.stores.snipes.update(|book| {
            for id in &doomed {
                book.remove(*id);
            }
        })?;
        display::success(&format!("Deleted {} target(s)", doomed.len()));
        Ok(())
    }

    fn change_wallet(&mut self) -> Result<(), WorkflowError> {
        let Some(id) = self.select_wallet("Select wallet:")? else {
            return Ok(());
        };
        let wallet = self.stores.wallets.load_or_default()?.wallet(id)?;
        self.stores.settings.update(|s| s.last_wallet_selected = Some(id))?;
        self.open_session(wallet)?;
        Ok(())
    }

    /// Wallet picker with confirmation; `None` when no wallet exists.
    fn select_wallet(&mut self, prompt: &str) -> Result<Option<u32>, WorkflowError> {
        let registry = self.stores.wallets.load_or_default()?;
        let ids: Vec<u32> = registry.iter().map(|(id, _)| id).collect();
        if ids.is_empty() {
            self.prompter.notice("No wallets registered.");
            return Ok(None);
        }
        let labels: Vec<String> = registry
            .iter()
            .map(|(id, r)| format!("#{id} {} ({})", r.wallet_name, r.pubkey))
            .collect();
        loop {
            let choice = self.prompter.select(prompt, &labels)?;
            if self.prompter.confirm("Confirm wallet selected?")? {
                return Ok(ids.get(choice).copied());
            }
        }
    }

    async fn wallets_menu(&mut self) -> Result<(), WorkflowError> {
        loop {
            let registry = self.stores.wallets.load_or_default()?;
            if !registry.is_empty() {
                println!("{}", display::wallets_table(&registry));
            }
            let choice = self.prompter.select(
                "Select choice:",
                &items(&["Add wallet", "Edit wallet name", "Delete wallet(s)", "Back to main menu"]),
            )?;
            let outcome = match choice {
                0 => self.add_wallet().await.map(|_| ()),
                1 => self.rename_wallet().await,
                2 => self.delete_wallets(),
                _ => return Ok(()),
            };
            report(outcome)?;
        }
    }

    /// Registers a wallet from its private key; `None` when the user backs out.
    async fn add_wallet(&mut self) -> Result<Option<u32>, WorkflowError> {
        let wallet = collect(
            self.prompter.as_mut(),
            &mut InputStep::new("Enter wallet private key:", |s: &str| Wallet::from_private_key(0, "", s)).secret(),
        )
        .await?;
        let pubkey = wallet.pubkey();
        let registry = self.stores.wallets.load_or_default()?;
        if registry.contains_pubkey(&pubkey) {
            self.prompter.warn(&format!("Wallet {pubkey} is already registered."));
            return Ok(None);
        }
        if !self.prompter.confirm(&format!("Wallet address: {pubkey}. Confirm?"))? {
            return Ok(None);
        }
        let name = collect(
            self.prompter.as_mut(),
            &mut InputStep::new("Enter wallet name:", non_empty).confirm_with("Confirm wallet name?"),
        )
        .await?;

        let id = self.stores.wallets.update(|reg| reg.add(&name, wallet.keypair()))?;
        info!(wallet_id = id, wallet = %pubkey, "cli.wallet_added");
        display::success(&format!("Wallet #{id} {name} added"));
        Ok(Some(id))
    }

    async fn rename_wallet(&mut self) -> Result<(), WorkflowError> {
        let Some(id) = self.select_wallet("Select wallet to rename:")? else {
            return Ok(());
        };
        let name = collect(
            self.prompter.as_mut(),
            &mut InputStep::new("Enter wallet new name:", non_empty).confirm_with("Confirm wallet new name?"),
        )
        .await?;
        self.stores.wallets.update(|reg| reg.rename(id, &name))?;
        if self.session.as_ref().is_some_and(|s| s.wallet().id() == id) {
            self.session = None;
        }
        display::success(&format!("Wallet #{id} renamed to {name}"));
        Ok(())
    }

    fn delete_wallets(&mut self) -> Result<(), WorkflowError> {
        let registry = self.stores.wallets.load_or_default()?;
        if registry.is_empty() {
            self.prompter.notice("No wallets registered.");
            return Ok(());
        }
        let ids: Vec<u32> = registry.iter().map(|(id, _)| id).collect();
        let rows: Vec<String> = registry
            .iter()
            .map(|(id, r)| format!("#{id} {} ({})", r.wallet_name, r.pubkey))
            .collect();
        let picked = self
            .prompter
            .multi_select("Select wallet(s) to delete or press ENTER:", &rows)?;
        if picked.is_empty() || !self.prompter.confirm("Confirm delete wallet(s) selected?")? {
            return Ok(());
        }
        let doomed: Vec<u32> = picked.iter().filter_map(|i| ids.get(*i).copied()).collect();

        let remaining = self.stores.wallets.update(|reg| {
            for id in &doomed {
                reg.remove(*id);
            }
            reg.iter().next().map(|(id, _)| id)
        })?;
        self.stores.settings.update(|s| {
            if s.last_wallet_selected.is_some_and(|id| doomed.contains(&id)) {
                s.last_wallet_selected = remaining;
            }
        })?;
        if self.session.as_ref().is_some_and(|s| doomed.contains(&s.wallet().id())) {
            self.session = None;
        }
        info!(deleted = ?doomed, "cli.wallets_deleted");
        display::success(&format!("Deleted {} wallet(s)", doomed.len()));
        Ok(())
    }

    async fn settings_menu(&mut self) -> Result<(), WorkflowError> {
        loop {
            let settings = self.stores.settings.load_or_default()?;
            self.show_settings(&settings).await?;
            let choice = self.prompter.select(
                "Select CLI parameter to change:",
                &items(&["RPC URL Endpoint", "Discord webhook", "Telegram bot", "Back to main menu"]),
            )?;
            let outcome = match choice {
                0 => self.change_rpc_url().await,
                1 => self.change_discord().await,
                2 => self.change_telegram().await,
                _ => return Ok(()),
            };
            report(outcome)?;
        }
    }

    async fn show_settings(&mut self, settings: &CliSettings) -> Result<(), WorkflowError> {
        let ledger = self.ledger()?;
        let started = Instant::now();
        let latency = match ledger.health().await {
            Ok(()) => format!("({} ms)", started.elapsed().as_millis()),
            Err(_) => "(unreachable)".to_string(),
        };
        let label = |set: bool| if set { "set" } else { "not set" };
        let telegram = is_set(&settings.telegram_bot_token) && is_set(&settings.telegram_chat_id);
        self.prompter.notice(&format!("RPC URL Endpoint: {} {latency}", settings.rpc_url));
        self.prompter.notice(&format!("Discord webhook: {}", label(is_set(&settings.discord_webhook))));
        self.prompter.notice(&format!("Telegram bot: {}", label(telegram)));
        Ok(())
    }

    async fn change_rpc_url(&mut self) -> Result<(), WorkflowError> {
        let url = collect(self.prompter.as_mut(), &mut RpcUrlStep { connect: &self.connect }).await?;
        self.stores.settings.update(|s| s.rpc_url = url.clone())?;
        self.ledger = None;
        self.session = None;
        info!(rpc_url = %url, "cli.rpc_changed");
        self.restart_watchers();
        Ok(())
    }

    async fn change_discord(&mut self) -> Result<(), WorkflowError> {
        let url = collect(
            self.prompter.as_mut(),
            &mut InputStep::new("Enter Discord webhook URL (empty to remove):", |s: &str| Ok::<_, ValidationError>(optional(s)))
                .confirm_with("Confirm Discord webhook?"),
        )
        .await?;
        self.stores.settings.update(|s| s.discord_webhook = url)?;
        self.restart_watchers();
        Ok(())
    }

    async fn change_telegram(&mut self) -> Result<(), WorkflowError> {
        let token = collect(
            self.prompter.as_mut(),
            &mut InputStep::new("Enter Telegram bot token (empty to remove):", |s: &str| Ok::<_, ValidationError>(optional(s))).secret(),
        )
        .await?;
        let chat_id = match token {
            Some(_) => collect(
                self.prompter.as_mut(),
                &mut InputStep::new("Enter Telegram chat id:", |s: &str| non_empty(s).map(Some))
                    .confirm_with("Confirm Telegram chat id?"),
            )
            .await?,
            None => None,
        };
        self.stores.settings.update(|s| {
            s.telegram_bot_token = token;
            s.telegram_chat_id = chat_id;
        })?;
        self.restart_watchers();
        Ok(())
    }
}

/// Shows a failed action and returns to the menu; a broken terminal ends the run.
fn report(outcome: Result<(), WorkflowError>) -> Result<(), WorkflowError> {
    match outcome {
        Err(WorkflowError::Terminal(err)) => Err(WorkflowError::Terminal(err)),
        Err(err) => {
            warn!(error = %err, "cli.action_failed");
            display::failure(&format!("{err:#}"));
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

fn is_set(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

fn non_empty(s: &str) -> Result<String, ValidationError> {
    match s.trim() {
        "" => Err(ValidationError::Empty),
        s => Ok(s.to_string()),
    }
}

fn optional(s: &str) -> Option<String> {
    non_empty(s).ok()
}
