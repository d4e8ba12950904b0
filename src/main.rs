mod balance;
mod builder;
mod cli;
mod config;
mod display;
mod domain;
mod engine;
mod error;
mod jupiter;
mod ledger;
mod logger;
mod notifier;
mod prompt;
mod session;
mod sniper;
mod state;
mod time;
mod workflow;

#[cfg(test)]
mod testing;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::cli::{App, LedgerFactory};
use crate::jupiter::{Endpoints, JupiterClient};
use crate::ledger::{Ledger, RpcLedger};
use crate::prompt::TerminalPrompter;
use crate::state::Stores;

#[tokio::main]
async fn main() -> Result<()> {
    // Load local .env if present
    let _ = dotenvy::dotenv();

    let cfg = config::Config::from_env()?;
    let _guard = logger::init_tracing(&cfg.log_dir, cfg.log_stderr)?;
    info!(?cfg, "boot");

    let stores = Stores::open(&cfg.home);
    let aggregator = Arc::new(JupiterClient::new(Endpoints::from_config(&cfg))?);
    let connect: LedgerFactory = Arc::new(|url: &str| Arc::new(RpcLedger::new(url)) as Arc<dyn Ledger>);

    let mut app = App::new(cfg, stores, aggregator, Box::new(TerminalPrompter::default()), connect);
    let result = app.run().await;
    if let Err(err) = &result {
        tracing::error!(error = %err, "fatal");
    }
    info!("shutdown");
    result
}
