use anyhow::{Context, Result};
use async_trait::async_trait;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_client::rpc_request::RpcError;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use std::time::Duration;
use tracing::debug;

/// JSON-RPC "invalid params", returned when a queried account does not exist.
const RPC_INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawTokenAmount {
    pub amount: u64,
    pub decimals: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOptions {
    pub skip_preflight: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    Success,
    Failed(String),
}

/// Ledger RPC surface consumed by the resolver, the engine and the watchers.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Lamports held by `owner`.
    async fn get_balance(&self, owner: &Pubkey) -> Result<u64>;

    /// `None` when the token account does not exist.
    async fn get_token_account_balance(&self, account: &Pubkey) -> Result<Option<RawTokenAmount>>;

    /// `None` when the mint does not exist.
    async fn get_mint_decimals(&self, mint: &Pubkey) -> Result<Option<u8>>;

    async fn submit_transaction(&self, tx: &VersionedTransaction, opts: SubmitOptions) -> Result<Signature>;

    /// `None` while the ledger has no terminal status for the signature.
    async fn signature_status(&self, signature: &Signature) -> Result<Option<TxOutcome>>;

    async fn health(&self) -> Result<()>;
}

pub struct RpcLedger {
    url: String,
    rpc: RpcClient,
}

impl RpcLedger {
    pub fn new(url: &str) -> Self {
        let url = url.trim_end_matches('/').to_string();
        let rpc = RpcClient::new_with_timeout_and_commitment(
            url.clone(),
            Duration::from_secs(30),
            CommitmentConfig::confirmed(),
        );
        Self { url, rpc }
    }
}

fn is_account_missing(err: &ClientError) -> bool {
    match err.kind() {
        ClientErrorKind::RpcError(RpcError::RpcResponseError { code, message, .. }) => {
            *code == RPC_INVALID_PARAMS || message.contains("could not find account")
        }
        _ => false,
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn get_balance(&self, owner: &Pubkey) -> Result<u64> {
        self.rpc
            .get_balance(owner)
            .await
            .with_context(|| format!("getBalance {owner}"))
    }

    async fn get_token_account_balance(&self, account: &Pubkey) -> Result<Option<RawTokenAmount>> {
        match self.rpc.get_token_account_balance(account).await {
            Ok(ui) => {
                let amount = ui
                    .amount
                    .parse::<u64>()
                    .with_context(|| format!("token amount '{}' for {account}", ui.amount))?;
                Ok(Some(RawTokenAmount { amount, decimals: ui.decimals }))
            }
            Err(err) if is_account_missing(&err) => {
                debug!(%account, "ledger.token_account_missing");
                Ok(None)
            }
            Err(err) => Err(err).with_context(|| format!("getTokenAccountBalance {account}")),
        }
    }

    async fn get_mint_decimals(&self, mint: &Pubkey) -> Result<Option<u8>> {
        match self.rpc.get_token_supply(mint).await {
            Ok(supply) => Ok(Some(supply.decimals)),
            Err(err) if is_account_missing(&err) => Ok(None),
            Err(err) => Err(err).with_context(|| format!("getTokenSupply {mint}")),
        }
    }

    async fn submit_transaction(&self, tx: &VersionedTransaction, opts: SubmitOptions) -> Result<Signature> {
        let sig = self
            .rpc
            .send_transaction_with_config(
                tx,
                RpcSendTransactionConfig {
                    skip_preflight: opts.skip_preflight,
                    preflight_commitment: Some(CommitmentConfig::processed().commitment),
                    ..RpcSendTransactionConfig::default()
                },
            )
            .await
            .context("sendTransaction")?;
        Ok(sig)
    }

    async fn signature_status(&self, signature: &Signature) -> Result<Option<TxOutcome>> {
        let status = self
            .rpc
            .get_signature_status(signature)
            .await
            .with_context(|| format!("getSignatureStatuses {signature}"))?;
        Ok(status.map(|result| match result {
            Ok(()) => TxOutcome::Success,
            Err(err) => TxOutcome::Failed(err.to_string()),
        }))
    }

    async fn health(&self) -> Result<()> {
        self.rpc
            .get_version()
            .await
            .with_context(|| format!("getVersion {}", self.url))?;
        Ok(())
    }
}
