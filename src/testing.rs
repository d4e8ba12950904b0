//! In-memory ledger, aggregator and prompter for unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::message::{Message, VersionedMessage};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::VersionedTransaction;
use spl_associated_token_account::get_associated_token_address;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::Mutex;

use crate::domain::{DcaAccount, DcaRequest, HistoricalOrder, LimitOrderRequest, OpenOrder, SwapRequest, TokenInfo};
use crate::engine::UnsignedPayload;
use crate::jupiter::{DcaCapable, LimitOrderPayload, LimitOrders, Swappable, TokenDirectory};
use crate::ledger::{Ledger, RawTokenAmount, SubmitOptions, TxOutcome};
use crate::workflow::Prompter;

pub fn token(symbol: &str, decimals: u8) -> TokenInfo {
    TokenInfo {
        address: Pubkey::new_unique().to_string(),
        symbol: symbol.to_string(),
        decimals,
        name: None,
    }
}

/// Unsigned transaction requiring exactly `signers` (first one pays).
pub fn unsigned_payload(signers: &[Pubkey]) -> UnsignedPayload {
    let accounts = signers.iter().map(|k| AccountMeta::new_readonly(*k, true)).collect();
    let ix = Instruction::new_with_bytes(Pubkey::new_unique(), &[1, 2, 3], accounts);
    let message = Message::new(&[ix], signers.first());
    let tx = VersionedTransaction {
        signatures: vec![Signature::default(); signers.len()],
        message: VersionedMessage::Legacy(message),
    };
    UnsignedPayload::from_bytes(bincode::serialize(&tx).unwrap())
}

#[derive(Default)]
struct LedgerState {
    lamports: HashMap<Pubkey, u64>,
    token_accounts: HashMap<Pubkey, RawTokenAmount>,
    mints: HashMap<Pubkey, u8>,
    submitted: Vec<(VersionedTransaction, SubmitOptions)>,
    reject: Option<String>,
    statuses: HashMap<Signature, VecDeque<Option<TxOutcome>>>,
    token_queries: usize,
    unhealthy: bool,
}

#[derive(Default)]
pub struct MockLedger {
    state: Mutex<LedgerState>,
}

impl MockLedger {
    fn with<R>(&self, f: impl FnOnce(&mut LedgerState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn set_lamports(&self, owner: Pubkey, lamports: u64) {
        self.with(|s| s.lamports.insert(owner, lamports));
    }

    /// Creates (or overwrites) `owner`'s associated account for `mint`.
    pub fn set_token_balance(&self, owner: &Pubkey, mint: &Pubkey, amount: u64, decimals: u8) {
        let ata = get_associated_token_address(owner, mint);
        self.with(|s| {
            s.token_accounts.insert(ata, RawTokenAmount { amount, decimals });
            s.mints.insert(*mint, decimals);
        });
    }

    pub fn set_mint(&self, mint: &Pubkey, decimals: u8) {
        self.with(|s| s.mints.insert(*mint, decimals));
    }

    pub fn reject_submissions(&self, reason: &str) {
        self.with(|s| s.reject = Some(reason.to_string()));
    }

    pub fn set_unhealthy(&self) {
        self.with(|s| s.unhealthy = true);
    }

    /// Statuses returned by successive queries; the last one repeats.
    pub fn script_status(&self, signature: Signature, statuses: Vec<Option<TxOutcome>>) {
        self.with(|s| s.statuses.insert(signature, statuses.into()));
    }

    pub fn submitted(&self) -> Vec<(VersionedTransaction, SubmitOptions)> {
        self.with(|s| s.submitted.clone())
    }

    pub fn token_queries(&self) -> usize {
        self.with(|s| s.token_queries)
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn get_balance(&self, owner: &Pubkey) -> Result<u64> {
        Ok(self.with(|s| s.lamports.get(owner).copied().unwrap_or(0)))
    }

    async fn get_token_account_balance(&self, account: &Pubkey) -> Result<Option<RawTokenAmount>> {
        Ok(self.with(|s| {
            s.token_queries += 1;
            s.token_accounts.get(account).copied()
        }))
    }

    async fn get_mint_decimals(&self, mint: &Pubkey) -> Result<Option<u8>> {
        Ok(self.with(|s| s.mints.get(mint).copied()))
    }

    async fn submit_transaction(&self, tx: &VersionedTransaction, opts: SubmitOptions) -> Result<Signature> {
        self.with(|s| match &s.reject {
            Some(reason) => Err(anyhow!("{reason}")),
            None => {
                s.submitted.push((tx.clone(), opts));
                Ok(tx.signatures.first().copied().unwrap_or_default())
            }
        })
    }

    async fn signature_status(&self, signature: &Signature) -> Result<Option<TxOutcome>> {
        Ok(self.with(|s| match s.statuses.get_mut(signature) {
            Some(queue) if queue.len() > 1 => queue.pop_front().flatten(),
            Some(queue) => queue.front().cloned().flatten(),
            None => None,
        }))
    }

    async fn health(&self) -> Result<()> {
        if self.with(|s| s.unhealthy) {
            return Err(anyhow!("connection refused"));
        }
        Ok(())
    }
}

#[derive(Default)]
struct AggregatorState {
    dca_eligible: HashSet<String>,
    prices: HashMap<String, f64>,
    swaps: Vec<SwapRequest>,
    limit_orders: Vec<LimitOrderRequest>,
    cancelled: Vec<Vec<String>>,
    open_orders: Vec<OpenOrder>,
    dca_requests: Vec<DcaRequest>,
    dca_accounts: Vec<DcaAccount>,
    closed_dca: Vec<String>,
    token_list_down: bool,
}

/// Aggregator returning well-formed unsigned payloads for the requesting wallet.
#[derive(Default)]
pub struct MockAggregator {
    tokens: Vec<TokenInfo>,
    state: Mutex<AggregatorState>,
}

impl MockAggregator {
    pub fn with_tokens(tokens: Vec<TokenInfo>) -> Self {
        Self {
            tokens,
            state: Mutex::default(),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut AggregatorState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn tokens(&self) -> Vec<TokenInfo> {
        self.tokens.clone()
    }

    pub fn set_dca_eligible(&self, mints: impl IntoIterator<Item = String>) {
        let mints: HashSet<String> = mints.into_iter().collect();
        self.with(|s| s.dca_eligible = mints);
    }

    pub fn set_price(&self, mint: &str, usd: f64) {
        self.with(|s| s.prices.insert(mint.to_string(), usd));
    }

    pub fn fail_token_list(&self) {
        self.with(|s| s.token_list_down = true);
    }

    pub fn set_open_orders(&self, orders: Vec<OpenOrder>) {
        self.with(|s| s.open_orders = orders);
    }

    pub fn set_dca_accounts(&self, accounts: Vec<DcaAccount>) {
        self.with(|s| s.dca_accounts = accounts);
    }

    pub fn swaps(&self) -> Vec<SwapRequest> {
        self.with(|s| s.swaps.clone())
    }

    pub fn limit_orders(&self) -> Vec<LimitOrderRequest> {
        self.with(|s| s.limit_orders.clone())
    }

    pub fn cancelled(&self) -> Vec<Vec<String>> {
        self.with(|s| s.cancelled.clone())
    }

    pub fn dca_requests(&self) -> Vec<DcaRequest> {
        self.with(|s| s.dca_requests.clone())
    }

    pub fn closed_dca(&self) -> Vec<String> {
        self.with(|s| s.closed_dca.clone())
    }
}

#[async_trait]
impl TokenDirectory for MockAggregator {
    async fn tradable_tokens(&self) -> Result<Vec<TokenInfo>> {
        if self.with(|s| s.token_list_down) {
            return Err(anyhow!("token list unavailable"));
        }
        Ok(self.tokens.clone())
    }

    async fn dca_eligible_tokens(&self) -> Result<HashSet<String>> {
        Ok(self.with(|s| s.dca_eligible.clone()))
    }

    async fn token_price_usd(&self, mint: &str) -> Result<f64> {
        self.with(|s| s.prices.get(mint).copied())
            .ok_or_else(|| anyhow!("no USD price for {mint}"))
    }
}

#[async_trait]
impl Swappable for MockAggregator {
    async fn build_swap(&self, owner: &Pubkey, request: &SwapRequest) -> Result<UnsignedPayload> {
        self.with(|s| s.swaps.push(request.clone()));
        Ok(unsigned_payload(&[*owner]))
    }
}

#[async_trait]
impl LimitOrders for MockAggregator {
    async fn build_limit_order(&self, owner: &Pubkey, request: &LimitOrderRequest) -> Result<LimitOrderPayload> {
        self.with(|s| s.limit_orders.push(request.clone()));
        let base = Keypair::new();
        let payload = unsigned_payload(&[*owner, base.pubkey()]);
        let message = payload.decode()?.message.serialize();
        Ok(LimitOrderPayload {
            order_key: base.pubkey().to_string(),
            co_signatures: vec![base.sign_message(&message)],
            payload,
        })
    }

    async fn cancel_orders(&self, owner: &Pubkey, order_keys: &[String]) -> Result<Vec<UnsignedPayload>> {
        self.with(|s| s.cancelled.push(order_keys.to_vec()));
        Ok(vec![unsigned_payload(&[*owner])])
    }

    async fn list_open_orders(&self, _owner: &Pubkey) -> Result<Vec<OpenOrder>> {
        Ok(self.with(|s| s.open_orders.clone()))
    }

    async fn list_order_history(&self, _owner: &Pubkey) -> Result<Vec<HistoricalOrder>> {
        Ok(Vec::new())
    }

    async fn list_trade_history(&self, _owner: &Pubkey) -> Result<Vec<HistoricalOrder>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl DcaCapable for MockAggregator {
    async fn build_dca(&self, owner: &Pubkey, request: &DcaRequest) -> Result<UnsignedPayload> {
        self.with(|s| s.dca_requests.push(request.clone()));
        Ok(unsigned_payload(&[*owner]))
    }

    async fn close_dca(&self, owner: &Pubkey, dca_key: &str) -> Result<UnsignedPayload> {
        self.with(|s| s.closed_dca.push(dca_key.to_string()));
        Ok(unsigned_payload(&[*owner]))
    }

    async fn list_dca_accounts(&self, _owner: &Pubkey) -> Result<Vec<DcaAccount>> {
        Ok(self.with(|s| s.dca_accounts.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Text(String),
    Choice(usize),
    Choices(Vec<usize>),
    Yes,
    No,
}

impl Answer {
    pub fn text(s: impl Into<String>) -> Self {
        Answer::Text(s.into())
    }
}

/// Replays a fixed answer script. Running out of answers, or an answer of the wrong
/// kind, is a terminal error so a looping workflow fails instead of hanging.
#[derive(Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<Answer>,
    prompts: Vec<String>,
    confirmations: Vec<String>,
    notices: Vec<String>,
    warnings: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new(answers: impl IntoIterator<Item = Answer>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            ..Self::default()
        }
    }

    fn next(&mut self, prompt: &str) -> io::Result<Answer> {
        self.prompts.push(prompt.to_string());
        self.answers.pop_front().ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, format!("no scripted answer for '{prompt}'"))
        })
    }

    fn unexpected(prompt: &str, answer: Answer) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("scripted answer {answer:?} does not fit '{prompt}'"),
        )
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.clone()
    }

    pub fn notices(&self) -> Vec<String> {
        self.notices.clone()
    }

    pub fn confirmations(&self) -> Vec<String> {
        self.confirmations.clone()
    }

    pub fn is_drained(&self) -> bool {
        self.answers.is_empty()
    }
}

impl Prompter for ScriptedPrompter {
    fn input(&mut self, prompt: &str) -> io::Result<String> {
        match self.next(prompt)? {
            Answer::Text(text) => Ok(text),
            other => Err(Self::unexpected(prompt, other)),
        }
    }

    fn secret(&mut self, prompt: &str) -> io::Result<String> {
        self.input(prompt)
    }

    fn select(&mut self, prompt: &str, items: &[String]) -> io::Result<usize> {
        match self.next(prompt)? {
            Answer::Choice(i) if i < items.len() => Ok(i),
            other => Err(Self::unexpected(prompt, other)),
        }
    }

    fn multi_select(&mut self, prompt: &str, items: &[String]) -> io::Result<Vec<usize>> {
        match self.next(prompt)? {
            Answer::Choices(picked) if picked.iter().all(|i| *i < items.len()) => Ok(picked),
            other => Err(Self::unexpected(prompt, other)),
        }
    }

    fn confirm(&mut self, prompt: &str) -> io::Result<bool> {
        self.confirmations.push(prompt.to_string());
        match self.next(prompt)? {
            Answer::Yes => Ok(true),
            Answer::No => Ok(false),
            other => Err(Self::unexpected(prompt, other)),
        }
    }

    fn notice(&mut self, message: &str) {
        self.notices.push(message.to_string());
    }

    fn warn(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }
}
