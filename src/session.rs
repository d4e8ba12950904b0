use solana_sdk::signature::Signature;
use std::sync::Arc;
use tracing::{error, info};

use crate::balance::BalanceResolver;
use crate::domain::{DcaRequest, LimitOrderRequest, SwapRequest};
use crate::engine::Engine;
use crate::error::SubmissionError;
use crate::jupiter::{DcaCapable, LimitOrders, Swappable, MAX_CANCEL_BATCH};
use crate::ledger::Ledger;
use crate::state::Wallet;

/// The selected wallet together with everything needed to trade from it.
#[derive(Clone)]
pub struct Session {
    wallet: Arc<Wallet>,
    engine: Engine,
    resolver: BalanceResolver,
}

impl Session {
    pub fn new(wallet: Arc<Wallet>, ledger: Arc<dyn Ledger>, engine: Engine) -> Self {
        let resolver = BalanceResolver::new(ledger);
        Self {
            wallet,
            engine,
            resolver,
        }
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn resolver(&self) -> &BalanceResolver {
        &self.resolver
    }

    pub async fn execute_swap(&self, aggregator: &dyn Swappable, request: &SwapRequest) -> Result<Signature, SubmissionError> {
        info!(
            wallet = %self.wallet.pubkey(),
            input_mint = %request.pair.input_mint,
            output_mint = %request.pair.output_mint,
            amount = request.pair.input_amount_raw,
            slippage_bps = request.slippage_bps,
            "session.execute_swap"
        );
        let payload = aggregator
            .build_swap(&self.wallet.pubkey(), request)
            .await
            .map_err(SubmissionError::Build)?;
        self.submit("swap", self.engine.sign_and_submit(&payload, &self.wallet, &[]).await)
    }

    /// Returns the order account key and the transaction id.
    pub async fn open_limit_order(
        &self,
        aggregator: &dyn LimitOrders,
        request: &LimitOrderRequest,
    ) -> Result<(String, Signature), SubmissionError> {
        info!(
            wallet = %self.wallet.pubkey(),
            input_mint = %request.pair.input_mint,
            output_mint = %request.pair.output_mint,
            in_amount = request.pair.input_amount_raw,
            out_amount = request.output_amount_raw,
            expires_at = ?request.expires_at,
            "session.open_limit_order"
        );
        let built = aggregator
            .build_limit_order(&self.wallet.pubkey(), request)
            .await
            .map_err(SubmissionError::Build)?;
        let signature = self.submit(
            "limit_order",
            self.engine
                .sign_and_submit(&built.payload, &self.wallet, &built.co_signatures)
                .await,
        )?;
        Ok((built.order_key, signature))
    }

    /// Cancels up to ten orders; one transaction per payload returned by the aggregator.
    pub async fn cancel_orders(
        &self,
        aggregator: &dyn LimitOrders,
        order_keys: &[String],
    ) -> Result<Vec<Signature>, SubmissionError> {
        if order_keys.len() > MAX_CANCEL_BATCH {
            return Err(SubmissionError::Build(anyhow::anyhow!(
                "at most {MAX_CANCEL_BATCH} orders can be cancelled at once"
            )));
        }
        info!(wallet = %self.wallet.pubkey(), orders = order_keys.len(), "session.cancel_orders");
        let payloads = aggregator
            .cancel_orders(&self.wallet.pubkey(), order_keys)
            .await
            .map_err(SubmissionError::Build)?;

        let mut signatures = Vec::with_capacity(payloads.len());
        for payload in &payloads {
            signatures.push(self.submit(
                "cancel_orders",
                self.engine.sign_and_submit(payload, &self.wallet, &[]).await,
            )?);
        }
        Ok(signatures)
    }

    pub async fn open_dca(&self, aggregator: &dyn DcaCapable, request: &DcaRequest) -> Result<Signature, SubmissionError> {
        info!(
            wallet = %self.wallet.pubkey(),
            input_mint = %request.pair.input_mint,
            output_mint = %request.pair.output_mint,
            total = request.pair.input_amount_raw,
            per_cycle = request.amount_per_cycle_raw,
            frequency_secs = request.cycle_frequency_seconds,
            start_at = request.start_at,
            "session.open_dca"
        );
        let payload = aggregator
            .build_dca(&self.wallet.pubkey(), request)
            .await
            .map_err(SubmissionError::Build)?;
        self.submit("dca", self.engine.sign_and_submit(&payload, &self.wallet, &[]).await)
    }

    pub async fn close_dca(&self, aggregator: &dyn DcaCapable, dca_key: &str) -> Result<Signature, SubmissionError> {
        info!(wallet = %self.wallet.pubkey(), dca_key, "session.close_dca");
        let payload = aggregator
            .close_dca(&self.wallet.pubkey(), dca_key)
            .await
            .map_err(SubmissionError::Build)?;
        self.submit("close_dca", self.engine.sign_and_submit(&payload, &self.wallet, &[]).await)
    }

    fn submit(&self, kind: &str, result: Result<Signature, SubmissionError>) -> Result<Signature, SubmissionError> {
        match &result {
            Ok(signature) => info!(kind, %signature, "session.submitted"),
            Err(err) => error!(kind, error = %err, "session.submission_failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TradeBuilder;
    use crate::testing::{token, Answer, MockAggregator, MockLedger, ScriptedPrompter};
    use crate::domain::TradePair;
    use std::time::Duration;

    fn session(ledger: Arc<MockLedger>) -> Session {
        let engine = Engine::new(ledger.clone(), Duration::from_millis(100), Duration::from_secs(2));
        Session::new(Arc::new(Wallet::generate(1, "main")), ledger, engine)
    }

    fn pair(amount: u64) -> TradePair {
        TradePair {
            input_mint: "A".into(),
            input_symbol: "AAA".into(),
            input_decimals: 6,
            output_mint: "B".into(),
            output_symbol: "BBB".into(),
            output_decimals: 6,
            input_amount_raw: amount,
        }
    }

    #[tokio::test]
    async fn sell_half_a_token_end_to_end() {
        let ledger = Arc::new(MockLedger::default());
        let session = session(ledger.clone());
        let owner = session.wallet().pubkey();
        let usdc = token("USDC", 6);
        let bonk = token("BONK", 5);
        ledger.set_token_balance(&owner, &usdc.address.parse().unwrap(), 1_000_000, 6);
        ledger.set_mint(&bonk.address.parse().unwrap(), 5);
        let aggregator = MockAggregator::with_tokens(vec![usdc.clone(), bonk]);

        let mut prompter = ScriptedPrompter::new([
            Answer::text("USDC"),
            Answer::Yes,
            Answer::text("BONK"),
            Answer::Yes,
            Answer::text("0.5"),
            Answer::Yes,
            Answer::text("0.5"),
            Answer::Yes,
            Answer::Yes,
        ]);
        let request = TradeBuilder::new(&mut prompter, session.resolver(), &aggregator, owner)
            .swap()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.pair.input_amount_raw, 500_000);

        let signature = session.execute_swap(&aggregator, &request).await.unwrap();
        assert_ne!(signature, Signature::default());
        assert_eq!(aggregator.swaps(), vec![request]);

        let submitted = ledger.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].0.signatures, vec![signature]);
    }

    #[tokio::test]
    async fn limit_order_carries_the_order_key_cosignature() {
        let ledger = Arc::new(MockLedger::default());
        let session = session(ledger.clone());
        let aggregator = MockAggregator::default();
        let request = LimitOrderRequest {
            pair: pair(1_000),
            output_amount_raw: 2_000,
            expires_at: None,
        };

        let (order_key, signature) = session.open_limit_order(&aggregator, &request).await.unwrap();

        let (tx, _) = &ledger.submitted()[0];
        assert_eq!(tx.signatures.len(), 2);
        assert_eq!(tx.signatures[0], signature);
        let base: solana_sdk::pubkey::Pubkey = order_key.parse().unwrap();
        let message = tx.message.serialize();
        assert!(tx.signatures[1].verify(base.as_ref(), &message));
    }

    #[tokio::test]
    async fn cancelling_more_than_ten_orders_is_refused() {
        let ledger = Arc::new(MockLedger::default());
        let session = session(ledger.clone());
        let aggregator = MockAggregator::default();
        let keys: Vec<String> = (0..11).map(|i| format!("order{i}")).collect();

        let err = session.cancel_orders(&aggregator, &keys).await.unwrap_err();
        assert!(matches!(err, SubmissionError::Build(_)));
        assert!(aggregator.cancelled().is_empty());

        let sigs = session.cancel_orders(&aggregator, &keys[..3]).await.unwrap();
        assert_eq!(sigs.len(), 1);
        assert_eq!(aggregator.cancelled(), vec![keys[..3].to_vec()]);
    }

    #[tokio::test]
    async fn dca_payloads_go_through_the_signer() {
        let ledger = Arc::new(MockLedger::default());
        let session = session(ledger.clone());
        let aggregator = MockAggregator::default();
        let request = DcaRequest {
            pair: pair(1_000),
            amount_per_cycle_raw: 100,
            cycle_frequency_seconds: 60,
            start_at: 0,
        };

        session.open_dca(&aggregator, &request).await.unwrap();
        session.close_dca(&aggregator, "Dca1").await.unwrap();

        assert_eq!(aggregator.dca_requests(), vec![request]);
        assert_eq!(aggregator.closed_dca(), vec!["Dca1".to_string()]);
        assert!(ledger.submitted().iter().all(|(_, opts)| opts.skip_preflight));
        assert_eq!(ledger.submitted().len(), 2);
    }

    #[tokio::test]
    async fn submission_failure_is_surfaced() {
        let ledger = Arc::new(MockLedger::default());
        ledger.reject_submissions("insufficient funds for fee");
        let session = session(ledger.clone());
        let aggregator = MockAggregator::default();
        let request = SwapRequest {
            pair: pair(1_000),
            slippage_bps: 50,
        };

        let err = session.execute_swap(&aggregator, &request).await.unwrap_err();
        assert!(err.to_string().contains("insufficient funds"));
    }
}
