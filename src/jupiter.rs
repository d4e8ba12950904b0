use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::Config;
use crate::domain::{
    DcaAccount, DcaRequest, HistoricalOrder, LimitOrderRequest, OpenOrder, SwapRequest, TokenInfo,
};
use crate::engine::UnsignedPayload;

/// Aggregator limit on orders cancelled by one request.
pub const MAX_CANCEL_BATCH: usize = 10;

#[async_trait]
pub trait TokenDirectory: Send + Sync {
    async fn tradable_tokens(&self) -> Result<Vec<TokenInfo>>;
    /// Mints accepted by the DCA program.
    async fn dca_eligible_tokens(&self) -> Result<HashSet<String>>;
    async fn token_price_usd(&self, mint: &str) -> Result<f64>;
}

#[async_trait]
pub trait Swappable: Send + Sync {
    async fn build_swap(&self, owner: &Pubkey, request: &SwapRequest) -> Result<UnsignedPayload>;
}

/// Unsigned order transaction plus the signatures of keys generated for it.
#[derive(Debug, Clone)]
pub struct LimitOrderPayload {
    pub order_key: String,
    pub payload: UnsignedPayload,
    pub co_signatures: Vec<Signature>,
}

#[async_trait]
pub trait LimitOrders: Send + Sync {
    async fn build_limit_order(&self, owner: &Pubkey, request: &LimitOrderRequest) -> Result<LimitOrderPayload>;
    async fn cancel_orders(&self, owner: &Pubkey, order_keys: &[String]) -> Result<Vec<UnsignedPayload>>;
    async fn list_open_orders(&self, owner: &Pubkey) -> Result<Vec<OpenOrder>>;
    async fn list_order_history(&self, owner: &Pubkey) -> Result<Vec<HistoricalOrder>>;
    async fn list_trade_history(&self, owner: &Pubkey) -> Result<Vec<HistoricalOrder>>;
}

#[async_trait]
pub trait DcaCapable: Send + Sync {
    async fn build_dca(&self, owner: &Pubkey, request: &DcaRequest) -> Result<UnsignedPayload>;
    async fn close_dca(&self, owner: &Pubkey, dca_key: &str) -> Result<UnsignedPayload>;
    async fn list_dca_accounts(&self, owner: &Pubkey) -> Result<Vec<DcaAccount>>;
}

/// Everything the CLI needs from the aggregator.
pub trait Aggregator: TokenDirectory + Swappable + LimitOrders + DcaCapable {}

impl<T: TokenDirectory + Swappable + LimitOrders + DcaCapable> Aggregator for T {}

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub quote: String,
    pub limit: String,
    pub recurring: String,
    pub tokens: String,
    pub dca_tokens: String,
    pub price: String,
}

impl Endpoints {
    pub fn from_config(cfg: &Config) -> Self {
        let trim = |s: &str| s.trim_end_matches('/').to_string();
        Self {
            quote: trim(&cfg.jupiter_quote_url),
            limit: trim(&cfg.jupiter_limit_url),
            recurring: trim(&cfg.jupiter_recurring_url),
            tokens: cfg.jupiter_tokens_url.clone(),
            dca_tokens: cfg.jupiter_dca_tokens_url.clone(),
            price: trim(&cfg.jupiter_price_url),
        }
    }
}

pub struct JupiterClient {
    endpoints: Endpoints,
    http: Client,
    tokens: OnceCell<Vec<TokenInfo>>,
}

impl JupiterClient {
    pub fn new(endpoints: Endpoints) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            endpoints,
            http,
            tokens: OnceCell::new(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        let resp = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?;
        resp.json().await.with_context(|| format!("decoding {url}"))
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(&self, url: &str, body: &B) -> Result<T> {
        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("POST {url} failed: {status} {text}"));
        }
        resp.json().await.with_context(|| format!("decoding {url}"))
    }

    pub async fn quote(&self, req: &QuoteRequest) -> Result<serde_json::Value> {
        let url = format!("{}/quote", self.endpoints.quote);
        let resp = self
            .http
            .get(&url)
            .query(req)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub input_mint: String,
    pub output_mint: String,
    /// Amount in the input mint's base units.
    pub amount: String,
    pub slippage_bps: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapBody<'a> {
    quote_response: &'a serde_json::Value,
    user_public_key: String,
    wrap_and_unwrap_sol: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    /// base64 encoded VersionedTransaction
    swap_transaction: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLimitOrderBody {
    owner: String,
    in_amount: u64,
    out_amount: u64,
    input_mint: String,
    output_mint: String,
    expired_at: Option<i64>,
    base: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateLimitOrderResponse {
    tx: String,
    #[serde(default)]
    order_pubkey: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelOrdersBody<'a> {
    owner: String,
    fee_payer: String,
    orders: &'a [String],
}

#[derive(Debug, Deserialize)]
struct CancelOrdersResponse {
    #[serde(default)]
    tx: Option<String>,
    #[serde(default)]
    txs: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenOrderWire {
    public_key: String,
    account: OpenOrderAccount,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenOrderAccount {
    input_mint: String,
    output_mint: String,
    #[serde(deserialize_with = "lenient_u64")]
    ori_in_amount: u64,
    #[serde(deserialize_with = "lenient_u64")]
    ori_out_amount: u64,
    #[serde(default)]
    expired_at: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderHistoryWire {
    #[serde(default)]
    created_at: String,
    input_mint: String,
    output_mint: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    in_amount: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    out_amount: u64,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRecurringBody {
    user: String,
    input_mint: String,
    output_mint: String,
    params: RecurringParams,
}

#[derive(Debug, Serialize)]
struct RecurringParams {
    time: TimeParams,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TimeParams {
    in_amount: u64,
    number_of_orders: u64,
    interval: u32,
    min_price: Option<f64>,
    max_price: Option<f64>,
    start_at: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelRecurringBody<'a> {
    order: &'a str,
    user: String,
    recurring_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct RecurringTxResponse {
    transaction: String,
}

#[derive(Debug, Deserialize)]
struct RecurringOrdersResponse {
    #[serde(default)]
    time: Vec<RecurringOrderWire>,
    #[serde(default)]
    all: Vec<RecurringOrderWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecurringOrderWire {
    order_key: String,
    input_mint: String,
    output_mint: String,
    #[serde(deserialize_with = "lenient_u64")]
    in_deposited: u64,
    #[serde(deserialize_with = "lenient_u64")]
    in_amount_per_cycle: u64,
    #[serde(deserialize_with = "lenient_u64")]
    cycle_frequency: u64,
    created_at: serde_json::Value,
    #[serde(default)]
    trades: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    data: HashMap<String, Option<PriceEntry>>,
}

#[derive(Debug, Deserialize)]
struct PriceEntry {
    #[serde(deserialize_with = "lenient_f64")]
    price: f64,
}

/// Amounts arrive as JSON numbers or strings depending on the endpoint.
fn lenient_u64<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<u64, D::Error> {
    let value = serde_json::Value::deserialize(de)?;
    value_to_u64(&value).ok_or_else(|| serde::de::Error::custom(format!("not an amount: {value}")))
}

fn lenient_f64<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<f64, D::Error> {
    let value = serde_json::Value::deserialize(de)?;
    match &value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| serde::de::Error::custom(format!("not a price: {value}")))
}

fn value_to_u64(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        serde_json::Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>().ok().or_else(|| s.parse::<f64>().ok().map(|f| f as u64))
        }
        serde_json::Value::Null => Some(0),
        _ => None,
    }
}

/// Unix seconds from either a number or an RFC 3339 string.
fn value_to_unix(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.timestamp())
            .ok()
            .or_else(|| s.parse().ok()),
        _ => None,
    }
}

impl From<OpenOrderWire> for OpenOrder {
    fn from(wire: OpenOrderWire) -> Self {
        Self {
            public_key: wire.public_key,
            input_mint: wire.account.input_mint,
            output_mint: wire.account.output_mint,
            in_amount: wire.account.ori_in_amount,
            out_amount: wire.account.ori_out_amount,
            expires_at: wire.account.expired_at.as_ref().and_then(value_to_unix),
        }
    }
}

fn historical(wire: OrderHistoryWire, default_state: &str) -> HistoricalOrder {
    HistoricalOrder {
        created_at: wire.created_at,
        input_mint: wire.input_mint,
        output_mint: wire.output_mint,
        in_amount: wire.in_amount,
        out_amount: wire.out_amount,
        state: wire.state.unwrap_or_else(|| default_state.to_string()),
    }
}

impl TryFrom<RecurringOrderWire> for DcaAccount {
    type Error = anyhow::Error;

    fn try_from(wire: RecurringOrderWire) -> Result<Self> {
        let created_at = value_to_unix(&wire.created_at)
            .with_context(|| format!("order {} has no usable createdAt", wire.order_key))?;
        Ok(Self {
            key: wire.order_key,
            input_mint: wire.input_mint,
            output_mint: wire.output_mint,
            in_deposited: wire.in_deposited,
            in_amount_per_cycle: wire.in_amount_per_cycle,
            cycle_frequency: wire.cycle_frequency,
            created_at,
            fills: wire.trades.len() as u64,
        })
    }
}

#[async_trait]
impl TokenDirectory for JupiterClient {
    async fn tradable_tokens(&self) -> Result<Vec<TokenInfo>> {
        let tokens = self
            .tokens
            .get_or_try_init(|| async {
                let tokens: Vec<TokenInfo> = self.get_json(&self.endpoints.tokens, &[]).await?;
                info!(count = tokens.len(), "jupiter.tokens_loaded");
                Ok::<_, anyhow::Error>(tokens)
            })
            .await?;
        Ok(tokens.clone())
    }

    async fn dca_eligible_tokens(&self) -> Result<HashSet<String>> {
        let mints: Vec<String> = self.get_json(&self.endpoints.dca_tokens, &[]).await?;
        Ok(mints.into_iter().collect())
    }

    async fn token_price_usd(&self, mint: &str) -> Result<f64> {
        let resp: PriceResponse = self
            .get_json(&self.endpoints.price, &[("ids", mint.to_string())])
            .await?;
        resp.data
            .get(mint)
            .and_then(|entry| entry.as_ref())
            .map(|entry| entry.price)
            .ok_or_else(|| anyhow!("no USD price for {mint}"))
    }
}

#[async_trait]
impl Swappable for JupiterClient {
    async fn build_swap(&self, owner: &Pubkey, request: &SwapRequest) -> Result<UnsignedPayload> {
        let quote = self
            .quote(&QuoteRequest {
                input_mint: request.pair.input_mint.clone(),
                output_mint: request.pair.output_mint.clone(),
                amount: request.pair.input_amount_raw.to_string(),
                slippage_bps: request.slippage_bps,
            })
            .await?;
        debug!(out_amount = ?quote.get("outAmount"), "jupiter.quote");

        let url = format!("{}/swap", self.endpoints.quote);
        let resp: SwapResponse = self
            .post_json(
                &url,
                &SwapBody {
                    quote_response: &quote,
                    user_public_key: owner.to_string(),
                    wrap_and_unwrap_sol: true,
                },
            )
            .await?;
        Ok(UnsignedPayload::from_base64(&resp.swap_transaction)?)
    }
}

#[async_trait]
impl LimitOrders for JupiterClient {
    async fn build_limit_order(&self, owner: &Pubkey, request: &LimitOrderRequest) -> Result<LimitOrderPayload> {
        // The order account is a fresh key that must co-sign its creation.
        let base = Keypair::new();
        let url = format!("{}/createOrder", self.endpoints.limit);
        let resp: CreateLimitOrderResponse = self
            .post_json(
                &url,
                &CreateLimitOrderBody {
                    owner: owner.to_string(),
                    in_amount: request.pair.input_amount_raw,
                    out_amount: request.output_amount_raw,
                    input_mint: request.pair.input_mint.clone(),
                    output_mint: request.pair.output_mint.clone(),
                    expired_at: request.expires_at,
                    base: base.pubkey().to_string(),
                },
            )
            .await?;

        let payload = UnsignedPayload::from_base64(&resp.tx)?;
        let message = payload.decode()?.message.serialize();
        let co_signature = base.sign_message(&message);

        Ok(LimitOrderPayload {
            order_key: resp.order_pubkey.unwrap_or_else(|| base.pubkey().to_string()),
            payload,
            co_signatures: vec![co_signature],
        })
    }

    async fn cancel_orders(&self, owner: &Pubkey, order_keys: &[String]) -> Result<Vec<UnsignedPayload>> {
        if order_keys.len() > MAX_CANCEL_BATCH {
            return Err(anyhow!("at most {MAX_CANCEL_BATCH} orders can be cancelled at once"));
        }
        let url = format!("{}/cancelOrders", self.endpoints.limit);
        let resp: CancelOrdersResponse = self
            .post_json(
                &url,
                &CancelOrdersBody {
                    owner: owner.to_string(),
                    fee_payer: owner.to_string(),
                    orders: order_keys,
                },
            )
            .await?;

        resp.tx
            .into_iter()
            .chain(resp.txs)
            .map(|tx| UnsignedPayload::from_base64(&tx).map_err(anyhow::Error::from))
            .collect()
    }

    async fn list_open_orders(&self, owner: &Pubkey) -> Result<Vec<OpenOrder>> {
        let url = format!("{}/openOrders", self.endpoints.limit);
        let orders: Vec<OpenOrderWire> = self.get_json(&url, &[("wallet", owner.to_string())]).await?;
        Ok(orders.into_iter().map(OpenOrder::from).collect())
    }

    async fn list_order_history(&self, owner: &Pubkey) -> Result<Vec<HistoricalOrder>> {
        let url = format!("{}/orderHistory", self.endpoints.limit);
        let orders: Vec<OrderHistoryWire> = self.get_json(&url, &[("wallet", owner.to_string())]).await?;
        Ok(orders.into_iter().map(|o| historical(o, "Cancelled")).collect())
    }

    async fn list_trade_history(&self, owner: &Pubkey) -> Result<Vec<HistoricalOrder>> {
        let url = format!("{}/tradeHistory", self.endpoints.limit);
        let trades: Vec<OrderHistoryWire> = self.get_json(&url, &[("wallet", owner.to_string())]).await?;
        Ok(trades.into_iter().map(|o| historical(o, "Filled")).collect())
    }
}

#[async_trait]
impl DcaCapable for JupiterClient {
    async fn build_dca(&self, owner: &Pubkey, request: &DcaRequest) -> Result<UnsignedPayload> {
        let url = format!("{}/createOrder", self.endpoints.recurring);
        let resp: RecurringTxResponse = self
            .post_json(
                &url,
                &CreateRecurringBody {
                    user: owner.to_string(),
                    input_mint: request.pair.input_mint.clone(),
                    output_mint: request.pair.output_mint.clone(),
                    params: RecurringParams {
                        time: TimeParams {
                            in_amount: request.committed_amount(),
                            number_of_orders: request.number_of_orders(),
                            interval: request.cycle_frequency_seconds,
                            min_price: None,
                            max_price: None,
                            start_at: (request.start_at > 0).then_some(request.start_at),
                        },
                    },
                },
            )
            .await?;
        Ok(UnsignedPayload::from_base64(&resp.transaction)?)
    }

    async fn close_dca(&self, owner: &Pubkey, dca_key: &str) -> Result<UnsignedPayload> {
        let url = format!("{}/cancelOrder", self.endpoints.recurring);
        let resp: RecurringTxResponse = self
            .post_json(
                &url,
                &CancelRecurringBody {
                    order: dca_key,
                    user: owner.to_string(),
                    recurring_type: "time",
                },
            )
            .await?;
        Ok(UnsignedPayload::from_base64(&resp.transaction)?)
    }

    async fn list_dca_accounts(&self, owner: &Pubkey) -> Result<Vec<DcaAccount>> {
        let url = format!("{}/getRecurringOrders", self.endpoints.recurring);
        let resp: RecurringOrdersResponse = self
            .get_json(
                &url,
                &[
                    ("user", owner.to_string()),
                    ("orderStatus", "active".to_string()),
                    ("recurringType", "time".to_string()),
                ],
            )
            .await?;
        resp.time
            .into_iter()
            .chain(resp.all)
            .map(DcaAccount::try_from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn open_orders_accept_string_amounts() {
        let wire: Vec<OpenOrderWire> = serde_json::from_value(json!([{
            "publicKey": "Order1",
            "account": {
                "inputMint": "A",
                "outputMint": "B",
                "oriInAmount": "1500000",
                "oriOutAmount": 42,
                "expiredAt": null
            }
        }]))
        .unwrap();
        let order = OpenOrder::from(wire.into_iter().next().unwrap());
        assert_eq!(order.in_amount, 1_500_000);
        assert_eq!(order.out_amount, 42);
        assert_eq!(order.expires_at, None);
    }

    #[test]
    fn recurring_orders_count_fills_and_parse_dates() {
        let resp: RecurringOrdersResponse = serde_json::from_value(json!({
            "time": [{
                "orderKey": "Dca1",
                "inputMint": "A",
                "outputMint": "B",
                "inDeposited": "1000",
                "inAmountPerCycle": "100",
                "cycleFrequency": "3600",
                "createdAt": "2024-01-01T00:00:00Z",
                "trades": [{}, {}]
            }]
        }))
        .unwrap();
        let account = DcaAccount::try_from(resp.time.into_iter().next().unwrap()).unwrap();
        assert_eq!(account.created_at, 1_704_067_200);
        assert_eq!(account.fills, 2);
        assert_eq!(account.orders_left(), 8);
    }

    #[test]
    fn price_entries_may_be_missing() {
        let resp: PriceResponse =
            serde_json::from_value(json!({"data": {"A": {"id": "A", "price": "187.25"}, "B": null}})).unwrap();
        assert_eq!(resp.data["A"].as_ref().unwrap().price, 187.25);
        assert!(resp.data["B"].is_none());
    }

    #[test]
    fn time_params_serialize_camel_case() {
        let body = serde_json::to_value(TimeParams {
            in_amount: 1000,
            number_of_orders: 10,
            interval: 3600,
            min_price: None,
            max_price: None,
            start_at: None,
        })
        .unwrap();
        assert_eq!(body["numberOfOrders"], 10);
        assert_eq!(body["inAmount"], 1000);
        assert!(body["startAt"].is_null());
    }
}
