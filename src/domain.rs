use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const NATIVE_MINT: &str = "So11111111111111111111111111111111111111112";
pub const NATIVE_DECIMALS: u8 = 9;
pub const MAX_SLIPPAGE_BPS: u32 = 10_000;

/// Token entry of the aggregator's tradable list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
    #[serde(default)]
    pub name: Option<String>,
}

impl TokenInfo {
    pub fn label(&self) -> String {
        format!("{} ({})", self.symbol, self.address)
    }
}

/// Raw and decimal-adjusted amount of one holding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Balance {
    pub raw: u64,
    pub normalized: f64,
}

impl Balance {
    pub fn new(raw: u64, decimals: u8) -> Self {
        Self {
            raw,
            normalized: raw as f64 / 10f64.powi(i32::from(decimals)),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.raw == 0
    }
}

/// Holding of one mint by one wallet, resolved on demand and never cached.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenAccount {
    pub owner: String,
    pub mint: String,
    /// Queried account: the owner itself for the native asset, the ATA otherwise.
    pub address: String,
    pub decimals: u8,
    pub balance: Balance,
}

/// Fields shared by every trade intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePair {
    pub input_mint: String,
    pub input_symbol: String,
    pub input_decimals: u8,
    pub output_mint: String,
    pub output_symbol: String,
    pub output_decimals: u8,
    pub input_amount_raw: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwapRequest {
    pub pair: TradePair,
    pub slippage_bps: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LimitOrderRequest {
    pub pair: TradePair,
    pub output_amount_raw: u64,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DcaRequest {
    pub pair: TradePair,
    pub amount_per_cycle_raw: u64,
    pub cycle_frequency_seconds: u32,
    /// 0 starts immediately.
    pub start_at: i64,
}

impl DcaRequest {
    pub fn number_of_orders(&self) -> u64 {
        if self.amount_per_cycle_raw == 0 {
            return 0;
        }
        self.pair.input_amount_raw / self.amount_per_cycle_raw
    }

    /// Amount actually committed: whole cycles only, so every order sells exactly
    /// `amount_per_cycle_raw`.
    pub fn committed_amount(&self) -> u64 {
        self.amount_per_cycle_raw.saturating_mul(self.number_of_orders())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnipeStatus {
    NotIn,
    Watching,
    Filled,
}

impl std::fmt::Display for SnipeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SnipeStatus::NotIn => "NOT IN",
            SnipeStatus::Watching => "WATCHING",
            SnipeStatus::Filled => "FILLED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnipeTarget {
    pub wallet_id: u32,
    pub pair: TradePair,
    pub buy_amount_usd: f64,
    pub take_profit_usd: f64,
    pub stop_loss_usd: f64,
    pub launch_at: Option<i64>,
    pub status: SnipeStatus,
}

impl SnipeTarget {
    pub fn token_mint(&self) -> &str {
        &self.pair.output_mint
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TradeIntent {
    Swap(SwapRequest),
    LimitOrder(LimitOrderRequest),
    Dca(DcaRequest),
    Snipe(SnipeTarget),
}

impl TradeIntent {
    pub fn pair(&self) -> &TradePair {
        match self {
            TradeIntent::Swap(r) => &r.pair,
            TradeIntent::LimitOrder(r) => &r.pair,
            TradeIntent::Dca(r) => &r.pair,
            TradeIntent::Snipe(t) => &t.pair,
        }
    }

    /// Structural invariants every intent must hold before it is handed on.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.pair().input_amount_raw == 0 {
            return Err(ValidationError::Zero);
        }
        match self {
            TradeIntent::Swap(r) => ensure_slippage_bounds(r.slippage_bps),
            TradeIntent::LimitOrder(r) if r.output_amount_raw == 0 => Err(ValidationError::Zero),
            TradeIntent::Dca(r) if r.amount_per_cycle_raw == 0 || r.cycle_frequency_seconds == 0 => {
                Err(ValidationError::Zero)
            }
            TradeIntent::Dca(r) if r.amount_per_cycle_raw > r.pair.input_amount_raw => {
                Err(ValidationError::ExceedsLimit { limit: r.pair.input_amount_raw.to_string() })
            }
            _ => Ok(()),
        }
    }
}

pub fn ensure_slippage_bounds(slippage_bps: u32) -> Result<(), ValidationError> {
    if slippage_bps == 0 || slippage_bps > MAX_SLIPPAGE_BPS {
        return Err(ValidationError::OutOfRange {
            min: "1 bps".into(),
            max: format!("{MAX_SLIPPAGE_BPS} bps"),
        });
    }
    Ok(())
}

/// Open limit order as reported by the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenOrder {
    pub public_key: String,
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: u64,
    pub out_amount: u64,
    pub expires_at: Option<i64>,
}

/// Cancelled or filled order from the aggregator's history endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalOrder {
    pub created_at: String,
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: u64,
    pub out_amount: u64,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DcaAccount {
    pub key: String,
    pub input_mint: String,
    pub output_mint: String,
    pub in_deposited: u64,
    pub in_amount_per_cycle: u64,
    pub cycle_frequency: u64,
    /// Unix seconds.
    pub created_at: i64,
    pub fills: u64,
}

impl DcaAccount {
    pub fn total_orders(&self) -> u64 {
        if self.in_amount_per_cycle == 0 {
            return 0;
        }
        self.in_deposited / self.in_amount_per_cycle
    }

    pub fn orders_left(&self) -> u64 {
        self.total_orders().saturating_sub(self.fills)
    }

    pub fn next_order_at(&self) -> i64 {
        let elapsed = self.cycle_frequency.saturating_mul(self.fills + 1);
        self.created_at.saturating_add(i64::try_from(elapsed).unwrap_or(i64::MAX))
    }

    pub fn ends_at(&self) -> i64 {
        let remaining = self.cycle_frequency.saturating_mul(self.orders_left());
        self.next_order_at()
            .saturating_sub(i64::try_from(self.cycle_frequency).unwrap_or(0))
            .saturating_add(i64::try_from(remaining).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(raw: u64) -> TradePair {
        TradePair {
            input_mint: "A".into(),
            input_symbol: "AAA".into(),
            input_decimals: 6,
            output_mint: "B".into(),
            output_symbol: "BBB".into(),
            output_decimals: 9,
            input_amount_raw: raw,
        }
    }

    #[test]
    fn balance_normalizes_by_decimals() {
        assert_eq!(Balance::new(1_000_000, 6).normalized, 1.0);
        assert_eq!(Balance::new(1_500_000_000, 9).normalized, 1.5);
        assert_eq!(Balance::new(42, 0).normalized, 42.0);
    }

    #[test]
    fn intent_rejects_zero_input_and_bad_slippage() {
        let zero = TradeIntent::Swap(SwapRequest { pair: pair(0), slippage_bps: 50 });
        assert_eq!(zero.validate(), Err(ValidationError::Zero));

        let wide = TradeIntent::Swap(SwapRequest { pair: pair(10), slippage_bps: 10_001 });
        assert!(wide.validate().is_err());

        let ok = TradeIntent::Swap(SwapRequest { pair: pair(10), slippage_bps: 10_000 });
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn dca_per_cycle_cannot_exceed_total() {
        let dca = TradeIntent::Dca(DcaRequest {
            pair: pair(100),
            amount_per_cycle_raw: 101,
            cycle_frequency_seconds: 60,
            start_at: 0,
        });
        assert!(dca.validate().is_err());
    }

    #[test]
    fn dca_commits_whole_cycles_only() {
        let dca = DcaRequest {
            pair: pair(1_000_000),
            amount_per_cycle_raw: 300_000,
            cycle_frequency_seconds: 60,
            start_at: 0,
        };
        assert_eq!(dca.number_of_orders(), 3);
        assert_eq!(dca.committed_amount(), 900_000);
    }

    #[test]
    fn dca_account_schedule() {
        let account = DcaAccount {
            key: "k".into(),
            input_mint: "A".into(),
            output_mint: "B".into(),
            in_deposited: 1_000,
            in_amount_per_cycle: 100,
            cycle_frequency: 3600,
            created_at: 1_700_000_000,
            fills: 3,
        };
        assert_eq!(account.total_orders(), 10);
        assert_eq!(account.orders_left(), 7);
        assert_eq!(account.next_order_at(), 1_700_000_000 + 4 * 3600);
        assert_eq!(account.ends_at(), 1_700_000_000 + 3 * 3600 + 7 * 3600);
    }

    #[test]
    fn snipe_status_serializes_screaming_case() {
        let json = serde_json::to_string(&SnipeStatus::NotIn).unwrap();
        assert_eq!(json, "\"NOT_IN\"");
    }
}
