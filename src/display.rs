use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

use crate::domain::{DcaAccount, HistoricalOrder, OpenOrder, SnipeStatus, SnipeTarget, TokenInfo};
use crate::state::WalletRegistry;
use crate::time::{format_duration, format_unix};
use crate::workflow::format_raw;

/// Mint -> token metadata, for rendering raw amounts.
pub struct TokenLookup<'a> {
    by_mint: HashMap<&'a str, &'a TokenInfo>,
}

impl<'a> TokenLookup<'a> {
    pub fn new(tokens: &'a [TokenInfo]) -> Self {
        Self {
            by_mint: tokens.iter().map(|t| (t.address.as_str(), t)).collect(),
        }
    }

    pub fn symbol(&self, mint: &str) -> String {
        self.by_mint
            .get(mint)
            .map(|t| t.symbol.clone())
            .unwrap_or_else(|| short_address(mint))
    }

    /// Raw amount in token units, or the raw integer when the mint is unknown.
    pub fn amount(&self, mint: &str, raw: u64) -> String {
        match self.by_mint.get(mint) {
            Some(t) => format_raw(raw, t.decimals),
            None => raw.to_string(),
        }
    }
}

pub fn short_address(address: &str) -> String {
    if address.len() <= 10 {
        return address.to_string();
    }
    format!("{}...{}", &address[..4], &address[address.len() - 4..])
}

fn render<T: Tabled>(rows: Vec<T>) -> String {
    Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string()
}

fn timestamp(ts: i64, tz: &str) -> String {
    format_unix(ts, tz).unwrap_or_else(|_| ts.to_string())
}

#[derive(Tabled)]
struct WalletRow {
    #[tabled(rename = "ID")]
    id: u32,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Address")]
    address: String,
}

pub fn wallets_table(registry: &WalletRegistry) -> String {
    render(
        registry
            .iter()
            .map(|(id, record)| WalletRow {
                id,
                name: record.wallet_name.clone(),
                address: record.pubkey.clone(),
            })
            .collect(),
    )
}

#[derive(Tabled)]
struct OpenOrderRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Order")]
    key: String,
    #[tabled(rename = "Selling")]
    selling: String,
    #[tabled(rename = "Buying")]
    buying: String,
    #[tabled(rename = "Price")]
    price: String,
    #[tabled(rename = "Expires")]
    expires: String,
}

pub fn open_orders_table(orders: &[OpenOrder], tokens: &TokenLookup<'_>, tz: &str) -> String {
    render(
        orders
            .iter()
            .enumerate()
            .map(|(i, o)| {
                let selling = tokens.amount(&o.input_mint, o.in_amount);
                let buying = tokens.amount(&o.output_mint, o.out_amount);
                let price = match (selling.parse::<f64>(), buying.parse::<f64>()) {
                    (Ok(s), Ok(b)) if b > 0.0 => format!("{:.6}", s / b),
                    _ => "-".to_string(),
                };
                OpenOrderRow {
                    index: i + 1,
                    key: short_address(&o.public_key),
                    selling: format!("{selling} {}", tokens.symbol(&o.input_mint)),
                    buying: format!("{buying} {}", tokens.symbol(&o.output_mint)),
                    price,
                    expires: o.expires_at.map_or_else(|| "Never".to_string(), |ts| timestamp(ts, tz)),
                }
            })
            .collect(),
    )
}

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Sold")]
    sold: String,
    #[tabled(rename = "Bought")]
    bought: String,
    #[tabled(rename = "State")]
    state: String,
}

pub fn history_table(orders: &[HistoricalOrder], tokens: &TokenLookup<'_>) -> String {
    render(
        orders
            .iter()
            .map(|o| HistoryRow {
                created: o.created_at.clone(),
                sold: format!("{} {}", tokens.amount(&o.input_mint, o.in_amount), tokens.symbol(&o.input_mint)),
                bought: format!("{} {}", tokens.amount(&o.output_mint, o.out_amount), tokens.symbol(&o.output_mint)),
                state: o.state.clone(),
            })
            .collect(),
    )
}

#[derive(Tabled)]
struct DcaRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Selling")]
    selling: String,
    #[tabled(rename = "Buying")]
    buying: String,
    #[tabled(rename = "Per cycle")]
    per_cycle: String,
    #[tabled(rename = "Every")]
    every: String,
    #[tabled(rename = "Orders left")]
    orders_left: u64,
    #[tabled(rename = "Next order")]
    next_order: String,
    #[tabled(rename = "Ends")]
    ends: String,
}

pub fn dca_table(accounts: &[DcaAccount], tokens: &TokenLookup<'_>, tz: &str) -> String {
    render(
        accounts
            .iter()
            .enumerate()
            .map(|(i, a)| DcaRow {
                index: i + 1,
                selling: format!("{} {}", tokens.amount(&a.input_mint, a.in_deposited), tokens.symbol(&a.input_mint)),
                buying: tokens.symbol(&a.output_mint),
                per_cycle: tokens.amount(&a.input_mint, a.in_amount_per_cycle),
                every: format_duration(i64::try_from(a.cycle_frequency).unwrap_or(i64::MAX)),
                orders_left: a.orders_left(),
                next_order: timestamp(a.next_order_at(), tz),
                ends: timestamp(a.ends_at(), tz),
            })
            .collect(),
    )
}

#[derive(Tabled)]
struct SnipeRow {
    #[tabled(rename = "ID")]
    id: u32,
    #[tabled(rename = "Token")]
    token: String,
    #[tabled(rename = "Wallet")]
    wallet: u32,
    #[tabled(rename = "Buy (USD)")]
    buy: String,
    #[tabled(rename = "TP / SL (USD)")]
    exits: String,
    #[tabled(rename = "Launch")]
    launch: String,
    #[tabled(rename = "Status")]
    status: String,
}

/// `live` overrides the persisted status with a running watcher's latest phase.
pub fn snipes_table<'a>(
    targets: impl Iterator<Item = (u32, &'a SnipeTarget)>,
    live: impl Fn(u32) -> Option<SnipeStatus>,
    tz: &str,
) -> String {
    render(
        targets
            .map(|(id, t)| SnipeRow {
                id,
                token: format!("{} ({})", t.pair.output_symbol, short_address(t.token_mint())),
                wallet: t.wallet_id,
                buy: format!("{:.2}", t.buy_amount_usd),
                exits: format!("{:.2} / {:.2}", t.take_profit_usd, t.stop_loss_usd),
                launch: t.launch_at.map_or_else(|| "-".to_string(), |ts| timestamp(ts, tz)),
                status: status_label(live(id).unwrap_or(t.status)),
            })
            .collect(),
    )
}

pub fn status_label(status: SnipeStatus) -> String {
    match status {
        SnipeStatus::NotIn => status.to_string().yellow().to_string(),
        SnipeStatus::Watching => status.to_string().cyan().to_string(),
        SnipeStatus::Filled => status.to_string().green().bold().to_string(),
    }
}

pub fn spinner(message: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub fn success(message: &str) {
    println!("{} {}", "✔".green().bold(), message.green());
}

pub fn failure(message: &str) {
    println!("{} {}", "✘".red().bold(), message.red());
}

pub fn banner(wallet: Option<(&str, &str)>) {
    println!();
    println!("{}", "  JUPITER CLI  ".black().on_bright_green().bold());
    match wallet {
        Some((name, address)) => println!("  Wallet: {} ({})", name.bold(), address.dimmed()),
        None => println!("  {}", "No wallet selected".yellow()),
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::token;

    #[test]
    fn unknown_mints_render_as_short_addresses() {
        let usdc = token("USDC", 6);
        let tokens = vec![usdc.clone()];
        let lookup = TokenLookup::new(&tokens);
        assert_eq!(lookup.symbol(&usdc.address), "USDC");
        assert_eq!(lookup.amount(&usdc.address, 2_500_000), "2.5");
        assert_eq!(lookup.symbol("So11111111111111111111111111111111111111112"), "So11...1112");
        assert_eq!(lookup.amount("other", 7), "7");
    }

    #[test]
    fn open_orders_show_unit_price() {
        let sol = token("SOL", 9);
        let usdc = token("USDC", 6);
        let tokens = vec![sol.clone(), usdc.clone()];
        let lookup = TokenLookup::new(&tokens);
        let order = OpenOrder {
            public_key: "Order1111111111111111".into(),
            input_mint: usdc.address.clone(),
            output_mint: sol.address.clone(),
            in_amount: 150_000_000,
            out_amount: 1_000_000_000,
            expires_at: None,
        };
        let table = open_orders_table(&[order], &lookup, "UTC");
        assert!(table.contains("150 USDC"));
        assert!(table.contains("150.000000"));
        assert!(table.contains("Never"));
    }
}
