use solana_sdk::pubkey::Pubkey;
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{info, warn};

use crate::balance::BalanceResolver;
use crate::domain::{
    DcaRequest, LimitOrderRequest, SnipeStatus, SnipeTarget, SwapRequest, TokenInfo, TradeIntent, TradePair,
    NATIVE_DECIMALS, NATIVE_MINT,
};
use crate::error::{ValidationError, WorkflowError};
use crate::jupiter::TokenDirectory;
use crate::workflow::{
    collect, format_raw, parse_bounded_amount, parse_slippage_bps, parse_usd, Bound, DurationStep, InputStep,
    Prompter, SelectedToken, Side, Step, TokenStep,
};

/// Runs the workflow steps of each trade kind and returns the confirmed intent, or
/// `None` when the user declines the final summary.
pub struct TradeBuilder<'a> {
    prompter: &'a mut dyn Prompter,
    resolver: &'a BalanceResolver,
    directory: &'a dyn TokenDirectory,
    owner: Pubkey,
}

impl<'a> TradeBuilder<'a> {
    pub fn new(
        prompter: &'a mut dyn Prompter,
        resolver: &'a BalanceResolver,
        directory: &'a dyn TokenDirectory,
        owner: Pubkey,
    ) -> Self {
        Self {
            prompter,
            resolver,
            directory,
            owner,
        }
    }

    async fn run<S: Step>(&mut self, mut step: S) -> Result<S::Output, WorkflowError> {
        collect(&mut *self.prompter, &mut step).await
    }

    async fn pick_pair(
        &mut self,
        tokens: &[TokenInfo],
        dca_eligible: Option<&HashSet<String>>,
    ) -> Result<(SelectedToken, SelectedToken), WorkflowError> {
        let mut sell = TokenStep::new(Side::Sell, tokens, self.resolver, self.owner);
        if let Some(eligible) = dca_eligible {
            sell = sell.dca_only(eligible);
        }
        let sell = self.run(sell).await?;

        let mut buy = TokenStep::new(Side::Buy, tokens, self.resolver, self.owner).excluding(&sell.info.address);
        if let Some(eligible) = dca_eligible {
            buy = buy.dca_only(eligible);
        }
        let buy = self.run(buy).await?;
        Ok((sell, buy))
    }

    async fn amount(
        &mut self,
        prompt: &str,
        confirm: &str,
        decimals: u8,
        bound: Option<Bound>,
    ) -> Result<u64, WorkflowError> {
        self.run(
            InputStep::new(prompt, move |s: &str| parse_bounded_amount(s, decimals, bound)).confirm_with(confirm),
        )
        .await
    }

    /// Shows the summary and asks for the final go-ahead.
    fn finish(&mut self, summary: &str, intent: TradeIntent) -> Result<Option<TradeIntent>, WorkflowError> {
        intent.validate()?;
        self.prompter.notice(summary);
        if self.prompter.confirm("Proceed?")? {
            info!(kind = intent_kind(&intent), "builder.intent_confirmed");
            Ok(Some(intent))
        } else {
            info!(kind = intent_kind(&intent), "builder.intent_discarded");
            Ok(None)
        }
    }

    pub async fn swap(&mut self) -> Result<Option<SwapRequest>, WorkflowError> {
        let tokens = self.directory.tradable_tokens().await?;
        let (sell, buy) = self.pick_pair(&tokens, None).await?;

        let amount = self
            .amount(
                "Enter amount to sell:",
                "Confirm amount to sell?",
                sell.account.decimals,
                Some(Bound::Balance(sell.account.balance.raw)),
            )
            .await?;
        let slippage_bps = self
            .run(InputStep::new("Enter slippage percent (0.01 - 100):", parse_slippage_bps).confirm_with("Confirm slippage?"))
            .await?;

        let pair = pair(&sell, &buy, amount);
        let summary = format!(
            "Swap {} {} for {} with {}% slippage",
            format_raw(amount, pair.input_decimals),
            pair.input_symbol,
            pair.output_symbol,
            format_raw(u64::from(slippage_bps), 2),
        );
        match self.finish(&summary, TradeIntent::Swap(SwapRequest { pair, slippage_bps }))? {
            Some(TradeIntent::Swap(req)) => Ok(Some(req)),
            _ => Ok(None),
        }
    }

    pub async fn limit_order(&mut self, now: i64) -> Result<Option<LimitOrderRequest>, WorkflowError> {
        let tokens = self.directory.tradable_tokens().await?;
        let (sell, buy) = self.pick_pair(&tokens, None).await?;

        let amount = self
            .amount(
                "Enter amount to sell:",
                "Confirm amount to sell?",
                sell.account.decimals,
                Some(Bound::Balance(sell.account.balance.raw)),
            )
            .await?;
        let output_amount_raw = self
            .amount(
                &format!("Enter amount of {} to receive:", buy.info.symbol),
                "Confirm amount to receive?",
                buy.account.decimals,
                None,
            )
            .await?;

        let expires_at = if self.prompter.confirm("Add an expiry to the order?")? {
            let secs = self.run(DurationStep::new("expiry")).await?;
            Some(now.saturating_add(i64::try_from(secs).unwrap_or(i64::MAX)))
        } else {
            None
        };

        let pair = pair(&sell, &buy, amount);
        let summary = format!(
            "Limit order: sell {} {} for {} {}{}",
            format_raw(amount, pair.input_decimals),
            pair.input_symbol,
            format_raw(output_amount_raw, pair.output_decimals),
            pair.output_symbol,
            match expires_at {
                Some(ts) => format!(", expires in {}", crate::time::format_duration(ts - now)),
                None => String::new(),
            },
        );
        let intent = TradeIntent::LimitOrder(LimitOrderRequest {
            pair,
            output_amount_raw,
            expires_at,
        });
        match self.finish(&summary, intent)? {
            Some(TradeIntent::LimitOrder(req)) => Ok(Some(req)),
            _ => Ok(None),
        }
    }

    pub async fn dca(&mut self, now: i64) -> Result<Option<DcaRequest>, WorkflowError> {
        let tokens = self.directory.tradable_tokens().await?;
        let eligible = self.directory.dca_eligible_tokens().await?;
        let (sell, buy) = self.pick_pair(&tokens, Some(&eligible)).await?;

        let decimals = sell.account.decimals;
        let total = self
            .amount(
                "Enter total amount to sell:",
                "Confirm total amount?",
                decimals,
                Some(Bound::Balance(sell.account.balance.raw)),
            )
            .await?;
        let per_cycle = self
            .amount(
                "Enter amount to sell per cycle:",
                "Confirm amount per cycle?",
                decimals,
                Some(Bound::Total(total)),
            )
            .await?;
        // Jupiter splits the deposit evenly, so only whole cycles are committed.
        let orders = total / per_cycle;
        let committed = per_cycle.saturating_mul(orders);
        if committed != total {
            self.prompter.notice(&format!(
                "Total adjusted to {} ({orders} orders of {})",
                format_raw(committed, decimals),
                format_raw(per_cycle, decimals),
            ));
        }
        let frequency = self
            .run(DurationStep::new("cycle frequency").max_seconds(u64::from(u32::MAX)))
            .await?;
        let cycle_frequency_seconds = u32::try_from(frequency).map_err(|_| ValidationError::OutOfRange {
            min: "1".into(),
            max: u32::MAX.to_string(),
        })?;
        let delay = self.run(DurationStep::new("start").allow_now()).await?;
        let start_at = if delay == 0 {
            0
        } else {
            now.saturating_add(i64::try_from(delay).unwrap_or(i64::MAX))
        };

        let request = DcaRequest {
            pair: pair(&sell, &buy, committed),
            amount_per_cycle_raw: per_cycle,
            cycle_frequency_seconds,
            start_at,
        };
        let summary = format!(
            "DCA: sell {} {} for {} in {} orders of {} every {}, starting {}",
            format_raw(committed, decimals),
            request.pair.input_symbol,
            request.pair.output_symbol,
            request.number_of_orders(),
            format_raw(per_cycle, decimals),
            crate::time::format_duration(i64::from(cycle_frequency_seconds)),
            if start_at == 0 {
                "now".to_string()
            } else {
                format!("in {}", crate::time::format_duration(start_at - now))
            },
        );
        match self.finish(&summary, TradeIntent::Dca(request))? {
            Some(TradeIntent::Dca(req)) => Ok(Some(req)),
            _ => Ok(None),
        }
    }

    /// Snipe target for `wallet_id`. The buy size is in USD, paid in SOL at `sol_price_usd`.
    pub async fn snipe(&mut self, wallet_id: u32, sol_price_usd: f64, now: i64) -> Result<Option<SnipeTarget>, WorkflowError> {
        if !sol_price_usd.is_finite() || sol_price_usd <= 0.0 {
            return Err(anyhow::anyhow!("invalid SOL price: {sol_price_usd}").into());
        }
        let tokens = match self.directory.tradable_tokens().await {
            Ok(tokens) => tokens,
            Err(err) => {
                warn!(error = %err, "builder.token_list_unavailable");
                Vec::new()
            }
        };

        let mint = self
            .run(
                InputStep::new("Enter address of the token to snipe:", |s: &str| {
                    let key = Pubkey::from_str(s).map_err(|_| ValidationError::InvalidAddress(s.to_string()))?;
                    if s == NATIVE_MINT {
                        return Err(ValidationError::SameToken);
                    }
                    Ok(key)
                })
                .confirm_with("Confirm token to snipe?"),
            )
            .await?;
        let mint_str = mint.to_string();
        let (symbol, decimals) = match tokens.iter().find(|t| t.address == mint_str) {
            Some(t) => (t.symbol.clone(), t.decimals),
            None => match self.resolver.resolve(&self.owner, &mint_str).await {
                Ok(account) => (crate::display::short_address(&mint_str), account.decimals),
                // Not minted yet: decimals are unknown until launch.
                Err(crate::error::ResolveError::NotFound(_)) => (crate::display::short_address(&mint_str), 0),
                Err(err) => return Err(err.into()),
            },
        };

        let sol = self.resolver.resolve(&self.owner, NATIVE_MINT).await?;
        let max_usd = sol.balance.normalized * sol_price_usd;
        self.prompter.notice(&format!(
            "SOL balance: {} (~${max_usd:.2})",
            format_raw(sol.balance.raw, NATIVE_DECIMALS)
        ));

        let lamports_per_sol = 10f64.powi(i32::from(NATIVE_DECIMALS));
        let (buy_amount_usd, input_amount_raw) = self
            .run(
                InputStep::new("Enter buy size in USD:", move |s: &str| {
                    let usd = parse_usd(s)?;
                    if usd > max_usd {
                        return Err(ValidationError::ExceedsBalance {
                            available: format!("${max_usd:.2}"),
                        });
                    }
                    let lamports = (usd / sol_price_usd * lamports_per_sol) as u64;
                    if lamports == 0 {
                        return Err(ValidationError::Zero);
                    }
                    Ok((usd, lamports))
                })
                .confirm_with("Confirm buy size?"),
            )
            .await?;
        let take_profit_usd = self
            .run(
                InputStep::new("Enter take-profit in USD:", move |s: &str| {
                    let usd = parse_usd(s)?;
                    if usd <= buy_amount_usd {
                        return Err(ValidationError::Other(format!(
                            "take-profit must be above the buy size of ${buy_amount_usd:.2}"
                        )));
                    }
                    Ok(usd)
                })
                .confirm_with("Confirm take-profit?"),
            )
            .await?;
        let stop_loss_usd = self
            .run(
                InputStep::new("Enter stop-loss in USD:", move |s: &str| {
                    let usd = parse_usd(s)?;
                    if usd >= buy_amount_usd {
                        return Err(ValidationError::Other(format!(
                            "stop-loss must be below the buy size of ${buy_amount_usd:.2}"
                        )));
                    }
                    Ok(usd)
                })
                .confirm_with("Confirm stop-loss?"),
            )
            .await?;

        let launch_at = if self.prompter.confirm("Does the token launch later?")? {
            let secs = self.run(DurationStep::new("launch delay")).await?;
            Some(now.saturating_add(i64::try_from(secs).unwrap_or(i64::MAX)))
        } else {
            None
        };

        let target = SnipeTarget {
            wallet_id,
            pair: TradePair {
                input_mint: NATIVE_MINT.to_string(),
                input_symbol: "SOL".to_string(),
                input_decimals: NATIVE_DECIMALS,
                output_mint: mint_str,
                output_symbol: symbol,
                output_decimals: decimals,
                input_amount_raw,
            },
            buy_amount_usd,
            take_profit_usd,
            stop_loss_usd,
            launch_at,
            status: SnipeStatus::NotIn,
        };
        let summary = format!(
            "Snipe {}: buy ${buy_amount_usd:.2} ({} SOL), take-profit ${take_profit_usd:.2}, stop-loss ${stop_loss_usd:.2}{}",
            target.pair.output_symbol,
            format_raw(input_amount_raw, NATIVE_DECIMALS),
            match launch_at {
                Some(ts) => format!(", launching in {}", crate::time::format_duration(ts - now)),
                None => String::new(),
            },
        );
        match self.finish(&summary, TradeIntent::Snipe(target))? {
            Some(TradeIntent::Snipe(target)) => Ok(Some(target)),
            _ => Ok(None),
        }
    }
}

fn pair(sell: &SelectedToken, buy: &SelectedToken, input_amount_raw: u64) -> TradePair {
    TradePair {
        input_mint: sell.info.address.clone(),
        input_symbol: sell.info.symbol.clone(),
        input_decimals: sell.account.decimals,
        output_mint: buy.info.address.clone(),
        output_symbol: buy.info.symbol.clone(),
        output_decimals: buy.account.decimals,
        input_amount_raw,
    }
}

fn intent_kind(intent: &TradeIntent) -> &'static str {
    match intent {
        TradeIntent::Swap(_) => "swap",
        TradeIntent::LimitOrder(_) => "limit_order",
        TradeIntent::Dca(_) => "dca",
        TradeIntent::Snipe(_) => "snipe",
    }
}
