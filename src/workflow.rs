//! Collect-and-confirm steps.
//!
//! A [`Step`] asks for one value. [`collect`] drives it: a [`ValidationError`] is shown
//! and the step is asked again, a valid value is echoed back for a yes/no confirmation,
//! and "No" runs the same step again. Nothing outside the step is re-asked.

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::marker::PhantomData;
use std::str::FromStr;

use crate::balance::BalanceResolver;
use crate::domain::{TokenAccount, TokenInfo};
use crate::error::{ValidationError, WorkflowError};

/// Terminal interaction used by steps and menus.
pub trait Prompter: Send {
    fn input(&mut self, prompt: &str) -> io::Result<String>;
    fn secret(&mut self, prompt: &str) -> io::Result<String>;
    fn select(&mut self, prompt: &str, items: &[String]) -> io::Result<usize>;
    fn multi_select(&mut self, prompt: &str, items: &[String]) -> io::Result<Vec<usize>>;
    fn confirm(&mut self, prompt: &str) -> io::Result<bool>;
    fn notice(&mut self, message: &str);
    fn warn(&mut self, message: &str);
}

#[async_trait]
pub trait Step: Send {
    type Output: Send;

    async fn attempt(&mut self, prompter: &mut dyn Prompter) -> Result<Self::Output, WorkflowError>;

    /// Question asked once a value passed validation; `None` commits without asking.
    fn confirmation(&self, value: &Self::Output) -> Option<String>;
}

pub async fn collect<S: Step>(prompter: &mut dyn Prompter, step: &mut S) -> Result<S::Output, WorkflowError> {
    loop {
        let value = match step.attempt(prompter).await {
            Ok(value) => value,
            Err(WorkflowError::Invalid(err)) => {
                prompter.warn(&err.to_string());
                continue;
            }
            Err(err) => return Err(err),
        };
        match step.confirmation(&value) {
            Some(question) if !prompter.confirm(&question)? => continue,
            _ => return Ok(value),
        }
    }
}

/// Free-text input validated by a parser.
pub struct InputStep<T, F> {
    prompt: String,
    confirm: Option<String>,
    secret: bool,
    parse: F,
    last: String,
    _out: PhantomData<fn() -> T>,
}

impl<T, F> InputStep<T, F>
where
    F: FnMut(&str) -> Result<T, ValidationError> + Send,
{
    pub fn new(prompt: impl Into<String>, parse: F) -> Self {
        Self {
            prompt: prompt.into(),
            confirm: None,
            secret: false,
            parse,
            last: String::new(),
            _out: PhantomData,
        }
    }

    /// Ask `question` (followed by the entered text) before committing.
    pub fn confirm_with(mut self, question: impl Into<String>) -> Self {
        self.confirm = Some(question.into());
        self
    }

    /// Hidden input; the entered text is never echoed back.
    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }
}

#[async_trait]
impl<T, F> Step for InputStep<T, F>
where
    T: Send,
    F: FnMut(&str) -> Result<T, ValidationError> + Send,
{
    type Output = T;

    async fn attempt(&mut self, prompter: &mut dyn Prompter) -> Result<T, WorkflowError> {
        let raw = if self.secret {
            prompter.secret(&self.prompt)?
        } else {
            prompter.input(&self.prompt)?
        };
        self.last = raw.trim().to_string();
        Ok((self.parse)(&self.last)?)
    }

    fn confirmation(&self, _value: &T) -> Option<String> {
        let question = self.confirm.as_ref()?;
        if self.secret {
            Some(question.clone())
        } else {
            Some(format!("{question} ({})", self.last))
        }
    }
}

/// Parses decimal text into raw integer units without going through a float.
pub fn parse_amount(text: &str, decimals: u8) -> Result<u64, ValidationError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ValidationError::Empty);
    }
    let not_a_number = || ValidationError::NotANumber(text.to_string());

    let (whole, frac) = match text.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (text, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(not_a_number());
    }
    if !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
        return Err(not_a_number());
    }
    let frac = frac.trim_end_matches('0');
    if frac.len() > usize::from(decimals) {
        return Err(ValidationError::TooPrecise { decimals });
    }

    let scale = 10u128
        .checked_pow(u32::from(decimals))
        .ok_or_else(not_a_number)?;
    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| not_a_number())? };
    let frac_raw: u128 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{frac:0<width$}", width = usize::from(decimals));
        padded.parse().map_err(|_| not_a_number())?
    };

    let raw = whole
        .checked_mul(scale)
        .and_then(|w| w.checked_add(frac_raw))
        .and_then(|r| u64::try_from(r).ok())
        .ok_or_else(|| ValidationError::Other("amount is too large".into()))?;
    if raw == 0 {
        return Err(ValidationError::Zero);
    }
    Ok(raw)
}

/// Amount in token units, bounded by `max_raw` (a balance or a previously entered total).
pub fn parse_bounded_amount(text: &str, decimals: u8, max_raw: Option<Bound>) -> Result<u64, ValidationError> {
    let raw = parse_amount(text, decimals)?;
    match max_raw {
        Some(Bound::Balance(max)) if raw > max => Err(ValidationError::ExceedsBalance {
            available: format_raw(max, decimals),
        }),
        Some(Bound::Total(max)) if raw > max => Err(ValidationError::ExceedsLimit {
            limit: format_raw(max, decimals),
        }),
        _ => Ok(raw),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Balance(u64),
    Total(u64),
}

/// Slippage percent (0.01 to 100, two decimals) into basis points.
pub fn parse_slippage_bps(text: &str) -> Result<u32, ValidationError> {
    let out_of_range = || ValidationError::OutOfRange {
        min: "0.01%".into(),
        max: "100%".into(),
    };
    let bps = match parse_amount(text.trim().trim_end_matches('%'), 2) {
        Ok(bps) => bps,
        Err(ValidationError::Zero) | Err(ValidationError::TooPrecise { .. }) => return Err(out_of_range()),
        Err(err) => return Err(err),
    };
    let bps = u32::try_from(bps).map_err(|_| out_of_range())?;
    crate::domain::ensure_slippage_bounds(bps).map_err(|_| out_of_range())?;
    Ok(bps)
}

/// Strictly positive USD figure.
pub fn parse_usd(text: &str) -> Result<f64, ValidationError> {
    let text = text.trim().trim_start_matches('$');
    if text.is_empty() {
        return Err(ValidationError::Empty);
    }
    let value: f64 = text.parse().map_err(|_| ValidationError::NotANumber(text.to_string()))?;
    if !value.is_finite() {
        return Err(ValidationError::NotANumber(text.to_string()));
    }
    if value <= 0.0 {
        return Err(ValidationError::Zero);
    }
    Ok(value)
}

pub fn format_raw(raw: u64, decimals: u8) -> String {
    let digits = raw.to_string();
    let decimals = usize::from(decimals);
    if decimals == 0 {
        return digits;
    }
    let padded = format!("{digits:0>width$}", width = decimals + 1);
    let (whole, frac) = padded.split_at(padded.len() - decimals);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{frac}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Sell,
    Buy,
}

impl Side {
    fn verb(self) -> &'static str {
        match self {
            Side::Sell => "sell",
            Side::Buy => "buy",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectedToken {
    pub info: TokenInfo,
    pub account: TokenAccount,
}

/// Picks a token from the aggregator list by symbol or address and resolves the
/// wallet's holding of it.
pub struct TokenStep<'a> {
    side: Side,
    tokens: &'a [TokenInfo],
    dca_eligible: Option<&'a HashSet<String>>,
    exclude: Option<String>,
    resolver: &'a BalanceResolver,
    owner: Pubkey,
}

impl<'a> TokenStep<'a> {
    pub fn new(side: Side, tokens: &'a [TokenInfo], resolver: &'a BalanceResolver, owner: Pubkey) -> Self {
        Self {
            side,
            tokens,
            dca_eligible: None,
            exclude: None,
            resolver,
            owner,
        }
    }

    pub fn dca_only(mut self, eligible: &'a HashSet<String>) -> Self {
        self.dca_eligible = Some(eligible);
        self
    }

    pub fn excluding(mut self, mint: &str) -> Self {
        self.exclude = Some(mint.to_string());
        self
    }

    fn lookup(&self, query: &str) -> Option<&'a TokenInfo> {
        self.tokens
            .iter()
            .find(|t| t.address == query)
            .or_else(|| self.tokens.iter().find(|t| t.symbol.eq_ignore_ascii_case(query)))
    }
}

#[async_trait]
impl<'a> Step for TokenStep<'a> {
    type Output = SelectedToken;

    async fn attempt(&mut self, prompter: &mut dyn Prompter) -> Result<SelectedToken, WorkflowError> {
        let query = prompter.input(&format!("Enter symbol or address of the token to {}:", self.side.verb()))?;
        let query = query.trim();
        if query.is_empty() {
            return Err(ValidationError::Empty.into());
        }
        let info = self
            .lookup(query)
            .ok_or_else(|| ValidationError::UnknownToken(query.to_string()))?;

        if self.exclude.as_deref() == Some(info.address.as_str()) {
            return Err(ValidationError::SameToken.into());
        }
        if let Some(eligible) = self.dca_eligible {
            if !eligible.contains(&info.address) {
                return Err(ValidationError::NotDcaEligible { side: self.side.verb() }.into());
            }
        }

        let account = self.resolver.resolve(&self.owner, &info.address).await?;
        if self.side == Side::Sell && account.balance.is_zero() {
            return Err(ValidationError::NoBalance(info.symbol.clone()).into());
        }
        prompter.notice(&format!(
            "{} balance: {}",
            info.symbol,
            format_raw(account.balance.raw, account.decimals)
        ));

        Ok(SelectedToken {
            info: info.clone(),
            account,
        })
    }

    fn confirmation(&self, value: &SelectedToken) -> Option<String> {
        Some(format!("Confirm token to {}: {}?", self.side.verb(), value.info.label()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl DurationUnit {
    pub const ALL: [DurationUnit; 4] = [
        DurationUnit::Minutes,
        DurationUnit::Hours,
        DurationUnit::Days,
        DurationUnit::Weeks,
    ];

    pub fn seconds(self) -> u64 {
        match self {
            DurationUnit::Minutes => 60,
            DurationUnit::Hours => 3_600,
            DurationUnit::Days => 86_400,
            DurationUnit::Weeks => 604_800,
        }
    }
}

impl fmt::Display for DurationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DurationUnit::Minutes => "Minute(s)",
            DurationUnit::Hours => "Hour(s)",
            DurationUnit::Days => "Day(s)",
            DurationUnit::Weeks => "Week(s)",
        })
    }
}

impl FromStr for DurationUnit {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        DurationUnit::ALL
            .into_iter()
            .find(|unit| unit.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| ValidationError::Other(format!("unknown duration unit '{s}'")))
    }
}

/// `"<count> <unit>"`, e.g. `"2 Hour(s)"`, into seconds.
#[cfg(test)]
pub fn parse_duration(text: &str) -> Result<u64, ValidationError> {
    let (count, unit) = text
        .trim()
        .split_once(char::is_whitespace)
        .ok_or_else(|| ValidationError::Other(format!("expected '<count> <unit>', got '{text}'")))?;
    let unit: DurationUnit = unit.parse()?;
    duration_seconds(count, unit, u64::MAX)
}

fn duration_seconds(count: &str, unit: DurationUnit, max_seconds: u64) -> Result<u64, ValidationError> {
    let count = count.trim();
    if count.is_empty() {
        return Err(ValidationError::Empty);
    }
    let n: u64 = count
        .parse()
        .map_err(|_| ValidationError::NotANumber(count.to_string()))?;
    if n == 0 {
        return Err(ValidationError::OutOfRange {
            min: "1".into(),
            max: (max_seconds / unit.seconds()).to_string(),
        });
    }
    n.checked_mul(unit.seconds())
        .filter(|secs| *secs <= max_seconds)
        .ok_or_else(|| ValidationError::OutOfRange {
            min: "1".into(),
            max: (max_seconds / unit.seconds()).to_string(),
        })
}

/// Unit selection followed by a whole-number count. With `allow_now`, a leading "Now"
/// entry yields 0 seconds.
pub struct DurationStep {
    label: String,
    allow_now: bool,
    max_seconds: u64,
    rendered: String,
}

impl DurationStep {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            allow_now: false,
            max_seconds: u64::MAX,
            rendered: String::new(),
        }
    }

    pub fn allow_now(mut self) -> Self {
        self.allow_now = true;
        self
    }

    pub fn max_seconds(mut self, max: u64) -> Self {
        self.max_seconds = max;
        self
    }
}

#[async_trait]
impl Step for DurationStep {
    type Output = u64;

    async fn attempt(&mut self, prompter: &mut dyn Prompter) -> Result<u64, WorkflowError> {
        let mut items: Vec<String> = Vec::with_capacity(5);
        if self.allow_now {
            items.push("Now".to_string());
        }
        items.extend(DurationUnit::ALL.iter().map(ToString::to_string));

        let mut choice = prompter.select(&format!("Select {} unit:", self.label), &items)?;
        if self.allow_now {
            if choice == 0 {
                self.rendered = "Now".to_string();
                return Ok(0);
            }
            choice -= 1;
        }
        let unit = *DurationUnit::ALL
            .get(choice)
            .ok_or_else(|| ValidationError::Other("no such unit".into()))?;

        let count = prompter.input(&format!("Enter number of {unit}:"))?;
        let secs = duration_seconds(&count, unit, self.max_seconds)?;
        self.rendered = format!("{} {unit}", count.trim());
        Ok(secs)
    }

    fn confirmation(&self, _value: &u64) -> Option<String> {
        Some(format!("Confirm {}: {}?", self.label, self.rendered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NATIVE_MINT;
    use crate::testing::{token, Answer, MockLedger, ScriptedPrompter};
    use std::sync::Arc;

    #[test]
    fn amounts_scale_exactly() {
        assert_eq!(parse_amount("0.5", 6), Ok(500_000));
        assert_eq!(parse_amount("1", 9), Ok(1_000_000_000));
        assert_eq!(parse_amount(".25", 2), Ok(25));
        assert_eq!(parse_amount("0.1", 1), Ok(1));
        assert_eq!(parse_amount("1.50", 1), Ok(15));
        assert_eq!(parse_amount("0.1234567", 6), Err(ValidationError::TooPrecise { decimals: 6 }));
        assert_eq!(parse_amount("0", 6), Err(ValidationError::Zero));
        assert_eq!(parse_amount("", 6), Err(ValidationError::Empty));
        assert!(matches!(parse_amount("1e3", 6), Err(ValidationError::NotANumber(_))));
        assert!(matches!(parse_amount("-1", 6), Err(ValidationError::NotANumber(_))));
        assert!(matches!(parse_amount("1.2.3", 6), Err(ValidationError::NotANumber(_))));
        assert!(parse_amount("18446744073709551616", 0).is_err());
    }

    #[test]
    fn bounded_amounts_report_the_limit() {
        assert_eq!(
            parse_bounded_amount("2", 6, Some(Bound::Balance(1_000_000))),
            Err(ValidationError::ExceedsBalance { available: "1".into() })
        );
        assert_eq!(
            parse_bounded_amount("0.3", 6, Some(Bound::Total(250_000))),
            Err(ValidationError::ExceedsLimit { limit: "0.25".into() })
        );
        assert_eq!(parse_bounded_amount("1", 6, Some(Bound::Balance(1_000_000))), Ok(1_000_000));
    }

    #[test]
    fn slippage_percent_to_bps() {
        assert_eq!(parse_slippage_bps("0.5"), Ok(50));
        assert_eq!(parse_slippage_bps("0.01"), Ok(1));
        assert_eq!(parse_slippage_bps("100"), Ok(10_000));
        assert_eq!(parse_slippage_bps("1%"), Ok(100));
        assert!(parse_slippage_bps("0.001").is_err());
        assert!(parse_slippage_bps("100.01").is_err());
        assert!(parse_slippage_bps("0").is_err());
    }

    #[test]
    fn raw_amounts_render_without_trailing_zeros() {
        assert_eq!(format_raw(500_000, 6), "0.5");
        assert_eq!(format_raw(1_000_000, 6), "1");
        assert_eq!(format_raw(1, 9), "0.000000001");
        assert_eq!(format_raw(42, 0), "42");
    }

    #[test]
    fn durations_normalize_to_seconds() {
        assert_eq!(parse_duration("2 Hour(s)"), Ok(7_200));
        assert_eq!(parse_duration("1 Week(s)"), Ok(604_800));
        assert_eq!(parse_duration("90 Minute(s)"), Ok(5_400));
        assert_eq!(parse_duration("3 day(s)"), Ok(259_200));
        assert!(parse_duration("0 Hour(s)").is_err());
        assert!(parse_duration("1.5 Hour(s)").is_err());
        assert!(parse_duration("2 Fortnight(s)").is_err());
    }

    #[tokio::test]
    async fn invalid_input_reprompts_without_advancing() {
        let mut prompter = ScriptedPrompter::new([
            Answer::text("abc"),
            Answer::text("0"),
            Answer::text("1.5"),
            Answer::Yes,
        ]);
        let mut step = InputStep::new("Enter amount to sell:", |s| parse_amount(s, 6)).confirm_with("Confirm amount to sell?");

        let raw = collect(&mut prompter, &mut step).await.unwrap();
        assert_eq!(raw, 1_500_000);
        assert_eq!(prompter.warnings().len(), 2);
        assert_eq!(prompter.confirmations(), vec!["Confirm amount to sell? (1.5)".to_string()]);
        assert!(prompter.is_drained());
    }

    #[tokio::test]
    async fn declining_restarts_only_the_current_step() {
        let mut prompter = ScriptedPrompter::new([
            Answer::Choice(2),
            Answer::text("3"),
            Answer::No,
            Answer::Choice(0),
            Answer::text("90"),
            Answer::Yes,
        ]);
        let mut step = DurationStep::new("expiry");

        let secs = collect(&mut prompter, &mut step).await.unwrap();
        assert_eq!(secs, 5_400);
        assert_eq!(prompter.confirmations().len(), 2);
        assert!(prompter.warnings().is_empty());
    }

    #[tokio::test]
    async fn now_option_yields_zero() {
        let mut prompter = ScriptedPrompter::new([Answer::Choice(0), Answer::Yes]);
        let mut step = DurationStep::new("start").allow_now();
        assert_eq!(collect(&mut prompter, &mut step).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn token_step_rejects_empty_and_ineligible_tokens() {
        let owner = Pubkey::new_unique();
        let usdc = token("USDC", 6);
        let bonk = token("BONK", 5);
        let ledger = Arc::new(MockLedger::default());
        ledger.set_mint(&usdc.address.parse().unwrap(), 6);
        ledger.set_token_balance(&owner, &bonk.address.parse().unwrap(), 10_000, 5);
        ledger.set_lamports(owner, 5_000_000_000);
        let resolver = BalanceResolver::new(ledger);
        let tokens = vec![usdc.clone(), bonk.clone(), token_sol()];
        let eligible: HashSet<String> = [usdc.address.clone(), NATIVE_MINT.to_string()].into();

        let mut prompter = ScriptedPrompter::new([
            Answer::text("nope"),
            Answer::text("usdc"),
            Answer::text("BONK"),
            Answer::text("SOL"),
            Answer::Yes,
        ]);
        let mut step = TokenStep::new(Side::Sell, &tokens, &resolver, owner).dca_only(&eligible);

        let selected = collect(&mut prompter, &mut step).await.unwrap();
        assert_eq!(selected.info.symbol, "SOL");
        assert_eq!(selected.account.balance.raw, 5_000_000_000);
        assert_eq!(
            prompter.warnings(),
            vec![
                ValidationError::UnknownToken("nope".into()).to_string(),
                ValidationError::NoBalance("USDC".into()).to_string(),
                ValidationError::NotDcaEligible { side: "sell" }.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn buy_side_must_differ_from_sell_side() {
        let owner = Pubkey::new_unique();
        let usdc = token("USDC", 6);
        let ledger = Arc::new(MockLedger::default());
        ledger.set_mint(&usdc.address.parse().unwrap(), 6);
        let resolver = BalanceResolver::new(ledger);
        let tokens = vec![usdc.clone(), token_sol()];

        let mut prompter = ScriptedPrompter::new([Answer::text("SOL"), Answer::text("USDC"), Answer::Yes]);
        let mut step = TokenStep::new(Side::Buy, &tokens, &resolver, owner).excluding(NATIVE_MINT);

        let selected = collect(&mut prompter, &mut step).await.unwrap();
        assert_eq!(selected.info.symbol, "USDC");
        assert!(selected.account.balance.is_zero());
        assert_eq!(prompter.warnings(), vec![ValidationError::SameToken.to_string()]);
    }

    fn token_sol() -> TokenInfo {
        TokenInfo {
            address: NATIVE_MINT.into(),
            symbol: "SOL".into(),
            decimals: 9,
            name: Some("Wrapped SOL".into()),
        }
    }
}
