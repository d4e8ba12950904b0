use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Persistence
    pub home: PathBuf,
    pub log_dir: PathBuf,
    pub log_stderr: bool,

    // Display
    pub tz: String,

    // Aggregator
    pub jupiter_quote_url: String,
    pub jupiter_limit_url: String,
    pub jupiter_recurring_url: String,
    pub jupiter_tokens_url: String,
    pub jupiter_dca_tokens_url: String,
    pub jupiter_price_url: String,

    // Confirmation polling
    pub confirm_timeout_secs: u64,
    pub confirm_poll_ms: u64,

    // Sniper
    pub snipe_poll_min_secs: u64,
    pub snipe_poll_max_secs: u64,
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().map(|s| s.trim().to_lowercase()) {
        None => default,
        Some(v) if v.is_empty() => default,
        Some(v) if v == "1" || v == "true" || v == "yes" || v == "y" || v == "on" => true,
        Some(v) if v == "0" || v == "false" || v == "no" || v == "n" || v == "off" => false,
        Some(_) => default,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|x| x.trim().parse().ok())
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let home = PathBuf::from(env_string("JUPCLI_HOME", "."));
        let log_dir = std::env::var("JUPCLI_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join("logs"));
        let log_stderr = env_bool("JUPCLI_LOG_STDERR", false);

        let tz = env_string("JUPCLI_TZ", "UTC");
        if tz.parse::<chrono_tz::Tz>().is_err() {
            return Err(anyhow!("JUPCLI_TZ is not a valid timezone: {tz}"));
        }

        let jupiter_quote_url = env_string("JUPITER_QUOTE_URL", "https://quote-api.jup.ag/v6");
        let jupiter_limit_url = env_string("JUPITER_LIMIT_URL", "https://jup.ag/api/limit/v1");
        let jupiter_recurring_url = env_string("JUPITER_RECURRING_URL", "https://api.jup.ag/recurring/v1");
        let jupiter_tokens_url = env_string("JUPITER_TOKENS_URL", "https://tokens.jup.ag/tokens?tags=verified");
        let jupiter_dca_tokens_url = env_string("JUPITER_DCA_TOKENS_URL", "https://cache.jup.ag/top-tokens");
        let jupiter_price_url = env_string("JUPITER_PRICE_URL", "https://lite-api.jup.ag/price/v2");

        let confirm_timeout_secs = env_parse::<u64>("JUPCLI_CONFIRM_TIMEOUT_SECS").unwrap_or(60);
        let confirm_poll_ms = env_parse::<u64>("JUPCLI_CONFIRM_POLL_MS").unwrap_or(1_000);
        if confirm_timeout_secs == 0 || confirm_poll_ms == 0 {
            return Err(anyhow!("confirmation timeout and poll interval must be positive"));
        }

        let snipe_poll_min_secs = env_parse::<u64>("JUPCLI_SNIPE_POLL_MIN_SECS").unwrap_or(5);
        let snipe_poll_max_secs = env_parse::<u64>("JUPCLI_SNIPE_POLL_MAX_SECS").unwrap_or(10);
        if snipe_poll_min_secs == 0 || snipe_poll_min_secs > snipe_poll_max_secs {
            return Err(anyhow!(
                "JUPCLI_SNIPE_POLL_MIN_SECS must be positive and cannot exceed JUPCLI_SNIPE_POLL_MAX_SECS"
            ));
        }

        Ok(Self {
            home,
            log_dir,
            log_stderr,
            tz,
            jupiter_quote_url,
            jupiter_limit_url,
            jupiter_recurring_url,
            jupiter_tokens_url,
            jupiter_dca_tokens_url,
            jupiter_price_url,
            confirm_timeout_secs,
            confirm_poll_ms,
            snipe_poll_min_secs,
            snipe_poll_max_secs,
        })
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn confirm_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirm_poll_ms)
    }

    pub fn snipe_poll_window(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.snipe_poll_min_secs),
            Duration::from_secs(self.snipe_poll_max_secs),
        )
    }
}
