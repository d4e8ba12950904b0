use solana_sdk::pubkey::Pubkey;
use spl_associated_token_account::get_associated_token_address;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::domain::{Balance, TokenAccount, NATIVE_DECIMALS, NATIVE_MINT};
use crate::error::ResolveError;
use crate::ledger::Ledger;

/// Normalizes native and SPL balances of a wallet into [`TokenAccount`]s.
#[derive(Clone)]
pub struct BalanceResolver {
    ledger: Arc<dyn Ledger>,
}

impl BalanceResolver {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Resolves `owner`'s holding of `mint`.
    ///
    /// The native asset is addressed either by the owner's own address or by the
    /// wrapped-SOL mint. A missing associated token account is a zero holding; only a
    /// mint that does not exist on the ledger is [`ResolveError::NotFound`].
    pub async fn resolve(&self, owner: &Pubkey, mint: &str) -> Result<TokenAccount, ResolveError> {
        if mint == NATIVE_MINT || mint == owner.to_string() {
            let lamports = self.ledger.get_balance(owner).await?;
            return Ok(TokenAccount {
                owner: owner.to_string(),
                mint: mint.to_string(),
                address: owner.to_string(),
                decimals: NATIVE_DECIMALS,
                balance: Balance::new(lamports, NATIVE_DECIMALS),
            });
        }

        let mint_key = Pubkey::from_str(mint).map_err(|_| ResolveError::NotFound(mint.to_string()))?;
        let ata = get_associated_token_address(owner, &mint_key);

        let (raw, decimals) = match self.ledger.get_token_account_balance(&ata).await? {
            Some(amount) => (amount.amount, amount.decimals),
            None => {
                debug!(%owner, mint, %ata, "balance.no_token_account");
                let decimals = self
                    .ledger
                    .get_mint_decimals(&mint_key)
                    .await?
                    .ok_or_else(|| ResolveError::NotFound(mint.to_string()))?;
                (0, decimals)
            }
        };

        Ok(TokenAccount {
            owner: owner.to_string(),
            mint: mint.to_string(),
            address: ata.to_string(),
            decimals,
            balance: Balance::new(raw, decimals),
        })
    }
}
