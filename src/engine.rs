use base64::Engine as _;
use solana_sdk::signature::{Signature, Signer};
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::SubmissionError;
use crate::ledger::{Ledger, SubmitOptions, TxOutcome};
use crate::state::Wallet;

/// Unsigned transaction handed back by the aggregator (bincode `VersionedTransaction`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedPayload(Vec<u8>);

impl UnsignedPayload {
    #[cfg(test)]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn from_base64(encoded: &str) -> Result<Self, SubmissionError> {
        base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map(Self)
            .map_err(|e| SubmissionError::Decode(format!("base64: {e}")))
    }

    pub fn decode(&self) -> Result<VersionedTransaction, SubmissionError> {
        bincode::deserialize(&self.0).map_err(|e| SubmissionError::Decode(format!("bincode: {e}")))
    }
}

/// Signs `payload`'s message with `signer` and returns the transaction carrying the
/// local signature first, then `extra_signatures` in the order given.
pub fn assemble_signed(
    payload: &UnsignedPayload,
    signer: &dyn Signer,
    extra_signatures: &[Signature],
) -> Result<VersionedTransaction, SubmissionError> {
    let unsigned = payload.decode()?;
    let message_bytes = unsigned.message.serialize();
    let local = signer
        .try_sign_message(&message_bytes)
        .map_err(|e| SubmissionError::Decode(format!("signing: {e}")))?;

    let mut signatures = Vec::with_capacity(1 + extra_signatures.len());
    signatures.push(local);
    signatures.extend_from_slice(extra_signatures);

    let required = usize::from(unsigned.message.header().num_required_signatures);
    if signatures.len() != required {
        warn!(
            provided = signatures.len(),
            required,
            "engine.signature_count_mismatch"
        );
    }

    Ok(VersionedTransaction {
        signatures,
        message: unsigned.message,
    })
}

/// Transaction signer/submitter. Submissions are never retried.
#[derive(Clone)]
pub struct Engine {
    ledger: Arc<dyn Ledger>,
    poll_interval: Duration,
    confirm_timeout: Duration,
}

impl Engine {
    pub fn new(ledger: Arc<dyn Ledger>, poll_interval: Duration, confirm_timeout: Duration) -> Self {
        Self {
            ledger,
            poll_interval,
            confirm_timeout,
        }
    }

    /// Local signature + co-signatures -> submit with skip-preflight.
    pub async fn sign_and_submit(
        &self,
        payload: &UnsignedPayload,
        wallet: &Wallet,
        extra_signatures: &[Signature],
    ) -> Result<Signature, SubmissionError> {
        let tx = assemble_signed(payload, wallet.keypair(), extra_signatures)?;
        info!(
            wallet = %wallet.pubkey(),
            co_signatures = extra_signatures.len(),
            "engine.submit"
        );

        let signature = self
            .ledger
            .submit_transaction(&tx, SubmitOptions { skip_preflight: true })
            .await
            .map_err(SubmissionError::Rejected)?;

        info!(%signature, "engine.submitted");
        Ok(signature)
    }

    /// Blocks until the ledger reports a terminal status or the timeout elapses.
    pub async fn poll_status(&self, signature: &Signature) -> Result<TxOutcome, SubmissionError> {
        let poll = async {
            loop {
                match self.ledger.signature_status(signature).await {
                    Ok(Some(outcome)) => return outcome,
                    Ok(None) => {}
                    Err(err) => warn!(%signature, error = %err, "engine.status_query_failed"),
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        match tokio::time::timeout(self.confirm_timeout, poll).await {
            Ok(outcome) => {
                info!(%signature, ?outcome, "engine.confirmed");
                Ok(outcome)
            }
            Err(_) => Err(SubmissionError::ConfirmationTimeout {
                signature: *signature,
                secs: self.confirm_timeout.as_secs(),
            }),
        }
    }
}

pub fn explorer_url(signature: &Signature) -> String {
    format!("https://explorer.solana.com/tx/{signature}")
}
