//! Attestation verification pipeline
//!
//! The claim is advisory and the ledger is truth: every fact that ends up in
//! a signature is re-derived from the source chain first. Checks run in a
//! fixed order and the first failure is returned, so nothing later in the
//! pipeline (signing, persistence) runs for a rejected claim.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use tracing::{debug, info, warn};

use super::signer::{AttestationSigner, BridgeAttestation};
use super::{AttestationClaim, AttestationResponse, FieldValue};
use crate::db::{AttestationKey, NewAttestation, ReplayGuard};
use crate::error::{AttestationError, StoreError};
use crate::events::receipt_transfers;
use crate::hash::{bytes32_to_hex, parse_bytes32, MessageIdScheme};
use crate::ledger::ChainEndpoint;
use crate::types::{parse_chain_id, ChainId, TransferEvent};

type VerifyResult<T> = std::result::Result<T, AttestationError>;

/// A claim whose fields are present and well-formed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedClaim {
    pub message_id: [u8; 32],
    pub bridger: Address,
    pub amount: U256,
    pub timestamp: u64,
    pub source_chain: ChainId,
    pub dest_chain: ChainId,
    pub tx_hash: B256,
}

impl ParsedClaim {
    /// Presence is checked for every field before any value is parsed.
    pub fn parse(claim: &AttestationClaim) -> VerifyResult<Self> {
        let message_id = required(&claim.message_id, "messageId")?;
        let bridger = required(&claim.bridger, "bridger")?;
        let amount = required(&claim.amount, "amount")?;
        let timestamp = required(&claim.timestamp, "timestamp")?;
        let source_chain = required(&claim.source_chain, "sourceChain")?;
        let dest_chain = required(&claim.dest_chain, "destChain")?;
        let tx_hash = required(&claim.tx_hash, "txHash")?;

        Ok(Self {
            message_id: parse_bytes32(message_id.trim())
                .map_err(|e| AttestationError::invalid("messageId", e))?,
            bridger: bridger
                .trim()
                .parse()
                .map_err(|_| AttestationError::invalid("bridger", "not a 20-byte hex address"))?,
            amount: parse_amount(amount)?,
            timestamp: parse_u64(timestamp, "timestamp")?,
            source_chain: parse_chain(source_chain, "sourceChain")?,
            dest_chain: parse_chain(dest_chain, "destChain")?,
            tx_hash: parse_bytes32(tx_hash.trim())
                .map(B256::from)
                .map_err(|e| AttestationError::invalid("txHash", e))?,
        })
    }
}

fn required<'a, T>(value: &'a Option<T>, field: &'static str) -> VerifyResult<&'a T> {
    value.as_ref().ok_or(AttestationError::MissingField(field))
}

fn parse_amount(value: &FieldValue) -> VerifyResult<U256> {
    let text = value.as_text();
    let text = text.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AttestationError::invalid("amount", "not a decimal integer"));
    }
    U256::from_str_radix(text, 10)
        .map_err(|_| AttestationError::invalid("amount", "does not fit in uint256"))
}

fn parse_u64(value: &FieldValue, field: &'static str) -> VerifyResult<u64> {
    value
        .as_text()
        .trim()
        .parse()
        .map_err(|_| AttestationError::invalid(field, "not an unsigned integer"))
}

fn parse_chain(value: &FieldValue, field: &'static str) -> VerifyResult<ChainId> {
    parse_chain_id(parse_u64(value, field)?)
        .ok_or_else(|| AttestationError::invalid(field, "chain id does not fit in 16 bits"))
}

/// Verifier settings
#[derive(Debug, Clone, Copy)]
pub struct VerifierSettings {
    pub scheme: MessageIdScheme,
    /// Maximum accepted |block timestamp - claimed timestamp|, inclusive
    pub timestamp_tolerance_secs: u64,
}

pub struct AttestationVerifier {
    chains: HashMap<ChainId, ChainEndpoint>,
    /// Source chain -> the only valid destination
    counterparts: HashMap<ChainId, ChainId>,
    settings: VerifierSettings,
    signer: Option<AttestationSigner>,
    guard: Arc<dyn ReplayGuard>,
}

impl AttestationVerifier {
    pub fn new(settings: VerifierSettings, guard: Arc<dyn ReplayGuard>) -> Self {
        Self {
            chains: HashMap::new(),
            counterparts: HashMap::new(),
            settings,
            signer: None,
            guard,
        }
    }

    /// Serve the bridge between `a` and `b` in both directions.
    pub fn with_pair(mut self, a: ChainEndpoint, b: ChainEndpoint) -> Self {
        self.counterparts.insert(a.chain_id, b.chain_id);
        self.counterparts.insert(b.chain_id, a.chain_id);
        self.chains.insert(a.chain_id, a);
        self.chains.insert(b.chain_id, b);
        self
    }

    /// Register only one side as a claim source. The counterpart still
    /// defines the expected destination.
    pub fn with_source(mut self, source: ChainEndpoint, counterpart: ChainId) -> Self {
        self.counterparts.insert(source.chain_id, counterpart);
        self.chains.insert(source.chain_id, source);
        self
    }

    pub fn with_signer(mut self, signer: AttestationSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn is_configured(&self) -> bool {
        self.signer.is_some()
    }

    pub fn signer_address(&self) -> Option<Address> {
        self.signer.as_ref().map(|s| s.address())
    }

    pub fn chain(&self, chain_id: ChainId) -> Option<&ChainEndpoint> {
        self.chains.get(&chain_id)
    }

    pub fn replay_guard(&self) -> &Arc<dyn ReplayGuard> {
        &self.guard
    }

    /// Run the full pipeline and issue a signed attestation.
    pub async fn attest(&self, claim: &AttestationClaim) -> VerifyResult<AttestationResponse> {
        let signer = self.signer.as_ref().ok_or(AttestationError::NotConfigured(
            "signing key or NFT contract address missing",
        ))?;

        let claim = ParsedClaim::parse(claim)?;
        let source = self
            .chains
            .get(&claim.source_chain)
            .ok_or(AttestationError::UnsupportedChain(u64::from(claim.source_chain)))?;

        let event = self.verify(source, &claim).await?;

        let key = AttestationKey {
            tx_hash: bytes32_to_hex(&claim.tx_hash.0),
            log_index: event.log_index,
            source_chain: claim.source_chain,
        };
        if self.guard.exists(&key).await.map_err(AttestationError::from)? {
            debug!(tx_hash = %key.tx_hash, log_index = key.log_index, "Already attested");
            return Err(AttestationError::AlreadyAttested);
        }

        let typed = BridgeAttestation {
            bridger: claim.bridger,
            messageId: B256::from(claim.message_id),
            amount: claim.amount,
            timestamp: U256::from(claim.timestamp),
            sourceChain: claim.source_chain,
            destChain: claim.dest_chain,
            txHash: claim.tx_hash,
            logIndex: U256::from(event.log_index),
        };
        let signature = signer
            .sign(&typed)
            .map_err(|e| AttestationError::Internal(format!("{:#}", e)))?;

        let message_id = bytes32_to_hex(&claim.message_id);
        let new = NewAttestation {
            key,
            bridger: format!("0x{}", hex::encode(claim.bridger.as_slice())),
            message_id: message_id.clone(),
            amount: claim.amount.to_string(),
            signed_at: chrono::Utc::now().timestamp(),
        };

        // The signature is only released once the record is committed
        let record = match self.guard.record(new).await {
            Ok(record) => record,
            Err(StoreError::Duplicate) => {
                info!(message_id = %message_id, "Lost attestation race, discarding signature");
                return Err(AttestationError::AlreadyAttested);
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            message_id = %message_id,
            tx_hash = %record.tx_hash,
            log_index = event.log_index,
            bridger = %record.bridger,
            "Attestation issued"
        );

        Ok(AttestationResponse {
            signature: format!("0x{}", hex::encode(signature)),
            message_id,
            log_index: event.log_index,
            signer: signer.address().to_string(),
            signed_at: record.signed_at,
        })
    }

    /// Receipt, sender, timestamp, chain pair and event checks. Returns the
    /// validated event whose log index anchors the replay key.
    async fn verify(
        &self,
        source: &ChainEndpoint,
        claim: &ParsedClaim,
    ) -> VerifyResult<TransferEvent> {
        let tx_hex = bytes32_to_hex(&claim.tx_hash.0);

        let receipt = source
            .ledger
            .transaction_receipt(claim.tx_hash)
            .await
            .map_err(AttestationError::upstream)?
            .ok_or_else(|| {
                AttestationError::NotFound(format!(
                    "transaction {} not found on chain {}",
                    tx_hex, claim.source_chain
                ))
            })?;

        if receipt.from != claim.bridger {
            warn!(
                tx_hash = %tx_hex,
                sender = %receipt.from,
                claimed = %claim.bridger,
                "Bridger does not match transaction sender"
            );
            return Err(AttestationError::Unauthorized(format!(
                "bridger {} did not send transaction {}",
                claim.bridger, tx_hex
            )));
        }

        let block_number = receipt.block_number.ok_or_else(|| {
            AttestationError::NotFound(format!("transaction {} is not in a block yet", tx_hex))
        })?;
        let block_time = source
            .ledger
            .block_timestamp(block_number)
            .await
            .map_err(AttestationError::upstream)?
            .ok_or_else(|| {
                AttestationError::NotFound(format!(
                    "block {} not found on chain {}",
                    block_number, claim.source_chain
                ))
            })?;

        let drift = block_time.abs_diff(claim.timestamp);
        if drift > self.settings.timestamp_tolerance_secs {
            return Err(AttestationError::TimestampMismatch(format!(
                "claimed timestamp {} is {}s from block time {} (tolerance {}s)",
                claim.timestamp, drift, block_time, self.settings.timestamp_tolerance_secs
            )));
        }

        // Every served source has a counterpart
        let expected_dest = self
            .counterparts
            .get(&claim.source_chain)
            .copied()
            .ok_or(AttestationError::UnsupportedChain(u64::from(claim.source_chain)))?;
        if expected_dest != claim.dest_chain {
            return Err(AttestationError::ChainMismatch(format!(
                "chain {} bridges to {}, not {}",
                claim.source_chain, expected_dest, claim.dest_chain
            )));
        }

        let candidates = receipt_transfers(&receipt, source.contract, claim.source_chain);
        candidates
            .into_iter()
            .filter(|event| event.from == claim.bridger)
            .find(|event| {
                if event.amount_out != claim.amount {
                    debug!(
                        log_index = event.log_index,
                        amount_out = %event.amount_out,
                        "Amount differs from claim, trying next log"
                    );
                    return false;
                }
                let id = event.message_id(self.settings.scheme, claim.dest_chain);
                if id != claim.message_id {
                    debug!(
                        log_index = event.log_index,
                        derived = %bytes32_to_hex(&id),
                        "Message id differs from claim, trying next log"
                    );
                    return false;
                }
                true
            })
            .ok_or(AttestationError::NoMatchingEvent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_claim() -> AttestationClaim {
        AttestationClaim {
            message_id: Some(format!("0x{}", "AB".repeat(32))),
            bridger: Some("0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA".to_string()),
            amount: Some(FieldValue::Text("99000000000000000000".to_string())),
            timestamp: Some(FieldValue::Number(1_700_000_000)),
            source_chain: Some(FieldValue::Number(1)),
            dest_chain: Some(FieldValue::Text("47763".to_string())),
            tx_hash: Some(format!("0x{}", "0a".repeat(32))),
        }
    }

    #[test]
    fn test_parse_full_claim() {
        let parsed = ParsedClaim::parse(&full_claim()).unwrap();
        assert_eq!(parsed.message_id, [0xab; 32]);
        assert_eq!(parsed.amount, U256::from(99u64) * U256::from(10u64).pow(U256::from(18u64)));
        assert_eq!(parsed.timestamp, 1_700_000_000);
        assert_eq!(parsed.source_chain, 1);
        assert_eq!(parsed.dest_chain, 47763);
        assert_eq!(parsed.tx_hash, B256::repeat_byte(0x0a));
    }

    #[test]
    fn test_missing_tx_hash_rejected() {
        let mut claim = full_claim();
        claim.tx_hash = None;
        assert_eq!(
            ParsedClaim::parse(&claim),
            Err(AttestationError::MissingField("txHash"))
        );
    }

    #[test]
    fn test_presence_checked_before_format() {
        let mut claim = full_claim();
        claim.message_id = Some("garbage".to_string());
        claim.bridger = None;
        assert_eq!(
            ParsedClaim::parse(&claim),
            Err(AttestationError::MissingField("bridger"))
        );
    }

    #[test]
    fn test_invalid_amount_rejected() {
        let mut claim = full_claim();
        claim.amount = Some(FieldValue::Text("1.5".to_string()));
        let err = ParsedClaim::parse(&claim).unwrap_err();
        assert_eq!(err.code(), "InvalidField");
    }

    #[test]
    fn test_chain_id_beyond_u16_rejected() {
        let mut claim = full_claim();
        claim.source_chain = Some(FieldValue::Number(70_000));
        let err = ParsedClaim::parse(&claim).unwrap_err();
        assert_eq!(err.code(), "InvalidField");
    }
}
