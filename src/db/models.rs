use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::ChainId;

// Amounts are carried as decimal strings. The table stores them as
// NUMERIC(78,0); inserts cast with $n::NUMERIC and reads select amount::TEXT.

/// Uniqueness key of an attestation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttestationKey {
    /// 0x-prefixed lower-case transaction hash
    pub tx_hash: String,
    pub log_index: u64,
    pub source_chain: ChainId,
}

/// For inserting new attestation records
#[derive(Debug, Clone)]
pub struct NewAttestation {
    pub key: AttestationKey,
    /// Lower-cased 0x address
    pub bridger: String,
    pub message_id: String,
    pub amount: String,
    /// Unix seconds
    pub signed_at: i64,
}

/// A persisted attestation
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationRecord {
    pub id: i64,
    pub tx_hash: String,
    pub log_index: i64,
    pub source_chain_id: i32,
    pub bridger: String,
    pub message_id: String,
    pub amount: String,
    pub signed_at: i64,
}
