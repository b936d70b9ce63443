//! Transfer attestation
//!
//! A user submits a claim about a bridge transfer; the verifier re-derives
//! every claimed fact from the source chain and, only if they all agree,
//! returns an EIP-712 signature the NFT contract accepts for minting.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

pub mod signer;
pub mod verifier;

pub use signer::{AttestationSigner, BridgeAttestation};
pub use verifier::{AttestationVerifier, ParsedClaim, VerifierSettings};

/// A numeric claim field sent either as a JSON number or a decimal string.
///
/// Amounts above 2^64 must be sent as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(u64),
    Text(String),
}

impl FieldValue {
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            FieldValue::Number(n) => Cow::Owned(n.to_string()),
            FieldValue::Text(s) => Cow::Borrowed(s.as_str()),
        }
    }
}

/// Attestation request body. Every field is optional at the wire level so
/// that a missing field is reported by name rather than as a parse error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationClaim {
    pub message_id: Option<String>,
    pub bridger: Option<String>,
    pub amount: Option<FieldValue>,
    pub timestamp: Option<FieldValue>,
    pub source_chain: Option<FieldValue>,
    pub dest_chain: Option<FieldValue>,
    pub tx_hash: Option<String>,
}

/// Successful attestation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationResponse {
    /// 0x-prefixed 65-byte signature
    pub signature: String,
    pub message_id: String,
    /// Log index of the validated event
    pub log_index: u64,
    /// Address that produced the signature
    pub signer: String,
    /// Unix seconds
    pub signed_at: i64,
}
