//! Message identity computation
//!
//! Every transfer is keyed by a keccak256 hash over a fixed-order, packed
//! tuple of its parameters. The same identifier is used by the destination
//! contract to deduplicate fulfillments and by the attestation service to
//! bind a receipt token to exactly one source event.
//!
//! ## Layout
//!
//! Fields are packed big-endian at fixed widths (no padding between fields):
//!
//! | Field          | Width    |
//! |----------------|----------|
//! | srcChain       | uint16   |
//! | dstChain       | uint16   |
//! | srcContract    | address  |
//! | nonce          | uint256  |
//! | sender         | address  |
//! | receiver       | address  |
//! | amountOut      | uint256  |
//! | amountIn (V2)  | uint256  |
//! | fee (V2)       | uint256  |
//!
//! V1 and V2 produce different identifiers for the same transfer. A deployment
//! picks one and keeps it; mixing them breaks deduplication on the receiver.

use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, U256};
use tiny_keccak::{Hasher, Keccak};

/// Packed length of a V1 tuple: 2 + 2 + 20 + 32 + 20 + 20 + 32
pub const V1_ENCODED_LEN: usize = 128;

/// Packed length of a V2 tuple: V1 + amountIn + fee
pub const V2_ENCODED_LEN: usize = V1_ENCODED_LEN + 64;

/// Compute keccak256 hash of data
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Field set used to derive a message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageIdScheme {
    /// srcChain, dstChain, srcContract, nonce, sender, receiver, amountOut
    V1,
    /// V1 fields followed by amountIn and fee
    #[default]
    V2,
}

impl MessageIdScheme {
    pub fn encoded_len(&self) -> usize {
        match self {
            MessageIdScheme::V1 => V1_ENCODED_LEN,
            MessageIdScheme::V2 => V2_ENCODED_LEN,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageIdScheme::V1 => "v1",
            MessageIdScheme::V2 => "v2",
        }
    }
}

impl fmt::Display for MessageIdScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageIdScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v1" | "1" => Ok(MessageIdScheme::V1),
            "v2" | "2" => Ok(MessageIdScheme::V2),
            other => Err(format!(
                "unknown message id scheme '{}', expected v1 or v2",
                other
            )),
        }
    }
}

/// Transfer parameters in the order they are hashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageParams {
    pub src_chain: u16,
    pub dst_chain: u16,
    pub src_contract: Address,
    pub nonce: U256,
    pub sender: Address,
    pub receiver: Address,
    pub amount_out: U256,
    /// Only hashed under V2
    pub amount_in: U256,
    /// Only hashed under V2
    pub fee: U256,
}

/// Pack the parameters for `scheme` into their canonical byte layout.
pub fn encode_message_params(scheme: MessageIdScheme, params: &MessageParams) -> Vec<u8> {
    let mut data = Vec::with_capacity(scheme.encoded_len());

    data.extend_from_slice(&params.src_chain.to_be_bytes());
    data.extend_from_slice(&params.dst_chain.to_be_bytes());
    data.extend_from_slice(params.src_contract.as_slice());
    data.extend_from_slice(&params.nonce.to_be_bytes::<32>());
    data.extend_from_slice(params.sender.as_slice());
    data.extend_from_slice(params.receiver.as_slice());
    data.extend_from_slice(&params.amount_out.to_be_bytes::<32>());

    if scheme == MessageIdScheme::V2 {
        data.extend_from_slice(&params.amount_in.to_be_bytes::<32>());
        data.extend_from_slice(&params.fee.to_be_bytes::<32>());
    }

    debug_assert_eq!(data.len(), scheme.encoded_len());
    data
}

/// Compute the canonical message identifier.
pub fn compute_message_id(scheme: MessageIdScheme, params: &MessageParams) -> [u8; 32] {
    keccak256(&encode_message_params(scheme, params))
}

/// Convert bytes to hex string with 0x prefix
pub fn bytes32_to_hex(bytes: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Parse a 0x-prefixed (or bare) 64 character hex string, any case.
pub fn parse_bytes32(value: &str) -> Result<[u8; 32], String> {
    let trimmed = value.trim();
    let hex_str = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if hex_str.len() != 64 {
        return Err(format!(
            "expected 32 bytes of hex, got {} characters",
            hex_str.len()
        ));
    }

    let mut out = [0u8; 32];
    hex::decode_to_slice(hex_str, &mut out).map_err(|e| format!("invalid hex: {}", e))?;
    Ok(out)
}
