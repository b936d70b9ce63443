//! Shared bridge types

use alloy::primitives::{Address, B256, U256};

use crate::hash::{compute_message_id, MessageIdScheme, MessageParams};

/// Bridge-level chain identifier (uint16 on the wire)
pub type ChainId = u16;

/// A decoded `TransferInitiated` event.
///
/// Produced once per source-chain log by the event reader and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    /// Sender on the source chain
    pub from: Address,
    /// Receiver on the destination chain
    pub to: Address,
    pub amount_in: U256,
    pub amount_out: U256,
    pub fee_paid: U256,
    /// Monotonic per-source nonce assigned by the source contract
    pub nonce: U256,
    pub source_chain: ChainId,
    pub source_contract: Address,
    pub block_number: u64,
    /// Not every provider returns it with logs
    pub block_timestamp: Option<u64>,
    pub tx_hash: B256,
    pub log_index: u64,
}

impl TransferEvent {
    /// Hash inputs for delivery to `dst_chain`
    pub fn message_params(&self, dst_chain: ChainId) -> MessageParams {
        MessageParams {
            src_chain: self.source_chain,
            dst_chain,
            src_contract: self.source_contract,
            nonce: self.nonce,
            sender: self.from,
            receiver: self.to,
            amount_out: self.amount_out,
            amount_in: self.amount_in,
            fee: self.fee_paid,
        }
    }

    pub fn message_id(&self, scheme: MessageIdScheme, dst_chain: ChainId) -> [u8; 32] {
        compute_message_id(scheme, &self.message_params(dst_chain))
    }
}

/// Parse a bridge chain id, rejecting values that do not fit in 16 bits.
pub fn parse_chain_id(value: u64) -> Option<ChainId> {
    ChainId::try_from(value).ok()
}
