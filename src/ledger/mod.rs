//! Ledger collaborators
//!
//! The relay and the attestation verifier never talk to an RPC endpoint
//! directly. They go through [`Ledger`] (reads) and [`FulfillmentSubmitter`]
//! (signed writes) so a chain can be replaced by an in-process fake in tests.

use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use async_trait::async_trait;
use eyre::Result;

use crate::types::ChainId;

pub mod evm;

pub use evm::{EvmLedger, EvmSubmitter};

/// One side of the bridge: its id, Ferry contract and ledger
#[derive(Clone)]
pub struct ChainEndpoint {
    pub chain_id: ChainId,
    pub contract: Address,
    pub ledger: Arc<dyn Ledger>,
}

/// The subset of a transaction receipt the bridge consumes.
#[derive(Debug, Clone)]
pub struct ReceiptInfo {
    pub tx_hash: B256,
    /// Transaction sender
    pub from: Address,
    /// `None` while the receipt is not yet in a block
    pub block_number: Option<u64>,
    pub success: bool,
    pub logs: Vec<Log>,
}

/// Outcome of a submitted fulfillment transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FulfillmentReceipt {
    pub tx_hash: B256,
    pub success: bool,
}

/// Read access to one chain.
///
/// Every method is a network call; errors are surfaced to the caller, which
/// owns the retry policy.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Latest block height
    async fn block_number(&self) -> Result<u64>;

    /// Raw `TransferInitiated` logs emitted by `contract` in `[from_block, to_block]`
    async fn transfer_logs(&self, contract: Address, from_block: u64, to_block: u64)
        -> Result<Vec<Log>>;

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<ReceiptInfo>>;

    /// Unix timestamp of a block, `None` if the block is unknown
    async fn block_timestamp(&self, block_number: u64) -> Result<Option<u64>>;

    async fn native_balance(&self, account: Address) -> Result<U256>;

    /// `requiredNativeFee()` on the Ferry contract
    async fn required_native_fee(&self, contract: Address) -> Result<U256>;

    /// `isFulfilled(messageId)` on the Ferry contract
    async fn is_fulfilled(&self, contract: Address, message_id: [u8; 32]) -> Result<bool>;
}

/// Signs and submits `fulfill` calls on a destination chain.
#[async_trait]
pub trait FulfillmentSubmitter: Send + Sync {
    /// Address paying for and signing fulfillments
    fn address(&self) -> Address;

    /// Send `fulfill(to, amount, messageId)` with `value` attached and wait for the receipt.
    async fn fulfill(
        &self,
        contract: Address,
        to: Address,
        amount: U256,
        message_id: [u8; 32],
        value: U256,
    ) -> Result<FulfillmentReceipt>;
}
