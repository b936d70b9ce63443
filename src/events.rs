//! Chain event reader
//!
//! Turns raw Ferry logs into [`TransferEvent`]s. Decoding is decode-or-skip:
//! a contract address can emit unrelated or older event shapes over its
//! lifetime, so a log that does not decode is reported and skipped without
//! affecting its siblings. RPC failures are returned to the caller.

use alloy::primitives::Address;
use alloy::rpc::types::Log;
use eyre::Result;
use thiserror::Error;
use tracing::{debug, warn};

use crate::contracts::Ferry;
use crate::ledger::{Ledger, ReceiptInfo};
use crate::types::{ChainId, TransferEvent};

/// Why a single log was not turned into a transfer event
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LogDecodeError {
    #[error("log emitted by {actual}, expected {expected}")]
    WrongContract { expected: Address, actual: Address },

    #[error("not a TransferInitiated log: {0}")]
    Abi(String),

    #[error("log is missing {0}")]
    MissingMetadata(&'static str),
}

/// Decode one log as `TransferInitiated` emitted by `contract` on `chain`.
pub fn decode_transfer_log(
    log: &Log,
    contract: Address,
    chain: ChainId,
) -> std::result::Result<TransferEvent, LogDecodeError> {
    if log.address() != contract {
        return Err(LogDecodeError::WrongContract {
            expected: contract,
            actual: log.address(),
        });
    }

    let decoded = log
        .log_decode::<Ferry::TransferInitiated>()
        .map_err(|e| LogDecodeError::Abi(e.to_string()))?;
    let event = decoded.inner.data;

    let tx_hash = log
        .transaction_hash
        .ok_or(LogDecodeError::MissingMetadata("transaction hash"))?;
    let log_index = log
        .log_index
        .ok_or(LogDecodeError::MissingMetadata("log index"))?;
    let block_number = log
        .block_number
        .ok_or(LogDecodeError::MissingMetadata("block number"))?;

    Ok(TransferEvent {
        from: event.from,
        to: event.toOnOtherChain,
        amount_in: event.amountIn,
        amount_out: event.amountOut,
        fee_paid: event.feePaid,
        nonce: event.nonce,
        source_chain: chain,
        source_contract: contract,
        block_number,
        block_timestamp: log.block_timestamp,
        tx_hash,
        log_index,
    })
}

/// Decode every log in `logs`, skipping the ones that are not transfers.
pub fn decode_transfer_logs(logs: &[Log], contract: Address, chain: ChainId) -> Vec<TransferEvent> {
    logs.iter()
        .filter_map(|log| match decode_transfer_log(log, contract, chain) {
            Ok(event) => Some(event),
            Err(e) => {
                debug!(
                    chain,
                    tx_hash = ?log.transaction_hash,
                    log_index = ?log.log_index,
                    error = %e,
                    "Skipping log"
                );
                None
            }
        })
        .collect()
}

/// Transfers in a receipt emitted by the given contract, in log order.
pub fn receipt_transfers(
    receipt: &ReceiptInfo,
    contract: Address,
    chain: ChainId,
) -> Vec<TransferEvent> {
    let own_logs: Vec<Log> = receipt
        .logs
        .iter()
        .filter(|log| log.address() == contract)
        .cloned()
        .collect();
    decode_transfer_logs(&own_logs, contract, chain)
}

/// Read transfer events for `[from_block, to_block]`.
pub async fn read_transfers(
    ledger: &dyn Ledger,
    contract: Address,
    chain: ChainId,
    from_block: u64,
    to_block: u64,
) -> Result<Vec<TransferEvent>> {
    let logs = ledger.transfer_logs(contract, from_block, to_block).await?;
    let events = decode_transfer_logs(&logs, contract, chain);

    if events.len() != logs.len() {
        warn!(
            chain,
            from_block,
            to_block,
            logs = logs.len(),
            decoded = events.len(),
            "Some logs could not be decoded as TransferInitiated"
        );
    }

    Ok(events)
}
