//! Alloy-backed ledger and submitter
//!
//! # Transaction Building
//!
//! Writes use `ProviderBuilder::with_recommended_fillers()` so nonce, gas
//! limit and fee fields are populated automatically. Without the fillers the
//! node rejects the transaction for missing properties.

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, FixedBytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{BlockNumberOrTag, BlockTransactionsKind, Filter, Log};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolEvent;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use tracing::{debug, info};

use super::{FulfillmentReceipt, FulfillmentSubmitter, Ledger, ReceiptInfo};
use crate::contracts::Ferry;
use crate::hash::bytes32_to_hex;

/// Read-only JSON-RPC ledger
pub struct EvmLedger {
    provider: RootProvider<Http<Client>>,
}

impl EvmLedger {
    /// Fails only on a malformed URL; no request is made here.
    pub fn new(rpc_url: &str) -> Result<Self> {
        let url = rpc_url
            .parse()
            .wrap_err_with(|| format!("Invalid RPC URL: {}", rpc_url))?;
        Ok(Self {
            provider: ProviderBuilder::new().on_http(url),
        })
    }
}

#[async_trait]
impl Ledger for EvmLedger {
    async fn block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .wrap_err("Failed to get block number")
    }

    async fn transfer_logs(
        &self,
        contract: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>> {
        let filter = Filter::new()
            .address(contract)
            .event_signature(Ferry::TransferInitiated::SIGNATURE_HASH)
            .from_block(from_block)
            .to_block(to_block);

        self.provider
            .get_logs(&filter)
            .await
            .wrap_err_with(|| format!("Failed to get logs for blocks {}..={}", from_block, to_block))
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<ReceiptInfo>> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .wrap_err("Failed to get transaction receipt")?;

        Ok(receipt.map(|r| ReceiptInfo {
            tx_hash: r.transaction_hash,
            from: r.from,
            block_number: r.block_number,
            success: r.status(),
            logs: r.inner.logs().to_vec(),
        }))
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<Option<u64>> {
        let block = self
            .provider
            .get_block_by_number(
                BlockNumberOrTag::Number(block_number),
                BlockTransactionsKind::Hashes,
            )
            .await
            .wrap_err_with(|| format!("Failed to get block {}", block_number))?;

        Ok(block.map(|b| b.header.timestamp))
    }

    async fn native_balance(&self, account: Address) -> Result<U256> {
        self.provider
            .get_balance(account)
            .await
            .wrap_err("Failed to get native balance")
    }

    async fn required_native_fee(&self, contract: Address) -> Result<U256> {
        let ferry = Ferry::new(contract, &self.provider);
        let fee = ferry
            .requiredNativeFee()
            .call()
            .await
            .map_err(|e| eyre!("Failed to query requiredNativeFee: {}", e))?;
        Ok(fee._0)
    }

    async fn is_fulfilled(&self, contract: Address, message_id: [u8; 32]) -> Result<bool> {
        let ferry = Ferry::new(contract, &self.provider);
        let fulfilled = ferry
            .isFulfilled(FixedBytes::from(message_id))
            .call()
            .await
            .map_err(|e| eyre!("Failed to query isFulfilled: {}", e))?;
        Ok(fulfilled._0)
    }
}

/// Signing submitter for `fulfill` transactions
pub struct EvmSubmitter {
    rpc_url: String,
    signer: PrivateKeySigner,
}

impl EvmSubmitter {
    pub fn new(rpc_url: &str, private_key: &str) -> Result<Self> {
        // Malformed URL fails here rather than on the first submission
        let _: reqwest::Url = rpc_url
            .parse()
            .wrap_err_with(|| format!("Invalid RPC URL: {}", rpc_url))?;
        let signer: PrivateKeySigner = private_key.parse().wrap_err("Invalid private key")?;

        info!(relayer_address = %signer.address(), "EVM submitter initialized");

        Ok(Self {
            rpc_url: rpc_url.to_string(),
            signer,
        })
    }
}

#[async_trait]
impl FulfillmentSubmitter for EvmSubmitter {
    fn address(&self) -> Address {
        self.signer.address()
    }

    async fn fulfill(
        &self,
        contract: Address,
        to: Address,
        amount: U256,
        message_id: [u8; 32],
        value: U256,
    ) -> Result<FulfillmentReceipt> {
        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(self.rpc_url.parse().wrap_err("Invalid RPC URL")?);

        let ferry = Ferry::new(contract, &provider);

        debug!(
            message_id = %bytes32_to_hex(&message_id),
            to = %to,
            amount = %amount,
            value = %value,
            "Submitting fulfill"
        );

        let pending_tx = ferry
            .fulfill(to, amount, FixedBytes::from(message_id))
            .value(value)
            .send()
            .await
            .map_err(|e| eyre!("Failed to send fulfill tx: {}", e))?;

        let tx_hash = *pending_tx.tx_hash();
        info!(tx_hash = %tx_hash, "Fulfill transaction sent, waiting for confirmation");

        let receipt = pending_tx
            .get_receipt()
            .await
            .map_err(|e| eyre!("Failed to get receipt: {}", e))?;

        Ok(FulfillmentReceipt {
            tx_hash,
            success: receipt.status(),
        })
    }
}
