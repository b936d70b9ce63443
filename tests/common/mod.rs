//! Shared fakes for integration tests
//!
//! Logs are produced with the real `TransferInitiated` ABI encoding so the
//! production decoder runs unchanged against them.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use alloy::primitives::{address, Address, Log as PrimitiveLog, LogData, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use eyre::{eyre, Result};

use ferry::clock::Clock;
use ferry::contracts::Ferry;
use ferry::ledger::{ChainEndpoint, FulfillmentReceipt, FulfillmentSubmitter, Ledger, ReceiptInfo};

pub const SRC_CHAIN: u16 = 1;
pub const DST_CHAIN: u16 = 47763;
pub const FERRY_A: Address = address!("1111111111111111111111111111111111111111");
pub const FERRY_B: Address = address!("2222222222222222222222222222222222222222");
pub const BRIDGER: Address = address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
pub const RELAYER: Address = address!("9999999999999999999999999999999999999999");
pub const NFT: Address = address!("3333333333333333333333333333333333333333");
pub const ATTESTATION_KEY: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000002";
pub const BLOCK_TIME: u64 = 1_700_000_000;

/// keccak256 of the V2 encoding of [`scenario_event`] sent 1 -> 47763
pub const SCENARIO_ID_V2: &str =
    "0xcbc2ff3bfa8a9c0236b6ce3d534dcc9e9734fce076fb84bd7792c8e4501acaf7";
/// Same transfer under the 7-field layout
pub const SCENARIO_ID_V1: &str =
    "0x85842a2b270434d9eaffc3421dd889bf329dc7c0cddf12bbe9f6ac1bbb77ce77";

pub fn ether(n: u64) -> U256 {
    U256::from(n) * U256::from(10u64).pow(U256::from(18u64))
}

/// from = to = 0xaaaa..., 100 in, 99 out, 1 fee, nonce 7
pub fn scenario_event() -> Ferry::TransferInitiated {
    Ferry::TransferInitiated {
        from: BRIDGER,
        toOnOtherChain: BRIDGER,
        amountIn: ether(100),
        amountOut: ether(99),
        feePaid: ether(1),
        nonce: U256::from(7u64),
    }
}

pub fn tx_hash(n: u8) -> B256 {
    B256::repeat_byte(n)
}

pub fn transfer_log(
    contract: Address,
    event: &Ferry::TransferInitiated,
    block_number: u64,
    tx_hash: B256,
    log_index: u64,
) -> Log {
    rpc_log(contract, event.encode_log_data(), block_number, tx_hash, log_index)
}

pub fn rpc_log(
    contract: Address,
    data: LogData,
    block_number: u64,
    tx_hash: B256,
    log_index: u64,
) -> Log {
    Log {
        inner: PrimitiveLog {
            address: contract,
            data,
        },
        block_hash: Some(B256::repeat_byte(0xbb)),
        block_number: Some(block_number),
        block_timestamp: None,
        transaction_hash: Some(tx_hash),
        transaction_index: Some(0),
        log_index: Some(log_index),
        removed: false,
    }
}

/// A log at the Ferry address that is not a `TransferInitiated`
pub fn unrelated_log(contract: Address, block_number: u64, tx_hash: B256, log_index: u64) -> Log {
    let data = LogData::new_unchecked(vec![B256::repeat_byte(0xee)], vec![1u8; 32].into());
    rpc_log(contract, data, block_number, tx_hash, log_index)
}

#[derive(Debug, Default)]
pub struct LedgerState {
    pub block_number: u64,
    pub logs: Vec<Log>,
    pub receipts: HashMap<B256, ReceiptInfo>,
    pub block_timestamps: HashMap<u64, u64>,
    pub balances: HashMap<Address, U256>,
    pub required_fee: U256,
    pub fulfilled: HashSet<[u8; 32]>,
    pub fail_block_number: bool,
    pub fail_receipts: bool,
    /// Every `[from, to]` range passed to `transfer_logs`
    pub log_queries: Vec<(u64, u64)>,
}

/// In-memory chain
#[derive(Debug, Default)]
pub struct FakeLedger {
    pub state: Mutex<LedgerState>,
}

impl FakeLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut LedgerState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn set_block_number(&self, n: u64) {
        self.with(|s| s.block_number = n);
    }

    pub fn push_log(&self, log: Log) {
        self.with(|s| s.logs.push(log));
    }

    pub fn set_balance(&self, account: Address, balance: U256) {
        self.with(|s| {
            s.balances.insert(account, balance);
        });
    }

    pub fn set_required_fee(&self, fee: U256) {
        self.with(|s| s.required_fee = fee);
    }

    /// Store a mined receipt and its block timestamp.
    pub fn add_receipt(&self, tx_hash: B256, from: Address, block_number: u64, logs: Vec<Log>) {
        self.with(|s| {
            s.receipts.insert(
                tx_hash,
                ReceiptInfo {
                    tx_hash,
                    from,
                    block_number: Some(block_number),
                    success: true,
                    logs,
                },
            );
            s.block_timestamps.entry(block_number).or_insert(BLOCK_TIME);
        });
    }

    pub fn is_marked_fulfilled(&self, id: &[u8; 32]) -> bool {
        self.with(|s| s.fulfilled.contains(id))
    }

    pub fn log_queries(&self) -> Vec<(u64, u64)> {
        self.with(|s| s.log_queries.clone())
    }
}

#[async_trait]
impl Ledger for FakeLedger {
    async fn block_number(&self) -> Result<u64> {
        self.with(|s| {
            if s.fail_block_number {
                Err(eyre!("connection refused"))
            } else {
                Ok(s.block_number)
            }
        })
    }

    async fn transfer_logs(
        &self,
        contract: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>> {
        self.with(|s| {
            s.log_queries.push((from_block, to_block));
            Ok(s.logs
                .iter()
                .filter(|log| log.address() == contract)
                .filter(|log| {
                    log.block_number
                        .is_some_and(|n| n >= from_block && n <= to_block)
                })
                .cloned()
                .collect())
        })
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<ReceiptInfo>> {
        self.with(|s| {
            if s.fail_receipts {
                Err(eyre!("upstream timeout"))
            } else {
                Ok(s.receipts.get(&tx_hash).cloned())
            }
        })
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<Option<u64>> {
        Ok(self.with(|s| s.block_timestamps.get(&block_number).copied()))
    }

    async fn native_balance(&self, account: Address) -> Result<U256> {
        Ok(self.with(|s| s.balances.get(&account).copied().unwrap_or_default()))
    }

    async fn required_native_fee(&self, _contract: Address) -> Result<U256> {
        Ok(self.with(|s| s.required_fee))
    }

    async fn is_fulfilled(&self, _contract: Address, message_id: [u8; 32]) -> Result<bool> {
        Ok(self.with(|s| s.fulfilled.contains(&message_id)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedFulfillment {
    pub contract: Address,
    pub to: Address,
    pub amount: U256,
    pub message_id: [u8; 32],
    pub value: U256,
}

/// Submitter that settles on a [`FakeLedger`] destination
pub struct FakeSubmitter {
    pub destination: Arc<FakeLedger>,
    pub calls: Mutex<Vec<SubmittedFulfillment>>,
    /// Number of upcoming submissions that revert
    pub revert_next: AtomicUsize,
}

impl FakeSubmitter {
    pub fn new(destination: Arc<FakeLedger>) -> Arc<Self> {
        Arc::new(Self {
            destination,
            calls: Mutex::new(Vec::new()),
            revert_next: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> Vec<SubmittedFulfillment> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FulfillmentSubmitter for FakeSubmitter {
    fn address(&self) -> Address {
        RELAYER
    }

    async fn fulfill(
        &self,
        contract: Address,
        to: Address,
        amount: U256,
        message_id: [u8; 32],
        value: U256,
    ) -> Result<FulfillmentReceipt> {
        self.calls.lock().unwrap().push(SubmittedFulfillment {
            contract,
            to,
            amount,
            message_id,
            value,
        });

        let reverted = self
            .revert_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !reverted {
            self.destination.with(|s| {
                s.fulfilled.insert(message_id);
            });
        }

        Ok(FulfillmentReceipt {
            tx_hash: B256::repeat_byte(0xf0),
            success: !reverted,
        })
    }
}

/// Clock whose sleep returns on the next scheduler turn
#[derive(Debug, Default)]
pub struct FakeClock {
    pub sleeps: AtomicUsize,
}

impl FakeClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sleep_count(&self) -> usize {
        self.sleeps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Clock for FakeClock {
    async fn sleep(&self, _duration: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}

pub fn endpoint(chain_id: u16, contract: Address, ledger: &Arc<FakeLedger>) -> ChainEndpoint {
    ChainEndpoint {
        chain_id,
        contract,
        ledger: Arc::clone(ledger) as Arc<dyn Ledger>,
    }
}

pub fn hex_id(id: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(id))
}
