//! In-process replay guard
//!
//! Used when no database is configured. Records do not survive a restart,
//! and replicas do not share them.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{AttestationKey, AttestationRecord, NewAttestation, ReplayGuard};
use crate::error::StoreError;

#[derive(Debug, Default)]
pub struct MemoryReplayGuard {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    records: HashMap<AttestationKey, AttestationRecord>,
}

impl MemoryReplayGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl ReplayGuard for MemoryReplayGuard {
    async fn exists(&self, key: &AttestationKey) -> Result<bool, StoreError> {
        Ok(self.lock().records.contains_key(key))
    }

    async fn record(&self, new: NewAttestation) -> Result<AttestationRecord, StoreError> {
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;

        // Test and insert under one lock
        match state.records.entry(new.key.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate),
            Entry::Vacant(slot) => {
                let record = AttestationRecord {
                    id,
                    tx_hash: new.key.tx_hash,
                    log_index: new.key.log_index as i64,
                    source_chain_id: i32::from(new.key.source_chain),
                    bridger: new.bridger,
                    message_id: new.message_id,
                    amount: new.amount,
                    signed_at: new.signed_at,
                };
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn find_by_tx(&self, tx_hash: &str) -> Result<Vec<AttestationRecord>, StoreError> {
        let mut records: Vec<AttestationRecord> = self
            .lock()
            .records
            .values()
            .filter(|r| r.tx_hash == tx_hash)
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.source_chain_id, r.log_index));
        Ok(records)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
