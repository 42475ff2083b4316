//! Ledger seam: the engine persists a finished round through this trait.
//! Commit is atomic over the transaction record and the contract state
//! update, so a crash between the two cannot leave the chain inconsistent.

use async_trait::async_trait;
use std::collections::BTreeMap;
use synod_types::error::StoreError;
use synod_types::transaction::{ContractState, TransactionRecord};
use synod_types::validator::Address;
use tokio::sync::Mutex;

#[async_trait]
pub trait TransactionLedger: Send + Sync {
    /// Appends the transaction record and, when the round produced one,
    /// applies the contract state update in the same commit.
    async fn commit_round(
        &self,
        record: TransactionRecord,
        contract_update: Option<(Address, ContractState)>,
    ) -> Result<(), StoreError>;

    async fn transactions(&self) -> Result<Vec<TransactionRecord>, StoreError>;

    async fn contract(&self, address: &Address) -> Result<ContractState, StoreError>;
}

#[derive(Default)]
struct LedgerState {
    transactions: Vec<TransactionRecord>,
    contracts: BTreeMap<Address, ContractState>,
}

/// In-memory ledger. A single mutex over both tables makes commit_round
/// atomic by construction.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionLedger for MemoryLedger {
    async fn commit_round(
        &self,
        record: TransactionRecord,
        contract_update: Option<(Address, ContractState)>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.transactions.push(record);
        if let Some((address, contract)) = contract_update {
            state.contracts.insert(address, contract);
        }
        Ok(())
    }

    async fn transactions(&self) -> Result<Vec<TransactionRecord>, StoreError> {
        Ok(self.state.lock().await.transactions.clone())
    }

    async fn contract(&self, address: &Address) -> Result<ContractState, StoreError> {
        self.state
            .lock()
            .await
            .contracts
            .get(address)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(address.to_string()))
    }
}
