//! The consensus engine: drives a transaction through committee rounds,
//! rotates in a fresh committee when a round raises an appealable failure,
//! and commits the terminal outcome to the ledger.

use crate::ledger::TransactionLedger;
use crate::round::{CallFrame, ConsensusRound, RoundOutcome};
use crate::vm::VmClient;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use synod_types::config::ConsensusConfig;
use synod_types::error::ConsensusError;
use synod_types::transaction::{
    ConsensusData, ContractState, ExecutionMode, TransactionRecord, TransactionStatus,
    TransactionType,
};
use synod_types::validator::{Address, NodeSnapshot, Validator, ValidatorSnapshot};
use synod_types::ErrorCode;
use synod_validator::{ValidatorManager, ValidatorPool};

/// A transaction submitted for execution.
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    pub from_address: Address,
    pub to_address: Option<Address>,
    pub contract_code: String,
    /// Encoded contract state the call starts from.
    pub current_state: String,
    pub function_name: String,
    pub args: Vec<serde_json::Value>,
    pub tx_type: TransactionType,
    pub execution_mode: ExecutionMode,
}

pub struct ConsensusEngine {
    manager: Arc<ValidatorManager>,
    vm: Arc<dyn VmClient>,
    ledger: Arc<dyn TransactionLedger>,
    config: ConsensusConfig,
}

impl ConsensusEngine {
    pub fn new(
        manager: Arc<ValidatorManager>,
        vm: Arc<dyn VmClient>,
        ledger: Arc<dyn TransactionLedger>,
        config: ConsensusConfig,
    ) -> Self {
        Self {
            manager,
            vm,
            ledger,
            config,
        }
    }

    /// True for round failures the engine answers with a committee rotation.
    /// Everything else is an infrastructure fault and propagates.
    fn appealable(e: &ConsensusError) -> bool {
        matches!(
            e,
            ConsensusError::NotReached { .. }
                | ConsensusError::LeaderTimeout
                | ConsensusError::ValidatorsTimeout
        )
    }

    /// Terminal status once every rotation is spent. Disagreement lands on
    /// Undetermined; timeouts keep their own status, with the committee-side
    /// one flagged for appeal analytics.
    fn terminal_status(e: &ConsensusError) -> (TransactionStatus, bool) {
        match e {
            ConsensusError::LeaderTimeout => (TransactionStatus::LeaderTimeout, false),
            ConsensusError::ValidatorsTimeout => (TransactionStatus::ValidatorsTimeout, true),
            _ => (TransactionStatus::Undetermined, false),
        }
    }

    /// Runs a transaction to a terminal status. The first round executes
    /// against the live snapshot; each appeal rotates a freshly sampled
    /// committee in through a temporal snapshot. Every terminal path commits
    /// a ledger record.
    pub async fn run_transaction(
        &self,
        request: TransactionRequest,
    ) -> Result<TransactionStatus, ConsensusError> {
        let snapshot = self.manager.snapshot().await?;
        let pool = snapshot.validators();
        let frame = CallFrame {
            contract_code: request.contract_code.clone(),
            encoded_state: request.current_state.clone(),
            function_name: request.function_name.clone(),
            args: request.args.clone(),
        };

        // Leader-only mode never convenes a committee; only the leader is
        // sampled.
        let committee_target = match request.execution_mode {
            ExecutionMode::LeaderOnly => 1,
            ExecutionMode::Normal => self.config.committee_size,
        };

        let committee = ValidatorPool::select(&pool, committee_target)?;
        let nodes = Self::committee_nodes(&snapshot, &committee);
        let round = ConsensusRound::new(self.vm.clone());
        let mut failure = match round.run(&frame, &nodes, request.execution_mode).await {
            Ok(outcome) => return self.commit_accepted(&request, outcome).await,
            Err(e) if Self::appealable(&e) => e,
            Err(e) => return Err(e),
        };

        for rotation in 1..=self.config.max_rotations {
            tracing::info!(
                target: "consensus",
                rotation,
                max = self.config.max_rotations,
                cause = failure.code(),
                "appealing with a rotated committee"
            );
            let committee = ValidatorPool::select(&pool, committee_target)?;
            let vm = self.vm.clone();
            let frame = frame.clone();
            let mode = request.execution_mode;
            let result = self
                .manager
                .temporal_snapshot(committee, move |temp| async move {
                    ConsensusRound::new(vm).run(&frame, &temp.nodes, mode).await
                })
                .await?;

            match result {
                Ok(outcome) => return self.commit_accepted(&request, outcome).await,
                Err(e) if Self::appealable(&e) => failure = e,
                Err(e) => return Err(e),
            }
        }

        let (status, appeal_validators_timeout) = Self::terminal_status(&failure);
        tracing::warn!(
            target: "consensus",
            status = ?status,
            cause = failure.code(),
            error = %failure,
            "rotations exhausted; committing terminal failure"
        );
        self.commit(&request, status, None, None, appeal_validators_timeout)
            .await?;
        Ok(status)
    }

    fn committee_nodes(snapshot: &ValidatorSnapshot, committee: &[Validator]) -> Vec<NodeSnapshot> {
        committee
            .iter()
            .filter_map(|v| snapshot.node(&v.address).cloned())
            .collect()
    }

    async fn commit_accepted(
        &self,
        request: &TransactionRequest,
        outcome: RoundOutcome,
    ) -> Result<TransactionStatus, ConsensusError> {
        self.commit(
            request,
            TransactionStatus::Finalized,
            Some(outcome.consensus_data),
            Some(outcome.new_state),
            false,
        )
        .await?;
        Ok(TransactionStatus::Finalized)
    }

    async fn commit(
        &self,
        request: &TransactionRequest,
        status: TransactionStatus,
        consensus_data: Option<ConsensusData>,
        new_state: Option<String>,
        appeal_validators_timeout: bool,
    ) -> Result<(), ConsensusError> {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let data = match &new_state {
            Some(state) => serde_json::json!({ "new_state": state }),
            None => serde_json::json!({}),
        };
        let contract_update = match (new_state, &request.to_address) {
            (Some(state), Some(address)) => Some((
                address.clone(),
                ContractState {
                    code: request.contract_code.clone(),
                    state,
                },
            )),
            _ => None,
        };
        let record = TransactionRecord {
            from_address: request.from_address.clone(),
            to_address: request.to_address.clone(),
            data,
            consensus_data,
            tx_type: request.tx_type,
            status,
            execution_mode: request.execution_mode,
            appeal_validators_timeout,
            created_at,
        };
        self.ledger.commit_round(record, contract_update).await?;
        Ok(())
    }
}
