//! Transaction records, receipts, and round bookkeeping consumed by the
//! ledger-writing side.

use crate::validator::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The kind of a transaction, persisted as a small integer enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deploy,
    Write,
    Send,
    UpgradeContract,
}

impl TransactionType {
    /// The stable integer code used by the persistence contract.
    pub fn code(&self) -> u8 {
        match self {
            Self::Deploy => 0,
            Self::Write => 1,
            Self::Send => 2,
            Self::UpgradeContract => 3,
        }
    }
}

/// Transaction status surface. Every distinct failure mode keeps its own
/// variant; collapsing them into one generic error status is a regression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Proposing,
    Committing,
    Revealing,
    Accepted,
    Finalized,
    Undetermined,
    LeaderTimeout,
    ValidatorsTimeout,
    Canceled,
}

impl TransactionStatus {
    /// True for the statuses a transaction can terminate in.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finalized
                | Self::Undetermined
                | Self::LeaderTimeout
                | Self::ValidatorsTimeout
                | Self::Canceled
        )
    }
}

/// Whether a transaction runs the full committee protocol or finalizes on
/// leader success alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Normal,
    LeaderOnly,
}

/// A committee member's verdict on the leader's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Agree,
    Disagree,
}

/// Role a participant executed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunBy {
    Leader,
    Validator,
}

/// One participant's execution result for a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub address: Address,
    pub run_by: RunBy,
    pub vote: Vote,
    /// Resulting encoded contract state. Votes are decided by comparing this
    /// field against the leader's.
    pub contract_state: String,
    /// The VM's execution result payload, carried verbatim.
    pub result: serde_json::Value,
}

/// The vote tally and receipts persisted with an accepted transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusData {
    pub votes: BTreeMap<Address, Vote>,
    pub leader_receipt: Option<ExecutionReceipt>,
    #[serde(default)]
    pub validator_receipts: Vec<ExecutionReceipt>,
}

impl ConsensusData {
    pub fn agree_count(&self) -> usize {
        self.votes.values().filter(|v| **v == Vote::Agree).count()
    }
}

/// Current code and state of a contract, keyed by contract address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractState {
    pub code: String,
    pub state: String,
}

/// The transaction row shape written to the ledger on round completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub from_address: Address,
    pub to_address: Option<Address>,
    /// JSON payload; for accepted rounds this carries the new contract state.
    pub data: serde_json::Value,
    pub consensus_data: Option<ConsensusData>,
    pub tx_type: TransactionType,
    pub status: TransactionStatus,
    pub execution_mode: ExecutionMode,
    /// Distinguishes a committee-side timeout from a leader-side one for
    /// later analytics.
    #[serde(default)]
    pub appeal_validators_timeout: bool,
    /// Unix seconds.
    pub created_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_type_codes_are_stable() {
        assert_eq!(TransactionType::Deploy.code(), 0);
        assert_eq!(TransactionType::Write.code(), 1);
        assert_eq!(TransactionType::Send.code(), 2);
        assert_eq!(TransactionType::UpgradeContract.code(), 3);
    }

    #[test]
    fn terminal_statuses() {
        assert!(TransactionStatus::Finalized.is_terminal());
        assert!(TransactionStatus::Undetermined.is_terminal());
        assert!(TransactionStatus::LeaderTimeout.is_terminal());
        assert!(!TransactionStatus::Proposing.is_terminal());
        assert!(!TransactionStatus::Accepted.is_terminal());
    }

    #[test]
    fn agree_count_includes_leader_vote() {
        let mut votes = BTreeMap::new();
        votes.insert(Address::from("a"), Vote::Agree);
        votes.insert(Address::from("b"), Vote::Agree);
        votes.insert(Address::from("c"), Vote::Disagree);
        let data = ConsensusData {
            votes,
            leader_receipt: None,
            validator_receipts: vec![],
        };
        assert_eq!(data.agree_count(), 2);
    }
}
