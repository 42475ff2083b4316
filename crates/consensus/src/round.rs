//! A single consensus round: leader proposal, committee re-execution, vote
//! tally. The engine owns committee sampling and appeals; this module only
//! drives one committee through one round.
//!
//! Failure endings are raised as `ConsensusError` values so the appeal layer
//! routes on the same taxonomy callers see: a failed tally is
//! `NotReached`, a leader that never answers is `LeaderTimeout`, a committee
//! member that never answers is `ValidatorsTimeout`.

use crate::vm::{ExecutionRequest, VmClient};
use std::sync::Arc;
use synod_types::error::{ConsensusError, VmError};
use synod_types::transaction::{
    ConsensusData, ExecutionMode, ExecutionReceipt, RunBy, TransactionStatus, Vote,
};
use synod_types::validator::NodeSnapshot;

/// Call frame shared by every participant in the round.
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub contract_code: String,
    pub encoded_state: String,
    pub function_name: String,
    pub args: Vec<serde_json::Value>,
}

/// An accepted round: the tallied votes with receipts and the contract state
/// the committee converged on.
#[derive(Debug)]
pub struct RoundOutcome {
    pub consensus_data: ConsensusData,
    pub new_state: String,
}

pub struct ConsensusRound {
    vm: Arc<dyn VmClient>,
}

impl ConsensusRound {
    pub fn new(vm: Arc<dyn VmClient>) -> Self {
        Self { vm }
    }

    /// Runs one round over the given committee. The first node is the
    /// leader. In leader-only mode the committee tail is skipped and the
    /// round is accepted on leader success.
    pub async fn run(
        &self,
        frame: &CallFrame,
        committee: &[NodeSnapshot],
        mode: ExecutionMode,
    ) -> Result<RoundOutcome, ConsensusError> {
        let (leader, followers) = match committee.split_first() {
            Some(split) => split,
            None => return Err(ConsensusError::EmptyPool),
        };

        tracing::info!(
            target: "consensus",
            status = ?TransactionStatus::Proposing,
            leader = %leader.validator.address,
            committee = committee.len(),
            "round started"
        );

        let leader_response = match self
            .vm
            .execute(ExecutionRequest {
                contract_code: frame.contract_code.clone(),
                encoded_state: frame.encoded_state.clone(),
                function_name: frame.function_name.clone(),
                args: frame.args.clone(),
                run_by: RunBy::Leader,
                host_data: leader.host_data.clone(),
                leader_receipt: None,
            })
            .await
        {
            Ok(response) => response,
            Err(VmError::Timeout) => {
                tracing::warn!(
                    target: "consensus",
                    leader = %leader.validator.address,
                    "leader execution timed out"
                );
                return Err(ConsensusError::LeaderTimeout);
            }
            Err(e) => return Err(e.into()),
        };

        let leader_receipt = ExecutionReceipt {
            address: leader.validator.address.clone(),
            run_by: RunBy::Leader,
            vote: leader_response.vote,
            contract_state: leader_response.contract_state.clone(),
            result: leader_response.result,
        };

        let mut consensus_data = ConsensusData {
            votes: [(leader.validator.address.clone(), leader_receipt.vote)].into(),
            leader_receipt: Some(leader_receipt.clone()),
            validator_receipts: Vec::new(),
        };

        if mode == ExecutionMode::LeaderOnly {
            tracing::info!(
                target: "consensus",
                status = ?TransactionStatus::Accepted,
                "leader-only round accepted"
            );
            return Ok(RoundOutcome {
                consensus_data,
                new_state: leader_receipt.contract_state,
            });
        }

        tracing::debug!(
            target: "consensus",
            status = ?TransactionStatus::Committing,
            followers = followers.len(),
            "committee re-executing"
        );

        for node in followers {
            let receipt = match self
                .vm
                .execute(ExecutionRequest {
                    contract_code: frame.contract_code.clone(),
                    encoded_state: frame.encoded_state.clone(),
                    function_name: frame.function_name.clone(),
                    args: frame.args.clone(),
                    run_by: RunBy::Validator,
                    host_data: node.host_data.clone(),
                    leader_receipt: Some(leader_receipt.clone()),
                })
                .await
            {
                Ok(response) => {
                    // Agreement is equality of resulting state, not of the
                    // result payload.
                    let vote = if response.contract_state == leader_receipt.contract_state {
                        Vote::Agree
                    } else {
                        Vote::Disagree
                    };
                    ExecutionReceipt {
                        address: node.validator.address.clone(),
                        run_by: RunBy::Validator,
                        vote,
                        contract_state: response.contract_state,
                        result: response.result,
                    }
                }
                Err(VmError::Timeout) => {
                    tracing::warn!(
                        target: "consensus",
                        validator = %node.validator.address,
                        "validator execution timed out"
                    );
                    return Err(ConsensusError::ValidatorsTimeout);
                }
                // A failing validator is a disagreeing validator; its error
                // payload is preserved as the receipt result.
                Err(e) => {
                    let payload = match e {
                        VmError::Execution(value) => value,
                        other => serde_json::Value::String(other.to_string()),
                    };
                    ExecutionReceipt {
                        address: node.validator.address.clone(),
                        run_by: RunBy::Validator,
                        vote: Vote::Disagree,
                        contract_state: String::new(),
                        result: payload,
                    }
                }
            };
            consensus_data
                .votes
                .insert(receipt.address.clone(), receipt.vote);
            consensus_data.validator_receipts.push(receipt);
        }

        let committee_size = committee.len();
        let agree = consensus_data.agree_count();
        tracing::info!(
            target: "consensus",
            status = ?TransactionStatus::Revealing,
            agree,
            committee = committee_size,
            "votes tallied"
        );

        // A round passes unless agreement falls strictly below half the
        // committee, leader included. Exact half passes.
        if agree < committee_size / 2 {
            return Err(ConsensusError::NotReached {
                agree,
                committee: committee_size,
            });
        }

        tracing::info!(
            target: "consensus",
            status = ?TransactionStatus::Accepted,
            "round accepted"
        );
        Ok(RoundOutcome {
            consensus_data,
            new_state: leader_receipt.contract_state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{ExecutionResponse, MockVm};
    use std::collections::BTreeMap;
    use synod_types::validator::{
        studio_llm_id, Address, HostData, LlmProvider, PluginConfig, Validator,
    };

    fn node(address: &str) -> NodeSnapshot {
        let addr = Address::from(address);
        NodeSnapshot {
            validator: Validator {
                address: addr.clone(),
                stake: 1,
                provider: LlmProvider {
                    provider: "openai".into(),
                    model: "gpt-4o".into(),
                    config: BTreeMap::new(),
                    plugin: "openai".into(),
                    plugin_config: PluginConfig {
                        api_key_env_var: "OPENAI_API_KEY".into(),
                        api_url: None,
                    },
                },
            },
            host_data: HostData {
                studio_llm_id: studio_llm_id(&addr),
                address: addr,
                mock_response: None,
                custom_plugin_data: None,
                fallback_llm_id: None,
            },
        }
    }

    fn frame() -> CallFrame {
        CallFrame {
            contract_code: "code".into(),
            encoded_state: "s0".into(),
            function_name: "call".into(),
            args: vec![],
        }
    }

    fn agree_response(state: &str) -> ExecutionResponse {
        ExecutionResponse {
            vote: Vote::Agree,
            contract_state: state.to_string(),
            result: serde_json::json!({"ok": true}),
        }
    }

    #[tokio::test]
    async fn unanimous_round_is_accepted() {
        let vm = MockVm::new();
        vm.on("leader", Ok(agree_response("s1")));
        vm.on("v1", Ok(agree_response("s1")));
        vm.on("v2", Ok(agree_response("s1")));

        let round = ConsensusRound::new(Arc::new(vm));
        let committee = vec![node("leader"), node("v1"), node("v2")];
        let outcome = round
            .run(&frame(), &committee, ExecutionMode::Normal)
            .await
            .unwrap();

        assert_eq!(outcome.new_state, "s1");
        assert_eq!(outcome.consensus_data.agree_count(), 3);
        assert_eq!(outcome.consensus_data.validator_receipts.len(), 2);
    }

    #[tokio::test]
    async fn divergent_state_votes_disagree() {
        let vm = MockVm::new();
        vm.on("leader", Ok(agree_response("s1")));
        vm.on("v1", Ok(agree_response("s1")));
        vm.on("v2", Ok(agree_response("different")));

        let round = ConsensusRound::new(Arc::new(vm));
        let committee = vec![node("leader"), node("v1"), node("v2")];
        let outcome = round
            .run(&frame(), &committee, ExecutionMode::Normal)
            .await
            .unwrap();

        assert_eq!(outcome.consensus_data.agree_count(), 2);
        assert_eq!(
            outcome.consensus_data.votes[&Address::from("v2")],
            Vote::Disagree
        );
    }

    #[tokio::test]
    async fn exactly_half_agreement_passes() {
        // Committee of 5, leader + 1 agree: 2 < 5/2 == 2 is false, so the
        // round passes on exactly half (floor).
        let vm = MockVm::new();
        vm.on("leader", Ok(agree_response("s1")));
        vm.on("v1", Ok(agree_response("s1")));
        vm.on("v2", Ok(agree_response("x")));
        vm.on("v3", Ok(agree_response("y")));
        vm.on("v4", Ok(agree_response("z")));

        let round = ConsensusRound::new(Arc::new(vm));
        let committee = vec![node("leader"), node("v1"), node("v2"), node("v3"), node("v4")];
        let outcome = round
            .run(&frame(), &committee, ExecutionMode::Normal)
            .await
            .unwrap();
        assert_eq!(outcome.consensus_data.agree_count(), 2);
    }

    #[tokio::test]
    async fn below_half_agreement_raises_not_reached() {
        let vm = MockVm::new();
        vm.on("leader", Ok(agree_response("s1")));
        vm.on("v1", Ok(agree_response("x")));
        vm.on("v2", Ok(agree_response("y")));
        vm.on("v3", Ok(agree_response("z")));
        vm.on("v4", Ok(agree_response("w")));

        let round = ConsensusRound::new(Arc::new(vm));
        let committee = vec![node("leader"), node("v1"), node("v2"), node("v3"), node("v4")];
        let err = round
            .run(&frame(), &committee, ExecutionMode::Normal)
            .await
            .unwrap_err();
        match err {
            ConsensusError::NotReached { agree, committee } => {
                assert_eq!(agree, 1);
                assert_eq!(committee, 5);
            }
            other => panic!("expected NotReached, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn leader_timeout_raises_its_own_variant() {
        let vm = MockVm::new();
        vm.on("leader", Err(VmError::Timeout));

        let round = ConsensusRound::new(Arc::new(vm));
        let committee = vec![node("leader"), node("v1")];
        let err = round
            .run(&frame(), &committee, ExecutionMode::Normal)
            .await
            .unwrap_err();
        assert!(matches!(err, ConsensusError::LeaderTimeout));
    }

    #[tokio::test]
    async fn leader_vm_error_is_fatal() {
        let vm = MockVm::new();
        vm.on(
            "leader",
            Err(VmError::Execution(serde_json::json!({"trap": "divide by zero"}))),
        );

        let round = ConsensusRound::new(Arc::new(vm));
        let committee = vec![node("leader"), node("v1")];
        let err = round
            .run(&frame(), &committee, ExecutionMode::Normal)
            .await
            .unwrap_err();
        assert!(matches!(err, ConsensusError::Vm(VmError::Execution(_))));
    }

    #[tokio::test]
    async fn validator_vm_error_becomes_a_disagree_vote() {
        let payload = serde_json::json!({"trap": "out of gas"});
        let vm = MockVm::new();
        vm.on("leader", Ok(agree_response("s1")));
        vm.on("v1", Ok(agree_response("s1")));
        vm.on("v2", Err(VmError::Execution(payload.clone())));

        let round = ConsensusRound::new(Arc::new(vm));
        let committee = vec![node("leader"), node("v1"), node("v2")];
        let outcome = round
            .run(&frame(), &committee, ExecutionMode::Normal)
            .await
            .unwrap();
        assert_eq!(
            outcome.consensus_data.votes[&Address::from("v2")],
            Vote::Disagree
        );
        let receipt = outcome
            .consensus_data
            .validator_receipts
            .iter()
            .find(|r| r.address == Address::from("v2"))
            .unwrap();
        assert_eq!(receipt.result, payload);
    }

    #[tokio::test]
    async fn validator_timeout_raises_its_own_variant() {
        let vm = MockVm::new();
        vm.on("leader", Ok(agree_response("s1")));
        vm.on("v1", Err(VmError::Timeout));

        let round = ConsensusRound::new(Arc::new(vm));
        let committee = vec![node("leader"), node("v1"), node("v2")];
        let err = round
            .run(&frame(), &committee, ExecutionMode::Normal)
            .await
            .unwrap_err();
        assert!(matches!(err, ConsensusError::ValidatorsTimeout));
    }

    #[tokio::test]
    async fn leader_only_skips_the_committee() {
        let vm = MockVm::new();
        vm.on("leader", Ok(agree_response("s1")));
        // No programmed responses for the followers; reaching them would
        // panic inside the mock.

        let round = ConsensusRound::new(Arc::new(vm));
        let committee = vec![node("leader"), node("v1"), node("v2")];
        let outcome = round
            .run(&frame(), &committee, ExecutionMode::LeaderOnly)
            .await
            .unwrap();
        assert_eq!(outcome.new_state, "s1");
        assert_eq!(outcome.consensus_data.votes.len(), 1);
        assert!(outcome.consensus_data.validator_receipts.is_empty());
    }
}
