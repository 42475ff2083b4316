#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing
    )
)]

//! Optimistic committee consensus over non-deterministic contract execution.
//!
//! A round samples a committee from the staked validator pool, lets the
//! leader execute optimistically, has each committee member re-execute and
//! vote by comparing resulting state, and commits the tallied outcome to the
//! ledger. Failed rounds are appealed by rotating in a fresh committee.

pub mod engine;
pub mod ledger;
pub mod round;
pub mod vm;

pub use engine::{ConsensusEngine, TransactionRequest};
pub use ledger::{MemoryLedger, TransactionLedger};
pub use round::{CallFrame, ConsensusRound, RoundOutcome};
pub use vm::{ExecutionRequest, ExecutionResponse, HttpVmClient, VmClient};
