//! Core error taxonomy for the Synod kernel.
//!
//! The taxonomy mirrors the recovery policy: configuration errors are fatal
//! and never retried; module lifecycle errors are retried lazily on the next
//! read-verification; consensus disagreement and timeouts are routed to the
//! appeal path; VM execution faults propagate with their payload intact.

use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Fatal configuration errors. Raised immediately, never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing or empty.
    #[error("Required environment variable not set: {0}")]
    MissingEnv(String),
    /// The execution backend binary could not be located.
    #[error("Execution backend binary not found: {0}")]
    BinaryNotFound(String),
    /// A configuration value failed semantic validation.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ErrorCode for ConfigError {
    fn code(&self) -> &'static str {
        match self {
            Self::MissingEnv(_) => "CONFIG_MISSING_ENV",
            Self::BinaryNotFound(_) => "CONFIG_BINARY_NOT_FOUND",
            Self::Invalid(_) => "CONFIG_INVALID",
        }
    }
}

/// Errors from the execution-backend module lifecycle.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// An I/O error occurred while managing the module process or its config.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The module process could not be spawned.
    #[error("Failed to spawn module process '{0}': {1}")]
    Spawn(String, String),
    /// The generated backend config could not be serialized.
    #[error("Failed to render backend config: {0}")]
    ConfigRender(String),
    /// No free port could be found in the configured range or ephemerally.
    #[error("No free port available for module '{0}'")]
    NoFreePort(String),
    /// A fatal configuration error surfaced during restart.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ErrorCode for ModuleError {
    fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "MODULE_IO_ERROR",
            Self::Spawn(..) => "MODULE_SPAWN_FAILED",
            Self::ConfigRender(_) => "MODULE_CONFIG_RENDER_FAILED",
            Self::NoFreePort(_) => "MODULE_NO_FREE_PORT",
            Self::Config(_) => "MODULE_CONFIG_ERROR",
        }
    }
}

/// Errors from the external registry and ledger stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An error occurred in the backing store.
    #[error("Store backend error: {0}")]
    Backend(String),
    /// The requested record was not found.
    #[error("Record not found: {0}")]
    NotFound(String),
    /// A write conflicted with concurrent state.
    #[error("Store conflict: {0}")]
    Conflict(String),
}

impl ErrorCode for StoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::Backend(_) => "STORE_BACKEND_ERROR",
            Self::NotFound(_) => "STORE_NOT_FOUND",
            Self::Conflict(_) => "STORE_CONFLICT",
        }
    }
}

/// Errors from the validator manager and its snapshot machinery.
#[derive(Debug, Error)]
pub enum ValidatorError {
    /// An error surfaced from an execution-backend module.
    #[error("Module error: {0}")]
    Module(#[from] ModuleError),
    /// An error surfaced from the validator registry.
    #[error("Registry error: {0}")]
    Store(#[from] StoreError),
    /// The snapshot cache is empty and could not be served.
    #[error("Validator snapshot unavailable; manager not started")]
    SnapshotUnavailable,
}

impl ErrorCode for ValidatorError {
    fn code(&self) -> &'static str {
        match self {
            Self::Module(_) => "VALIDATOR_MODULE_ERROR",
            Self::Store(_) => "VALIDATOR_STORE_ERROR",
            Self::SnapshotUnavailable => "VALIDATOR_SNAPSHOT_UNAVAILABLE",
        }
    }
}

/// Errors from the VM execution RPC boundary. The kernel does not interpret
/// the VM's internals, only their effect on vote and outcome.
#[derive(Debug, Error)]
pub enum VmError {
    /// The VM reported an execution error; its payload is carried verbatim.
    #[error("VM execution error: {0}")]
    Execution(serde_json::Value),
    /// The VM boundary did not respond within its own timeout. This is a
    /// first-class outcome, not an ordinary error: it changes the
    /// appeal-eligibility semantics downstream.
    #[error("VM call timed out")]
    Timeout,
    /// A transport-level failure reaching the VM.
    #[error("VM transport error: {0}")]
    Transport(String),
    /// The VM's response could not be decoded.
    #[error("VM response decode error: {0}")]
    Decode(String),
}

impl ErrorCode for VmError {
    fn code(&self) -> &'static str {
        match self {
            Self::Execution(_) => "VM_EXECUTION_ERROR",
            Self::Timeout => "VM_TIMEOUT",
            Self::Transport(_) => "VM_TRANSPORT_ERROR",
            Self::Decode(_) => "VM_DECODE_ERROR",
        }
    }
}

/// Errors from the round and appeal state machine.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// The committee did not reach the agreement threshold. Routed to the
    /// appeal path, never treated as an infrastructure bug.
    #[error("Consensus not reached: {agree} agree of committee {committee}")]
    NotReached {
        /// Number of agree votes, leader included.
        agree: usize,
        /// Committee size, leader included.
        committee: usize,
    },
    /// Selection was invoked without a minimum viable registry.
    #[error("Cannot select a committee from an empty validator pool")]
    EmptyPool,
    /// The leader failed to respond within the VM boundary's timeout.
    #[error("Leader execution timed out")]
    LeaderTimeout,
    /// One or more committee members failed to respond within the VM
    /// boundary's timeout.
    #[error("Validator execution timed out")]
    ValidatorsTimeout,
    /// A VM execution fault from the leader step.
    #[error("VM error: {0}")]
    Vm(#[from] VmError),
    /// An error from the validator manager while preparing a committee.
    #[error("Validator error: {0}")]
    Validator(#[from] ValidatorError),
    /// An error persisting the round outcome.
    #[error("Ledger error: {0}")]
    Ledger(#[from] StoreError),
}

impl ErrorCode for ConsensusError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotReached { .. } => "CONSENSUS_NOT_REACHED",
            Self::EmptyPool => "CONSENSUS_EMPTY_POOL",
            Self::LeaderTimeout => "CONSENSUS_LEADER_TIMEOUT",
            Self::ValidatorsTimeout => "CONSENSUS_VALIDATORS_TIMEOUT",
            Self::Vm(_) => "CONSENSUS_VM_ERROR",
            Self::Validator(_) => "CONSENSUS_VALIDATOR_ERROR",
            Self::Ledger(_) => "CONSENSUS_LEDGER_ERROR",
        }
    }
}
