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
//! Validator registry access, stake-weighted committee selection, and the
//! snapshot cache that maps validator identities to execution-backend wiring.

pub mod manager;
pub mod pool;
pub mod store;

pub use manager::ValidatorManager;
pub use pool::ValidatorPool;
pub use store::{MemoryValidatorStore, ValidatorStore};
