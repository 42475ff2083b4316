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
//! Shared data model, error taxonomy, and configuration for the Synod kernel.

pub mod config;
pub mod error;
pub mod transaction;
pub mod validator;

pub use error::ErrorCode;
