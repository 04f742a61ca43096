//! Testing utilities and mock implementations
//!
//! Lets pipeline stages be exercised without a real storage backend.

pub mod mocks;

pub use mocks::*;
