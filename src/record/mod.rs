//! Monitoring record model
//!
//! Records are produced by monitored agents and flow through the processing
//! chain. Timers and SQL statements are leaf measurements; invocations form
//! trees that may carry leaf measurements at any depth.

pub mod invocation;
pub mod types;

pub use invocation::{Descendants, InvocationRecord};
pub use types::*;
