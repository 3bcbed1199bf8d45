//! Wire-independent domain types shared across services.
//!
//! These are the concrete value types the dispatcher parses JSON-RPC
//! `params` into before any service logic runs — no service ever works
//! against an untyped `serde_json::Value` map internally.

pub mod calibration;
pub mod decision;
pub mod graph;
pub mod guardrail;
pub mod ready;
pub mod tracker;

pub use calibration::*;
pub use decision::*;
pub use graph::*;
pub use guardrail::*;
pub use ready::*;
pub use tracker::*;
