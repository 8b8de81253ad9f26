//! Crypto Analyst Orchestrator
//!
//! A session orchestration engine for a crypto-market analyst:
//! - Advertises a bounded catalog of data and analysis capabilities
//! - Lets a language model decide which capabilities to invoke
//! - Normalizes loosely-shaped tool arguments before invocation
//! - Keeps per-session conversation history
//! - Delivers answers buffered or as an incremental event stream
//!
//! DECISION LOOP:
//! INPUT → DECIDE → INVOKE → OBSERVE → DECIDE … → ANSWER

pub mod agent;
pub mod api;
pub mod catalog;
pub mod config;
pub mod data;
pub mod decision;
pub mod error;
pub mod formatters;
pub mod memory;
pub mod models;
pub mod prompts;
pub mod session;
pub mod stream;
pub mod tools;
pub mod validators;

pub use error::{AnalystError, Result};

// Re-export common types
pub use agent::{LoopDriver, LoopOutcome};
pub use catalog::{Capability, CapabilityCatalog, CapabilityInvoker};
pub use models::*;
pub use session::AnalystSession;
