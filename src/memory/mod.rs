//! Session memory
//!
//! Per-session conversation history. Nothing is persisted across restarts.

pub mod store;

pub use store::{SessionHistory, Turn, TurnRole};
