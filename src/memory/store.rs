//! Session history storage
//!
//! Append-only record of completed exchanges for one session. Written only
//! after a loop terminates, so readers never observe half an exchange.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a turn author
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// A single turn in the session history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub turn_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub role: TurnRole,
    /// May be empty for assistant turns.
    pub content: String,
}

impl Turn {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, content)
    }
}

/// Ordered turns owned by one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHistory {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    turns: Vec<Turn>,
}

impl Default for SessionHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHistory {
    pub fn new() -> Self {
        Self {
            created_at: Utc::now(),
            updated_at: Utc::now(),
            turns: Vec::new(),
        }
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
        self.updated_at = Utc::now();
    }

    /// Append a user turn and its assistant reply together.
    pub fn append_exchange(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.append(Turn::user(user));
        self.append(Turn::assistant(assistant));
    }

    /// Ordered copy, in append order.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    /// Truncate to empty.
    pub fn reset(&mut self) {
        self.turns.clear();
        self.updated_at = Utc::now();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_creation() {
        let turn = Turn::user("What is RSI?");
        assert_eq!(turn.role, TurnRole::User);
        assert_eq!(turn.content, "What is RSI?");
    }

    #[test]
    fn test_snapshot_preserves_order() {
        let mut history = SessionHistory::new();
        history.append_exchange("BTC?", "Range-bound.");
        history.append_exchange("ETH?", "");

        let snapshot = history.snapshot();
        let roles: Vec<_> = snapshot.iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![TurnRole::User, TurnRole::Assistant, TurnRole::User, TurnRole::Assistant]
        );
        assert_eq!(snapshot[3].content, "");
        assert_eq!(history.len() % 2, 0);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut history = SessionHistory::new();
        history.append(Turn::user("hi"));
        let snapshot = history.snapshot();
        history.append(Turn::assistant("hello"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_reset() {
        let mut history = SessionHistory::new();
        history.append_exchange("a", "b");
        history.reset();
        assert!(history.is_empty());
        assert!(history.snapshot().is_empty());
    }
}
