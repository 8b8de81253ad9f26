//! Core data models for the analyst session

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Zh,
    En,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::Zh => "zh",
            Language::En => "en",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

//
// ================= Invocation =================
//

/// A capability call requested by the decision process. Consumed once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvocationRequest {
    /// Provider-assigned call id, echoed back on the observation.
    pub call_id: String,
    pub capability: String,
    pub arguments: Value,
}

/// Outcome of one invocation. Exactly one of `output` / `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvocationResult {
    pub capability: String,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl InvocationResult {
    pub fn success(capability: impl Into<String>, output: String) -> Self {
        Self {
            capability: capability.into(),
            output: Some(output),
            error: None,
        }
    }

    pub fn failure(capability: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            output: None,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Text folded into the working message list as the observation.
    pub fn observation(&self) -> String {
        match (&self.output, &self.error) {
            (_, Some(error)) => format!("Error: {}", error),
            (Some(output), None) => output.clone(),
            (None, None) => String::new(),
        }
    }
}

//
// ================= Stream Events =================
//

/// One unit of the ordered output of an incremental loop execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    TextDelta { content: String },
    CapabilityStarted { name: String },
    CapabilityFinished { name: String },
    Completed,
    /// `kind` is the error kind tag; `reason` is the full, unmasked message.
    Failed { kind: String, reason: String },
}

impl StreamEvent {
    /// `Completed` and `Failed` end the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Completed | StreamEvent::Failed { .. })
    }
}

//
// ================= Catalog Listing =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapabilityInfo {
    pub name: String,
    pub description: String,
    /// JSON schema of the input shape.
    pub parameters: Value,
}

//
// ================= Results =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub topic: String,
    pub question: String,
    pub answer: String,
    pub language: Language,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResult {
    pub message: String,
    pub answer: String,
    pub language: Language,
    pub capabilities: Vec<String>,
}
