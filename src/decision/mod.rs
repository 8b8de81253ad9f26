//! Decision process trait and implementations
//!
//! The decision process is the language model that, given the working
//! message list and the capability catalog, either answers or asks for
//! capability invocations.

use crate::error::AnalystError;
use crate::models::{CapabilityInfo, InvocationRequest};
use crate::stream::EventSink;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

pub mod deepseek;
pub mod sse;
pub use deepseek::DeepSeekClient;

//
// ================= Working Messages =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry of the working message list for a single loop execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    /// Requests made by an assistant message.
    pub invocations: Vec<InvocationRequest>,
    /// Set on tool observations; matches the originating request.
    pub call_id: Option<String>,
}

impl Message {
    fn plain(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            invocations: Vec::new(),
            call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::Assistant, content)
    }

    pub fn assistant_invoking(content: impl Into<String>, invocations: Vec<InvocationRequest>) -> Self {
        Self {
            invocations,
            ..Self::plain(MessageRole::Assistant, content)
        }
    }

    pub fn observation(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: Some(call_id.into()),
            ..Self::plain(MessageRole::Tool, content)
        }
    }
}

/// What the decision process wants next.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Plain text with no further requests.
    Text(String),
    /// An explicit final answer.
    Final(String),
    /// One or more capability requests, with any text produced alongside.
    Invoke {
        text: String,
        requests: Vec<InvocationRequest>,
    },
}

impl Decision {
    pub fn text(&self) -> &str {
        match self {
            Decision::Text(t) | Decision::Final(t) => t,
            Decision::Invoke { text, .. } => text,
        }
    }
}

/// Trait for the language-model decision process
#[async_trait]
pub trait DecisionProcess: Send + Sync {
    /// Produce the next decision. An empty `catalog` means no capabilities
    /// may be requested. When `tokens` is set, text is pushed there as it
    /// is generated.
    async fn decide(
        &self,
        messages: &[Message],
        catalog: &[CapabilityInfo],
        tokens: Option<&EventSink>,
    ) -> Result<Decision>;
}

/// Single-shot text generation, used by analysis capabilities.
#[async_trait]
pub trait TextGeneration: Send + Sync {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String>;
}

//
// ================= Scripted Decision Process =================
//

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Reply(Decision),
    Fail(String),
}

/// Snapshot of what a scripted process was asked.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub catalog: Vec<String>,
}

/// Replays a fixed script of decisions, for development and tests.
/// Keeps the loop functional without a model.
#[derive(Default)]
pub struct ScriptedDecisionProcess {
    script: Mutex<VecDeque<ScriptStep>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedDecisionProcess {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn replies(decisions: impl IntoIterator<Item = Decision>) -> Self {
        Self::new(decisions.into_iter().map(ScriptStep::Reply))
    }

    pub fn push(&self, step: ScriptStep) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(step);
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DecisionProcess for ScriptedDecisionProcess {
    async fn decide(
        &self,
        messages: &[Message],
        catalog: &[CapabilityInfo],
        tokens: Option<&EventSink>,
    ) -> Result<Decision> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                messages: messages.to_vec(),
                catalog: catalog.iter().map(|c| c.name.clone()).collect(),
            });
        }

        let step = self
            .script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .ok_or_else(|| AnalystError::DecisionProcess("script exhausted".to_string()))?;

        match step {
            ScriptStep::Fail(reason) => Err(AnalystError::DecisionProcess(reason)),
            ScriptStep::Reply(decision) => {
                if let Some(sink) = tokens {
                    sink.text(decision.text()).await?;
                }
                Ok(decision)
            }
        }
    }
}
