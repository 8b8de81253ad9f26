//! Analyst session
//!
//! Owns one conversation history and serializes loop executions over it.
//! Buffered calls return the final answer; incremental calls run the loop in
//! a spawned task and hand back the event stream immediately.

use crate::agent::{LoopDriver, LoopOutcome};
use crate::memory::{SessionHistory, Turn};
use crate::models::{AnalysisResult, CapabilityInfo, ChatResult, Language, StreamEvent};
use crate::prompts::{analysis_request, capability_finished_notice, capability_started_notice, failure_notice};
use crate::stream::{EventSink, EventStream, DEFAULT_CHANNEL_CAPACITY};
use crate::validators::{validate_question, validate_symbol};
use crate::Result;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AnalystSession {
    driver: Arc<LoopDriver>,
    history: Arc<RwLock<SessionHistory>>,
    /// Held for the whole of one loop execution.
    gate: Arc<AsyncMutex<()>>,
    cancel: Arc<Mutex<CancellationToken>>,
    channel_capacity: usize,
}

impl AnalystSession {
    pub fn new(driver: Arc<LoopDriver>) -> Self {
        Self {
            driver,
            history: Arc::new(RwLock::new(SessionHistory::new())),
            gate: Arc::new(AsyncMutex::new(())),
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Buffered topic analysis.
    pub async fn analyze(&self, topic: &str, question: &str, language: Language) -> Result<AnalysisResult> {
        let (symbol, question) = validate_analysis(topic, question)?;
        let input = analysis_request(&symbol, &question, language);

        let outcome = self.execute(input, language, None).await?;
        Ok(AnalysisResult {
            topic: symbol,
            question,
            answer: outcome.answer,
            language,
            capabilities: outcome.capabilities,
        })
    }

    /// Incremental topic analysis as raw events.
    pub fn analyze_events(&self, topic: &str, question: &str, language: Language) -> Result<EventStream> {
        let (symbol, question) = validate_analysis(topic, question)?;
        Ok(self.spawn(analysis_request(&symbol, &question, language), language))
    }

    /// Incremental topic analysis as display text, capability markers included.
    pub fn analyze_stream(
        &self,
        topic: &str,
        question: &str,
        language: Language,
    ) -> Result<impl Stream<Item = String> + Send + 'static> {
        let events = self.analyze_events(topic, question, language)?;
        Ok(render_events(events, language))
    }

    pub async fn chat(&self, message: &str, language: Language) -> Result<ChatResult> {
        let message = validate_question(message)?;

        let outcome = self.execute(message.clone(), language, None).await?;
        Ok(ChatResult {
            message,
            answer: outcome.answer,
            language,
            capabilities: outcome.capabilities,
        })
    }

    pub fn chat_events(&self, message: &str, language: Language) -> Result<EventStream> {
        let message = validate_question(message)?;
        Ok(self.spawn(message, language))
    }

    pub fn chat_stream(
        &self,
        message: &str,
        language: Language,
    ) -> Result<impl Stream<Item = String> + Send + 'static> {
        let events = self.chat_events(message, language)?;
        Ok(render_events(events, language))
    }

    /// Waits for any running loop, then clears the history.
    pub async fn reset_session(&self) {
        let _gate = self.gate.lock().await;
        self.history.write().await.reset();
        info!("Session history reset");
    }

    pub fn list_capabilities(&self) -> Vec<CapabilityInfo> {
        self.driver.catalog().infos()
    }

    pub async fn history(&self) -> Vec<Turn> {
        self.history.read().await.snapshot()
    }

    /// Cancel loops that are running or queued. Later calls get a fresh token.
    pub fn cancel(&self) {
        let mut token = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        token.cancel();
        *token = CancellationToken::new();
    }

    fn token(&self) -> CancellationToken {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Run one loop under the gate and commit the exchange on success.
    async fn execute(&self, input: String, language: Language, sink: Option<&EventSink>) -> Result<LoopOutcome> {
        let cancel = self.token();
        let _gate = self.gate.lock().await;

        let history = self.history.read().await.snapshot();
        let outcome = self.driver.run(&input, &history, language, sink, &cancel).await?;

        self.history.write().await.append_exchange(input, outcome.answer.clone());
        Ok(outcome)
    }

    fn spawn(&self, input: String, language: Language) -> EventStream {
        let (sink, stream) = EventSink::channel(self.channel_capacity);
        let session = self.clone();

        tokio::spawn(async move {
            let result = session.execute(input, language, Some(&sink)).await;
            if let Err(e) = &result {
                warn!(error = %e, kind = e.kind(), "Incremental loop failed");
            }
            sink.finish(result.as_ref().map(|_| ())).await;
        });

        stream
    }
}

fn validate_analysis(topic: &str, question: &str) -> Result<(String, String)> {
    Ok((validate_symbol(topic)?, validate_question(question)?))
}

fn render_events(events: EventStream, language: Language) -> impl Stream<Item = String> + Send + 'static {
    events.filter_map(move |event| match event {
        StreamEvent::TextDelta { content } => Some(content),
        StreamEvent::CapabilityStarted { name } => Some(capability_started_notice(&name, language)),
        StreamEvent::CapabilityFinished { name } => Some(capability_finished_notice(&name, language)),
        StreamEvent::Completed => None,
        StreamEvent::Failed { reason, .. } => Some(failure_notice(&reason, language)),
    })
}
