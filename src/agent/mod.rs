//! Decision-loop driver
//!
//! DECIDE → INVOKE → OBSERVE → DECIDE … → ANSWER
//!
//! The working message list lives only for one run. History is read as a
//! snapshot and never written here; the session commits the exchange once
//! the run returns.

use crate::catalog::{is_internal, CapabilityCatalog, CapabilityInvoker};
use crate::config::Settings;
use crate::data::{HttpMarketData, MySqlNewsSource, NewsSource};
use crate::decision::{Decision, DecisionProcess, DeepSeekClient, Message};
use crate::error::AnalystError;
use crate::memory::{Turn, TurnRole};
use crate::models::Language;
use crate::prompts::{budget_exhausted_answer, loop_system_prompt, BUDGET_EXHAUSTED_OBSERVATION};
use crate::stream::EventSink;
use crate::tools::{create_default_catalog, DataSources};
use crate::Result;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Completed,
    Aborted,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopState::Running => "running",
            LoopState::Completed => "completed",
            LoopState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub answer: String,
    /// Executed, user-visible capabilities in execution order.
    pub capabilities: Vec<String>,
    pub invocations: u32,
    pub budget_exhausted: bool,
}

/// Drives one decision process against one capability catalog.
pub struct LoopDriver {
    decision: Arc<dyn DecisionProcess>,
    invoker: CapabilityInvoker,
    max_invocations: u32,
}

impl LoopDriver {
    /// Fails with a configuration error when `max_invocations` is 0.
    pub fn new(
        decision: Arc<dyn DecisionProcess>,
        catalog: Arc<CapabilityCatalog>,
        max_invocations: u32,
    ) -> Result<Self> {
        if max_invocations == 0 {
            return Err(AnalystError::Config(
                "max_invocations must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            decision,
            invoker: CapabilityInvoker::new(catalog),
            max_invocations,
        })
    }

    pub fn catalog(&self) -> &Arc<CapabilityCatalog> {
        self.invoker.catalog()
    }

    pub fn max_invocations(&self) -> u32 {
        self.max_invocations
    }

    /// Run one loop to termination. When `sink` is set, text deltas and
    /// capability lifecycle events are pushed there while the loop runs.
    pub async fn run(
        &self,
        user_input: &str,
        history: &[Turn],
        language: Language,
        sink: Option<&EventSink>,
        cancel: &CancellationToken,
    ) -> Result<LoopOutcome> {
        let start = Instant::now();

        info!(
            state = %LoopState::Running,
            history_turns = history.len(),
            max_invocations = self.max_invocations,
            streaming = sink.is_some(),
            "Loop: starting"
        );

        let result = self.drive(user_input, history, language, sink, cancel).await;

        let state = if result.is_ok() {
            LoopState::Completed
        } else {
            LoopState::Aborted
        };
        match &result {
            Ok(outcome) => info!(
                state = %state,
                invocations = outcome.invocations,
                budget_exhausted = outcome.budget_exhausted,
                answer_chars = outcome.answer.chars().count(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Loop: finished"
            ),
            Err(e) => warn!(
                state = %state,
                error = %e,
                duration_ms = start.elapsed().as_millis() as u64,
                "Loop: aborted"
            ),
        }

        result
    }

    async fn drive(
        &self,
        user_input: &str,
        history: &[Turn],
        language: Language,
        sink: Option<&EventSink>,
        cancel: &CancellationToken,
    ) -> Result<LoopOutcome> {
        let catalog = self.invoker.catalog().infos();

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(loop_system_prompt(
            &catalog,
            self.max_invocations,
            language,
        )));
        messages.extend(history.iter().map(|turn| match turn.role {
            TurnRole::User => Message::user(turn.content.clone()),
            TurnRole::Assistant => Message::assistant(turn.content.clone()),
        }));
        messages.push(Message::user(user_input));

        let mut invocations = 0u32;
        let mut capabilities = Vec::new();
        let mut produced = String::new();
        let mut step = 0u32;

        loop {
            ensure_live(sink, cancel)?;
            step += 1;

            let decision =
                guarded(sink, cancel, self.decision.decide(&messages, &catalog, sink)).await??;

            let (text, requests) = match decision {
                Decision::Text(text) | Decision::Final(text) => {
                    debug!(step, "Decision: answer");
                    return Ok(LoopOutcome {
                        answer: text,
                        capabilities,
                        invocations,
                        budget_exhausted: false,
                    });
                }
                Decision::Invoke { text, requests } if requests.is_empty() => {
                    return Ok(LoopOutcome {
                        answer: text,
                        capabilities,
                        invocations,
                        budget_exhausted: false,
                    });
                }
                Decision::Invoke { text, requests } => (text, requests),
            };

            debug!(step, requests = requests.len(), "Decision: invoke");
            produced.push_str(&text);
            messages.push(Message::assistant_invoking(text, requests.clone()));

            for request in requests {
                if invocations >= self.max_invocations {
                    debug!(capability = %request.capability, "Budget exhausted, skipping request");
                    messages.push(Message::observation(
                        request.call_id,
                        BUDGET_EXHAUSTED_OBSERVATION,
                    ));
                    continue;
                }

                if let Some(events) = sink {
                    guarded(sink, cancel, events.capability_started(&request.capability)).await??;
                }

                let result = guarded(sink, cancel, self.invoker.invoke(&request)).await?;
                invocations += 1;

                if let Some(events) = sink {
                    guarded(sink, cancel, events.capability_finished(&request.capability)).await??;
                }
                if !is_internal(&request.capability) {
                    capabilities.push(request.capability.clone());
                }

                messages.push(Message::observation(request.call_id, result.observation()));
            }

            if invocations >= self.max_invocations {
                let answer = self
                    .conclude(&messages, &produced, language, sink, cancel)
                    .await?;
                return Ok(LoopOutcome {
                    answer,
                    capabilities,
                    invocations,
                    budget_exhausted: true,
                });
            }
        }
    }

    /// Last consultation once the budget is spent, with the catalog withheld.
    async fn conclude(
        &self,
        messages: &[Message],
        produced: &str,
        language: Language,
        sink: Option<&EventSink>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        ensure_live(sink, cancel)?;
        info!(max_invocations = self.max_invocations, "Invocation budget exhausted, concluding");

        let decision = guarded(sink, cancel, self.decision.decide(messages, &[], sink)).await??;
        let text = decision.text().trim();

        if !text.is_empty() {
            return Ok(decision.text().to_string());
        }
        if !produced.trim().is_empty() {
            return Ok(produced.to_string());
        }

        let notice = budget_exhausted_answer(language);
        if let Some(events) = sink {
            guarded(sink, cancel, events.text(notice)).await??;
        }
        Ok(notice.to_string())
    }
}

/// Wire the production collaborators from settings.
pub fn build_default_driver(settings: &Settings) -> Result<LoopDriver> {
    let model = Arc::new(DeepSeekClient::new(settings)?);
    let news = MySqlNewsSource::from_url(settings.news_database_url.as_deref())
        .map(|source| Arc::new(source) as Arc<dyn NewsSource>);
    let news_configured = news.is_some();

    let sources = DataSources {
        market: Arc::new(HttpMarketData::new(settings)?),
        news,
    };
    let catalog = create_default_catalog(settings, sources, model.clone())?;

    info!(
        capabilities = catalog.len(),
        news = news_configured,
        model = %settings.llm_model,
        "Capability catalog ready"
    );

    LoopDriver::new(model, Arc::new(catalog), settings.max_invocations)
}

fn ensure_live(sink: Option<&EventSink>, cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(AnalystError::Cancelled("loop cancelled".to_string()));
    }
    if sink.map_or(false, EventSink::is_closed) {
        return Err(AnalystError::Cancelled(
            "event stream dropped by consumer".to_string(),
        ));
    }
    Ok(())
}

/// Race `fut` against cancellation and the consumer going away.
async fn guarded<F: Future>(
    sink: Option<&EventSink>,
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output> {
    let dropped = async {
        match sink {
            Some(sink) => sink.closed().await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AnalystError::Cancelled("loop cancelled".to_string())),
        _ = dropped => Err(AnalystError::Cancelled(
            "event stream dropped by consumer".to_string(),
        )),
        output = fut => Ok(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testing::catalog;
    use crate::decision::{MessageRole, ScriptStep, ScriptedDecisionProcess};
    use crate::models::{InvocationRequest, StreamEvent};
    use futures::StreamExt;
    use serde_json::json;
    use tokio_test::assert_ok;

    fn request(id: &str, capability: &str, arguments: serde_json::Value) -> InvocationRequest {
        InvocationRequest {
            call_id: id.to_string(),
            capability: capability.to_string(),
            arguments,
        }
    }

    fn invoke(requests: Vec<InvocationRequest>) -> Decision {
        Decision::Invoke {
            text: String::new(),
            requests,
        }
    }

    fn driver(process: Arc<ScriptedDecisionProcess>, max: u32) -> LoopDriver {
        LoopDriver::new(process, catalog(), max).unwrap()
    }

    async fn run(driver: &LoopDriver, history: &[Turn]) -> Result<LoopOutcome> {
        driver
            .run("How is BTC?", history, Language::En, None, &CancellationToken::new())
            .await
    }

    #[test]
    fn test_zero_budget_is_config_error() {
        let process = Arc::new(ScriptedDecisionProcess::default());
        assert!(matches!(
            LoopDriver::new(process, catalog(), 0),
            Err(AnalystError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_plain_answer_terminates_without_invocations() {
        let process = Arc::new(ScriptedDecisionProcess::replies([Decision::Final("Calm.".into())]));
        let outcome = assert_ok!(run(&driver(process.clone(), 5), &[]).await);

        assert_eq!(outcome.answer, "Calm.");
        assert_eq!(outcome.invocations, 0);
        assert!(!outcome.budget_exhausted);

        let call = &process.calls()[0];
        assert_eq!(call.messages[0].role, MessageRole::System);
        assert_eq!(call.messages.last().unwrap().content, "How is BTC?");
        assert_eq!(call.catalog, vec!["get_echo", "_internal_echo", "get_broken"]);
    }

    #[tokio::test]
    async fn test_observations_fed_back_in_order() {
        let process = Arc::new(ScriptedDecisionProcess::replies([
            invoke(vec![
                request("a", "get_echo", json!({"__arg1": "BTC"})),
                request("b", "get_nothing", json!({})),
                request("c", "get_broken", json!("BTC")),
            ]),
            Decision::Final("done".into()),
        ]));
        let outcome = run(&driver(process.clone(), 5), &[]).await.unwrap();

        assert_eq!(outcome.invocations, 3);
        assert_eq!(outcome.capabilities, vec!["get_echo", "get_nothing", "get_broken"]);

        let second = &process.calls()[1].messages;
        let observations: Vec<&Message> =
            second.iter().filter(|m| m.role == MessageRole::Tool).collect();
        assert_eq!(observations.len(), 3);
        assert_eq!(observations[0].call_id.as_deref(), Some("a"));
        assert!(observations[0].content.contains("BTC"));
        assert!(observations[1].content.starts_with("Error: unknown capability"));
        assert!(observations[2].content.starts_with("Error: "));
    }

    #[tokio::test]
    async fn test_budget_of_one_still_answers() {
        let process = Arc::new(ScriptedDecisionProcess::replies([
            invoke(vec![
                request("a", "get_echo", json!("BTC")),
                request("b", "get_echo", json!("ETH")),
            ]),
            Decision::Final("BTC leads ETH.".into()),
        ]));
        let outcome = assert_ok!(run(&driver(process.clone(), 1), &[]).await);

        assert_eq!(outcome.invocations, 1);
        assert!(outcome.budget_exhausted);
        assert_eq!(outcome.answer, "BTC leads ETH.");

        let calls = process.calls();
        assert!(calls[1].catalog.is_empty());
        let last = calls[1].messages.last().unwrap();
        assert_eq!(last.call_id.as_deref(), Some("b"));
        assert_eq!(last.content, BUDGET_EXHAUSTED_OBSERVATION);
    }

    #[tokio::test]
    async fn test_budget_exhausted_without_text_uses_notice() {
        let process = Arc::new(ScriptedDecisionProcess::replies([
            invoke(vec![request("a", "get_echo", json!("BTC"))]),
            Decision::Text(String::new()),
        ]));
        let outcome = run(&driver(process, 1), &[]).await.unwrap();
        assert_eq!(outcome.answer, budget_exhausted_answer(Language::En));
    }

    #[tokio::test]
    async fn test_budget_exhausted_falls_back_to_produced_text() {
        let process = Arc::new(ScriptedDecisionProcess::replies([
            Decision::Invoke {
                text: "Looking up BTC.".into(),
                requests: vec![request("a", "get_echo", json!("BTC"))],
            },
            Decision::Final(String::new()),
        ]));
        let outcome = run(&driver(process, 1), &[]).await.unwrap();
        assert_eq!(outcome.answer, "Looking up BTC.");
    }

    #[tokio::test]
    async fn test_invocations_never_exceed_budget() {
        let mut steps: Vec<Decision> = (0..6)
            .map(|i| invoke(vec![request(&i.to_string(), "get_echo", json!("BTC"))]))
            .collect();
        steps.push(Decision::Final("enough".into()));
        let process = Arc::new(ScriptedDecisionProcess::replies(steps));

        let outcome = assert_ok!(run(&driver(process, 3), &[]).await);
        assert_eq!(outcome.invocations, 3);
        assert!(outcome.budget_exhausted);
    }

    #[tokio::test]
    async fn test_decision_failure_aborts() {
        let process = Arc::new(ScriptedDecisionProcess::new([ScriptStep::Fail("503".into())]));
        let result = run(&driver(process, 5), &[]).await;
        assert!(matches!(result, Err(AnalystError::DecisionProcess(_))));
    }

    #[tokio::test]
    async fn test_history_precedes_new_input() {
        let process = Arc::new(ScriptedDecisionProcess::replies([Decision::Final("ok".into())]));
        let history = vec![Turn::user("first"), Turn::assistant("first answer")];
        run(&driver(process.clone(), 5), &history).await.unwrap();

        let messages = &process.calls()[0].messages;
        assert_eq!(messages[1].content, "first");
        assert_eq!(messages[2].role, MessageRole::Assistant);
        assert_eq!(messages[3].content, "How is BTC?");
    }

    #[tokio::test]
    async fn test_internal_capabilities_hidden() {
        let process = Arc::new(ScriptedDecisionProcess::replies([
            invoke(vec![request("a", "_internal_echo", json!("BTC"))]),
            Decision::Final("ok".into()),
        ]));
        let (sink, stream) = EventSink::channel(16);
        let outcome = driver(process, 5)
            .run("q?", &[], Language::Zh, Some(&sink), &CancellationToken::new())
            .await
            .unwrap();
        drop(sink);

        assert_eq!(outcome.invocations, 1);
        assert!(outcome.capabilities.is_empty());
        let events: Vec<StreamEvent> = stream.collect().await;
        assert_eq!(events, vec![StreamEvent::TextDelta { content: "ok".into() }]);
    }

    #[tokio::test]
    async fn test_streaming_emits_lifecycle_events() {
        let process = Arc::new(ScriptedDecisionProcess::replies([
            Decision::Invoke {
                text: "Checking.".into(),
                requests: vec![request("a", "get_echo", json!("BTC"))],
            },
            Decision::Final("Done.".into()),
        ]));
        let (sink, stream) = EventSink::channel(16);
        driver(process, 5)
            .run("q?", &[], Language::Zh, Some(&sink), &CancellationToken::new())
            .await
            .unwrap();
        drop(sink);

        let events: Vec<StreamEvent> = stream.collect().await;
        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta { content: "Checking.".into() },
                StreamEvent::CapabilityStarted { name: "get_echo".into() },
                StreamEvent::CapabilityFinished { name: "get_echo".into() },
                StreamEvent::TextDelta { content: "Done.".into() },
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_loop() {
        let process = Arc::new(ScriptedDecisionProcess::replies([Decision::Final("x".into())]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = driver(process.clone(), 5)
            .run("q?", &[], Language::Zh, None, &cancel)
            .await;
        assert!(matches!(result, Err(AnalystError::Cancelled(_))));
        assert!(process.calls().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_stream_cancels() {
        let process = Arc::new(ScriptedDecisionProcess::replies([Decision::Final("x".into())]));
        let (sink, stream) = EventSink::channel(4);
        drop(stream);
        let result = driver(process, 5)
            .run("q?", &[], Language::Zh, Some(&sink), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(AnalystError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_blocked_event_send() {
        let process = Arc::new(ScriptedDecisionProcess::replies([
            Decision::Invoke {
                text: "Checking.".into(),
                requests: vec![request("a", "get_echo", json!("BTC"))],
            },
            Decision::Final("Done.".into()),
        ]));
        // One slot, filled by the first text delta; the stream is never read.
        let (sink, _stream) = EventSink::channel(1);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let driver = driver(process, 5);
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            driver.run("q?", &[], Language::Zh, Some(&sink), &cancel),
        )
        .await
        .expect("blocked send ignored cancellation");
        assert!(matches!(result, Err(AnalystError::Cancelled(_))));
    }
}
