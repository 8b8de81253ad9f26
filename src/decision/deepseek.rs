//! DeepSeek (OpenAI-compatible) chat-completions client
//!
//! Drives the decision loop through native tool calling and serves
//! single-shot generation for the analysis capabilities. Uses a long-lived
//! reqwest::Client for connection pooling.

use super::sse::{SseDecoder, SseFrame};
use super::{Decision, DecisionProcess, Message, MessageRole, TextGeneration};
use crate::config::Settings;
use crate::error::AnalystError;
use crate::models::{CapabilityInfo, InvocationRequest};
use crate::stream::EventSink;
use crate::Result;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, info};

/// Reusable chat-completions client (connection-pooled)
pub struct DeepSeekClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl DeepSeekClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(settings.llm_timeout)
            .build()?;

        Ok(Self {
            client,
            api_key: settings.llm_api_key.clone(),
            base_url: settings.llm_api_base.trim_end_matches('/').to_string(),
            model: settings.llm_model.clone(),
            temperature: settings.llm_temperature,
            max_tokens: settings.llm_max_tokens,
        })
    }

    fn build_request(&self, messages: &[Message], catalog: &[CapabilityInfo], stream: bool) -> ChatRequest {
        let tools: Vec<Value> = catalog
            .iter()
            .map(|c| {
                json!({
                    "type": "function",
                    "function": {
                        "name": c.name,
                        "description": c.description,
                        "parameters": c.parameters,
                    }
                })
            })
            .collect();

        ChatRequest {
            model: self.model.clone(),
            messages: messages.iter().map(WireMessage::from).collect(),
            tool_choice: if tools.is_empty() { None } else { Some("auto".to_string()) },
            tools,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream,
        }
    }

    async fn send(&self, request: &ChatRequest) -> Result<reqwest::Response> {
        if self.api_key.is_empty() {
            return Err(AnalystError::DecisionProcess(
                "DEEPSEEK_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}/chat/completions", self.base_url);
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            stream = request.stream,
            "Calling chat completions"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                error!("Chat completions request failed: {}", e);
                AnalystError::DecisionProcess(format!("request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Chat completions error response");
            return Err(AnalystError::DecisionProcess(format!("API error {}: {}", status, body)));
        }

        Ok(response)
    }

    async fn complete(&self, request: &ChatRequest) -> Result<Decision> {
        let response: ChatResponse = self.send(request).await?.json().await.map_err(|e| {
            AnalystError::DecisionProcess(format!("failed to parse response: {}", e))
        })?;
        response.into_decision()
    }

    async fn complete_streaming(&self, request: &ChatRequest, tokens: &EventSink) -> Result<Decision> {
        let response = self.send(request).await?;
        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut state = StreamState::default();

        'read: while let Some(chunk) = body.next().await {
            let chunk = chunk
                .map_err(|e| AnalystError::DecisionProcess(format!("stream interrupted: {}", e)))?;

            for frame in decoder.push(&chunk) {
                match frame {
                    SseFrame::Done => break 'read,
                    SseFrame::Data(data) => {
                        if let Some(delta) = state.apply(&data)? {
                            tokens.text(delta).await?;
                        }
                    }
                }
            }
        }

        if let Some(SseFrame::Data(data)) = decoder.finish() {
            if let Some(delta) = state.apply(&data)? {
                tokens.text(delta).await?;
            }
        }

        Ok(state.into_decision())
    }
}

#[async_trait]
impl DecisionProcess for DeepSeekClient {
    async fn decide(
        &self,
        messages: &[Message],
        catalog: &[CapabilityInfo],
        tokens: Option<&EventSink>,
    ) -> Result<Decision> {
        let request = self.build_request(messages, catalog, tokens.is_some());
        let decision = match tokens {
            Some(sink) => self.complete_streaming(&request, sink).await?,
            None => self.complete(&request).await?,
        };

        if let Decision::Invoke { requests, .. } = &decision {
            info!(requests = requests.len(), "Model requested capabilities");
        }
        Ok(decision)
    }
}

#[async_trait]
impl TextGeneration for DeepSeekClient {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        let request = self.build_request(&[Message::system(system), Message::user(prompt)], &[], false);
        let decision = self.complete(&request).await?;
        info!(chars = decision.text().chars().count(), "Generation completed");
        Ok(decision.text().to_string())
    }
}

/// Provider argument strings become JSON values; non-JSON text stays a string.
fn parse_arguments(raw: &str) -> Value {
    let raw = raw.trim();
    if raw.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn make_decision(text: String, requests: Vec<InvocationRequest>, finish_reason: Option<&str>) -> Decision {
    if !requests.is_empty() {
        Decision::Invoke { text, requests }
    } else if finish_reason == Some("stop") {
        Decision::Final(text)
    } else {
        Decision::Text(text)
    }
}

//
// ================= Wire Format =================
//

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: MessageRole,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        let tool_calls = if message.invocations.is_empty() {
            None
        } else {
            Some(
                message
                    .invocations
                    .iter()
                    .map(|r| WireToolCall {
                        id: r.call_id.clone(),
                        kind: "function".to_string(),
                        function: WireFunction {
                            name: r.capability.clone(),
                            arguments: r.arguments.to_string(),
                        },
                    })
                    .collect(),
            )
        };

        Self {
            role: message.role,
            content: message.content.clone(),
            tool_calls,
            tool_call_id: message.call_id.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunction,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

impl ChatResponse {
    fn into_decision(self) -> Result<Decision> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AnalystError::DecisionProcess("no choices in response".to_string()))?;

        let requests = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| InvocationRequest {
                call_id: tc.id,
                capability: tc.function.name,
                arguments: parse_arguments(&tc.function.arguments),
            })
            .collect();

        Ok(make_decision(
            choice.message.content.unwrap_or_default(),
            requests,
            choice.finish_reason.as_deref(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: u32,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates a streamed completion: text plus tool calls keyed by index.
#[derive(Debug, Default)]
struct StreamState {
    text: String,
    calls: BTreeMap<u32, PartialCall>,
    finish_reason: Option<String>,
}

impl StreamState {
    /// Apply one `data:` payload; returns the text delta it carried, if any.
    fn apply(&mut self, data: &str) -> Result<Option<String>> {
        let chunk: StreamChunk = serde_json::from_str(data).map_err(|e| {
            AnalystError::DecisionProcess(format!("malformed stream chunk: {}", e))
        })?;

        let mut emitted = None;
        for choice in chunk.choices {
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                self.text.push_str(&content);
                emitted = Some(content);
            }
            for delta in choice.delta.tool_calls.unwrap_or_default() {
                let call = self.calls.entry(delta.index).or_default();
                if let Some(id) = delta.id {
                    call.id = id;
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        call.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        call.arguments.push_str(&arguments);
                    }
                }
            }
        }
        Ok(emitted)
    }

    fn into_decision(self) -> Decision {
        let requests = self
            .calls
            .into_iter()
            .filter(|(_, call)| !call.name.is_empty())
            .map(|(index, call)| InvocationRequest {
                call_id: if call.id.is_empty() { format!("call_{}", index) } else { call.id },
                capability: call.name,
                arguments: parse_arguments(&call.arguments),
            })
            .collect();

        make_decision(self.text, requests, self.finish_reason.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> DeepSeekClient {
        DeepSeekClient::new(&Settings::default()).unwrap()
    }

    #[test]
    fn test_request_includes_tools_only_with_catalog() {
        let catalog = vec![CapabilityInfo {
            name: "get_header_data".into(),
            description: "Basic coin info".into(),
            parameters: json!({"type": "object"}),
        }];
        let with = serde_json::to_value(client().build_request(&[Message::user("hi")], &catalog, false)).unwrap();
        assert_eq!(with["tools"][0]["function"]["name"], "get_header_data");
        assert_eq!(with["tool_choice"], "auto");

        let without = serde_json::to_value(client().build_request(&[Message::user("hi")], &[], true)).unwrap();
        assert!(without.get("tools").is_none());
        assert!(without.get("tool_choice").is_none());
        assert_eq!(without["stream"], true);
    }

    #[test]
    fn test_wire_messages_carry_tool_calls() {
        let messages = vec![
            Message::assistant_invoking(
                "",
                vec![InvocationRequest {
                    call_id: "call_1".into(),
                    capability: "get_kline_data".into(),
                    arguments: json!({"symbol": "BTC"}),
                }],
            ),
            Message::observation("call_1", "K线数据"),
        ];
        let request = serde_json::to_value(client().build_request(&messages, &[], false)).unwrap();
        assert_eq!(request["messages"][0]["role"], "assistant");
        assert_eq!(request["messages"][0]["tool_calls"][0]["type"], "function");
        assert_eq!(
            request["messages"][0]["tool_calls"][0]["function"]["arguments"],
            r#"{"symbol":"BTC"}"#
        );
        assert_eq!(request["messages"][1]["role"], "tool");
        assert_eq!(request["messages"][1]["tool_call_id"], "call_1");
    }

    #[test]
    fn test_response_with_tool_calls() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "get_news_data", "arguments": "{\"symbol\":\"ETH\",\"limit\":5}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }))
        .unwrap();

        match response.into_decision().unwrap() {
            Decision::Invoke { text, requests } => {
                assert!(text.is_empty());
                assert_eq!(requests[0].capability, "get_news_data");
                assert_eq!(requests[0].arguments["limit"], 5);
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn test_response_final_and_empty_choices() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": "BTC looks range-bound."}, "finish_reason": "stop"}]
        }))
        .unwrap();
        assert_eq!(
            response.into_decision().unwrap(),
            Decision::Final("BTC looks range-bound.".into())
        );

        let empty: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(empty.into_decision(), Err(AnalystError::DecisionProcess(_))));
    }

    #[test]
    fn test_stream_state_accumulates_tool_call_fragments() {
        let mut state = StreamState::default();
        let frames = [
            r#"{"choices":[{"delta":{"content":"Checking "}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"get_header_data","arguments":"{\"sym"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"bol\":\"BTC\"}"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"function":{"name":"get_funding_rate","arguments":"BTC"}}]}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
        ];

        let deltas: Vec<String> = frames
            .iter()
            .filter_map(|f| state.apply(f).unwrap())
            .collect();
        assert_eq!(deltas, vec!["Checking ".to_string()]);

        match state.into_decision() {
            Decision::Invoke { text, requests } => {
                assert_eq!(text, "Checking ");
                assert_eq!(requests.len(), 2);
                assert_eq!(requests[0].call_id, "call_a");
                assert_eq!(requests[0].arguments, json!({"symbol": "BTC"}));
                assert_eq!(requests[1].call_id, "call_1");
                assert_eq!(requests[1].arguments, json!("BTC"));
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn test_stream_state_rejects_garbage() {
        let mut state = StreamState::default();
        assert!(state.apply("not json").is_err());
    }

    #[tokio::test]
    async fn test_missing_api_key_is_decision_error() {
        let result = client().decide(&[Message::user("hi")], &[], None).await;
        assert!(matches!(result, Err(AnalystError::DecisionProcess(_))));
    }
}
