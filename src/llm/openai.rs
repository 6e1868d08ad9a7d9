//! OpenAI-compatible chat completions client.
//!
//! Talks to `POST {base_url}/chat/completions` directly over reqwest, with
//! the request and response bodies as typed serde structs. Works against
//! api.openai.com and any server speaking the same wire format.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
    ToolCall, ToolCompletionRequest, ToolCompletionResponse, ToolDefinition,
};

const PROVIDER: &str = "openai";

/// OpenAI chat completions provider.
pub struct OpenAiProvider {
    http: Client,
    base_url: String,
    api_key: SecretString,
    model: String,
}

impl OpenAiProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        })
    }

    async fn post(&self, body: &ChatRequest<'_>) -> Result<ChatResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, retry_after, text));
        }

        response.json().await.map_err(|e| LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: format!("Unexpected response body: {e}"),
        })
    }
}

fn status_error(status: StatusCode, retry_after: Option<Duration>, body: String) -> LlmError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::AuthFailed {
            provider: PROVIDER.to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited {
            provider: PROVIDER.to_string(),
            retry_after,
        },
        _ => LlmError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason: format!("status {status}: {body}"),
        },
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        model_pricing(&self.model)
    }

    #[instrument(skip(self, request), fields(model = %self.model), level = "debug")]
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages: messages_to_openai(&request.messages),
            tools: Vec::new(),
            tool_choice: None,
            parallel_tool_calls: None,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: request.json_mode.then(|| json!({"type": "json_object"})),
        };

        let parsed = parse_chat_response(self.post(&body).await?)?;
        debug!(
            input_tokens = parsed.input_tokens,
            output_tokens = parsed.output_tokens,
            "Completion received"
        );
        Ok(CompletionResponse {
            content: parsed.content.unwrap_or_default(),
            input_tokens: parsed.input_tokens,
            output_tokens: parsed.output_tokens,
            finish_reason: parsed.finish_reason,
            response_id: parsed.response_id,
        })
    }

    #[instrument(skip(self, request), fields(model = %self.model, tools = request.tools.len()), level = "debug")]
    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let has_tools = !request.tools.is_empty();
        let body = ChatRequest {
            model: &self.model,
            messages: messages_to_openai(&request.messages),
            tools: tools_to_openai(&request.tools),
            tool_choice: has_tools.then_some("auto"),
            parallel_tool_calls: has_tools.then_some(true),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: None,
        };

        let parsed = parse_chat_response(self.post(&body).await?)?;
        debug!(
            tool_calls = parsed.tool_calls.len(),
            input_tokens = parsed.input_tokens,
            output_tokens = parsed.output_tokens,
            "Tool completion received"
        );
        Ok(ToolCompletionResponse {
            content: parsed.content,
            tool_calls: parsed.tool_calls,
            input_tokens: parsed.input_tokens,
            output_tokens: parsed.output_tokens,
            finish_reason: parsed.finish_reason,
            response_id: parsed.response_id,
        })
    }
}

/// Price per token for known models; unknown models are treated as free.
fn model_pricing(model: &str) -> (Decimal, Decimal) {
    // USD per 1M tokens.
    let (input, output) = if model.starts_with("gpt-4o-mini") {
        (dec!(0.15), dec!(0.60))
    } else if model.starts_with("gpt-4o") {
        (dec!(2.50), dec!(10.00))
    } else if model.starts_with("gpt-4.1-mini") {
        (dec!(0.40), dec!(1.60))
    } else if model.starts_with("gpt-5-mini") {
        (dec!(0.25), dec!(2.00))
    } else {
        (Decimal::ZERO, Decimal::ZERO)
    };
    let per = dec!(1_000_000);
    (input / per, output / per)
}

// ── Wire format ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionDef<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    #[serde(default)]
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    /// Usually a JSON-encoded string; some servers send an object.
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

fn messages_to_openai(messages: &[ChatMessage]) -> Vec<WireMessage<'_>> {
    messages
        .iter()
        .map(|m| WireMessage {
            role: match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            },
            content: &m.content,
            tool_call_id: m.tool_call_id.as_deref(),
        })
        .collect()
}

fn tools_to_openai(tools: &[ToolDefinition]) -> Vec<WireTool<'_>> {
    tools
        .iter()
        .map(|t| WireTool {
            kind: "function",
            function: WireFunctionDef {
                name: &t.name,
                description: &t.description,
                parameters: &t.parameters,
            },
        })
        .collect()
}

/// Fields extracted from a chat completions response body.
#[derive(Debug)]
struct ParsedChat {
    content: Option<String>,
    tool_calls: Vec<ToolCall>,
    input_tokens: u32,
    output_tokens: u32,
    finish_reason: FinishReason,
    response_id: Option<String>,
}

fn invalid(reason: impl Into<String>) -> LlmError {
    LlmError::InvalidResponse {
        provider: PROVIDER.to_string(),
        reason: reason.into(),
    }
}

fn parse_chat_response(raw: ChatResponse) -> Result<ParsedChat, LlmError> {
    let choice = raw
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| invalid("response has no choices"))?;

    let mut tool_calls = Vec::new();
    for call in choice.message.tool_calls.unwrap_or_default() {
        let name = call.function.name;
        let arguments = match call.function.arguments {
            Value::String(s) if s.trim().is_empty() => json!({}),
            Value::String(s) => serde_json::from_str(&s).map_err(|e| {
                invalid(format!("arguments for tool '{name}' are not valid JSON: {e}"))
            })?,
            Value::Null => json!({}),
            other => other,
        };
        tool_calls.push(ToolCall {
            id: call.id,
            name,
            arguments,
        });
    }

    let usage = raw.usage.unwrap_or_default();
    Ok(ParsedChat {
        content: choice.message.content.filter(|s| !s.is_empty()),
        tool_calls,
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        finish_reason: FinishReason::from_openai(choice.finish_reason.as_deref()),
        response_id: raw.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: Value) -> Result<ParsedChat, LlmError> {
        let body: ChatResponse = serde_json::from_value(raw).map_err(|e| invalid(e.to_string()))?;
        parse_chat_response(body)
    }

    #[test]
    fn parses_text_completion() {
        let raw = json!({
            "id": "chatcmpl-1",
            "choices": [{
                "message": {"role": "assistant", "content": "Hello there"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        });
        let parsed = parse(raw).unwrap();
        assert_eq!(parsed.content.as_deref(), Some("Hello there"));
        assert!(parsed.tool_calls.is_empty());
        assert_eq!(parsed.input_tokens, 12);
        assert_eq!(parsed.output_tokens, 3);
        assert_eq!(parsed.finish_reason, FinishReason::Stop);
        assert_eq!(parsed.response_id.as_deref(), Some("chatcmpl-1"));
    }

    #[test]
    fn parses_tool_calls_in_order() {
        let raw = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [
                        {"id": "c1", "type": "function", "function": {"name": "create_task", "arguments": "{\"priority\": 4}"}},
                        {"id": "c2", "type": "function", "function": {"name": "draft_reply", "arguments": ""}}
                    ]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let parsed = parse(raw).unwrap();
        assert!(parsed.content.is_none());
        assert_eq!(parsed.tool_calls.len(), 2);
        assert_eq!(parsed.tool_calls[0].name, "create_task");
        assert_eq!(parsed.tool_calls[0].arguments["priority"], 4);
        assert_eq!(parsed.tool_calls[1].name, "draft_reply");
        assert_eq!(parsed.tool_calls[1].arguments, json!({}));
        assert_eq!(parsed.finish_reason, FinishReason::ToolUse);
    }

    #[test]
    fn malformed_arguments_are_invalid_response() {
        let raw = json!({
            "choices": [{
                "message": {"tool_calls": [
                    {"id": "c1", "function": {"name": "notify", "arguments": "{not json"}}
                ]}
            }]
        });
        let err = parse(raw).unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse { .. }));
    }

    #[test]
    fn empty_choices_are_invalid_response() {
        let err = parse(json!({"choices": []})).unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse { .. }));
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, None, String::new()),
            LlmError::AuthFailed { .. }
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(3)), String::new()),
            LlmError::RateLimited { retry_after: Some(d), .. } if d == Duration::from_secs(3)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, None, "upstream".into()),
            LlmError::RequestFailed { .. }
        ));
    }

    #[test]
    fn tools_serialize_as_functions() {
        let tools = vec![ToolDefinition {
            name: "draft_reply".into(),
            description: "Draft a reply".into(),
            parameters: json!({"type": "object", "properties": {}}),
        }];
        let out = serde_json::to_value(tools_to_openai(&tools)).unwrap();
        assert_eq!(out[0]["type"], "function");
        assert_eq!(out[0]["function"]["name"], "draft_reply");
        assert_eq!(out[0]["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn plain_request_omits_tool_fields() {
        let messages = vec![ChatMessage::system("Be brief"), ChatMessage::user("Hi")];
        let body = ChatRequest {
            model: "gpt-4o-mini",
            messages: messages_to_openai(&messages),
            tools: Vec::new(),
            tool_choice: None,
            parallel_tool_calls: None,
            max_tokens: Some(200),
            temperature: None,
            response_format: Some(json!({"type": "json_object"})),
        };
        let out = serde_json::to_value(&body).unwrap();
        assert_eq!(out["messages"][0]["role"], "system");
        assert_eq!(out["messages"][1]["content"], "Hi");
        assert!(out["messages"][1].get("tool_call_id").is_none());
        assert!(out.get("tools").is_none());
        assert!(out.get("temperature").is_none());
        assert_eq!(out["max_tokens"], 200);
        assert_eq!(out["response_format"]["type"], "json_object");
    }

    #[test]
    fn null_tool_calls_and_missing_usage_are_tolerated() {
        let parsed = parse(json!({
            "choices": [{"message": {"content": "ok", "tool_calls": null}}]
        }))
        .unwrap();
        assert!(parsed.tool_calls.is_empty());
        assert_eq!(parsed.input_tokens, 0);
        assert!(parsed.response_id.is_none());
    }

    #[test]
    fn tool_call_without_name_is_invalid_response() {
        let err = parse(json!({
            "choices": [{"message": {"tool_calls": [{"id": "c1", "function": {"arguments": "{}"}}]}}]
        }))
        .unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse { .. }));
    }

    #[test]
    fn pricing_known_and_unknown_models() {
        let (input, output) = model_pricing("gpt-4o-mini");
        assert!(input > Decimal::ZERO && output > input);
        assert_eq!(model_pricing("local-llama"), (Decimal::ZERO, Decimal::ZERO));
    }
}
