//! genai-backed model client
//!
//! Converts conversation history to genai's chat request format, runs the
//! completion as a stream and accumulates text and tool calls into a
//! [`ModelReply`].

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use genai::adapter::AdapterKind;
use genai::chat::{ChatMessage, ChatOptions, ChatRequest, ChatStreamEvent, Tool, ToolCall, ToolResponse};
use genai::resolver::{AuthData, Endpoint, ServiceTargetResolver};
use genai::webc;
use genai::{Client, ModelIden, ServiceTarget, WebConfig};
use serde_json::Value;
use tracing::{debug, error};

use super::logging::{log_model_interaction, LogConfig};
use super::{ModelClient, ModelReply};
use crate::config::ModelConfig;
use crate::error::{ConfigError, ModelCallError};
use crate::message::{Message, MessageBody, ToolInvocationRequest};
use crate::registry::ToolSpec;

/// Map a configured provider name to a genai adapter
pub fn adapter_kind(provider: &str) -> Option<AdapterKind> {
    match provider.to_ascii_lowercase().as_str() {
        "openai" | "openrouter" => Some(AdapterKind::OpenAI),
        "anthropic" => Some(AdapterKind::Anthropic),
        "gemini" | "google" => Some(AdapterKind::Gemini),
        "groq" => Some(AdapterKind::Groq),
        "deepseek" => Some(AdapterKind::DeepSeek),
        "xai" | "grok" => Some(AdapterKind::Xai),
        "cohere" => Some(AdapterKind::Cohere),
        "ollama" => Some(AdapterKind::Ollama),
        _ => None,
    }
}

pub struct GenAiModelClient {
    client: Client,
    model: String,
    system_prompt: Option<String>,
    options: ChatOptions,
}

impl GenAiModelClient {
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Build a client from configuration. The API key must be resolvable.
    pub fn from_config(config: &ModelConfig) -> Result<Self, ConfigError> {
        let api_key = config
            .resolve_api_key()
            .ok_or_else(|| ConfigError::MissingCredential {
                env: config.api_key_env.clone(),
            })?;
        let kind = adapter_kind(&config.provider).ok_or_else(|| {
            ConfigError::Invalid(format!("unknown model provider '{}'", config.provider))
        })?;

        let web_config = WebConfig::default()
            .with_timeout(config.timeout())
            .with_connect_timeout(Self::CONNECT_TIMEOUT);

        // Every request goes to the configured endpoint with the configured key
        let base_url = config.base_url.clone().map(|url| {
            if url.ends_with('/') {
                url
            } else {
                format!("{}/", url)
            }
        });
        let target_resolver = ServiceTargetResolver::from_resolver_fn(
            move |service_target: ServiceTarget| -> Result<ServiceTarget, genai::resolver::Error> {
                let ServiceTarget { endpoint, model, .. } = service_target;
                let endpoint = match &base_url {
                    Some(url) => Endpoint::from_owned(url.clone()),
                    None => endpoint,
                };
                Ok(ServiceTarget {
                    endpoint,
                    auth: AuthData::from_single(api_key.clone()),
                    model: ModelIden::new(kind, model.model_name),
                })
            },
        );

        let client = Client::builder()
            .with_web_config(web_config)
            .with_service_target_resolver(target_resolver)
            .build();

        let mut options = ChatOptions::default().with_temperature(config.temperature);
        if let Some(max_tokens) = config.max_tokens {
            options = options.with_max_tokens(max_tokens);
        }

        let system_prompt = Some(config.system_prompt.clone()).filter(|p| !p.trim().is_empty());

        Ok(Self {
            client,
            model: config.model.clone(),
            system_prompt,
            options,
        })
    }

    fn build_request(&self, history: &[Message], tools: &[ToolSpec]) -> ChatRequest {
        let mut chat_req = ChatRequest::default();
        if let Some(system) = &self.system_prompt {
            chat_req = chat_req.with_system(system.as_str());
        }

        for msg in history {
            chat_req = match &msg.body {
                MessageBody::User { content } => chat_req.append_message(ChatMessage::user(content)),
                MessageBody::Assistant { content, tool_calls } if tool_calls.is_empty() => {
                    chat_req.append_message(ChatMessage::assistant(content))
                }
                MessageBody::Assistant { tool_calls, .. } => {
                    // Tool calls must travel as a single assistant message
                    let calls: Vec<ToolCall> = tool_calls
                        .iter()
                        .map(|call| ToolCall {
                            call_id: call.call_id.clone(),
                            fn_name: call.name.clone(),
                            fn_arguments: Value::Object(call.arguments.clone()),
                            thought_signatures: None,
                        })
                        .collect();
                    chat_req.append_message(calls)
                }
                MessageBody::ToolResult { call_id, outcome, .. } => chat_req.append_message(
                    ToolResponse::new(call_id.clone(), outcome.content_for_model()),
                ),
            };
        }

        if !tools.is_empty() {
            let genai_tools: Vec<Tool> = tools
                .iter()
                .map(|t| {
                    Tool::new(&t.name)
                        .with_description(&t.description)
                        .with_schema(t.input_schema.clone())
                })
                .collect();
            chat_req = chat_req.with_tools(genai_tools);
        }

        chat_req
    }

    fn log(&self, history: &[Message], tools: &[ToolSpec], reply: Option<&ModelReply>, error: Option<&str>) {
        log_model_interaction(LogConfig {
            model: &self.model,
            system_prompt: self.system_prompt.as_deref(),
            messages: history,
            tools,
            reply,
            error,
        });
    }
}

#[async_trait]
impl ModelClient for GenAiModelClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        history: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelReply, ModelCallError> {
        let chat_req = self.build_request(history, tools);
        debug!(model = %self.model, messages = history.len(), tools = tools.len(), "Calling model");

        let stream_response = match self
            .client
            .exec_chat_stream(&self.model, chat_req, Some(&self.options))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.log(history, tools, None, Some(&format!("{:?}", e)));
                error!(model = %self.model, "Model request failed: {}", e);
                return Err(FailureCause::of(&e).into_error());
            }
        };

        let mut accumulator = ReplyAccumulator::default();
        let mut stream = stream_response.stream;
        while let Some(event) = stream.next().await {
            match event {
                Ok(ChatStreamEvent::Chunk(chunk)) => accumulator.push_text(&chunk.content),
                Ok(ChatStreamEvent::ToolCallChunk(chunk)) => accumulator.push_tool_call(chunk.tool_call),
                Ok(ChatStreamEvent::End(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    self.log(history, tools, None, Some(&format!("{:?}", e)));
                    error!(model = %self.model, "Model stream error: {}", e);
                    // Once the stream has started, an unclassified error is transport loss
                    let cause = match FailureCause::of(&e) {
                        FailureCause::Other => FailureCause::Transport,
                        cause => cause,
                    };
                    return Err(cause.into_error());
                }
            }
        }

        let reply = accumulator.finish()?;
        self.log(history, tools, Some(&reply), None);
        Ok(reply)
    }
}

/// Collects streamed text and tool calls
#[derive(Default)]
struct ReplyAccumulator {
    content: String,
    calls: Vec<ToolCall>,
}

impl ReplyAccumulator {
    fn push_text(&mut self, text: &str) {
        self.content.push_str(text);
    }

    /// A chunk for a call id already seen carries that call's latest state
    fn push_tool_call(&mut self, call: ToolCall) {
        match self.calls.iter_mut().find(|c| c.call_id == call.call_id) {
            Some(existing) => *existing = call,
            None => self.calls.push(call),
        }
    }

    fn finish(self) -> Result<ModelReply, ModelCallError> {
        if self.calls.is_empty() {
            return Ok(ModelReply::Text(self.content));
        }

        let calls = self
            .calls
            .into_iter()
            .map(|call| {
                let arguments = parse_arguments(call.fn_arguments).map_err(|e| {
                    ModelCallError::permanent(format!(
                        "malformed arguments for tool call '{}': {}",
                        call.fn_name, e
                    ))
                })?;
                Ok(ToolInvocationRequest::new(call.call_id, call.fn_name, arguments))
            })
            .collect::<Result<Vec<_>, ModelCallError>>()?;

        Ok(ModelReply::ToolCalls {
            content: self.content,
            calls,
        })
    }
}

/// Arguments may arrive as an object or as a JSON-encoded string
fn parse_arguments(arguments: Value) -> Result<Value, serde_json::Error> {
    match arguments {
        Value::String(raw) if raw.trim().is_empty() => Ok(Value::Object(Default::default())),
        Value::String(raw) => serde_json::from_str(&raw),
        Value::Null => Ok(Value::Object(Default::default())),
        other => Ok(other),
    }
}

/// What a provider failure says about retrying it. Only the error
/// structure is consulted; response bodies and headers never are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureCause {
    /// The provider answered with a non-success HTTP status
    Status(u16),
    /// No usable response: connect failure, reset or timeout
    Transport,
    Other,
}

impl FailureCause {
    fn of(err: &genai::Error) -> Self {
        let webc_error = match err {
            genai::Error::WebModelCall { webc_error, .. }
            | genai::Error::WebAdapterCall { webc_error, .. } => webc_error,
            _ => return FailureCause::Other,
        };

        match webc_error {
            webc::Error::ResponseFailedStatus { status, .. } => FailureCause::Status(status.as_u16()),
            webc::Error::Reqwest(e) => match e.status() {
                Some(status) => FailureCause::Status(status.as_u16()),
                None => FailureCause::Transport,
            },
            _ => FailureCause::Other,
        }
    }

    /// Client-facing error; provider detail stays in the logs
    fn into_error(self) -> ModelCallError {
        match self {
            FailureCause::Status(code) => {
                ModelCallError::from_status(code, format!("model provider returned HTTP {}", code))
            }
            FailureCause::Transport => ModelCallError::transient("could not reach the model provider"),
            FailureCause::Other => ModelCallError::permanent("model provider request failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolInvocationResult;
    use serde_json::json;

    fn test_config() -> ModelConfig {
        ModelConfig {
            api_key: Some("sk-test".to_string()),
            ..ModelConfig::default()
        }
    }

    fn call(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall {
            call_id: id.to_string(),
            fn_name: name.to_string(),
            fn_arguments: args,
            thought_signatures: None,
        }
    }

    #[test]
    fn test_adapter_kind_mapping() {
        assert_eq!(adapter_kind("openai"), Some(AdapterKind::OpenAI));
        assert_eq!(adapter_kind("OpenRouter"), Some(AdapterKind::OpenAI));
        assert_eq!(adapter_kind("anthropic"), Some(AdapterKind::Anthropic));
        assert_eq!(adapter_kind("nope"), None);
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = ModelConfig {
            api_key: None,
            api_key_env: "COMPASS_TEST_NO_SUCH_KEY".to_string(),
            ..ModelConfig::default()
        };
        assert!(matches!(
            GenAiModelClient::from_config(&config),
            Err(ConfigError::MissingCredential { .. })
        ));
    }

    #[test]
    fn test_from_config_rejects_unknown_provider() {
        let config = ModelConfig {
            provider: "mystery".to_string(),
            ..test_config()
        };
        assert!(matches!(
            GenAiModelClient::from_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_build_request_orders_messages() {
        let client = GenAiModelClient::from_config(&test_config()).unwrap();
        let history = vec![
            Message::user("Where is the Hermitage?"),
            Message::assistant_with_tool_calls(
                "",
                vec![ToolInvocationRequest::new(
                    "call_1",
                    "get_coordinates",
                    json!({"address": "Hermitage"}),
                )],
            ),
            Message::tool_result("call_1", "get_coordinates", ToolInvocationResult::success("[30.31, 59.94]")),
        ];
        let request = client.build_request(&history, &[]);

        assert!(request.system.is_some());
        assert_eq!(request.messages.len(), 3);
        assert!(request.tools.is_none());
    }

    #[test]
    fn test_accumulator_text_only() {
        let mut acc = ReplyAccumulator::default();
        acc.push_text("Hello, ");
        acc.push_text("world");
        assert_eq!(acc.finish().unwrap(), ModelReply::Text("Hello, world".into()));
    }

    #[test]
    fn test_accumulator_merges_chunks_by_call_id() {
        let mut acc = ReplyAccumulator::default();
        acc.push_tool_call(call("a", "get_coordinates", json!("{\"addr")));
        acc.push_tool_call(call("a", "get_coordinates", json!("{\"address\": \"X\"}")));
        acc.push_tool_call(call("b", "get_route_by_address", json!({"start_address": "X", "end_address": "Y"})));

        match acc.finish().unwrap() {
            ModelReply::ToolCalls { calls, .. } => {
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].call_id, "a");
                assert_eq!(calls[0].arguments["address"], "X");
                assert_eq!(calls[1].name, "get_route_by_address");
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn test_accumulator_rejects_malformed_arguments() {
        let mut acc = ReplyAccumulator::default();
        acc.push_tool_call(call("a", "get_coordinates", json!("{not json")));
        let err = acc.finish().unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_empty_arguments_become_object() {
        assert_eq!(parse_arguments(json!("")).unwrap(), json!({}));
        assert_eq!(parse_arguments(Value::Null).unwrap(), json!({}));
    }

    #[test]
    fn test_status_classification() {
        assert!(FailureCause::Status(429).into_error().is_transient());
        assert!(FailureCause::Status(503).into_error().is_transient());
        assert!(FailureCause::Status(408).into_error().is_transient());
        assert!(FailureCause::Transport.into_error().is_transient());
        assert!(!FailureCause::Other.into_error().is_transient());
    }

    #[test]
    fn test_client_errors_are_permanent() {
        // A context-length 400 and an auth 401 stay permanent whatever the body or headers say
        let context_length = FailureCause::Status(400).into_error();
        assert!(!context_length.is_transient());
        assert_eq!(context_length.message, "model provider returned HTTP 400");

        let unauthorized = FailureCause::Status(401).into_error();
        assert!(!unauthorized.is_transient());
        assert_eq!(unauthorized.message, "model provider returned HTTP 401");
    }
}
