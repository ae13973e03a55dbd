use crate::config::ProviderConfig;
use crate::error::AgentError;
use crate::types::{Message, Role, ToolCall, ToolSchema};

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolType,
    CreateChatCompletionRequestArgs, FunctionCall, FunctionObjectArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use tracing::debug;

/// A language model that can answer a conversation, optionally by asking
/// for tool calls.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Produce the next assistant message for `messages`, with `tools`
    /// advertised as callable.
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<Message, AgentError>;
}

/// Chat model backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiChatModel {
    client: Client<OpenAIConfig>,
    config: ProviderConfig,
}

impl OpenAiChatModel {
    pub fn new(config: ProviderConfig) -> Self {
        let mut openai_config = OpenAIConfig::new().with_api_base(&config.api_base);
        if let Some(key) = config.resolved_api_key() {
            openai_config = openai_config.with_api_key(key);
        }

        Self {
            client: Client::with_config(openai_config),
            config,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<Message, AgentError> {
        let mut request_builder = CreateChatCompletionRequestArgs::default();
        request_builder
            .model(&self.config.model)
            .messages(to_request_messages(messages)?)
            .temperature(self.config.temperature)
            .max_completion_tokens(self.config.max_tokens);

        if !tools.is_empty() {
            request_builder.tools(to_request_tools(tools)?);
        }

        let request = request_builder
            .build()
            .map_err(|e| AgentError::Provider(e.to_string()))?;

        debug!(
            "Requesting completion from {} ({} messages)",
            self.config.model,
            messages.len()
        );

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Provider("No choices in response".into()))?;

        let content = choice.message.content.unwrap_or_default();
        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        if tool_calls.is_empty() {
            Ok(Message::assistant(content))
        } else {
            Ok(Message::assistant_with_tool_calls(content, tool_calls))
        }
    }
}

/// Convert tool schemas to async-openai function tools.
fn to_request_tools(tools: &[ToolSchema]) -> Result<Vec<ChatCompletionTool>, AgentError> {
    tools
        .iter()
        .map(|s| {
            let func = FunctionObjectArgs::default()
                .name(&s.name)
                .description(&s.description)
                .parameters(s.parameters.clone())
                .build()
                .map_err(|e| AgentError::Schema(format!("function '{}': {}", s.name, e)))?;
            ChatCompletionToolArgs::default()
                .r#type(ChatCompletionToolType::Function)
                .function(func)
                .build()
                .map_err(|e| AgentError::Schema(format!("tool '{}': {}", s.name, e)))
        })
        .collect()
}

/// Convert our Message types to async-openai request messages.
fn to_request_messages(
    messages: &[Message],
) -> Result<Vec<ChatCompletionRequestMessage>, AgentError> {
    let mut result = Vec::with_capacity(messages.len());

    for msg in messages {
        let converted = match msg.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(msg.content.as_str())
                .build()
                .map(ChatCompletionRequestMessage::System),
            Role::User => ChatCompletionRequestUserMessageArgs::default()
                .content(msg.content.as_str())
                .build()
                .map(ChatCompletionRequestMessage::User),
            Role::Assistant => {
                let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
                if !msg.content.is_empty() || !msg.has_tool_calls() {
                    builder.content(msg.content.as_str());
                }
                if msg.has_tool_calls() {
                    let calls: Vec<ChatCompletionMessageToolCall> = msg
                        .requested_tool_calls()
                        .iter()
                        .map(|tc| ChatCompletionMessageToolCall {
                            id: tc.id.clone(),
                            r#type: ChatCompletionToolType::Function,
                            function: FunctionCall {
                                name: tc.name.clone(),
                                arguments: tc.arguments.clone(),
                            },
                        })
                        .collect();
                    builder.tool_calls(calls);
                }
                builder.build().map(ChatCompletionRequestMessage::Assistant)
            }
            Role::Tool => ChatCompletionRequestToolMessageArgs::default()
                .tool_call_id(msg.tool_call_id.as_deref().unwrap_or_default())
                .content(msg.content.as_str())
                .build()
                .map(ChatCompletionRequestMessage::Tool),
        };
        result.push(converted.map_err(|e| AgentError::Provider(e.to_string()))?);
    }

    Ok(result)
}
