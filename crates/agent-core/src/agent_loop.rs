use crate::config::{AgentConfig, AppConfig};
use crate::conversation::Conversation;
use crate::error::AgentError;
use crate::model::{ChatModel, OpenAiChatModel};
use crate::tool_registry::ToolRegistry;
use crate::types::{Message, Role, ToolOutput, ToolSchema};

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where the loop is within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Send the conversation to the model.
    AskModel,
    /// Run the tools requested by the last assistant message.
    RunTools,
    /// The model answered in plain text.
    Done,
}

/// The core agent loop. Alternates between the model and the tools it asks
/// for until the model answers in plain text.
pub struct AgentLoop {
    model: Arc<dyn ChatModel>,
    tool_registry: Arc<ToolRegistry>,
    config: AgentConfig,
    model_timeout: Duration,
}

impl AgentLoop {
    pub fn new(
        model: Arc<dyn ChatModel>,
        tool_registry: Arc<ToolRegistry>,
        config: AgentConfig,
    ) -> Self {
        Self {
            model,
            tool_registry,
            config,
            model_timeout: Duration::from_secs(60),
        }
    }

    /// Build a loop backed by the OpenAI-compatible provider in `config`.
    pub fn from_config(config: &AppConfig, tool_registry: Arc<ToolRegistry>) -> Self {
        let model = OpenAiChatModel::new(config.provider.clone());
        info!("Using model {}", model.model_name());
        Self::new(Arc::new(model), tool_registry, config.agent.clone())
            .with_model_timeout(Duration::from_secs(config.provider.timeout_secs))
    }

    /// Upper bound on a single model call.
    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    /// Run one turn. `conversation` must already end with the new user
    /// message; the assistant replies and tool results are appended to it.
    /// Returns the final assistant message.
    pub async fn run(&self, conversation: &mut Conversation) -> Result<Message, AgentError> {
        conversation.validate()?;
        let schemas = self.tool_registry.schemas();
        let mut model_calls = 0;
        let mut step = Step::AskModel;

        loop {
            step = match step {
                Step::AskModel => {
                    if model_calls >= self.config.max_iterations {
                        warn!(
                            "Turn limit of {} model calls reached without a final answer",
                            self.config.max_iterations
                        );
                        return Err(AgentError::TurnLimitExceeded(self.config.max_iterations));
                    }
                    model_calls += 1;
                    debug!("Agent loop iteration {}", model_calls);
                    self.ask_model(conversation, &schemas).await?
                }
                Step::RunTools => self.run_tools(conversation).await?,
                Step::Done => break,
            };
        }

        info!("Turn completed after {} model call(s)", model_calls);
        conversation
            .last()
            .cloned()
            .ok_or_else(|| AgentError::InvalidConversation("turn ended without a reply".into()))
    }

    async fn ask_model(
        &self,
        conversation: &mut Conversation,
        schemas: &[ToolSchema],
    ) -> Result<Step, AgentError> {
        let request = self.request_messages(conversation);

        let reply = tokio::time::timeout(self.model_timeout, self.model.complete(&request, schemas))
            .await
            .map_err(|_| {
                AgentError::Provider(format!(
                    "model request timed out after {}s",
                    self.model_timeout.as_secs_f32()
                ))
            })??;

        let next = if reply.has_tool_calls() {
            Step::RunTools
        } else {
            Step::Done
        };
        conversation.push(reply);
        Ok(next)
    }

    /// Execute every call of the last assistant message, in order.
    async fn run_tools(&self, conversation: &mut Conversation) -> Result<Step, AgentError> {
        let calls = conversation.pending_tool_calls().to_vec();
        let mut results = Vec::with_capacity(calls.len());

        for tc in &calls {
            debug!("Executing tool {} ({})", tc.name, tc.id);

            // Unknown names skip argument parsing; the registry answers them.
            let args = if self.tool_registry.contains(&tc.name) {
                parse_arguments(&tc.arguments)
            } else {
                Ok(Value::Null)
            };
            let output = match args {
                Ok(args) => self.tool_registry.execute(&tc.name, &tc.id, args).await?,
                Err(e) => ToolOutput {
                    tool_call_id: tc.id.clone(),
                    content: format!("Invalid JSON arguments: {}", e),
                    is_error: true,
                },
            };

            results.push(output.into_message());
        }

        conversation.extend(results);
        Ok(Step::AskModel)
    }

    /// The conversation as sent to the model, with the system prompt first
    /// when one is configured and none is present.
    fn request_messages(&self, conversation: &Conversation) -> Vec<Message> {
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        let has_system = conversation.messages().iter().any(|m| m.role == Role::System);
        if !has_system {
            if let Some(prompt) = &self.config.system_prompt {
                messages.push(Message::system(prompt.as_str()));
            }
        }
        messages.extend_from_slice(conversation.messages());
        messages
    }
}

/// Tool arguments as JSON. Models send an empty string for tools that take
/// no parameters.
fn parse_arguments(raw: &str) -> Result<Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedModel;
    use crate::tool_registry::Tool;
    use crate::types::ToolCall;
    use async_trait::async_trait;
    use serde_json::json;

    struct FixedClock;

    #[async_trait]
    impl Tool for FixedClock {
        fn name(&self) -> &str {
            "get_current_time"
        }

        fn description(&self) -> &str {
            "Returns the current date and time as a string."
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _args: Value) -> Result<String, AgentError> {
            Ok("2024-05-01 12:34:56.000000".into())
        }
    }

    struct BrokenTool;

    #[async_trait]
    impl Tool for BrokenTool {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _args: Value) -> Result<String, AgentError> {
            Err(AgentError::Other(anyhow::anyhow!("disk on fire")))
        }
    }

    fn agent(model: Arc<ScriptedModel>, max_iterations: usize) -> AgentLoop {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FixedClock));
        registry.register(Arc::new(BrokenTool));
        let config = AgentConfig {
            max_iterations,
            system_prompt: None,
        };
        AgentLoop::new(model, Arc::new(registry), config)
    }

    fn start(text: &str) -> Conversation {
        Conversation::from_messages(vec![Message::user(text)])
    }

    fn clock_call(id: &str) -> ToolCall {
        ToolCall::new(id, "get_current_time", "{}")
    }

    #[tokio::test]
    async fn test_plain_reply_takes_one_model_call() {
        let model = Arc::new(ScriptedModel::new().reply("hi"));
        let mut conv = start("hello");

        let reply = agent(model.clone(), 10).run(&mut conv).await.unwrap();

        assert_eq!(reply.content, "hi");
        assert_eq!(model.request_count(), 1);
        assert_eq!(conv.len(), 2);
        assert_eq!(conv.final_text(), Some("hi"));
    }

    #[tokio::test]
    async fn test_clock_call_round_trip() {
        let model = Arc::new(
            ScriptedModel::new()
                .call_tools(vec![clock_call("call_abc")])
                .reply("It is 12:34."),
        );
        let mut conv = start("what time is it?");

        let reply = agent(model.clone(), 10).run(&mut conv).await.unwrap();
        assert_eq!(reply.content, "It is 12:34.");

        // user, assistant(tool call), tool result, assistant
        let roles: Vec<Role> = conv.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);

        let tool_msg = &conv.messages()[2];
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_abc"));
        assert_eq!(tool_msg.content, "2024-05-01 12:34:56.000000");
        assert!(conv.validate().is_ok());

        let requests = model.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages.len(), 3);
        assert!(requests[0].tool_names.contains(&"get_current_time".to_string()));
    }

    #[tokio::test]
    async fn test_multiple_calls_run_in_request_order() {
        let model = Arc::new(
            ScriptedModel::new()
                .call_tools(vec![clock_call("first"), clock_call("second")])
                .reply("done"),
        );
        let mut conv = start("twice please");

        agent(model, 10).run(&mut conv).await.unwrap();

        let ids: Vec<&str> = conv
            .messages()
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_unknown_tool_gets_explicit_result() {
        let model = Arc::new(
            ScriptedModel::new()
                .call_tools(vec![ToolCall::new("call_x", "get_weather", "{}")])
                .reply("I can't check the weather."),
        );
        let mut conv = start("weather?");

        agent(model.clone(), 10).run(&mut conv).await.unwrap();

        let second = &model.requests()[1].messages;
        assert_eq!(second.len(), 3);
        assert!(second[1].has_tool_calls());
        assert_eq!(second[2].role, Role::Tool);
        assert_eq!(second[2].tool_call_id.as_deref(), Some("call_x"));
        assert_eq!(second[2].content, "Tool not found: get_weather");
    }

    #[tokio::test]
    async fn test_unknown_tool_with_bad_arguments_is_not_found() {
        let model = Arc::new(
            ScriptedModel::new()
                .call_tools(vec![ToolCall::new("call_y", "get_weather", "{oops")])
                .reply("no weather"),
        );
        let mut conv = start("weather?");

        agent(model, 10).run(&mut conv).await.unwrap();

        let result = &conv.messages()[2];
        assert_eq!(result.tool_call_id.as_deref(), Some("call_y"));
        assert_eq!(result.content, "Tool not found: get_weather");
    }

    #[tokio::test]
    async fn test_invalid_arguments_reported_to_model() {
        let model = Arc::new(
            ScriptedModel::new()
                .call_tools(vec![ToolCall::new("call_1", "get_current_time", "{not json")])
                .reply("sorry"),
        );
        let mut conv = start("time?");

        agent(model, 10).run(&mut conv).await.unwrap();

        assert!(conv.messages()[2].content.starts_with("Invalid JSON arguments"));
    }

    #[tokio::test]
    async fn test_empty_arguments_accepted() {
        let model = Arc::new(
            ScriptedModel::new()
                .call_tools(vec![ToolCall::new("call_1", "get_current_time", "")])
                .reply("ok"),
        );
        let mut conv = start("time?");

        agent(model, 10).run(&mut conv).await.unwrap();

        assert_eq!(conv.messages()[2].content, "2024-05-01 12:34:56.000000");
    }

    #[tokio::test]
    async fn test_turn_limit_exceeded() {
        let model = Arc::new(
            ScriptedModel::new()
                .call_tools(vec![clock_call("1")])
                .call_tools(vec![clock_call("2")])
                .call_tools(vec![clock_call("3")]),
        );
        let mut conv = start("loop forever");

        let err = agent(model.clone(), 2).run(&mut conv).await.unwrap_err();

        assert!(matches!(err, AgentError::TurnLimitExceeded(2)));
        assert_eq!(model.request_count(), 2);
    }

    #[tokio::test]
    async fn test_model_failure_propagates() {
        let model = Arc::new(ScriptedModel::new().fail("upstream 503"));
        let mut conv = start("hello");

        let err = agent(model, 10).run(&mut conv).await.unwrap_err();

        assert_eq!(err.to_string(), "Provider error: upstream 503");
    }

    #[tokio::test]
    async fn test_tool_failure_aborts_turn() {
        let model = Arc::new(
            ScriptedModel::new()
                .call_tools(vec![ToolCall::new("call_1", "broken", "{}"), clock_call("call_2")])
                .reply("unreachable"),
        );
        let mut conv = start("break it");

        let err = agent(model.clone(), 10).run(&mut conv).await.unwrap_err();

        assert!(matches!(err, AgentError::ToolExecution { .. }));
        assert_eq!(model.request_count(), 1);
    }

    #[tokio::test]
    async fn test_model_timeout() {
        let model = Arc::new(
            ScriptedModel::new()
                .reply("too late")
                .with_delay(Duration::from_millis(500)),
        );
        let mut conv = start("hello");

        let err = agent(model, 10)
            .with_model_timeout(Duration::from_millis(20))
            .run(&mut conv)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_inconsistent_history_rejected_before_model_call() {
        let model = Arc::new(ScriptedModel::new().reply("hi"));
        let mut conv = Conversation::from_messages(vec![
            Message::user("earlier"),
            Message::tool_result("call_orphan", "stale"),
            Message::user("hello"),
        ]);

        let err = agent(model.clone(), 10).run(&mut conv).await.unwrap_err();

        assert!(matches!(err, AgentError::InvalidConversation(_)));
        assert_eq!(model.request_count(), 0);
        assert_eq!(conv.len(), 3);
    }

    #[tokio::test]
    async fn test_system_prompt_prepended_to_requests_only() {
        let model = Arc::new(ScriptedModel::new().reply("hi"));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FixedClock));
        let config = AgentConfig {
            max_iterations: 10,
            system_prompt: Some("Be terse.".into()),
        };
        let agent = AgentLoop::new(model.clone(), Arc::new(registry), config);
        let mut conv = start("hello");

        agent.run(&mut conv).await.unwrap();

        let sent = &model.requests()[0].messages;
        assert_eq!(sent[0].role, Role::System);
        assert_eq!(sent[0].content, "Be terse.");
        assert_eq!(conv.messages()[0].role, Role::User);
    }
}
