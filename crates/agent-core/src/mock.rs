use crate::error::AgentError;
use crate::model::ChatModel;
use crate::types::{Message, ToolCall, ToolSchema};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// One request the model received.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
}

enum Scripted {
    Reply(Message),
    Fail(String),
}

/// A chat model that replays pre-configured replies and records every
/// request it receives. Used as the model double in tests.
#[derive(Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<RecordedRequest>>,
    delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a plain text answer.
    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(Scripted::Reply(Message::assistant(text)))
    }

    /// Queue an answer that asks for the given tool calls.
    pub fn call_tools(self, calls: Vec<ToolCall>) -> Self {
        self.push(Scripted::Reply(Message::assistant_with_tool_calls("", calls)))
    }

    /// Queue a failure.
    pub fn fail(self, message: impl Into<String>) -> Self {
        self.push(Scripted::Fail(message.into()))
    }

    /// Sleep this long before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn push(self, item: Scripted) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(item);
        }
        self
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<Message, AgentError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                messages: messages.to_vec(),
                tool_names: tools.iter().map(|t| t.name.clone()).collect(),
            });
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .script
            .lock()
            .map_err(|e| AgentError::Provider(format!("Script lock poisoned: {}", e)))?
            .pop_front();

        match next {
            Some(Scripted::Reply(message)) => Ok(message),
            Some(Scripted::Fail(message)) => Err(AgentError::Provider(message)),
            None => Err(AgentError::Provider("Scripted model has no more replies".into())),
        }
    }
}
