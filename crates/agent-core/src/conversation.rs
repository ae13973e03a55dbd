use crate::error::{AgentError, Result};
use crate::types::{Message, Role, ToolCall};
use std::collections::HashSet;

/// Ordered message history for one thread.
///
/// Messages are only ever appended. Tool results must answer a call made by
/// the assistant message that opened the current tool batch.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Tool calls requested by the last message, if it is an assistant
    /// message that asked for tools.
    pub fn pending_tool_calls(&self) -> &[ToolCall] {
        self.last().map(Message::requested_tool_calls).unwrap_or(&[])
    }

    /// Text of the last assistant message.
    pub fn final_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
    }

    /// The most recent `max` messages or fewer, starting on a user message so
    /// the slice never opens with a tool result or half of a tool batch.
    ///
    /// When the window holds no user message the latest turn alone is longer
    /// than `max`; it is returned whole from its user message. A history with
    /// no user message at all is returned untrimmed.
    pub fn recent(&self, max: usize) -> &[Message] {
        if self.messages.len() <= max {
            return &self.messages;
        }
        let start = self.messages.len() - max;
        match self.messages[start..].iter().position(|m| m.role == Role::User) {
            Some(offset) => &self.messages[start + offset..],
            None => {
                let turn_start = self
                    .messages
                    .iter()
                    .rposition(|m| m.role == Role::User)
                    .unwrap_or(0);
                &self.messages[turn_start..]
            }
        }
    }

    /// Check that every tool result answers a call from the assistant message
    /// that opened its batch, and that no call is answered twice.
    pub fn validate(&self) -> Result<()> {
        let mut open: Option<HashSet<&str>> = None;

        for (index, msg) in self.messages.iter().enumerate() {
            match msg.role {
                Role::Tool => {
                    let call_id = msg.tool_call_id.as_deref().ok_or_else(|| {
                        AgentError::InvalidConversation(format!(
                            "tool result at position {} has no call id",
                            index
                        ))
                    })?;
                    let answered = open
                        .as_mut()
                        .map(|calls| calls.remove(call_id))
                        .unwrap_or(false);
                    if !answered {
                        return Err(AgentError::InvalidConversation(format!(
                            "tool result at position {} answers unknown call '{}'",
                            index, call_id
                        )));
                    }
                }
                Role::Assistant if msg.has_tool_calls() => {
                    open = Some(
                        msg.requested_tool_calls()
                            .iter()
                            .map(|c| c.id.as_str())
                            .collect(),
                    );
                }
                _ => open = None,
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock_call(id: &str) -> ToolCall {
        ToolCall::new(id, "get_current_time", "{}")
    }

    fn tool_turn() -> Conversation {
        Conversation::from_messages(vec![
            Message::user("what time is it?"),
            Message::assistant_with_tool_calls("", vec![clock_call("call_1")]),
            Message::tool_result("call_1", "2024-01-01 09:00:00.000000"),
            Message::assistant("It is 9am."),
        ])
    }

    #[test]
    fn test_valid_tool_turn() {
        let conv = tool_turn();
        assert!(conv.validate().is_ok());
        assert_eq!(conv.final_text(), Some("It is 9am."));
        assert!(conv.pending_tool_calls().is_empty());
    }

    #[test]
    fn test_pending_tool_calls() {
        let mut conv = Conversation::new();
        conv.push(Message::user("time?"));
        conv.push(Message::assistant_with_tool_calls("", vec![clock_call("a"), clock_call("b")]));
        let ids: Vec<&str> = conv.pending_tool_calls().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_tool_result_without_request_is_invalid() {
        let conv = Conversation::from_messages(vec![
            Message::user("hi"),
            Message::tool_result("call_1", "orphan"),
        ]);
        let err = conv.validate().unwrap_err();
        assert!(matches!(err, AgentError::InvalidConversation(_)));
    }

    #[test]
    fn test_tool_result_for_earlier_batch_is_invalid() {
        let conv = Conversation::from_messages(vec![
            Message::user("hi"),
            Message::assistant_with_tool_calls("", vec![clock_call("old")]),
            Message::tool_result("old", "x"),
            Message::assistant_with_tool_calls("", vec![clock_call("new")]),
            Message::tool_result("old", "x"),
        ]);
        assert!(conv.validate().is_err());
    }

    #[test]
    fn test_duplicate_tool_result_is_invalid() {
        let conv = Conversation::from_messages(vec![
            Message::user("hi"),
            Message::assistant_with_tool_calls("", vec![clock_call("call_1")]),
            Message::tool_result("call_1", "x"),
            Message::tool_result("call_1", "x"),
        ]);
        assert!(conv.validate().is_err());
    }

    #[test]
    fn test_recent_starts_on_user_message() {
        let mut conv = tool_turn();
        conv.extend(tool_turn().into_messages());

        // Cutting 5 from the end would start on the tool batch; the slice
        // moves forward to the second user message instead.
        let recent = conv.recent(5);
        assert_eq!(recent.len(), 4);
        assert_eq!(recent[0].role, Role::User);
        assert!(Conversation::from_messages(recent.to_vec()).validate().is_ok());

        assert_eq!(conv.recent(100).len(), 8);
    }

    #[test]
    fn test_recent_keeps_latest_turn_longer_than_max() {
        let mut conv = Conversation::from_messages(vec![
            Message::user("earlier"),
            Message::assistant("ok"),
        ]);
        conv.extend(tool_turn().into_messages());

        let recent = conv.recent(2);
        assert_eq!(recent.len(), 4);
        assert_eq!(recent[0].content, "what time is it?");
        assert!(Conversation::from_messages(recent.to_vec()).validate().is_ok());
    }

    #[test]
    fn test_recent_without_any_user_message_is_untrimmed() {
        let conv = Conversation::from_messages(vec![
            Message::assistant("one"),
            Message::assistant("two"),
            Message::assistant("three"),
        ]);
        assert_eq!(conv.recent(1).len(), 3);
    }
}
