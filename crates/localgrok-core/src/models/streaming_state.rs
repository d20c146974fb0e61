use super::chat::{Message, MessageId};

/// Where an in-flight turn currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    AwaitingFirstToken,
    Thinking,
    Answering { resumed: bool },
    ExecutingTool,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Complete,
    Cancelled,
    Failed(String),
}

/// Token-granular view of the assistant message being built.
///
/// Mirrors the persisted [`Message`] but is updated on every delta, while
/// store writes are coalesced. Dropped when the turn ends.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingState {
    pub message_id: MessageId,
    pub phase: TurnPhase,
    pub content: String,
    pub reasoning: String,
    pub is_thinking: bool,
    pub is_streaming: bool,
    pub is_executing_tool: bool,
    pub tool_used: bool,
    pub tool_display_name: String,
}

impl StreamingState {
    pub fn new(message_id: MessageId) -> Self {
        Self {
            message_id,
            phase: TurnPhase::AwaitingFirstToken,
            content: String::new(),
            reasoning: String::new(),
            is_thinking: false,
            is_streaming: true,
            is_executing_tool: false,
            tool_used: false,
            tool_display_name: String::new(),
        }
    }

    /// Whether any answer text has been applied in this turn.
    pub fn answer_started(&self) -> bool {
        matches!(self.phase, TurnPhase::Answering { .. }) || !self.content.is_empty()
    }

    /// Copy the live fields onto `message`, leaving identity fields alone.
    pub fn apply_to(&self, message: &mut Message) {
        message.content.clone_from(&self.content);
        message.reasoning_content.clone_from(&self.reasoning);
        message.is_streaming = self.is_streaming;
        message.is_thinking = self.is_streaming && self.is_thinking;
        message.tool_used = self.tool_used;
        message.tool_display_name.clone_from(&self.tool_display_name);
    }
}
