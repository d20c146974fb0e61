use serde::{Deserialize, Serialize};

pub type ChatId = i64;
pub type MessageId = i64;

/// Title given to chats before their first user message arrives.
pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

/// Maximum number of characters kept when deriving a title from a message.
const MAX_TITLE_CHARS: usize = 40;

/// Current wall-clock time as Unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A persisted conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub title: String,
    pub model: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Chat {
    /// Build an unsaved chat. The store assigns the id on insert.
    pub fn new(title: impl Into<String>, model: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: 0,
            title: title.into(),
            model: model.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_CHAT_TITLE
    }

    /// Derive a sidebar title from the first user message.
    ///
    /// Uses the first non-empty line, trimmed, cut at 40 characters with an
    /// ellipsis. Blank input yields the default title.
    pub fn title_from_message(content: &str) -> String {
        let line = content
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("");

        if line.is_empty() {
            return DEFAULT_CHAT_TITLE.to_string();
        }

        if line.chars().count() > MAX_TITLE_CHARS {
            let cut: String = line.chars().take(MAX_TITLE_CHARS).collect();
            format!("{}…", cut.trim_end())
        } else {
            line.to_string()
        }
    }
}

/// Author of a message.
///
/// `Tool` never reaches the store: it exists only for the synthetic
/// search-result message injected into a continuation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            "tool" => Ok(Role::Tool),
            other => Err(format!("Unknown role: {other}")),
        }
    }
}

/// A single message within a chat.
///
/// Assistant messages are created as streaming placeholders when a turn
/// begins and are finalized (`is_streaming = false`) exactly once, on
/// completion, failure or cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub role: Role,
    pub content: String,
    pub created_at: i64,
    pub is_streaming: bool,
    /// Only ever true while `is_streaming` is true.
    pub is_thinking: bool,
    pub reasoning_content: String,
    pub tool_used: bool,
    /// Human readable tool label, e.g. "Searching the web".
    pub tool_display_name: String,
}

impl Message {
    pub fn new(chat_id: ChatId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: 0,
            chat_id,
            role,
            content: content.into(),
            created_at: now_millis(),
            is_streaming: false,
            is_thinking: false,
            reasoning_content: String::new(),
            tool_used: false,
            tool_display_name: String::new(),
        }
    }

    pub fn user(chat_id: ChatId, content: impl Into<String>) -> Self {
        Self::new(chat_id, Role::User, content)
    }

    pub fn assistant(chat_id: ChatId, content: impl Into<String>) -> Self {
        Self::new(chat_id, Role::Assistant, content)
    }

    /// Empty assistant message the UI can bind to while a turn streams.
    pub fn assistant_placeholder(chat_id: ChatId) -> Self {
        Self {
            is_streaming: true,
            ..Self::new(chat_id, Role::Assistant, "")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_from_short_message() {
        assert_eq!(Chat::title_from_message("  Hello there  "), "Hello there");
    }

    #[test]
    fn test_title_uses_first_non_empty_line() {
        assert_eq!(
            Chat::title_from_message("\n\n  What is Rust?\nMore detail"),
            "What is Rust?"
        );
    }

    #[test]
    fn test_title_truncates_long_message() {
        let title = Chat::title_from_message(&"a".repeat(100));
        assert!(title.ends_with('…'));
        assert_eq!(title.chars().count(), MAX_TITLE_CHARS + 1);
    }

    #[test]
    fn test_blank_message_gets_default_title() {
        assert_eq!(Chat::title_from_message("   "), DEFAULT_CHAT_TITLE);
    }

    #[test]
    fn test_role_round_trips_through_str() {
        for role in [Role::User, Role::Assistant, Role::System, Role::Tool] {
            assert_eq!(Role::try_from(role.as_str()).unwrap(), role);
        }
        assert!(Role::try_from("narrator").is_err());
    }

    #[test]
    fn test_placeholder_is_streaming_and_empty() {
        let msg = Message::assistant_placeholder(7);
        assert!(msg.is_streaming);
        assert!(!msg.is_thinking);
        assert!(msg.content.is_empty());
        assert_eq!(msg.chat_id, 7);
        assert_eq!(msg.role, Role::Assistant);
    }
}
