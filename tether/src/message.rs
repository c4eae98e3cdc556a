//! Minimal message types for model calls.
//!
//! Message roles: System (usually first in the list), User, Assistant.
//! Session turns are stored separately (see `session`); they convert into
//! `Message` when the bounded conversation context is assembled for generation.

/// A single message in a model conversation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Message {
    /// System prompt; typically placed first in the message list.
    System(String),
    /// User input.
    User(String),
    /// Model reply.
    Assistant(String),
}

impl Message {
    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::System(content.into())
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::User(content.into())
    }

    /// Creates an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant(content.into())
    }

    /// The message text regardless of role.
    pub fn content(&self) -> &str {
        match self {
            Message::System(c) | Message::User(c) | Message::Assistant(c) => c,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Constructors produce the matching variant with the content.
    #[test]
    fn constructors_produce_variants() {
        assert!(matches!(Message::system("s"), Message::System(c) if c == "s"));
        assert!(matches!(Message::user("u"), Message::User(c) if c == "u"));
        assert!(matches!(Message::assistant("a"), Message::Assistant(c) if c == "a"));
    }

    /// **Scenario**: Each variant round-trips through serde.
    #[test]
    fn serde_roundtrip() {
        for msg in [
            Message::system("sys"),
            Message::user("usr"),
            Message::assistant("ast"),
        ] {
            let json = serde_json::to_string(&msg).expect("serialize");
            let back: Message = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(msg, back);
        }
    }
}
