//! src/completion.rs
//!
//! Completion data model as handed over by the training loop.
//!
//! A completion is a sequence of chat-style message records. Only the first record's
//! content is scored for the answer; the reasoning check looks at every record.

/// One message-like record of a completion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    pub content: String,
}

impl Message {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// One sampled model output.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Completion {
    messages: Vec<Message>,
}

impl Completion {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Single-record completion, the common shape produced by generation.
    pub fn from_text(content: impl Into<String>) -> Self {
        Self::new(vec![Message::new(content)])
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Content of the first record, or `""` for a completion with no records.
    pub fn primary_content(&self) -> &str {
        self.messages
            .first()
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

impl From<&str> for Completion {
    fn from(content: &str) -> Self {
        Self::from_text(content)
    }
}

impl From<String> for Completion {
    fn from(content: String) -> Self {
        Self::from_text(content)
    }
}
