//! Thread messages handed to the runtime by the consumer.

use chat_backend::Attachment;
use serde::{Deserialize, Serialize};

use crate::error::RunError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text { text: String },
    Image { attachment: Attachment },
}

/// One message of a conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub role: Role,
    pub parts: Vec<MessagePart>,
}

impl ThreadMessage {
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![MessagePart::Text { text: text.into() }],
        }
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            parts: vec![MessagePart::Text { text: text.into() }],
        }
    }

    #[must_use]
    pub fn with_image(mut self, attachment: Attachment) -> Self {
        self.parts.push(MessagePart::Image { attachment });
        self
    }

    /// Joins the text parts, or `None` when the message has no non-blank text.
    pub fn text(&self) -> Option<String> {
        let text = self
            .parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text { text } => Some(text.as_str()),
                MessagePart::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Image attachments in message order.
    pub fn images(&self) -> Vec<Attachment> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Image { attachment } if attachment.is_image() => {
                    Some(attachment.clone())
                }
                _ => None,
            })
            .collect()
    }
}

/// A validated user input that triggers exactly one backend run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl Turn {
    /// Extracts the turn from the last message of `messages`.
    pub fn from_messages(messages: &[ThreadMessage]) -> Result<Self, RunError> {
        let last = messages.last().ok_or(RunError::EmptyTurn)?;
        if last.role != Role::User {
            return Err(RunError::NotUserMessage {
                role: last.role.as_str().to_string(),
            });
        }

        let text = last.text().ok_or(RunError::MissingText)?;
        Ok(Self {
            text,
            attachments: last.images(),
        })
    }
}

/// Returns the most recent user message in `history`.
pub fn last_user_message(history: &[ThreadMessage]) -> Option<&ThreadMessage> {
    history.iter().rev().find(|message| message.role == Role::User)
}
