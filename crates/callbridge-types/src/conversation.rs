//! Conversation turn model.

use serde::{Deserialize, Serialize};

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The person on the phone.
    Caller,
    /// The agent backend speaking through synthesis.
    Assistant,
}

impl Role {
    /// Label used when rendering history into a prompt.
    pub fn label(self) -> &'static str {
        match self {
            Self::Caller => "Caller",
            Self::Assistant => "Assistant",
        }
    }
}

/// One entry of a call's rolling history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

impl ConversationTurn {
    pub fn caller(text: impl Into<String>) -> Self {
        Self {
            role: Role::Caller,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}
