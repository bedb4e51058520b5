//! Outbound envelopes and inbound frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channel::ChannelKind;

/// `{"type": "typing", "conversation_id": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "typing")]
pub struct TypingIndicator {
    pub conversation_id: String,
}

/// A message sent over a channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageEnvelope {
    /// Application-defined payload, forwarded verbatim.
    Chat(Value),
    Typing(TypingIndicator),
}

impl MessageEnvelope {
    #[must_use]
    pub fn typing(conversation_id: impl Into<String>) -> Self {
        Self::Typing(TypingIndicator {
            conversation_id: conversation_id.into(),
        })
    }

    /// # Errors
    ///
    /// * If the payload cannot be serialized to JSON
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A text frame received on one of the channels. The contents are not
/// validated; subscribers decide how to interpret them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub kind: ChannelKind,
    pub text: String,
}

impl InboundFrame {
    /// # Errors
    ///
    /// * If the frame is not valid JSON
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.text)
    }
}
