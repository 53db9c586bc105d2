//! Immutable WebSocket data frames.

use axum::body::Bytes;
use axum::extract::ws::Message;

/// Data-frame opcodes. Close is not a frame here: it ends the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Text,
    Binary,
    Ping,
    Pong,
}

#[derive(Debug, thiserror::Error)]
#[error("text frame payload is not valid UTF-8")]
pub struct InvalidText;

/// An opcode plus payload. Cheap to clone: the payload is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    opcode: Opcode,
    payload: Bytes,
}

impl Frame {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            opcode: Opcode::Text,
            payload: Bytes::from(text.into()),
        }
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: Opcode::Binary,
            payload: payload.into(),
        }
    }

    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: Opcode::Ping,
            payload: payload.into(),
        }
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: Opcode::Pong,
            payload: payload.into(),
        }
    }

    /// Build a frame from raw parts; text payloads must be UTF-8.
    pub fn from_parts(opcode: Opcode, payload: Bytes) -> Result<Self, InvalidText> {
        if opcode == Opcode::Text && std::str::from_utf8(&payload).is_err() {
            return Err(InvalidText);
        }
        Ok(Self { opcode, payload })
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The payload as text, for text frames.
    pub fn as_text(&self) -> Option<&str> {
        match self.opcode {
            Opcode::Text => std::str::from_utf8(&self.payload).ok(),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub(crate) fn to_message(&self) -> Message {
        match self.opcode {
            Opcode::Text => Message::Text(self.as_text().unwrap_or_default().into()),
            Opcode::Binary => Message::Binary(self.payload.clone()),
            Opcode::Ping => Message::Ping(self.payload.clone()),
            Opcode::Pong => Message::Pong(self.payload.clone()),
        }
    }

    /// Convert an inbound message. `None` for close messages.
    pub(crate) fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::Text(text) => Some(Self::text(text.as_str())),
            Message::Binary(payload) => Some(Self::binary(payload)),
            Message::Ping(payload) => Some(Self::ping(payload)),
            Message::Pong(payload) => Some(Self::pong(payload)),
            Message::Close(_) => None,
        }
    }
}
