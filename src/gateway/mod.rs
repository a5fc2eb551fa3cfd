//! Messaging gateway seam
//!
//! Inbound chat messages arrive as [`InboundMessage`] values on an mpsc
//! channel, in the order the chat network delivered them. Replies and
//! documents go out through [`MessagingGateway::send`].

pub mod bridge;
mod staging;

pub use bridge::BridgeGateway;
pub use staging::StagedFile;

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// A text message received from a chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub conversation_id: String,
    pub text: String,
}

/// A document to send, read from `path`
#[derive(Debug, Clone)]
pub struct Attachment {
    pub path: PathBuf,
    pub file_name: String,
    pub mime_type: String,
    pub caption: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Outbound {
    Text(String),
    Document(Attachment),
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Messaging bridge is not connected")]
    NotConnected,

    #[error("Messaging transport error: {0}")]
    Transport(String),

    #[error("Failed to encode outbound message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to read attachment: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait MessagingGateway: Send + Sync {
    async fn send(&self, conversation_id: &str, content: Outbound) -> Result<(), GatewayError>;
}
