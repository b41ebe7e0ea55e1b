//! Error handling for the chat server

use std::fmt;

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Chat server error types
#[derive(Debug, Clone)]
pub enum ChatError {
    /// Network-related errors
    Network(String),
    /// Serialization/deserialization errors (includes unknown actions)
    Serialization(String),
    /// Malformed length header on the wire
    Framing(String),
    /// Payload bytes are not valid UTF-8
    Decoding(String),
    /// Peer half-closed the connection
    Disconnected,
    /// Protocol errors (request not valid in the current state)
    Protocol(String),
    /// Display name already held by a live session
    NameTaken(String),
    /// External collaborator call failed
    ExternalCall(String),
    /// Timeout error
    Timeout(String),
    /// Configuration error
    Config(String),
    /// Server internal error
    Internal(String),
}

impl ChatError {
    /// Get error code for this error type
    pub fn code(&self) -> u32 {
        match self {
            ChatError::Network(_) => 1000,
            ChatError::Serialization(_) => 1001,
            ChatError::Framing(_) => 1002,
            ChatError::Decoding(_) => 1003,
            ChatError::Disconnected => 1004,
            ChatError::Protocol(_) => 1005,
            ChatError::NameTaken(_) => 1006,
            ChatError::ExternalCall(_) => 1007,
            ChatError::Timeout(_) => 1008,
            ChatError::Config(_) => 1009,
            ChatError::Internal(_) => 1010,
        }
    }

    /// True when the connection can no longer be used and must be closed
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            ChatError::Framing(_) | ChatError::Decoding(_) | ChatError::Disconnected
        )
    }

    /// Create a network error
    pub fn network<T: Into<String>>(msg: T) -> Self {
        ChatError::Network(msg.into())
    }

    /// Create a serialization error
    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        ChatError::Serialization(msg.into())
    }

    /// Create a framing error
    pub fn framing<T: Into<String>>(msg: T) -> Self {
        ChatError::Framing(msg.into())
    }

    /// Create a decoding error
    pub fn decoding<T: Into<String>>(msg: T) -> Self {
        ChatError::Decoding(msg.into())
    }

    /// Create a protocol error
    pub fn protocol<T: Into<String>>(msg: T) -> Self {
        ChatError::Protocol(msg.into())
    }

    /// Create a name-taken error
    pub fn name_taken<T: Into<String>>(name: T) -> Self {
        ChatError::NameTaken(name.into())
    }

    /// Create an external-call error
    pub fn external_call<T: Into<String>>(msg: T) -> Self {
        ChatError::ExternalCall(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<T: Into<String>>(msg: T) -> Self {
        ChatError::Timeout(msg.into())
    }

    /// Create a configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        ChatError::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal<T: Into<String>>(msg: T) -> Self {
        ChatError::Internal(msg.into())
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Network(msg) => write!(f, "Network error: {}", msg),
            ChatError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            ChatError::Framing(msg) => write!(f, "Framing error: {}", msg),
            ChatError::Decoding(msg) => write!(f, "Decoding error: {}", msg),
            ChatError::Disconnected => write!(f, "Peer disconnected"),
            ChatError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            ChatError::NameTaken(name) => write!(f, "Name already taken: {}", name),
            ChatError::ExternalCall(msg) => write!(f, "External call failed: {}", msg),
            ChatError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            ChatError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ChatError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Network(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChatError::Timeout(format!("HTTP request timed out: {}", err))
        } else {
            ChatError::ExternalCall(format!("HTTP error: {}", err))
        }
    }
}

impl From<anyhow::Error> for ChatError {
    fn from(err: anyhow::Error) -> Self {
        ChatError::ExternalCall(format!("{}", err))
    }
}
