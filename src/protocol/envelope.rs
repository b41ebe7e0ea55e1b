//! Protocol envelope types for the chat system
//!
//! Every envelope on the wire is a JSON object whose `action` field selects
//! behavior. Requests and replies are closed enums so the router matches
//! exhaustively over every action instead of probing dictionary keys.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};
use crate::protocol::frame;

// =============================================================================
// Client -> Server
// =============================================================================

/// Requests a client can send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    /// Claim a display name for this connection
    Login { name: String },
    /// Merge groups with another logged-in user
    Connect { target: String },
    /// Send a chat line to the sender's group
    Exchange { from: String, message: String },
    /// Delegate a question (or `/aipic` image prompt) to the assistant
    BotAsk { message: String },
    /// List all distinct groups
    List,
    /// Fetch a numbered verse
    Poem { target: PoemTarget },
    /// Ask for the server's local time
    Time,
    /// Search the requester's indexed messages
    Search { target: String },
    /// Leave the current group
    Disconnect,
}

/// Verse number as it arrives on the wire
///
/// Clients send either a JSON number or a numeric string; both are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PoemTarget {
    Number(i64),
    Text(String),
}

impl PoemTarget {
    /// Resolve to a verse number, `None` when negative or unparseable
    pub fn index(&self) -> Option<usize> {
        match self {
            PoemTarget::Number(n) => usize::try_from(*n).ok(),
            PoemTarget::Text(s) => s.trim().parse().ok(),
        }
    }
}

// =============================================================================
// Server -> Client
// =============================================================================

/// Replies and notifications the server can send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Reply {
    /// Login outcome
    Login { status: LoginStatus },
    /// Connect outcome, or a `request` notice carrying the initiator's name
    Connect {
        status: ConnectStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
    },
    /// A chat line fanned out to group members
    Exchange { from: String, message: String },
    /// Private assistant result for an ungrouped requester
    BotRes { status: BotStatus, message: String },
    /// All distinct groups, human-readable
    List { results: String },
    /// A verse, or the unknown-verse sentinel
    Poem { results: String },
    /// Server local time, `DD.MM.YY,HH:MM`
    Time { results: String },
    /// Index matches, newline-joined, most-recent-last
    Search { results: String },
    /// The requester's last peer left the group
    Disconnect,
}

/// Outcome of a login attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginStatus {
    Ok,
    Duplicate,
}

/// Outcome of a connect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectStatus {
    /// Groups merged
    #[serde(rename = "success")]
    Success,
    /// Target is the requester itself
    #[serde(rename = "self")]
    SelfTarget,
    /// Target is not a live logged-in session
    #[serde(rename = "no-user")]
    NoUser,
    /// Notice to existing members that someone joined
    #[serde(rename = "request")]
    Request,
}

/// Outcome tag on a private assistant reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    Success,
    Error,
}

// =============================================================================
// Codec boundary
// =============================================================================

/// Decode a frame payload into a request
///
/// Invalid UTF-8 is a `Decoding` error (connection-fatal); valid UTF-8 that
/// does not parse as a known request is a `Serialization` error, which the
/// reader logs and skips.
pub fn decode_request(payload: &[u8]) -> Result<Request> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| ChatError::decoding(format!("payload is not UTF-8: {}", e)))?;
    serde_json::from_str(text).map_err(ChatError::from)
}

/// Encode a reply into a complete frame ready for the socket
pub fn encode_reply(reply: &Reply) -> Result<Bytes> {
    let payload = serde_json::to_vec(reply)?;
    frame::encode(&payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let req: Request = serde_json::from_str(r#"{"action":"login","name":"alice"}"#).unwrap();
        assert_eq!(
            req,
            Request::Login {
                name: "alice".to_string()
            }
        );

        let req: Request =
            serde_json::from_str(r#"{"action":"exchange","from":"bob","message":"hi"}"#).unwrap();
        assert_eq!(
            req,
            Request::Exchange {
                from: "bob".to_string(),
                message: "hi".to_string()
            }
        );

        let req: Request = serde_json::from_str(r#"{"action":"list"}"#).unwrap();
        assert_eq!(req, Request::List);

        let req: Request = serde_json::from_str(r#"{"action":"bot_ask","message":"why?"}"#).unwrap();
        assert_eq!(
            req,
            Request::BotAsk {
                message: "why?".to_string()
            }
        );
    }

    #[test]
    fn test_reply_wire_format() {
        let reply = Reply::Login {
            status: LoginStatus::Ok,
        };
        let json = serde_json::to_string(&reply).unwrap();
        assert_eq!(json, r#"{"action":"login","status":"ok"}"#);

        let reply = Reply::Login {
            status: LoginStatus::Duplicate,
        };
        let json = serde_json::to_string(&reply).unwrap();
        assert_eq!(json, r#"{"action":"login","status":"duplicate"}"#);
    }

    #[test]
    fn test_connect_status_spelling() {
        let reply = Reply::Connect {
            status: ConnectStatus::NoUser,
            from: None,
        };
        let json = serde_json::to_string(&reply).unwrap();
        assert_eq!(json, r#"{"action":"connect","status":"no-user"}"#);

        let reply = Reply::Connect {
            status: ConnectStatus::SelfTarget,
            from: None,
        };
        let json = serde_json::to_string(&reply).unwrap();
        assert_eq!(json, r#"{"action":"connect","status":"self"}"#);

        // The request notice carries who initiated the merge
        let reply = Reply::Connect {
            status: ConnectStatus::Request,
            from: Some("alice".to_string()),
        };
        let json = serde_json::to_string(&reply).unwrap();
        assert_eq!(json, r#"{"action":"connect","status":"request","from":"alice"}"#);
    }

    #[test]
    fn test_poem_target_forms() {
        let req: Request = serde_json::from_str(r#"{"action":"poem","target":3}"#).unwrap();
        match req {
            Request::Poem { target } => assert_eq!(target.index(), Some(3)),
            _ => panic!("expected poem request"),
        }

        let req: Request = serde_json::from_str(r#"{"action":"poem","target":"7"}"#).unwrap();
        match req {
            Request::Poem { target } => assert_eq!(target.index(), Some(7)),
            _ => panic!("expected poem request"),
        }

        assert_eq!(PoemTarget::Number(-1).index(), None);
        assert_eq!(PoemTarget::Text("verse one".to_string()).index(), None);
    }

    #[test]
    fn test_unknown_action_is_serialization_error() {
        let result = decode_request(br#"{"action":"teleport","target":"mars"}"#);
        assert!(matches!(result, Err(ChatError::Serialization(_))));
    }

    #[test]
    fn test_invalid_utf8_is_decoding_error() {
        let result = decode_request(&[0xff, 0xfe, b'{', b'}']);
        assert!(matches!(result, Err(ChatError::Decoding(_))));
    }

    #[test]
    fn test_reply_roundtrip_through_frame() {
        let reply = Reply::Exchange {
            from: "carol".to_string(),
            message: "see you tomorrow".to_string(),
        };

        let frame_bytes = encode_reply(&reply).unwrap();

        let mut codec = frame::FrameCodec::new();
        codec.feed(&frame_bytes);
        let payload = codec.decode_next().unwrap().unwrap();

        let decoded: Reply = serde_json::from_slice(&payload).unwrap();
        assert_eq!(decoded, reply);
    }
}
