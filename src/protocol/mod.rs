//! Wire protocol: length-prefixed framing and envelope types

pub mod envelope;
pub mod frame;

pub use envelope::{BotStatus, ConnectStatus, LoginStatus, PoemTarget, Reply, Request};
pub use frame::{FrameCodec, LEN_HEADER_SIZE, MAX_PAYLOAD_SIZE};
