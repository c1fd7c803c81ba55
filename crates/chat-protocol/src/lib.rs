//! Chat Protocol - Wire protocol for chatd connections
//!
//! Clients and the daemon exchange newline-delimited JSON frames.
//! Client frames carry a protocol version; daemon frames are tagged
//! by event name (`ReceiveMessage`, `ReceiveRecentMessages`, ...).

pub mod frame;
pub mod message;
pub mod version;

pub use frame::{decode_frame, encode_frame, FrameError, MAX_FRAME_SIZE};
pub use message::{ClientMessage, ErrorCode, MessageType, ServerMessage};
pub use version::ProtocolVersion;
