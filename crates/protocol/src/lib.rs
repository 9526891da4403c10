//! WRP (Wireless Routing Protocol) message schema and codecs.
//!
//! WRP is the binary framed protocol the hub exchanges with remote devices
//! over WebSocket. This crate holds the message model, the Msgpack/JSON
//! codecs with reusable buffers, bounded pools of ready-to-use coders, and
//! the translation between HTTP headers and WRP messages.

pub mod codec;
pub mod header;
pub mod message;
pub mod pool;

pub use codec::{CodecError, Decoder, Encoder, Format};
pub use header::{from_headers, to_headers, HeaderError};
pub use message::{
    InvalidMessage, Message, MessageType, AUTH_STATUS_AUTHORIZED, AUTH_STATUS_UNAUTHORIZED,
};
pub use pool::{DecoderPool, EncoderPool, DEFAULT_INITIAL_BUFFER_SIZE, DEFAULT_POOL_SIZE};
