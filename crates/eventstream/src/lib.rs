//! Codec for the CodeWhisperer binary event stream.
//!
//! Every frame on the wire has the layout:
//!
//! ```text
//! [total_len:4][header_len:4][prelude_crc:4][headers...][payload...][msg_crc:4]
//! ```
//!
//! All integers are big-endian. The prelude CRC covers the first eight bytes,
//! the message CRC covers everything before itself. Headers are typed
//! `(name, value)` pairs; the decoder surfaces them together with the raw
//! payload as a [`DecodedMessage`].
//!
//! [`FrameDecoder`] is a streaming state machine: callers feed arbitrary byte
//! chunks and receive zero or more fully validated messages per call. The
//! encode side lives in [`FrameBuilder`].

mod builder;
mod decoder;
mod error;
mod message;
mod pool;
mod value;

pub use builder::FrameBuilder;
pub use decoder::{DecodeMode, FrameDecoder};
pub use error::DecodeError;
pub use message::{CONTENT_TYPE, DecodedMessage, EVENT_TYPE, EXCEPTION_TYPE, MESSAGE_TYPE};
pub use pool::BufferPool;
pub use value::HeaderValue;

/// Byte length of the frame prelude (total length, header length, prelude CRC).
pub const PRELUDE_LEN: usize = 12;

/// Smallest legal frame: prelude, no headers, no payload, message CRC.
pub const MIN_FRAME_LEN: usize = 16;

/// Largest legal frame.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
