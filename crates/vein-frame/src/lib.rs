//! Length-prefixed message framing for vein.
//!
//! Every message on the wire is framed as:
//! - A 4-byte big-endian payload length
//! - Exactly that many payload bytes
//!
//! The [`Deframer`] turns an incrementally fed byte stream into whole frames
//! and tells truncated input apart from corrupt input. [`FrameReader`] and
//! [`FrameWriter`] wrap it for blocking `Read`/`Write` streams.

pub mod codec;
pub mod deframer;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{decode_frame, encode_frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use deframer::{Deframer, Feed};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
