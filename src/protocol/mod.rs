//! Wire protocol of the sensor stream
//!
//! The peer pushes one JSON object per `\n`-terminated line. This module holds
//! the pure pieces: splitting the byte stream into lines and decoding each line
//! into a [`Record`]. Neither touches I/O.

pub mod framer;
pub mod record;

pub use framer::{FramingError, LineFramer, TextEncoding, DEFAULT_MAX_LINE_BYTES, LINE_TERMINATOR};
pub use record::{DecodeError, Record, RecordDecoder};
