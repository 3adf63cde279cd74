//! Incremental newline framing for the sensor byte stream
//!
//! The socket delivers arbitrary chunks; a JSON line may arrive split across
//! several reads or several lines may arrive in one read. [`LineFramer`]
//! accumulates bytes and hands back every complete line in arrival order.
//!
//! Splitting happens on the raw `0x0A` byte and decoding to text happens per
//! complete line. Every supported [`TextEncoding`] guarantees that `0x0A` is
//! never part of a multi-byte sequence, so a character split across two reads
//! is reassembled before it is decoded, and a malformed sequence only costs
//! the line that contains it.

use bytes::BytesMut;
use std::fmt;
use thiserror::Error;

/// Line terminator of the wire protocol
pub const LINE_TERMINATOR: u8 = b'\n';

/// Default cap on a single pending line (1 MiB)
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Text encodings accepted for the sensor stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextEncoding {
    /// UTF-8, strictly validated
    #[default]
    Utf8,
    /// 7-bit US-ASCII
    Ascii,
    /// ISO-8859-1, every byte maps to the code point of the same value
    Latin1,
}

impl TextEncoding {
    /// Parse an encoding label, case-insensitively, accepting common aliases
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "utf-8" | "utf8" => Some(TextEncoding::Utf8),
            "ascii" | "us-ascii" => Some(TextEncoding::Ascii),
            "latin-1" | "latin1" | "iso-8859-1" | "iso8859-1" => Some(TextEncoding::Latin1),
            _ => None,
        }
    }

    /// Canonical label
    pub fn name(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Ascii => "ascii",
            TextEncoding::Latin1 => "latin-1",
        }
    }

    /// Decode one complete line.
    ///
    /// On failure returns the byte offset of the first invalid sequence.
    pub fn decode(&self, bytes: &[u8]) -> Result<String, usize> {
        match self {
            TextEncoding::Utf8 => std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|e| e.valid_up_to()),
            TextEncoding::Ascii => match bytes.iter().position(|b| !b.is_ascii()) {
                Some(offset) => Err(offset),
                // ASCII is a subset of UTF-8
                None => Ok(bytes.iter().map(|&b| b as char).collect()),
            },
            TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A chunk of the stream that could not be turned into a line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("line is not valid {encoding} (invalid sequence at byte {offset} of {length})")]
    InvalidEncoding {
        encoding: TextEncoding,
        offset: usize,
        length: usize,
        /// Lossy rendering of the dropped line, for diagnostics
        lossy: String,
    },
    #[error("line of at least {length} bytes exceeds the {limit} byte limit and was dropped")]
    LineTooLong { limit: usize, length: usize },
}

/// Stateful line splitter.
///
/// Invariant: `pending` never holds a line terminator. Owned by exactly one
/// worker; it is not shared between connections.
#[derive(Debug)]
pub struct LineFramer {
    pending: BytesMut,
    encoding: TextEncoding,
    max_line_bytes: usize,
    /// Set after an oversized line was dropped, until its terminator shows up
    discarding: bool,
}

impl LineFramer {
    pub fn new(encoding: TextEncoding, max_line_bytes: usize) -> Self {
        Self {
            pending: BytesMut::new(),
            encoding,
            max_line_bytes: max_line_bytes.max(1),
            discarding: false,
        }
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Bytes of the trailing partial line
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Forget any partial line
    pub fn reset(&mut self) {
        self.pending.clear();
        self.discarding = false;
    }

    /// Append `chunk` and return every line it completed, in order.
    ///
    /// Lines come back without their terminator. A line that fails to
    /// decode or outgrows the limit is reported in place as an `Err` and the
    /// framer carries on with the next line.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<String, FramingError>> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == LINE_TERMINATOR) {
            let head = &rest[..pos];
            rest = &rest[pos + 1..];

            if self.discarding {
                // Terminator of a line already reported as too long
                self.discarding = false;
                continue;
            }

            let length = self.pending.len() + head.len();
            if length > self.max_line_bytes {
                self.pending.clear();
                lines.push(Err(FramingError::LineTooLong {
                    limit: self.max_line_bytes,
                    length,
                }));
                continue;
            }

            self.pending.extend_from_slice(head);
            let line = self.pending.split();
            lines.push(self.decode_line(&line));
        }

        if self.discarding {
            return lines;
        }

        let length = self.pending.len() + rest.len();
        if length > self.max_line_bytes {
            self.pending.clear();
            self.discarding = true;
            lines.push(Err(FramingError::LineTooLong {
                limit: self.max_line_bytes,
                length,
            }));
        } else {
            self.pending.extend_from_slice(rest);
        }

        lines
    }

    fn decode_line(&self, line: &[u8]) -> Result<String, FramingError> {
        self.encoding
            .decode(line)
            .map_err(|offset| FramingError::InvalidEncoding {
                encoding: self.encoding,
                offset,
                length: line.len(),
                lossy: String::from_utf8_lossy(line).into_owned(),
            })
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(TextEncoding::Utf8, DEFAULT_MAX_LINE_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ok_lines(results: Vec<Result<String, FramingError>>) -> Vec<String> {
        results
            .into_iter()
            .map(|r| r.expect("line should decode"))
            .collect()
    }

    #[test]
    fn test_two_complete_lines() {
        let mut framer = LineFramer::default();
        let lines = ok_lines(framer.feed(b"{\"a\":1}\n{\"b\":2}\n"));
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
        assert!(framer.pending().is_empty());
    }

    #[test]
    fn test_partial_frame_completed_later() {
        let mut framer = LineFramer::default();

        let first = ok_lines(framer.feed(b"{\"a\":1}\n{\"b\""));
        assert_eq!(first, vec!["{\"a\":1}"]);
        assert_eq!(framer.pending(), b"{\"b\"");

        let second = ok_lines(framer.feed(b":2}\n"));
        assert_eq!(second, vec!["{\"b\":2}"]);
        assert!(framer.pending().is_empty());
    }

    #[test]
    fn test_no_terminator_yields_nothing() {
        let mut framer = LineFramer::default();
        assert!(framer.feed(b"{\"temp\": 21").is_empty());
        assert!(framer.feed(b".5").is_empty());
        assert_eq!(framer.pending(), b"{\"temp\": 21.5");
    }

    #[test]
    fn test_empty_segments_between_terminators() {
        let mut framer = LineFramer::default();
        let lines = ok_lines(framer.feed(b"\n\nx\n"));
        assert_eq!(lines, vec!["", "", "x"]);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let mut framer = LineFramer::default();
        let text = "{\"unit\":\"°C\"}\n".as_bytes();
        // Split inside the two-byte degree sign
        let split = text.iter().position(|&b| b == 0xC2).unwrap() + 1;

        assert!(framer.feed(&text[..split]).is_empty());
        let lines = ok_lines(framer.feed(&text[split..]));
        assert_eq!(lines, vec!["{\"unit\":\"°C\"}"]);
    }

    #[test]
    fn test_invalid_utf8_drops_only_that_line() {
        let mut framer = LineFramer::default();
        let results = framer.feed(b"{\"a\":1}\n\xff\xfe\n{\"b\":2}\n");

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_deref(), Ok("{\"a\":1}"));
        assert!(matches!(
            results[1],
            Err(FramingError::InvalidEncoding {
                encoding: TextEncoding::Utf8,
                offset: 0,
                length: 2,
                ..
            })
        ));
        assert_eq!(results[2].as_deref(), Ok("{\"b\":2}"));
        assert!(framer.pending().is_empty());
    }

    #[test]
    fn test_invalid_bytes_in_partial_line_do_not_leak_into_next_line() {
        let mut framer = LineFramer::default();
        assert!(framer.feed(b"bad\xff").is_empty());
        let results = framer.feed(b"\ngood\n");
        assert!(results[0].is_err());
        assert_eq!(results[1].as_deref(), Ok("good"));
    }

    #[test]
    fn test_ascii_rejects_high_bytes() {
        let mut framer = LineFramer::new(TextEncoding::Ascii, 64);
        let results = framer.feed(b"ok\nn\xe9\n");
        assert_eq!(results[0].as_deref(), Ok("ok"));
        assert!(matches!(
            results[1],
            Err(FramingError::InvalidEncoding { offset: 1, .. })
        ));
    }

    #[test]
    fn test_latin1_maps_every_byte() {
        let mut framer = LineFramer::new(TextEncoding::Latin1, 64);
        let lines = ok_lines(framer.feed(b"caf\xe9\n"));
        assert_eq!(lines, vec!["café"]);
    }

    #[test]
    fn test_oversized_line_is_dropped_and_stream_resumes() {
        let mut framer = LineFramer::new(TextEncoding::Utf8, 8);

        let results = framer.feed(b"0123456789");
        assert!(matches!(
            results.as_slice(),
            [Err(FramingError::LineTooLong { limit: 8, .. })]
        ));
        assert!(framer.pending().is_empty());

        // Tail of the oversized line is swallowed, the next line survives
        let lines = ok_lines(framer.feed(b"abc\nshort\n"));
        assert_eq!(lines, vec!["short"]);
    }

    #[test]
    fn test_oversized_complete_line_in_single_chunk() {
        let mut framer = LineFramer::new(TextEncoding::Utf8, 4);
        let results = framer.feed(b"toolong\nok\n");
        assert!(matches!(results[0], Err(FramingError::LineTooLong { .. })));
        assert_eq!(results[1].as_deref(), Ok("ok"));
    }

    #[test]
    fn test_reset_discards_partial_line() {
        let mut framer = LineFramer::default();
        framer.feed(b"{\"stale\":");
        framer.reset();
        let lines = ok_lines(framer.feed(b"{\"fresh\":1}\n"));
        assert_eq!(lines, vec!["{\"fresh\":1}"]);
    }

    #[test]
    fn test_encoding_labels() {
        assert_eq!(TextEncoding::parse("UTF-8"), Some(TextEncoding::Utf8));
        assert_eq!(TextEncoding::parse("utf8"), Some(TextEncoding::Utf8));
        assert_eq!(TextEncoding::parse("US-ASCII"), Some(TextEncoding::Ascii));
        assert_eq!(TextEncoding::parse("iso-8859-1"), Some(TextEncoding::Latin1));
        assert_eq!(TextEncoding::parse("utf-16"), None);
        assert_eq!(TextEncoding::Latin1.to_string(), "latin-1");
    }

    proptest! {
        #[test]
        fn feed_never_loses_or_duplicates_bytes(
            data in proptest::collection::vec(any::<u8>(), 0..512),
            cuts in proptest::collection::vec(0usize..512, 0..16),
        ) {
            // Latin-1 decodes every byte, so every line comes back as text
            let mut framer = LineFramer::new(TextEncoding::Latin1, usize::MAX);
            let mut boundaries: Vec<usize> = cuts.into_iter().map(|c| c.min(data.len())).collect();
            boundaries.push(0);
            boundaries.push(data.len());
            boundaries.sort_unstable();

            let mut rebuilt: Vec<u8> = Vec::new();
            for window in boundaries.windows(2) {
                for line in framer.feed(&data[window[0]..window[1]]) {
                    let line = line.expect("latin-1 never fails");
                    rebuilt.extend(line.chars().map(|c| c as u32 as u8));
                    rebuilt.push(LINE_TERMINATOR);
                }
            }
            prop_assert!(!framer.pending().contains(&LINE_TERMINATOR));
            rebuilt.extend_from_slice(framer.pending());
            prop_assert_eq!(rebuilt, data);
        }

        #[test]
        fn utf8_lines_survive_arbitrary_chunking(
            lines in proptest::collection::vec("[^\n]{0,24}", 0..8),
            chunk in 1usize..16,
        ) {
            let mut stream = String::new();
            for line in &lines {
                stream.push_str(line);
                stream.push('\n');
            }

            let mut framer = LineFramer::default();
            let mut seen = Vec::new();
            for piece in stream.as_bytes().chunks(chunk) {
                for line in framer.feed(piece) {
                    seen.push(line.expect("valid utf-8 input"));
                }
            }
            prop_assert_eq!(seen, lines);
            prop_assert!(framer.pending().is_empty());
        }
    }
}
