//! Routing of framed lines into the shared state
//!
//! Classification is pure; [`LineHandler::apply`] is the only part that
//! writes to the state and emits log records.

use crate::error::{excerpt, LOG_EXCERPT_CHARS};
use crate::protocol::{DecodeError, FramingError, Record, RecordDecoder};
use crate::state::SharedState;
use tracing::{debug, error, trace, warn};

/// What to do with one item produced by the framer
#[derive(Debug, Clone, PartialEq)]
pub enum LineRoute {
    /// Decoded successfully; becomes the latest reading
    Publish(Record),
    /// Blank line; ignored
    Skip,
    /// Text that is not a JSON object
    DecodeFailed(DecodeError),
    /// Bytes that never made it to text
    FramingFailed(FramingError),
}

/// Pure line routing plus the single impure apply step
pub struct LineHandler;

impl LineHandler {
    /// Classify a framer item (pure function)
    pub fn route(item: Result<String, FramingError>) -> LineRoute {
        match item {
            Ok(line) => match RecordDecoder::decode(&line) {
                Ok(record) => LineRoute::Publish(record),
                Err(DecodeError::EmptyLine) => LineRoute::Skip,
                Err(e) => LineRoute::DecodeFailed(e),
            },
            Err(e) => LineRoute::FramingFailed(e),
        }
    }

    /// Apply a route to the shared state; returns the new sequence number
    /// when a record was published
    pub fn apply(route: LineRoute, state: &SharedState) -> Option<u64> {
        match route {
            LineRoute::Publish(record) => {
                let fields = record.len();
                let sequence = state.publish_record(record);
                trace!(sequence, fields, "Published sensor record");
                Some(sequence)
            }
            LineRoute::Skip => {
                debug!("Skipping blank line");
                None
            }
            LineRoute::DecodeFailed(e) => {
                error!(
                    error = %e,
                    line = %excerpt(e.text(), LOG_EXCERPT_CHARS),
                    "Failed to decode sensor line"
                );
                state.record_decode_failure();
                None
            }
            LineRoute::FramingFailed(e) => {
                match &e {
                    FramingError::InvalidEncoding { lossy, .. } => warn!(
                        error = %e,
                        line = %excerpt(lossy, LOG_EXCERPT_CHARS),
                        "Dropping undecodable sensor line"
                    ),
                    FramingError::LineTooLong { .. } => warn!(error = %e, "Dropping oversized sensor line"),
                }
                state.record_framing_failure();
                None
            }
        }
    }

    /// Route and apply every item of one chunk, in order; returns how many
    /// records were published
    pub fn handle_lines(items: Vec<Result<String, FramingError>>, state: &SharedState) -> usize {
        items
            .into_iter()
            .filter_map(|item| Self::apply(Self::route(item), state))
            .count()
    }
}
