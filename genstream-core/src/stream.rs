//! Streaming primitives exposed by genstream.
//!
//! Contract:
//! - Every wire unit is one `data: <json-object>\n\n` line.
//! - A naturally completed stream ends with exactly one [`DONE_SENTINEL`].
//! - A stream that fails or is cancelled ends with exactly one `Err` item and
//!   never carries the sentinel.

use serde::Serialize;

use crate::error::CoreResult;
use crate::model::{FinishReason, Snapshot, UsageInfo};

/// Terminal marker of a successful streaming response.
pub const DONE_SENTINEL: &str = "data: [DONE]\n\n";

const DATA_PREFIX: &str = "data: ";

/// What the aggregator hands to the protocol formatter for one choice update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamChunk {
    pub request_id: String,
    pub model: String,
    pub created: u64,
    pub index: u32,
    pub delta: String,
    pub finish_reason: Option<FinishReason>,
    /// Present only on the terminal chunk of a choice.
    pub usage: Option<UsageInfo>,
}

impl StreamChunk {
    /// Returns true if this chunk finishes its choice.
    pub fn is_terminal(&self) -> bool {
        self.finish_reason.is_some()
    }
}

/// Wrap a serialized JSON object in SSE data framing.
pub fn frame(json: &str) -> String {
    format!("{DATA_PREFIX}{json}\n\n")
}

/// Inverse of [`frame`] for a single unit; `None` if the framing is absent.
pub fn unframe(line: &str) -> Option<&str> {
    line.strip_prefix(DATA_PREFIX)?.strip_suffix("\n\n")
}

pub fn is_sentinel(line: &str) -> bool {
    line == DONE_SENTINEL
}

/// Boxed snapshot sequence produced by a generation engine.
pub type SnapshotStream = futures::stream::BoxStream<'static, Snapshot>;

/// Boxed stream of framed wire lines (or the error that ended the stream).
pub type ChunkStream = futures::stream::BoxStream<'static, CoreResult<String>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_helpers_work() {
        let line = frame(r#"{"a":1}"#);
        assert_eq!(line, "data: {\"a\":1}\n\n");
        assert_eq!(unframe(&line), Some(r#"{"a":1}"#));
        assert!(!is_sentinel(&line));
        assert!(is_sentinel(DONE_SENTINEL));
        assert_eq!(unframe(DONE_SENTINEL), Some("[DONE]"));
        assert_eq!(unframe("event: ping\n\n"), None);
    }

    #[test]
    fn terminal_only_with_finish_reason() {
        let mut c = StreamChunk {
            request_id: "r".into(),
            model: "m".into(),
            created: 0,
            index: 0,
            delta: "x".into(),
            finish_reason: None,
            usage: None,
        };
        assert!(!c.is_terminal());
        c.finish_reason = Some(FinishReason::Stop);
        assert!(c.is_terminal());
    }
}
