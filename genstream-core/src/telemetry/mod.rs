//! Tracing span helpers for request aggregation.
//! Spans carry the stable keys from [`keys`]; what gets exported depends on
//! the subscriber the host installs.

pub mod keys;
#[cfg(test)]
pub mod test_span;

pub use keys::*;

use tracing::{field, Span};

use crate::error::GenStreamError;
use crate::formatter::ProtocolVariant;
use crate::model::{GenerationRequest, UsageInfo};

/// Span covering one request's aggregation. Outcome fields start empty and
/// are filled with the `record_*` helpers.
pub fn request_span(req: &GenerationRequest, protocol: ProtocolVariant) -> Span {
    tracing::info_span!(
        "genstream.request",
        "req.id" = %req.request_id,
        "llm.model" = %req.model,
        "protocol" = protocol.as_str(),
        "stream" = req.stream,
        "choices" = req.n,
        "first_token.ms" = field::Empty,
        "latency.ms" = field::Empty,
        "finish.reason" = field::Empty,
        "tokens.prompt" = field::Empty,
        "tokens.completion" = field::Empty,
        "tokens.total" = field::Empty,
        "error.kind" = field::Empty,
    )
}

pub fn record_first_token(span: &Span, ms: u64) {
    span.record(KEY_FIRST_TOKEN_MS, ms);
}

pub fn record_latency(span: &Span, ms: u64) {
    span.record(KEY_LATENCY_MS, ms);
}

pub fn record_finish(span: &Span, reason: &str, usage: &UsageInfo) {
    span.record(KEY_FINISH_REASON, reason);
    span.record(KEY_TOKENS_PROMPT, usage.prompt_tokens());
    span.record(KEY_TOKENS_COMPLETION, usage.completion_tokens());
    span.record(KEY_TOKENS_TOTAL, usage.total_tokens());
}

pub fn record_error(span: &Span, err: &GenStreamError) {
    span.record(KEY_ERROR_KIND, err.category().as_str());
}
