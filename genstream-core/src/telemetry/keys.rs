/// Span/Log attribute keys for request aggregation.
/// Keep these stable; changing them is a breaking change for dashboards.
pub const KEY_REQUEST_ID: &str = "req.id";
pub const KEY_MODEL: &str = "llm.model";
pub const KEY_PROTOCOL: &str = "protocol";
pub const KEY_STREAM: &str = "stream";
pub const KEY_CHOICES: &str = "choices";

pub const KEY_LATENCY_MS: &str = "latency.ms";
pub const KEY_FIRST_TOKEN_MS: &str = "first_token.ms";
pub const KEY_FINISH_REASON: &str = "finish.reason";
pub const KEY_TOKENS_PROMPT: &str = "tokens.prompt";
pub const KEY_TOKENS_COMPLETION: &str = "tokens.completion";
pub const KEY_TOKENS_TOTAL: &str = "tokens.total";

/// Error-related (if applicable)
pub const KEY_ERROR_KIND: &str = "error.kind";
