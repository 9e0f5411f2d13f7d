use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// Why the engine stopped generating a choice.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    Error,
    Abort,
    #[serde(other)]
    Other,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::Error => "error",
            FinishReason::Abort => "abort",
            FinishReason::Other => "other",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct SamplingParams {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop: Option<Vec<String>>,
}

fn default_n() -> u32 {
    1
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GenerationRequest {
    pub request_id: String,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Number of parallel choices; fixed for the lifetime of the request.
    #[serde(default = "default_n")]
    pub n: u32,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub sampling: SamplingParams,
}

/// One choice's cumulative output inside a snapshot.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChoiceOutput {
    pub index: u32,
    pub cumulative_text: String,
    pub token_count: u32,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

/// One cumulative update from the engine for a single request.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Snapshot {
    pub prompt_token_count: u32,
    pub choices: Vec<ChoiceOutput>,
}

/// Token accounting derived by the core, never taken from the engine.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsageInfo {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl UsageInfo {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }

    pub fn prompt_tokens(&self) -> u32 {
        self.prompt_tokens
    }

    pub fn completion_tokens(&self) -> u32 {
        self.completion_tokens
    }

    pub fn total_tokens(&self) -> u32 {
        self.total_tokens
    }
}

/// One materialized choice of a non-streaming response.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct FinalChoice {
    pub index: u32,
    pub text: String,
    pub finish_reason: Option<FinishReason>,
}

/// Result of draining a snapshot sequence without streaming.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct FinalResponse {
    pub request_id: String,
    pub model: String,
    pub created: u64,
    pub choices: Vec<FinalChoice>,
    pub usage: UsageInfo,
}

/// Seconds since the Unix epoch, for the `created` field of responses.
pub fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
