use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::model::{FinalResponse, FinishReason, UsageInfo};
use crate::stream::StreamChunk;

/// Wire protocol family a request was received on. Chosen by the caller,
/// never inferred from the content.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVariant {
    /// OpenAI-style chat completion objects.
    #[default]
    Default,
    /// `ret_code`/`ret_msg` envelope objects.
    Custom,
}

impl ProtocolVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVariant::Default => "default",
            ProtocolVariant::Custom => "custom",
        }
    }
}

/// Renders core events into protocol objects.
pub trait ProtocolFormatter: Send + Sync {
    fn variant(&self) -> ProtocolVariant;

    /// Serialize one chunk as a single-line JSON object (unframed).
    fn format_chunk(&self, chunk: &StreamChunk) -> CoreResult<String>;

    fn format_response(&self, resp: &FinalResponse) -> CoreResult<serde_json::Value>;
}

pub fn formatter_for(variant: ProtocolVariant) -> Arc<dyn ProtocolFormatter> {
    match variant {
        ProtocolVariant::Default => Arc::new(ChatCompletionFormatter),
        ProtocolVariant::Custom => Arc::new(CustomFormatter),
    }
}

// ---- Default protocol wire structs ----
#[derive(Serialize)]
struct CCChunk<'a> {
    id: &'a str,
    object: &'static str,
    created: u64,
    model: &'a str,
    choices: [CCChunkChoice<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<UsageInfo>,
}

#[derive(Serialize)]
struct CCChunkChoice<'a> {
    index: u32,
    delta: CCDelta<'a>,
    finish_reason: Option<FinishReason>,
}

#[derive(Serialize)]
struct CCDelta<'a> {
    content: &'a str,
}

#[derive(Serialize)]
struct CCResponse<'a> {
    id: &'a str,
    object: &'static str,
    created: u64,
    model: &'a str,
    choices: Vec<CCChoice<'a>>,
    usage: UsageInfo,
}

#[derive(Serialize)]
struct CCChoice<'a> {
    index: u32,
    message: CCMessage<'a>,
    finish_reason: Option<FinishReason>,
}

#[derive(Serialize)]
struct CCMessage<'a> {
    role: &'static str,
    content: &'a str,
}

pub struct ChatCompletionFormatter;

impl ProtocolFormatter for ChatCompletionFormatter {
    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::Default
    }

    fn format_chunk(&self, chunk: &StreamChunk) -> CoreResult<String> {
        let wire = CCChunk {
            id: &chunk.request_id,
            object: "chat.completion.chunk",
            created: chunk.created,
            model: &chunk.model,
            choices: [CCChunkChoice {
                index: chunk.index,
                delta: CCDelta {
                    content: &chunk.delta,
                },
                finish_reason: chunk.finish_reason,
            }],
            usage: chunk.usage,
        };
        Ok(serde_json::to_string(&wire)?)
    }

    fn format_response(&self, resp: &FinalResponse) -> CoreResult<serde_json::Value> {
        let wire = CCResponse {
            id: &resp.request_id,
            object: "chat.completion",
            created: resp.created,
            model: &resp.model,
            choices: resp
                .choices
                .iter()
                .map(|c| CCChoice {
                    index: c.index,
                    message: CCMessage {
                        role: "assistant",
                        content: &c.text,
                    },
                    finish_reason: c.finish_reason,
                })
                .collect(),
            usage: resp.usage,
        };
        Ok(serde_json::to_value(&wire)?)
    }
}

// ---- Custom protocol wire structs ----
const RET_OK: u16 = 0;
const RET_OK_MSG: &str = "success";

#[derive(Serialize)]
struct CustomEnvelope<'a, T> {
    request_id: &'a str,
    ret_code: u16,
    ret_msg: &'static str,
    data: T,
}

#[derive(Serialize)]
struct CustomChunkData<'a> {
    index: u32,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    finish_reason: Option<FinishReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<UsageInfo>,
}

#[derive(Serialize)]
struct CustomResponseData<'a> {
    choices: Vec<CustomChoice<'a>>,
    usage: UsageInfo,
}

#[derive(Serialize)]
struct CustomChoice<'a> {
    index: u32,
    text: &'a str,
    finish_reason: Option<FinishReason>,
}

pub struct CustomFormatter;

impl ProtocolFormatter for CustomFormatter {
    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::Custom
    }

    fn format_chunk(&self, chunk: &StreamChunk) -> CoreResult<String> {
        let wire = CustomEnvelope {
            request_id: &chunk.request_id,
            ret_code: RET_OK,
            ret_msg: RET_OK_MSG,
            data: CustomChunkData {
                index: chunk.index,
                text: &chunk.delta,
                finish_reason: chunk.finish_reason,
                usage: chunk.usage,
            },
        };
        Ok(serde_json::to_string(&wire)?)
    }

    fn format_response(&self, resp: &FinalResponse) -> CoreResult<serde_json::Value> {
        let wire = CustomEnvelope {
            request_id: &resp.request_id,
            ret_code: RET_OK,
            ret_msg: RET_OK_MSG,
            data: CustomResponseData {
                choices: resp
                    .choices
                    .iter()
                    .map(|c| CustomChoice {
                        index: c.index,
                        text: &c.text,
                        finish_reason: c.finish_reason,
                    })
                    .collect(),
                usage: resp.usage,
            },
        };
        Ok(serde_json::to_value(&wire)?)
    }
}
