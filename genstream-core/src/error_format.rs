//! Error envelopes for both protocol variants.

use http::StatusCode;
use serde::Serialize;

use crate::error::{ErrorCategory, GenStreamError};
use crate::formatter::ProtocolVariant;

/// Structured error body returned to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ErrorEnvelope {
    Generic {
        #[serde(rename = "type")]
        error_type: String,
        message: String,
        code: u16,
        request_id: Option<String>,
    },
    Custom {
        ret_msg: String,
        ret_code: u16,
        request_id: Option<String>,
    },
}

impl ErrorEnvelope {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Generic { code, .. } => *code,
            Self::Custom { ret_code, .. } => *ret_code,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ErrorResponseFormatter {
    variant: ProtocolVariant,
}

impl ErrorResponseFormatter {
    pub fn new(variant: ProtocolVariant) -> Self {
        Self { variant }
    }

    pub fn variant(&self) -> ProtocolVariant {
        self.variant
    }

    pub fn format(
        &self,
        message: &str,
        category: ErrorCategory,
        status: StatusCode,
        request_id: Option<&str>,
    ) -> ErrorEnvelope {
        let request_id = request_id.map(str::to_string);
        match self.variant {
            ProtocolVariant::Default => ErrorEnvelope::Generic {
                error_type: category.as_str().to_string(),
                message: message.to_string(),
                code: status.as_u16(),
                request_id,
            },
            ProtocolVariant::Custom => ErrorEnvelope::Custom {
                ret_msg: message.to_string(),
                ret_code: status.as_u16(),
                request_id,
            },
        }
    }

    /// Envelope for a typed error, using its own category and status.
    pub fn from_error(&self, err: &GenStreamError) -> ErrorEnvelope {
        let category = err.category();
        let message = match category {
            ErrorCategory::ClientDisconnected => "Client disconnected".to_string(),
            ErrorCategory::Internal => "Internal server error".to_string(),
            _ => err.to_string(),
        };
        self.format(&message, category, err.status_code(), err.request_id())
    }
}
