use http::StatusCode;
use thiserror::Error;

/// Coarse error classes used for envelopes and metrics tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    EngineContractViolation,
    ClientDisconnected,
    MalformedRequestState,
    Validation,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EngineContractViolation => "EngineContractViolation",
            Self::ClientDisconnected => "ClientDisconnected",
            Self::MalformedRequestState => "MalformedRequestState",
            Self::Validation => "ValidationError",
            Self::Internal => "InternalServerError",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ClientDisconnected | Self::MalformedRequestState | Self::Validation => {
                StatusCode::BAD_REQUEST
            }
            Self::EngineContractViolation | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Core error type for genstream.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum GenStreamError {
    #[error("engine contract violated for {request_id}: {detail}")]
    EngineContractViolation { request_id: String, detail: String },

    #[error("engine produced no snapshots for {request_id}")]
    EmptySequence { request_id: String },

    #[error("client disconnected")]
    ClientDisconnected { request_id: String },

    #[error("malformed request state for {request_id}: {detail}")]
    MalformedRequestState { request_id: String, detail: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GenStreamError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::EngineContractViolation { .. } | Self::EmptySequence { .. } => {
                ErrorCategory::EngineContractViolation
            }
            Self::ClientDisconnected { .. } => ErrorCategory::ClientDisconnected,
            Self::MalformedRequestState { .. } => ErrorCategory::MalformedRequestState,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Serialization(_) | Self::Io(_) | Self::Other(_) => ErrorCategory::Internal,
        }
    }

    /// Request id carried by request-scoped variants.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::EngineContractViolation { request_id, .. }
            | Self::EmptySequence { request_id }
            | Self::ClientDisconnected { request_id }
            | Self::MalformedRequestState { request_id, .. } => Some(request_id),
            _ => None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.category().status_code()
    }
}

pub type CoreResult<T> = std::result::Result<T, GenStreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sequence_is_a_contract_violation() {
        let err = GenStreamError::EmptySequence { request_id: "r1".into() };
        assert_eq!(err.category(), ErrorCategory::EngineContractViolation);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.request_id(), Some("r1"));
    }

    #[test]
    fn disconnect_maps_to_bad_request() {
        let err = GenStreamError::ClientDisconnected { request_id: "r2".into() };
        assert_eq!(err.category().as_str(), "ClientDisconnected");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "client disconnected");
    }

    #[test]
    fn opaque_errors_are_internal_without_request_id() {
        let err = GenStreamError::from(anyhow::anyhow!("boom"));
        assert_eq!(err.category(), ErrorCategory::Internal);
        assert_eq!(err.request_id(), None);
    }
}
