use std::sync::Arc;

use http::StatusCode;
use tokio_util::sync::CancellationToken;

use crate::aggregator::StreamAggregator;
use crate::assembler::FullResponseAssembler;
use crate::config::Config;
use crate::engine::GenerationEngine;
use crate::error::{CoreResult, GenStreamError};
use crate::error_format::{ErrorEnvelope, ErrorResponseFormatter};
use crate::formatter::{formatter_for, ProtocolFormatter, ProtocolVariant};
use crate::metrics::{MetricsInstrumentation, MetricsSink};
use crate::model::GenerationRequest;
use crate::prompt::PromptBuilder;
use crate::stream::ChunkStream;

/// What the transport should send back for one request.
pub enum HandlerResponse {
    /// Framed wire lines; ends with the sentinel or a single error item.
    Stream(ChunkStream),
    /// Rendered non-streaming response.
    Full(serde_json::Value),
    /// The request failed before any output was produced.
    Error {
        status: StatusCode,
        envelope: ErrorEnvelope,
    },
}

impl std::fmt::Debug for HandlerResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Full(v) => f.debug_tuple("Full").field(v).finish(),
            Self::Error { status, envelope } => f
                .debug_struct("Error")
                .field("status", status)
                .field("envelope", envelope)
                .finish(),
        }
    }
}

/// Builds the prompt, subscribes to the engine and dispatches to the
/// streaming or non-streaming path. Failures become protocol envelopes.
pub struct RequestHandler {
    engine: Arc<dyn GenerationEngine>,
    prompts: PromptBuilder,
    formatter: Arc<dyn ProtocolFormatter>,
    errors: ErrorResponseFormatter,
    metrics: MetricsInstrumentation,
    aggregator: StreamAggregator,
    assembler: FullResponseAssembler,
    served_model: String,
}

impl RequestHandler {
    pub fn new(
        engine: Arc<dyn GenerationEngine>,
        prompts: PromptBuilder,
        variant: ProtocolVariant,
        sink: Arc<dyn MetricsSink>,
        served_model: impl Into<String>,
    ) -> Self {
        let formatter = formatter_for(variant);
        let metrics = MetricsInstrumentation::new(sink, variant);
        Self {
            aggregator: StreamAggregator::new(engine.clone(), formatter.clone(), metrics.clone()),
            assembler: FullResponseAssembler::new(engine.clone(), metrics.clone()),
            engine,
            prompts,
            formatter,
            errors: ErrorResponseFormatter::new(variant),
            metrics,
            served_model: served_model.into(),
        }
    }

    pub fn from_config(
        cfg: &Config,
        engine: Arc<dyn GenerationEngine>,
        sink: Arc<dyn MetricsSink>,
    ) -> CoreResult<Self> {
        let prompts = PromptBuilder::from_config(&cfg.prompt)?;
        Ok(Self::new(engine, prompts, cfg.protocol, sink, cfg.served_model.clone()))
    }

    pub fn variant(&self) -> ProtocolVariant {
        self.errors.variant()
    }

    /// Envelope for an error, including one that ends a chunk stream.
    pub fn error_envelope(&self, err: &GenStreamError) -> ErrorEnvelope {
        self.errors.from_error(err)
    }

    pub async fn handle(
        &self,
        mut req: GenerationRequest,
        disconnect: CancellationToken,
    ) -> HandlerResponse {
        if req.model.is_empty() {
            req.model = self.served_model.clone();
        }
        match self.dispatch(&req, disconnect).await {
            Ok(resp) => resp,
            Err(err) => {
                tracing::error!(
                    request_id = %req.request_id,
                    error = %err,
                    category = err.category().as_str(),
                    "request failed"
                );
                HandlerResponse::Error {
                    status: err.status_code(),
                    envelope: self.errors.from_error(&err),
                }
            }
        }
    }

    async fn dispatch(
        &self,
        req: &GenerationRequest,
        disconnect: CancellationToken,
    ) -> CoreResult<HandlerResponse> {
        let snapshots = match self.subscribe(req).await {
            Ok(snapshots) => snapshots,
            Err(err) => {
                // the aggregator/assembler never saw this request; count it here
                self.metrics
                    .begin(&req.model, req.stream)
                    .failure(err.status_code());
                return Err(err);
            }
        };

        if req.stream {
            Ok(HandlerResponse::Stream(
                self.aggregator.run_streaming(req, snapshots, disconnect),
            ))
        } else {
            let resp = self.assembler.run_full(req, snapshots, &disconnect).await?;
            Ok(HandlerResponse::Full(self.formatter.format_response(&resp)?))
        }
    }

    async fn subscribe(&self, req: &GenerationRequest) -> CoreResult<crate::stream::SnapshotStream> {
        let prompt = self.prompts.build(req)?;
        tracing::debug!(request_id = %req.request_id, engine = self.engine.name(), prompt_len = prompt.len(), "prompt built");
        self.engine
            .subscribe(&req.request_id, &prompt, &req.sampling, req.n)
            .await
    }
}
