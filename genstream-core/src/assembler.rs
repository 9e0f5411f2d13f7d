//! Non-streaming path: drain the snapshot sequence and materialize one response.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::Span;
use tracing_futures::Instrument;

use crate::engine::{AbortGuard, GenerationEngine};
use crate::error::{CoreResult, GenStreamError};
use crate::metrics::{MetricsInstrumentation, RequestMetrics};
use crate::model::{unix_timestamp, FinalChoice, FinalResponse, GenerationRequest, Snapshot, UsageInfo};
use crate::stream::SnapshotStream;
use crate::telemetry;

/// Asks the transport whether the client is still there.
#[async_trait]
pub trait DisconnectProbe: Send + Sync {
    async fn is_disconnected(&self) -> bool;
}

#[async_trait]
impl DisconnectProbe for CancellationToken {
    async fn is_disconnected(&self) -> bool {
        self.is_cancelled()
    }
}

#[derive(Clone)]
pub struct FullResponseAssembler {
    engine: Arc<dyn GenerationEngine>,
    metrics: MetricsInstrumentation,
}

impl FullResponseAssembler {
    pub fn new(engine: Arc<dyn GenerationEngine>, metrics: MetricsInstrumentation) -> Self {
        Self { engine, metrics }
    }

    /// Keep only the latest snapshot and build the response from it once the
    /// sequence is exhausted. A disconnect observed before any snapshot is
    /// accepted aborts the engine and yields `ClientDisconnected`; no partial
    /// answer is ever returned.
    pub async fn run_full(
        &self,
        req: &GenerationRequest,
        snapshots: SnapshotStream,
        probe: &dyn DisconnectProbe,
    ) -> CoreResult<FinalResponse> {
        let span = telemetry::request_span(req, self.metrics.protocol());
        let record = span.clone();
        async move {
            let rm = self.metrics.begin(&req.model, false);
            let guard = AbortGuard::new(self.engine.clone(), req.request_id.clone());
            match assemble(req, snapshots, probe, &rm, &record).await {
                Ok(resp) => {
                    guard.disarm();
                    rm.success();
                    Ok(resp)
                }
                Err(err) => {
                    tracing::warn!(error = %err, category = err.category().as_str(), "full response failed");
                    telemetry::record_error(&record, &err);
                    rm.failure(err.status_code());
                    guard.abort().await;
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }
}

async fn assemble(
    req: &GenerationRequest,
    mut snapshots: SnapshotStream,
    probe: &dyn DisconnectProbe,
    rm: &RequestMetrics,
    span: &Span,
) -> CoreResult<FinalResponse> {
    let request_id = &req.request_id;
    if req.n == 0 {
        return Err(GenStreamError::MalformedRequestState {
            request_id: request_id.clone(),
            detail: "request declares zero choices".into(),
        });
    }

    let mut last: Option<Snapshot> = None;
    while let Some(snapshot) = snapshots.next().await {
        if probe.is_disconnected().await {
            tracing::info!(%request_id, "client disconnected before the response was ready");
            return Err(GenStreamError::ClientDisconnected {
                request_id: request_id.clone(),
            });
        }
        last = Some(snapshot);
    }
    let last = last.ok_or_else(|| GenStreamError::EmptySequence {
        request_id: request_id.clone(),
    })?;

    if let Some(bad) = last.choices.iter().find(|c| c.index >= req.n) {
        return Err(GenStreamError::MalformedRequestState {
            request_id: request_id.clone(),
            detail: format!("choice index {} outside [0, {})", bad.index, req.n),
        });
    }

    let completion_tokens = last
        .choices
        .iter()
        .fold(0u32, |acc, c| acc.saturating_add(c.token_count));
    let usage = UsageInfo::new(last.prompt_token_count, completion_tokens);

    let mut choices: Vec<FinalChoice> = last
        .choices
        .into_iter()
        .map(|c| FinalChoice {
            index: c.index,
            text: c.cumulative_text,
            finish_reason: c.finish_reason,
        })
        .collect();
    choices.sort_by_key(|c| c.index);

    let (cost_time_ms, speed) = rm.cost(completion_tokens);
    rm.tokens(&usage);
    telemetry::record_latency(span, cost_time_ms);
    let finish = choices
        .first()
        .and_then(|c| c.finish_reason)
        .map(|r| r.as_str())
        .unwrap_or("none");
    telemetry::record_finish(span, finish, &usage);
    tracing::info!(
        %request_id,
        choices = choices.len(),
        cost_time_ms,
        speed,
        total_tokens = usage.total_tokens(),
        "response assembled"
    );

    Ok(FinalResponse {
        request_id: request_id.clone(),
        model: req.model.clone(),
        created: unix_timestamp(),
        choices,
        usage,
    })
}
