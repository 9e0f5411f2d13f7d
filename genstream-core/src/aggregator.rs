//! Streaming path: cumulative snapshots in, framed delta chunks out.
//!
//! Contract of the returned [`ChunkStream`]:
//! - per snapshot, choices are advanced in index order;
//! - every choice emits its terminal chunk at most once;
//! - natural exhaustion ends with exactly one [`DONE_SENTINEL`];
//! - an error or a cancellation ends with exactly one `Err` item, no sentinel,
//!   and a single `abort` sent to the engine.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::Span;
use tracing_futures::Instrument;

use crate::engine::{AbortGuard, GenerationEngine};
use crate::error::GenStreamError;
use crate::formatter::ProtocolFormatter;
use crate::metrics::{MetricsInstrumentation, RequestMetrics};
use crate::model::{unix_timestamp, ChoiceOutput, GenerationRequest, Snapshot};
use crate::state::{ChoiceStep, ChoiceTable};
use crate::stream::{frame, ChunkStream, SnapshotStream, StreamChunk, DONE_SENTINEL};
use crate::telemetry;

enum Next {
    Snapshot(Snapshot),
    Exhausted,
    Cancelled,
}

#[derive(Clone)]
pub struct StreamAggregator {
    engine: Arc<dyn GenerationEngine>,
    formatter: Arc<dyn ProtocolFormatter>,
    metrics: MetricsInstrumentation,
}

impl StreamAggregator {
    pub fn new(
        engine: Arc<dyn GenerationEngine>,
        formatter: Arc<dyn ProtocolFormatter>,
        metrics: MetricsInstrumentation,
    ) -> Self {
        Self {
            engine,
            formatter,
            metrics,
        }
    }

    /// Turn `snapshots` into framed wire lines for `req`.
    ///
    /// The request is counted and its clock started here; snapshots are read
    /// only when the returned stream is polled. Firing `cancel`, or dropping
    /// the stream before it completes (polled or not), aborts the engine.
    pub fn run_streaming(
        &self,
        req: &GenerationRequest,
        snapshots: SnapshotStream,
        cancel: CancellationToken,
    ) -> ChunkStream {
        let formatter = self.formatter.clone();
        let metrics = self.metrics.clone();
        let request_id = req.request_id.clone();
        let model = req.model.clone();
        let n_choices = req.n;
        let created = unix_timestamp();
        let span = telemetry::request_span(req, metrics.protocol());
        let record = span.clone();
        let rm = metrics.begin(&model, true);
        let guard = AbortGuard::new(self.engine.clone(), request_id.clone());

        let lines = async_stream::stream! {
            let mut snapshots = snapshots;

            let mut table = match ChoiceTable::new(request_id.clone(), n_choices) {
                Ok(table) => table,
                Err(err) => {
                    fail(&rm, &guard, &record, &err).await;
                    yield Err(err);
                    return;
                }
            };
            let mut first_packet = false;
            let mut cancelled = false;

            'snapshots: loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Next::Cancelled,
                    item = snapshots.next() => match item {
                        Some(snapshot) => Next::Snapshot(snapshot),
                        None => Next::Exhausted,
                    },
                };

                let snapshot = match next {
                    Next::Snapshot(snapshot) => snapshot,
                    Next::Exhausted => break,
                    Next::Cancelled => {
                        cancelled = true;
                        break;
                    }
                };

                let prompt_tokens = snapshot.prompt_token_count;
                let mut outputs: Vec<&ChoiceOutput> = snapshot.choices.iter().collect();
                outputs.sort_by_key(|o| o.index);

                for output in outputs {
                    if cancel.is_cancelled() {
                        cancelled = true;
                        break 'snapshots;
                    }
                    let step = match table.advance(output, prompt_tokens) {
                        Ok(step) => step,
                        Err(err) => {
                            table.clear();
                            fail(&rm, &guard, &record, &err).await;
                            yield Err(err);
                            return;
                        }
                    };

                    if step.is_first_token() {
                        let ms = rm.first_token();
                        tracing::debug!(%request_id, index = output.index, first_token_ms = ms, "first token");
                        if !first_packet {
                            first_packet = true;
                            telemetry::record_first_token(&record, ms);
                        }
                    }

                    let chunk = match step {
                        ChoiceStep::Ignored => continue,
                        ChoiceStep::Partial { delta, .. } if delta.is_empty() => continue,
                        ChoiceStep::Partial { delta, .. } => StreamChunk {
                            request_id: request_id.clone(),
                            model: model.clone(),
                            created,
                            index: output.index,
                            delta: delta.to_string(),
                            finish_reason: None,
                            usage: None,
                        },
                        ChoiceStep::Terminal { delta, finish_reason, usage, .. } => {
                            let (cost_time_ms, speed) = rm.cost(usage.completion_tokens());
                            rm.tokens(&usage);
                            telemetry::record_latency(&record, cost_time_ms);
                            telemetry::record_finish(&record, finish_reason.as_str(), &usage);
                            tracing::info!(
                                %request_id,
                                index = output.index,
                                finish_reason = finish_reason.as_str(),
                                cost_time_ms,
                                speed,
                                completion_tokens = usage.completion_tokens(),
                                "choice finished"
                            );
                            StreamChunk {
                                request_id: request_id.clone(),
                                model: model.clone(),
                                created,
                                index: output.index,
                                delta: delta.to_string(),
                                finish_reason: Some(finish_reason),
                                usage: Some(usage),
                            }
                        }
                    };

                    match formatter.format_chunk(&chunk) {
                        Ok(json) => yield Ok(frame(&json)),
                        Err(err) => {
                            table.clear();
                            fail(&rm, &guard, &record, &err).await;
                            yield Err(err);
                            return;
                        }
                    }
                }
            }

            if cancelled {
                tracing::info!(%request_id, "client disconnected, stopping stream");
                table.clear();
                let err = GenStreamError::ClientDisconnected {
                    request_id: request_id.clone(),
                };
                fail(&rm, &guard, &record, &err).await;
                yield Err(err);
                return;
            }

            let unfinished = table.unfinished_count();
            if unfinished > 0 {
                let first: Vec<u32> = table.unfinished().take(16).collect();
                tracing::warn!(%request_id, unfinished, ?first, "snapshot sequence ended before every choice finished");
            }
            table.clear();
            guard.disarm();
            rm.success();
            tracing::debug!(%request_id, elapsed_ms = rm.elapsed_ms(), "stream completed");
            yield Ok(DONE_SENTINEL.to_string());
        };

        lines.instrument(span).boxed()
    }
}

async fn fail(rm: &RequestMetrics, guard: &AbortGuard, span: &Span, err: &GenStreamError) {
    tracing::warn!(error = %err, category = err.category().as_str(), "stream failed");
    telemetry::record_error(span, err);
    rm.failure(err.status_code());
    guard.abort().await;
}
