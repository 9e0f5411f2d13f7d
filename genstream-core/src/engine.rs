use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use crate::error::CoreResult;
use crate::model::{ChoiceOutput, FinishReason, SamplingParams, Snapshot};
use crate::stream::SnapshotStream;

/// Source of cumulative snapshots for a request.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Start generating `n` choices for `prompt`. The returned sequence is
    /// lazy, finite in practice, and not resumable.
    async fn subscribe(
        &self,
        request_id: &str,
        prompt: &str,
        sampling: &SamplingParams,
        n: u32,
    ) -> CoreResult<SnapshotStream>;

    /// Stop work for `request_id`. Must be idempotent and a no-op after
    /// natural completion.
    async fn abort(&self, request_id: &str);
}

/// Issues `abort` for one request at most once.
///
/// If dropped before being settled (neither aborted nor disarmed), the abort
/// is spawned onto the current tokio runtime.
pub struct AbortGuard {
    engine: Arc<dyn GenerationEngine>,
    request_id: String,
    settled: AtomicBool,
}

impl AbortGuard {
    pub fn new(engine: Arc<dyn GenerationEngine>, request_id: impl Into<String>) -> Self {
        Self {
            engine,
            request_id: request_id.into(),
            settled: AtomicBool::new(false),
        }
    }

    /// Abort the request; returns false if it was already settled.
    pub async fn abort(&self) -> bool {
        if self.settled.swap(true, Ordering::AcqRel) {
            return false;
        }
        tracing::info!(request_id = %self.request_id, engine = self.engine.name(), "aborting generation");
        self.engine.abort(&self.request_id).await;
        true
    }

    /// Mark the request as completed; no abort will be issued.
    pub fn disarm(&self) {
        self.settled.store(true, Ordering::Release);
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if *self.settled.get_mut() {
            return;
        }
        let request_id = std::mem::take(&mut self.request_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::info!(%request_id, "response dropped mid-generation, aborting");
                let engine = self.engine.clone();
                handle.spawn(async move {
                    engine.abort(&request_id).await;
                });
            }
            Err(_) => {
                tracing::warn!(%request_id, "response dropped outside a runtime, abort skipped");
            }
        }
    }
}

/// Engine that replays a fixed snapshot script. Useful for tests and demos.
pub struct ScriptedEngine {
    script: Vec<Snapshot>,
    step_delay: Duration,
    count_prompt_tokens: bool,
    aborted: Mutex<Vec<String>>,
}

impl ScriptedEngine {
    pub fn new(script: Vec<Snapshot>) -> Self {
        Self {
            script,
            step_delay: Duration::ZERO,
            count_prompt_tokens: false,
            aborted: Mutex::new(Vec::new()),
        }
    }

    /// Emit `text` word by word on each of `n` choices, finishing with `stop`.
    /// Prompt tokens are counted as whitespace-separated words of the prompt.
    pub fn echo(text: &str, n: u32) -> Self {
        let words: Vec<&str> = text.split_inclusive(char::is_whitespace).collect();
        let mut script = Vec::with_capacity(words.len().max(1));
        let mut cumulative = String::new();
        for (i, w) in words.iter().enumerate() {
            cumulative.push_str(w);
            let last = i + 1 == words.len();
            script.push(uniform_snapshot(&cumulative, (i + 1) as u32, last, n));
        }
        if script.is_empty() {
            script.push(uniform_snapshot("", 0, true, n));
        }
        let mut engine = Self::new(script);
        engine.count_prompt_tokens = true;
        engine
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Request ids passed to `abort`, one entry per call.
    pub fn aborted(&self) -> Vec<String> {
        self.aborted.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn abort_count(&self, request_id: &str) -> usize {
        self.aborted().iter().filter(|r| *r == request_id).count()
    }
}

fn uniform_snapshot(text: &str, tokens: u32, finished: bool, n: u32) -> Snapshot {
    Snapshot {
        prompt_token_count: 0,
        choices: (0..n)
            .map(|index| ChoiceOutput {
                index,
                cumulative_text: text.to_string(),
                token_count: tokens,
                finish_reason: finished.then_some(FinishReason::Stop),
            })
            .collect(),
    }
}

#[async_trait]
impl GenerationEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn subscribe(
        &self,
        request_id: &str,
        prompt: &str,
        _sampling: &SamplingParams,
        _n: u32,
    ) -> CoreResult<SnapshotStream> {
        tracing::debug!(%request_id, steps = self.script.len(), "scripted engine subscribed");
        let mut script = self.script.clone();
        if self.count_prompt_tokens {
            let prompt_tokens = prompt.split_whitespace().count() as u32;
            for s in &mut script {
                s.prompt_token_count = prompt_tokens;
            }
        }
        let delay = self.step_delay;
        let stream = futures::stream::iter(script).then(move |s| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            s
        });
        Ok(stream.boxed())
    }

    async fn abort(&self, request_id: &str) {
        if let Ok(mut v) = self.aborted.lock() {
            v.push(request_id.to_string());
        }
    }
}
