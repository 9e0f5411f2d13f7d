//! Per-choice streaming state for one request.

use std::collections::BTreeMap;

use crate::delta::{compute_delta, DeltaViolation};
use crate::error::{CoreResult, GenStreamError};
use crate::model::{ChoiceOutput, FinishReason, UsageInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoicePhase {
    Streaming,
    Finished,
}

/// Bookkeeping for a single `(request, choice)` pair.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChoiceStreamState {
    previous_length: usize,
    finish_emitted: bool,
    first_token_emitted: bool,
}

/// Outcome of feeding one `ChoiceOutput` into its state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChoiceStep<'a> {
    /// The choice already finished; nothing to emit or count.
    Ignored,
    /// Still streaming. `delta` may be empty when the text did not grow.
    Partial { delta: &'a str, first_token: bool },
    /// The choice just finished; emitted exactly once per choice.
    Terminal {
        delta: &'a str,
        finish_reason: FinishReason,
        usage: UsageInfo,
        first_token: bool,
    },
}

impl ChoiceStep<'_> {
    /// True when this step carries the first observed token of the choice.
    pub fn is_first_token(&self) -> bool {
        matches!(
            self,
            Self::Partial { first_token: true, .. } | Self::Terminal { first_token: true, .. }
        )
    }
}

impl ChoiceStreamState {
    pub fn phase(&self) -> ChoicePhase {
        if self.finish_emitted {
            ChoicePhase::Finished
        } else {
            ChoicePhase::Streaming
        }
    }

    pub fn previous_length(&self) -> usize {
        self.previous_length
    }

    pub fn advance<'a>(
        &mut self,
        output: &'a ChoiceOutput,
        prompt_tokens: u32,
    ) -> Result<ChoiceStep<'a>, DeltaViolation> {
        if self.finish_emitted {
            return Ok(ChoiceStep::Ignored);
        }

        let delta = compute_delta(&output.cumulative_text, self.previous_length)?;
        self.previous_length = delta.new_length;

        let first_token = !self.first_token_emitted && output.token_count > 0;
        if first_token {
            self.first_token_emitted = true;
        }

        match output.finish_reason {
            None => Ok(ChoiceStep::Partial {
                delta: delta.text,
                first_token,
            }),
            Some(finish_reason) => {
                self.finish_emitted = true;
                Ok(ChoiceStep::Terminal {
                    delta: delta.text,
                    finish_reason,
                    usage: UsageInfo::new(prompt_tokens, output.token_count),
                    first_token,
                })
            }
        }
    }
}

/// All choice states of one request.
///
/// `n_choices` only bounds index validation; a choice's state is created the
/// first time the engine reports on it.
#[derive(Debug)]
pub struct ChoiceTable {
    request_id: String,
    n_choices: u32,
    states: BTreeMap<u32, ChoiceStreamState>,
}

impl ChoiceTable {
    pub fn new(request_id: impl Into<String>, n_choices: u32) -> CoreResult<Self> {
        let request_id = request_id.into();
        if n_choices == 0 {
            return Err(GenStreamError::MalformedRequestState {
                request_id,
                detail: "request declares zero choices".into(),
            });
        }
        Ok(Self {
            request_id,
            n_choices,
            states: BTreeMap::new(),
        })
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn n_choices(&self) -> u32 {
        self.n_choices
    }

    /// True when no choice state is held.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&ChoiceStreamState> {
        self.states.get(&index)
    }

    /// Route `output` to its choice, validating the index and the delta contract.
    pub fn advance<'a>(
        &mut self,
        output: &'a ChoiceOutput,
        prompt_tokens: u32,
    ) -> CoreResult<ChoiceStep<'a>> {
        if output.index >= self.n_choices {
            return Err(GenStreamError::MalformedRequestState {
                request_id: self.request_id.clone(),
                detail: format!("choice index {} outside [0, {})", output.index, self.n_choices),
            });
        }
        self.states
            .entry(output.index)
            .or_default()
            .advance(output, prompt_tokens)
            .map_err(|v| GenStreamError::EngineContractViolation {
                request_id: self.request_id.clone(),
                detail: format!("choice {}: {v}", output.index),
            })
    }

    fn is_finished(&self, index: u32) -> bool {
        self.states
            .get(&index)
            .is_some_and(|s| s.phase() == ChoicePhase::Finished)
    }

    /// Indices of choices that never reached a finish reason, including ones
    /// the engine never reported on. Lazy: `n_choices` may be large.
    pub fn unfinished(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.n_choices).filter(move |i| !self.is_finished(*i))
    }

    pub fn unfinished_count(&self) -> u32 {
        let finished = self
            .states
            .values()
            .filter(|s| s.phase() == ChoicePhase::Finished)
            .count() as u32;
        self.n_choices - finished
    }

    pub fn all_finished(&self) -> bool {
        self.unfinished_count() == 0
    }

    /// Drop every choice state.
    pub fn clear(&mut self) {
        self.states.clear();
    }
}
