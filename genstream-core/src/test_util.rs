#![cfg(test)]

use std::sync::Mutex;

use futures::StreamExt;

use crate::error::GenStreamError;
use crate::metrics::{Aggregation, MetricTags, MetricsSink};
use crate::model::{ChatMessage, ChoiceOutput, FinishReason, GenerationRequest, Role, Snapshot};
use crate::stream::ChunkStream;

#[derive(Debug, Clone)]
pub struct Record {
    pub name: String,
    pub value: f64,
    pub tags: MetricTags,
    pub methods: Vec<Aggregation>,
}

/// Sink that keeps every measurement in memory.
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<Record>>,
}

impl RecordingSink {
    pub fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap().clone()
    }

    pub fn named(&self, name: &str) -> Vec<Record> {
        self.records().into_iter().filter(|r| r.name == name).collect()
    }

    pub fn values(&self, name: &str) -> Vec<f64> {
        self.named(name).into_iter().map(|r| r.value).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.named(name).len()
    }
}

impl MetricsSink for RecordingSink {
    fn report(&self, values: &[(&str, f64)], tags: &MetricTags, methods: &[Aggregation]) {
        let mut recs = self.records.lock().unwrap();
        for (name, value) in values {
            recs.push(Record {
                name: name.to_string(),
                value: *value,
                tags: tags.clone(),
                methods: methods.to_vec(),
            });
        }
    }
}

pub fn request(id: &str, n: u32, stream: bool) -> GenerationRequest {
    GenerationRequest {
        request_id: id.into(),
        model: "test-model".into(),
        messages: vec![ChatMessage {
            role: Role::User,
            content: "hello".into(),
        }],
        n,
        stream,
        sampling: Default::default(),
    }
}

/// `(text, token_count, finish)` per choice, indexed by position.
pub fn snap(prompt_tokens: u32, choices: &[(&str, u32, Option<FinishReason>)]) -> Snapshot {
    Snapshot {
        prompt_token_count: prompt_tokens,
        choices: choices
            .iter()
            .enumerate()
            .map(|(i, (text, tokens, finish))| ChoiceOutput {
                index: i as u32,
                cumulative_text: text.to_string(),
                token_count: *tokens,
                finish_reason: *finish,
            })
            .collect(),
    }
}

/// Drain a chunk stream into its successful lines and the error that ended it, if any.
pub async fn drain(mut stream: ChunkStream) -> (Vec<String>, Option<GenStreamError>) {
    let mut lines = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(line) => lines.push(line),
            Err(e) => {
                assert!(stream.next().await.is_none(), "stream continued after error");
                return (lines, Some(e));
            }
        }
    }
    (lines, None)
}
