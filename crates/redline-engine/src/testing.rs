//! Scripted fakes for driving the engine without a network.

use crate::llm::client::{LlmError, LlmResponse, StructuredLlm, StructuredRequest};
use crate::writer::{SectionDraft, SectionWriteRequest, SectionWriter};
use futures::future::BoxFuture;
use redline_core::Usage;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum Scripted {
    Text(String),
    Error(LlmError),
    /// Block until the caller's token fires.
    Hang,
}

/// `StructuredLlm` answering from per-schema queues, in push order.
///
/// An empty queue answers with a transport error naming the schema.
#[derive(Default)]
pub struct ScriptedLlm {
    queues: Mutex<HashMap<String, VecDeque<Scripted>>>,
    requests: Mutex<Vec<StructuredRequest>>,
    usage: Mutex<Option<Usage>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Usage reported with every successful response.
    pub fn with_usage(self, usage: Usage) -> Self {
        *lock(&self.usage) = Some(usage);
        self
    }

    fn push(&self, schema: &str, item: Scripted) {
        lock(&self.queues)
            .entry(schema.to_string())
            .or_default()
            .push_back(item);
    }

    pub fn push_json(&self, schema: &str, value: serde_json::Value) {
        self.push(schema, Scripted::Text(value.to_string()));
    }

    pub fn push_text(&self, schema: &str, text: &str) {
        self.push(schema, Scripted::Text(text.to_string()));
    }

    pub fn push_error(&self, schema: &str, error: LlmError) {
        self.push(schema, Scripted::Error(error));
    }

    pub fn push_hang(&self, schema: &str) {
        self.push(schema, Scripted::Hang);
    }

    /// Requests received for `schema`, oldest first.
    pub fn requests(&self, schema: &str) -> Vec<StructuredRequest> {
        lock(&self.requests)
            .iter()
            .filter(|r| r.schema_name == schema)
            .cloned()
            .collect()
    }

    pub fn calls(&self, schema: &str) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|r| r.schema_name == schema)
            .count()
    }

    /// Scripted responses not consumed yet, across all schemas.
    pub fn pending(&self) -> usize {
        lock(&self.queues).values().map(VecDeque::len).sum()
    }
}

impl StructuredLlm for ScriptedLlm {
    fn call<'a>(
        &'a self,
        request: &'a StructuredRequest,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<LlmResponse, LlmError>> {
        Box::pin(async move {
            lock(&self.requests).push(request.clone());
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }
            let next = lock(&self.queues)
                .get_mut(&request.schema_name)
                .and_then(VecDeque::pop_front);
            match next {
                Some(Scripted::Text(content)) => Ok(LlmResponse {
                    content,
                    usage: lock(&self.usage).clone(),
                }),
                Some(Scripted::Error(err)) => Err(err),
                Some(Scripted::Hang) => {
                    cancel.cancelled().await;
                    Err(LlmError::Cancelled)
                }
                None => Err(LlmError::Transport(format!(
                    "no scripted response for '{}'",
                    request.schema_name
                ))),
            }
        })
    }
}

/// What a `RecordingWriter` was asked to write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriterCall {
    pub headline: String,
    pub section_index: usize,
    pub plan_sections: usize,
    pub feedback: Option<String>,
    pub target_word_count: Option<u32>,
}

/// `SectionWriter` returning queued drafts and recording every request.
#[derive(Default)]
pub struct RecordingWriter {
    drafts: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<WriterCall>>,
}

impl RecordingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&self, text: &str) {
        lock(&self.drafts).push_back(Ok(text.to_string()));
    }

    pub fn push_error(&self, message: &str) {
        lock(&self.drafts).push_back(Err(message.to_string()));
    }

    pub fn calls(&self) -> Vec<WriterCall> {
        lock(&self.calls).clone()
    }
}

impl SectionWriter for RecordingWriter {
    fn write_section<'a>(
        &'a self,
        request: SectionWriteRequest<'a>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, anyhow::Result<SectionDraft>> {
        Box::pin(async move {
            let headline = request
                .plan
                .sections
                .get(request.section_index)
                .map(|s| s.headline.clone())
                .unwrap_or_default();
            lock(&self.calls).push(WriterCall {
                headline,
                section_index: request.section_index,
                plan_sections: request.plan.sections.len(),
                feedback: request.feedback.clone(),
                target_word_count: request.target_word_count,
            });
            if cancel.is_cancelled() {
                anyhow::bail!("cancelled");
            }
            match lock(&self.drafts).pop_front() {
                Some(Ok(text)) => Ok(SectionDraft { text, usage: None }),
                Some(Err(message)) => Err(anyhow::anyhow!(message)),
                None => Err(anyhow::anyhow!("no scripted draft")),
            }
        })
    }
}
