//! Section writing worker used by regenerate and add-section fixes.

use crate::llm::client::{call_structured, StructuredLlm, StructuredRequest};
use crate::llm::models::Model;
use crate::llm::parse::clean_section_text;
use crate::llm::prompts::section_writer_system_prompt;
use anyhow::{anyhow, Context};
use futures::future::BoxFuture;
use redline_core::{Plan, ResearchPool, Usage, DEFAULT_SECTION_WORDS};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Everything the writer needs to produce one section body.
#[derive(Debug, Clone)]
pub struct SectionWriteRequest<'a> {
    pub plan: &'a Plan,
    pub section_index: usize,
    pub pool: &'a ResearchPool,
    /// Editor feedback that takes priority over the planned goal.
    pub feedback: Option<String>,
    pub target_word_count: Option<u32>,
}

/// Body text for one section, heading excluded.
#[derive(Debug, Clone, Default)]
pub struct SectionDraft {
    pub text: String,
    pub usage: Option<Usage>,
}

/// Produces prose for a planned section.
pub trait SectionWriter: Send + Sync {
    fn write_section<'a>(
        &'a self,
        request: SectionWriteRequest<'a>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, anyhow::Result<SectionDraft>>;
}

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub max_research_chars: usize,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_research_chars: 12_000,
            max_tokens: 6_000,
            temperature: 0.6,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SectionResponseJson {
    #[serde(default)]
    content: String,
}

fn section_response_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "content": {
                "type": "string",
                "description": "Markdown body of the section, without its heading line"
            }
        },
        "required": ["content"],
        "additionalProperties": false
    })
}

/// `SectionWriter` backed by a structured model call.
pub struct LlmSectionWriter {
    llm: Arc<dyn StructuredLlm>,
    config: WriterConfig,
}

impl LlmSectionWriter {
    pub fn new(llm: Arc<dyn StructuredLlm>) -> Self {
        Self::with_config(llm, WriterConfig::default())
    }

    pub fn with_config(llm: Arc<dyn StructuredLlm>, config: WriterConfig) -> Self {
        Self { llm, config }
    }

    fn build_prompt(&self, request: &SectionWriteRequest<'_>) -> anyhow::Result<String> {
        let plan = request.plan;
        let section = plan.sections.get(request.section_index).ok_or_else(|| {
            anyhow!(
                "section index {} is out of range for a plan with {} sections",
                request.section_index,
                plan.sections.len()
            )
        })?;
        let outline: Vec<String> = plan
            .sections
            .iter()
            .enumerate()
            .map(|(idx, s)| {
                let marker = if idx == request.section_index { ">" } else { " " };
                format!("{} {}. {}", marker, idx + 1, s.headline)
            })
            .collect();
        let words = request.target_word_count.unwrap_or(DEFAULT_SECTION_WORDS);

        let mut prompt = format!(
            "ARTICLE: {}\nCATEGORY: {}\n\nOUTLINE (> marks the section to write):\n{}\n\nSECTION: {}\nGOAL: {}\nTARGET LENGTH: about {} words\n",
            plan.title,
            plan.category_slug,
            outline.join("\n"),
            section.headline,
            section.goal,
            words
        );
        let safety = plan.safety.describe();
        if !safety.is_empty() {
            prompt.push_str(&format!("\nSAFETY:\n{}\n", safety));
        }
        if let Some(feedback) = request.feedback.as_deref().filter(|f| !f.trim().is_empty()) {
            prompt.push_str(&format!("\nEDITOR FEEDBACK:\n{}\n", feedback.trim()));
        }
        let research = request.pool.condensed_summary(self.config.max_research_chars);
        if !research.trim().is_empty() {
            prompt.push_str(&format!("\nRESEARCH:\n{}\n", research));
        }
        prompt.push_str("\nWrite the section body. Return JSON.");
        Ok(prompt)
    }
}

impl SectionWriter for LlmSectionWriter {
    fn write_section<'a>(
        &'a self,
        request: SectionWriteRequest<'a>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, anyhow::Result<SectionDraft>> {
        Box::pin(async move {
            let prompt = self.build_prompt(&request)?;
            let headline = &request.plan.sections[request.section_index].headline;
            let llm_request = StructuredRequest {
                model: Model::Smart,
                schema_name: "section_draft".to_string(),
                schema: section_response_schema(),
                system: section_writer_system_prompt(),
                prompt,
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
            };
            let response =
                call_structured::<SectionResponseJson>(self.llm.as_ref(), &llm_request, cancel)
                    .await
                    .with_context(|| format!("failed to write section '{}'", headline))?;
            let text = clean_section_text(&response.data.content, headline);
            if text.is_empty() {
                return Err(anyhow!("writer returned an empty body for '{}'", headline));
            }
            debug!(section = %headline, words = redline_core::section::word_count(&text), "section drafted");
            Ok(SectionDraft {
                text,
                usage: response.usage,
            })
        })
    }
}
