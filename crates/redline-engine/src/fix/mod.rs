//! Section-level fix executors.
//!
//! Executors never return errors: every failure is folded into a `FixResult`
//! carrying the untouched input markdown, so the loop can keep going.

pub mod batch;
pub mod special;

use redline_core::Usage;

pub use batch::{apply_batch_fix, check_length, length_bounds, BatchFixConfig, GateConfig, LengthBounds};
pub use special::{add_section, apply_special_fix, regenerate_section, SpecialFixContext, FALLBACK_HEADLINE};

/// Outcome of one section-level operation.
#[derive(Debug, Clone)]
pub struct FixResult {
    /// Document after the operation. Equal to the input unless `success`.
    pub markdown: String,
    /// True only when the document actually changed.
    pub success: bool,
    pub description: String,
    pub issues_addressed: usize,
    pub usage: Option<Usage>,
}

impl FixResult {
    pub fn failed(markdown: &str, description: impl Into<String>) -> Self {
        Self {
            markdown: markdown.to_string(),
            success: false,
            description: description.into(),
            issues_addressed: 0,
            usage: None,
        }
    }

    /// Nothing to do; reported as success without touching the document.
    pub fn skipped(markdown: &str, description: impl Into<String>) -> Self {
        Self {
            success: true,
            ..Self::failed(markdown, description)
        }
    }

    pub fn with_usage(mut self, usage: Option<Usage>) -> Self {
        self.usage = usage;
        self
    }
}
