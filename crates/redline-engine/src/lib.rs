//! LLM orchestration for Redline: review, section fixes and the recovery loop.

pub mod fix;
pub mod llm;
pub mod recovery;
pub mod review;
pub mod testing;
pub mod writer;

pub use fix::{FixResult, SpecialFixContext};
pub use llm::{ClientSettings, LlmError, ModelIds, OpenRouterClient, StructuredLlm};
pub use recovery::{
    IterationReport, RecoveryConfig, RecoveryError, RecoveryLoop, RecoveryReport, Termination,
};
pub use review::{review_article, ReviewConfig, ReviewInput, ReviewOutcome};
pub use writer::{LlmSectionWriter, SectionDraft, SectionWriteRequest, SectionWriter, WriterConfig};
