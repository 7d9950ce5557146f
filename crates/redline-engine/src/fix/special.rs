//! Writer-backed fixes: regenerate an existing section or add a missing one.

use super::FixResult;
use crate::writer::{SectionWriteRequest, SectionWriter};
use redline_core::section::{find_section, insert_section, replace_section, section_content, word_count};
use redline_core::{FixStrategy, Issue, Plan, ResearchPool, SectionPlan, DEFAULT_SECTION_WORDS};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Headline used when an add-section issue has no usable location.
pub const FALLBACK_HEADLINE: &str = "Additional Information";

/// Read-only inputs shared by special fixes.
#[derive(Clone, Copy)]
pub struct SpecialFixContext<'a> {
    pub plan: &'a Plan,
    pub pool: &'a ResearchPool,
    pub writer: &'a dyn SectionWriter,
}

fn feedback_for(issue: &Issue) -> String {
    match issue.instruction() {
        Some(instruction) => format!("{}\n{}", issue.message.trim(), instruction),
        None => issue.message.trim().to_string(),
    }
}

pub async fn regenerate_section(
    markdown: &str,
    issue: &Issue,
    ctx: SpecialFixContext<'_>,
    cancel: &CancellationToken,
) -> FixResult {
    if issue.is_global() {
        return FixResult::failed(markdown, "regenerate needs a section location");
    }
    let headline = issue.target();
    let Some(section_index) = ctx.plan.section_index(headline) else {
        return FixResult::failed(markdown, format!("section '{}' is not in the plan", headline));
    };

    let planned_words = ctx.plan.sections[section_index].target_words;
    let current_words = section_content(markdown, headline)
        .map(|c| word_count(&c) as u32)
        .filter(|w| *w > 0);
    let target_word_count = planned_words.or(current_words).unwrap_or(DEFAULT_SECTION_WORDS);

    let request = SectionWriteRequest {
        plan: ctx.plan,
        section_index,
        pool: ctx.pool,
        feedback: Some(feedback_for(issue)),
        target_word_count: Some(target_word_count),
    };
    let draft = match ctx.writer.write_section(request, cancel).await {
        Ok(draft) => draft,
        Err(err) => {
            warn!(section = %headline, error = %err, "section regeneration failed");
            return FixResult::failed(markdown, format!("writer failed: {:#}", err));
        }
    };

    let Some(updated) = replace_section(markdown, headline, &draft.text) else {
        return FixResult::failed(
            markdown,
            format!("section '{}' not found in the article", headline),
        )
        .with_usage(draft.usage);
    };
    if updated == markdown {
        return FixResult::failed(markdown, "regenerated text was identical").with_usage(draft.usage);
    }

    info!(section = %headline, words = word_count(&draft.text), "section regenerated");
    FixResult {
        markdown: updated,
        success: true,
        description: format!("regenerated '{}'", headline),
        issues_addressed: 1,
        usage: draft.usage,
    }
}

pub async fn add_section(
    markdown: &str,
    issue: &Issue,
    ctx: SpecialFixContext<'_>,
    cancel: &CancellationToken,
) -> FixResult {
    let Some(instruction) = issue.instruction() else {
        return FixResult::failed(markdown, "add_section needs a fix instruction");
    };
    let headline = if issue.is_global() {
        FALLBACK_HEADLINE
    } else {
        issue.target()
    };
    if find_section(markdown, headline).is_some() {
        return FixResult::failed(markdown, format!("section '{}' already exists", headline));
    }

    let (plan, section_index) = ctx
        .plan
        .with_extra_section(SectionPlan::new(headline, instruction));
    let request = SectionWriteRequest {
        plan: &plan,
        section_index,
        pool: ctx.pool,
        feedback: None,
        target_word_count: None,
    };
    let draft = match ctx.writer.write_section(request, cancel).await {
        Ok(draft) => draft,
        Err(err) => {
            warn!(section = %headline, error = %err, "new section draft failed");
            return FixResult::failed(markdown, format!("writer failed: {:#}", err));
        }
    };

    let updated = insert_section(markdown, None, headline, &draft.text);
    info!(section = %headline, words = word_count(&draft.text), "section added");
    FixResult {
        markdown: updated,
        success: true,
        description: format!("added '{}'", headline),
        issues_addressed: 1,
        usage: draft.usage,
    }
}

/// Route a special issue to its executor.
pub async fn apply_special_fix(
    markdown: &str,
    issue: &Issue,
    ctx: SpecialFixContext<'_>,
    cancel: &CancellationToken,
) -> FixResult {
    match issue.fix_strategy {
        FixStrategy::Regenerate => regenerate_section(markdown, issue, ctx, cancel).await,
        FixStrategy::AddSection => add_section(markdown, issue, ctx, cancel).await,
        other => FixResult::failed(
            markdown,
            format!("'{}' is not a writer-backed strategy", other.label()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingWriter;
    use redline_core::Severity;

    const ARTICLE: &str = "## Intro\n\nWelcome.\n\n## Combat\n\nOld combat text here.\n\n## Sources\n\n- https://example.com\n";

    fn plan() -> Plan {
        let mut combat = SectionPlan::new("Combat", "Explain fighting");
        combat.target_words = Some(420);
        Plan {
            title: "Guide".to_string(),
            category_slug: "guides".to_string(),
            sections: vec![SectionPlan::new("Intro", "Hook"), combat],
            safety: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_regenerate_replaces_body_with_planned_length() {
        let writer = RecordingWriter::new();
        writer.push_text("Fresh combat text.");
        let plan = plan();
        let pool = ResearchPool::default();
        let ctx = SpecialFixContext { plan: &plan, pool: &pool, writer: &writer };
        let issue = Issue::new(Severity::Major, "Rambling", FixStrategy::Regenerate)
            .with_location("combat")
            .with_instruction("Rewrite around parry timing");

        let result = regenerate_section(ARTICLE, &issue, ctx, &CancellationToken::new()).await;
        assert!(result.success, "{}", result.description);
        assert!(result.markdown.contains("## Combat\n\nFresh combat text.\n\n## Sources"));

        let calls = writer.calls();
        assert_eq!(calls[0].section_index, 1);
        assert_eq!(calls[0].target_word_count, Some(420));
        assert!(calls[0].feedback.as_deref().unwrap().contains("parry timing"));
    }

    #[tokio::test]
    async fn test_regenerate_fails_closed_outside_plan() {
        let writer = RecordingWriter::new();
        let plan = plan();
        let pool = ResearchPool::default();
        let ctx = SpecialFixContext { plan: &plan, pool: &pool, writer: &writer };
        let issue = Issue::new(Severity::Major, "x", FixStrategy::Regenerate)
            .with_location("Lore")
            .with_instruction("y");
        let result = regenerate_section(ARTICLE, &issue, ctx, &CancellationToken::new()).await;
        assert!(!result.success);
        assert_eq!(result.markdown, ARTICLE);
        assert!(writer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_add_section_inserts_before_sources_without_touching_plan() {
        let writer = RecordingWriter::new();
        writer.push_text("Everything about X.");
        let plan = plan();
        let pool = ResearchPool::default();
        let ctx = SpecialFixContext { plan: &plan, pool: &pool, writer: &writer };
        let issue = Issue::new(Severity::Critical, "X is missing", FixStrategy::AddSection)
            .with_location("Missing Topic")
            .with_instruction("cover X");

        let result = add_section(ARTICLE, &issue, ctx, &CancellationToken::new()).await;
        assert!(result.success);
        let new_at = result.markdown.find("## Missing Topic").unwrap();
        let sources_at = result.markdown.find("## Sources").unwrap();
        assert!(new_at < sources_at);
        assert_eq!(plan.sections.len(), 2);

        let calls = writer.calls();
        assert_eq!(calls[0].section_index, 2);
        assert_eq!(calls[0].plan_sections, 3);
        assert_eq!(calls[0].headline, "Missing Topic");
    }

    #[tokio::test]
    async fn test_add_section_uses_fallback_headline_for_global() {
        let writer = RecordingWriter::new();
        writer.push_text("More.");
        let plan = plan();
        let pool = ResearchPool::default();
        let ctx = SpecialFixContext { plan: &plan, pool: &pool, writer: &writer };
        let issue = Issue::new(Severity::Major, "gap", FixStrategy::AddSection).with_instruction("fill gap");
        let result = add_section(ARTICLE, &issue, ctx, &CancellationToken::new()).await;
        assert!(result.success);
        assert!(result.markdown.contains(&format!("## {}", FALLBACK_HEADLINE)));
    }

    #[tokio::test]
    async fn test_add_section_refuses_existing_heading() {
        let writer = RecordingWriter::new();
        let plan = plan();
        let pool = ResearchPool::default();
        let ctx = SpecialFixContext { plan: &plan, pool: &pool, writer: &writer };
        let issue = Issue::new(Severity::Major, "dup", FixStrategy::AddSection)
            .with_location("Combat")
            .with_instruction("cover combat");
        let result = add_section(ARTICLE, &issue, ctx, &CancellationToken::new()).await;
        assert!(!result.success);
        assert!(writer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_writer_failure_is_reported() {
        let writer = RecordingWriter::new();
        writer.push_error("model offline");
        let plan = plan();
        let pool = ResearchPool::default();
        let ctx = SpecialFixContext { plan: &plan, pool: &pool, writer: &writer };
        let issue = Issue::new(Severity::Major, "x", FixStrategy::AddSection)
            .with_location("New")
            .with_instruction("y");
        let result = apply_special_fix(ARTICLE, &issue, ctx, &CancellationToken::new()).await;
        assert!(!result.success);
        assert!(result.description.contains("model offline"));
    }
}
