//! Heading-delimited section surgery over a markdown article.
//!
//! A section is everything between one `## ` heading line and the next heading
//! of level one or two (or the end of the document). Text before the first
//! `## ` heading is the preamble and is not a section. Headings inside fenced
//! code blocks are ignored.
//!
//! Every function here is a pure text transform: nothing is cached, so section
//! offsets are recomputed from the current document on every call.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Headings treated as the article's source list.
const SOURCES_HEADINGS: &[&str] = &["sources", "references"];

/// A section as it appears in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub heading: String,
    pub content: String,
}

impl Section {
    pub fn is_sources(&self) -> bool {
        is_sources_heading(&self.heading)
    }

    pub fn word_count(&self) -> usize {
        word_count(&self.content)
    }
}

/// Byte offsets of a located section.
///
/// `heading_start..content_start` is the heading line including its newline;
/// `content_start..end` is the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionRange {
    pub heading_start: usize,
    pub content_start: usize,
    pub end: usize,
}

impl SectionRange {
    /// Start of the replaceable content.
    pub fn start(&self) -> usize {
        self.content_start
    }
}

#[derive(Debug, Clone, Copy)]
struct HeadingLine<'a> {
    level: usize,
    start: usize,
    content_start: usize,
    line: &'a str,
    text: &'a str,
}

/// Parse ATX headings of level 1 or 2, skipping fenced code.
fn heading_lines(markdown: &str) -> Vec<HeadingLine<'_>> {
    let mut out = Vec::new();
    let mut in_fence = false;
    let mut offset = 0usize;

    for raw in markdown.split_inclusive('\n') {
        let start = offset;
        offset += raw.len();
        let line = raw.trim_end_matches(['\n', '\r']);
        let trimmed = line.trim_start();

        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }

        let level = if line.starts_with("## ") || line == "##" {
            2
        } else if line.starts_with("# ") || line == "#" {
            1
        } else {
            continue;
        };

        let text = line[level..].trim().trim_end_matches('#').trim();
        out.push(HeadingLine {
            level,
            start,
            content_start: offset,
            line,
            text,
        });
    }
    out
}

/// Collapse whitespace and lowercase for tolerant headline comparison.
pub fn normalize_headline(headline: &str) -> String {
    headline
        .trim()
        .trim_end_matches('#')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Whether a headline names the article's source list.
pub fn is_sources_heading(headline: &str) -> bool {
    let normalized = normalize_headline(headline);
    SOURCES_HEADINGS.contains(&normalized.as_str())
}

fn locating_pattern(headline: &str) -> Option<Regex> {
    let words: Vec<String> = headline.split_whitespace().map(regex::escape).collect();
    if words.is_empty() {
        return None;
    }
    Regex::new(&format!(
        r"(?i)^##[ \t]+{}[ \t]*#*[ \t]*$",
        words.join(r"[ \t]+")
    ))
    .ok()
}

/// Locate a `## ` section by headline.
///
/// An exact match on the heading text wins; otherwise the first heading that
/// matches case-insensitively with normalized whitespace is used.
pub fn find_section(markdown: &str, headline: &str) -> Option<SectionRange> {
    let wanted = headline.trim();
    if wanted.is_empty() {
        return None;
    }

    let headings = heading_lines(markdown);
    let exact = headings
        .iter()
        .position(|h| h.level == 2 && h.text == wanted);
    let idx = match exact {
        Some(idx) => idx,
        None => {
            let pattern = locating_pattern(wanted)?;
            headings
                .iter()
                .position(|h| h.level == 2 && pattern.is_match(h.line))?
        }
    };

    let heading = headings[idx];
    let end = headings
        .get(idx + 1)
        .map(|next| next.start)
        .unwrap_or(markdown.len());

    Some(SectionRange {
        heading_start: heading.start,
        content_start: heading.content_start,
        end,
    })
}

/// Current body of a section, if present.
pub fn section_content(markdown: &str, headline: &str) -> Option<String> {
    find_section(markdown, headline)
        .map(|range| markdown[range.content_start..range.end].to_string())
}

/// All `## ` sections in document order.
pub fn sections(markdown: &str) -> Vec<Section> {
    let headings = heading_lines(markdown);
    headings
        .iter()
        .enumerate()
        .filter(|(_, h)| h.level == 2)
        .map(|(idx, h)| {
            let end = headings
                .get(idx + 1)
                .map(|next| next.start)
                .unwrap_or(markdown.len());
            Section {
                heading: h.text.to_string(),
                content: markdown[h.content_start..end].to_string(),
            }
        })
        .collect()
}

/// Headlines of all sections, in document order.
pub fn headlines(markdown: &str) -> Vec<String> {
    sections(markdown).into_iter().map(|s| s.heading).collect()
}

/// Whether `text` has a `#` or `##` heading outside fenced code, i.e. would
/// start a new section if spliced into a body.
pub fn has_section_heading(text: &str) -> bool {
    !heading_lines(text).is_empty()
}

/// Canonical body layout: one blank line after the heading, the trimmed text,
/// and one blank line before whatever follows.
fn format_body(content: &str, followed: bool) -> String {
    let trimmed = content.trim();
    match (trimmed.is_empty(), followed) {
        (true, true) => "\n".to_string(),
        (true, false) => String::new(),
        (false, true) => format!("\n{}\n\n", trimmed),
        (false, false) => format!("\n{}\n", trimmed),
    }
}

/// Replace a section's body, keeping its heading line verbatim.
///
/// Returns `None` when the section does not exist so callers can pick a
/// different strategy instead of creating one by accident.
pub fn replace_section(markdown: &str, headline: &str, new_content: &str) -> Option<String> {
    let range = find_section(markdown, headline)?;
    let followed = range.end < markdown.len();

    let mut out = String::with_capacity(markdown.len() + new_content.len());
    out.push_str(&markdown[..range.content_start]);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&format_body(new_content, followed));
    out.push_str(&markdown[range.end..]);
    Some(out)
}

fn section_block(headline: &str, content: &str, followed: bool) -> String {
    format!(
        "## {}\n{}",
        headline.trim(),
        format_body(content, followed)
    )
}

fn splice_before(markdown: &str, at: usize, block: &str) -> String {
    let prefix = markdown[..at].trim_end();
    let mut out = String::with_capacity(markdown.len() + block.len() + 2);
    if !prefix.is_empty() {
        out.push_str(prefix);
        out.push_str("\n\n");
    }
    out.push_str(block);
    out.push_str(&markdown[at..]);
    out
}

fn append(markdown: &str, headline: &str, content: &str) -> String {
    let block = section_block(headline, content, false);
    let prefix = markdown.trim_end();
    if prefix.is_empty() {
        block
    } else {
        format!("{}\n\n{}", prefix, block)
    }
}

/// Insert a new section.
///
/// With no anchor the section goes right before the sources section, or at the
/// end of the document when there is none. With an anchor it goes right after
/// that section's body, falling back to the end of the document when the anchor
/// is missing.
pub fn insert_section(
    markdown: &str,
    after_headline: Option<&str>,
    headline: &str,
    content: &str,
) -> String {
    match after_headline {
        None => {
            let sources = heading_lines(markdown)
                .into_iter()
                .find(|h| h.level == 2 && is_sources_heading(h.text));
            match sources {
                Some(h) => splice_before(markdown, h.start, &section_block(headline, content, true)),
                None => append(markdown, headline, content),
            }
        }
        Some(anchor) => match find_section(markdown, anchor) {
            Some(range) if range.end < markdown.len() => {
                splice_before(markdown, range.end, &section_block(headline, content, true))
            }
            _ => append(markdown, headline, content),
        },
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = "# Guide\n\nIntro paragraph.\n\n## Intro\n\nWelcome to the guide.\n\n## Combat\n\nYou utilize the sword.\n\n## Sources\n\n- https://example.com\n";

    #[test]
    fn test_find_section_exact_match() {
        let range = find_section(ARTICLE, "Combat").unwrap();
        assert_eq!(
            &ARTICLE[range.heading_start..range.content_start],
            "## Combat\n"
        );
        assert_eq!(
            &ARTICLE[range.content_start..range.end],
            "\nYou utilize the sword.\n\n"
        );
    }

    #[test]
    fn test_find_section_case_and_whitespace_insensitive() {
        let md = "## Boss   Fights\n\nHard.\n";
        assert!(find_section(md, "boss fights").is_some());
        assert!(find_section(md, "BOSS FIGHTS").is_some());
        assert!(find_section(md, "boss").is_none());
    }

    #[test]
    fn test_exact_match_preferred_over_case_insensitive() {
        let md = "## combat\n\nfirst\n\n## Combat\n\nsecond\n";
        let content = section_content(md, "Combat").unwrap();
        assert!(content.contains("second"), "{}", content);
        let content = section_content(md, "COMBAT").unwrap();
        assert!(content.contains("first"), "{}", content);
    }

    #[test]
    fn test_headline_with_regex_metacharacters() {
        let md = "## Tips (and Tricks?) [v1.2]\n\nBody.\n\n## Next\n";
        let content = section_content(md, "tips (and tricks?) [V1.2]").unwrap();
        assert_eq!(content, "\nBody.\n\n");
        assert!(find_section(md, "Tips .and Tricks.. .v1.2.").is_none());
    }

    #[test]
    fn test_level_three_headings_stay_inside_section() {
        let md = "## Combat\n\n### Parry\n\nTiming.\n\n## Sources\n";
        let content = section_content(md, "Combat").unwrap();
        assert!(content.contains("### Parry"));
        assert!(find_section(md, "Parry").is_none());
    }

    #[test]
    fn test_headings_in_code_fences_are_ignored() {
        let md = "## Setup\n\n```md\n## Not a heading\n```\n\nDone.\n";
        assert!(find_section(md, "Not a heading").is_none());
        assert!(section_content(md, "Setup").unwrap().contains("Done."));
    }

    #[test]
    fn test_no_sections_returns_none_everywhere() {
        let md = "Just prose, no headings.\n";
        assert!(find_section(md, "Intro").is_none());
        assert!(section_content(md, "Intro").is_none());
        assert!(replace_section(md, "Intro", "x").is_none());
        assert!(sections(md).is_empty());
    }

    #[test]
    fn test_replace_with_current_content_is_noop() {
        for section in sections(ARTICLE) {
            let current = section_content(ARTICLE, &section.heading).unwrap();
            let replaced = replace_section(ARTICLE, &section.heading, &current).unwrap();
            assert_eq!(replaced, ARTICLE, "section {}", section.heading);
        }
    }

    #[test]
    fn test_replace_preserves_heading_and_neighbours() {
        let out = replace_section(ARTICLE, "combat", "  You use the sword.  \n\n\n").unwrap();
        assert!(out.contains("## Combat\n\nYou use the sword.\n\n## Sources"));
        assert_eq!(
            section_content(&out, "Intro"),
            section_content(ARTICLE, "Intro")
        );
        assert_eq!(
            section_content(&out, "Sources"),
            section_content(ARTICLE, "Sources")
        );
        assert!(out.starts_with("# Guide\n\nIntro paragraph.\n\n"));
    }

    #[test]
    fn test_replace_last_section_without_trailing_newline() {
        let md = "## Only";
        let out = replace_section(md, "Only", "Body").unwrap();
        assert_eq!(out, "## Only\n\nBody\n");
    }

    #[test]
    fn test_insert_before_sources() {
        let out = insert_section(ARTICLE, None, "New", "X");
        let new_pos = out.find("## New").unwrap();
        let sources_pos = out.find("## Sources").unwrap();
        assert!(new_pos < sources_pos);
        assert!(out.contains("## New\n\nX\n\n## Sources"));
        assert_eq!(
            section_content(&out, "Combat"),
            section_content(ARTICLE, "Combat")
        );
    }

    #[test]
    fn test_insert_appends_without_sources() {
        let md = "## Intro\n\nHello.\n";
        let out = insert_section(md, None, "Outro", "Bye.");
        assert_eq!(out, "## Intro\n\nHello.\n\n## Outro\n\nBye.\n");
    }

    #[test]
    fn test_insert_after_anchor() {
        let out = insert_section(ARTICLE, Some("Intro"), "Story", "Once upon a time.");
        let heads = headlines(&out);
        assert_eq!(heads, vec!["Intro", "Story", "Combat", "Sources"]);
    }

    #[test]
    fn test_insert_after_missing_anchor_appends() {
        let out = insert_section(ARTICLE, Some("Nope"), "Tail", "End.");
        assert_eq!(headlines(&out).last().map(String::as_str), Some("Tail"));
    }

    #[test]
    fn test_insert_empty_content_creates_bare_heading() {
        let out = insert_section(ARTICLE, None, "Empty", "");
        assert!(out.contains("## Empty\n\n## Sources"), "{}", out);
        assert_eq!(section_content(&out, "Empty").unwrap(), "\n");
    }

    #[test]
    fn test_insert_into_empty_document() {
        assert_eq!(insert_section("", None, "First", "Hi"), "## First\n\nHi\n");
    }

    #[test]
    fn test_sections_document_order_and_sources_flag() {
        let all = sections(ARTICLE);
        let heads: Vec<_> = all.iter().map(|s| s.heading.as_str()).collect();
        assert_eq!(heads, vec!["Intro", "Combat", "Sources"]);
        assert!(all[2].is_sources());
        assert!(!all[0].is_sources());
        assert_eq!(all[1].word_count(), 4);
    }

    #[test]
    fn test_top_level_heading_ends_section() {
        let md = "## A\n\nbody\n\n# Appendix\n\nmore\n";
        assert_eq!(section_content(md, "A").unwrap(), "\nbody\n\n");
    }

    #[test]
    fn test_has_section_heading_ignores_subheadings_and_fences() {
        assert!(has_section_heading("intro\n\n## Bonus Tips\n\nExtra."));
        assert!(has_section_heading("# Title\n"));
        assert!(!has_section_heading("text\n\n### Subheading\n\nmore"));
        assert!(!has_section_heading("```md\n## not a heading\n```\n"));
        assert!(!has_section_heading("Use #tags inline."));
    }
}
