/// Maximum length for error content in error messages
const MAX_ERROR_CONTENT_LEN: usize = 200;

/// Truncate a string for display (Unicode-safe)
pub(crate) fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

/// Sanitize API response content for error messages to prevent credential leakage.
pub(crate) fn sanitize_api_response(content: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "api_key",
        "apikey",
        "secret",
        "password",
        "credential",
        "bearer",
        "sk-",
    ];

    let truncated = truncate_str(content, MAX_ERROR_CONTENT_LEN);
    let lower = truncated.to_lowercase();
    if SECRET_PATTERNS.iter().any(|p| lower.contains(p)) {
        return "(response details redacted - may contain sensitive data)".to_string();
    }
    truncated.to_string()
}

/// Truncate a document for prompt safety, keeping beginning and end with an
/// explicit marker so the model knows text is missing.
pub(crate) fn truncate_content(content: &str, max_chars: usize) -> String {
    let total = content.chars().count();
    if total <= max_chars {
        return content.to_string();
    }
    let head_len = max_chars * 3 / 4;
    let tail_len = max_chars.saturating_sub(head_len);
    let head: String = content.chars().take(head_len).collect();
    let tail: String = content.chars().skip(total - tail_len).collect();
    format!(
        "{}\n\n[... truncated: {} characters not shown ...]\n\n{}",
        head,
        total - head_len - tail_len,
        tail
    )
}

fn strip_markdown_fences(content: &str) -> Option<&str> {
    let trimmed = content.trim();
    let without_open = trimmed.strip_prefix("```")?;
    let after_header = match without_open.find('\n') {
        Some(newline_idx) => &without_open[newline_idx + 1..],
        None => without_open,
    };
    let end_idx = after_header.rfind("```")?;
    Some(after_header[..end_idx].trim())
}

/// Normalize model-written section text before it is spliced into the article.
///
/// Drops a whole-body code fence and a leading heading line that merely
/// repeats the section headline; the section store owns the heading.
pub(crate) fn clean_section_text(text: &str, headline: &str) -> String {
    let body = strip_markdown_fences(text).unwrap_or(text).trim();
    let mut lines = body.lines();
    let first = lines.next().unwrap_or_default().trim();
    let is_heading_echo = (first.starts_with("## ") || first.starts_with("# "))
        && redline_core::section::normalize_headline(first.trim_start_matches('#'))
            == redline_core::section::normalize_headline(headline);
    if is_heading_echo {
        lines.collect::<Vec<_>>().join("\n").trim().to_string()
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_str_is_unicode_safe() {
        assert_eq!(truncate_str("héllo", 2), "hé");
        assert_eq!(truncate_str("abc", 10), "abc");
    }

    #[test]
    fn test_sanitize_redacts_secret_looking_content() {
        assert!(sanitize_api_response("invalid api_key sk-123").contains("redacted"));
        assert_eq!(sanitize_api_response("bad request"), "bad request");
    }

    #[test]
    fn test_truncate_content_marks_gap() {
        let content = "a".repeat(100) + &"z".repeat(100);
        let out = truncate_content(&content, 40);
        assert!(out.starts_with(&"a".repeat(30)));
        assert!(out.ends_with(&"z".repeat(10)));
        assert!(out.contains("[... truncated: 160 characters not shown ...]"));
        assert_eq!(truncate_content("short", 40), "short");
    }

    #[test]
    fn test_clean_section_text_drops_heading_echo() {
        let text = "## Combat\n\nYou use the sword.";
        assert_eq!(clean_section_text(text, "combat"), "You use the sword.");
    }

    #[test]
    fn test_clean_section_text_keeps_other_headings() {
        let text = "## Parry timing\n\nWatch the wind-up.";
        assert_eq!(clean_section_text(text, "Combat"), text);
    }

    #[test]
    fn test_clean_section_text_strips_fences() {
        let text = "```markdown\nBody line.\n```";
        assert_eq!(clean_section_text(text, "Any"), "Body line.");
    }
}
