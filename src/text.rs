/// Text helpers for queries and technique rendering.
use std::sync::LazyLock;

use regex::Regex;

use crate::techniques::Technique;

static TECHNIQUE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bT\d{4}(?:\.\d{3})?\b").expect("valid regex"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s\-.,:;!?()]").expect("valid regex"));

static UNSAFE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?is)<script.*?>.*?</script>",
        r"(?i)javascript:",
        r"(?i)data:text/html",
        r"(?i)eval\s*\(",
        r"(?i)exec\s*\(",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

/// Extract the first ATT&CK technique ID (`T1059`, `T1059.001`), upper-cased.
pub fn extract_technique_id(text: &str) -> Option<String> {
    TECHNIQUE_ID
        .find(text)
        .map(|m| m.as_str().to_ascii_uppercase())
}

/// Collapse whitespace and strip characters outside `\w\s-.,:;!?()`.
pub fn clean_text(text: &str) -> String {
    let collapsed = WHITESPACE.replace_all(text, " ");
    DISALLOWED.replace_all(&collapsed, "").trim().to_string()
}

/// Truncate at a word boundary so the result, suffix included, fits `max_chars`.
pub fn truncate_text(text: &str, max_chars: usize, suffix: &str) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let budget = max_chars.saturating_sub(suffix.chars().count());
    let head: String = text.chars().take(budget).collect();
    let cut = match head.rfind(' ') {
        Some(idx) if idx > 0 => &head[..idx],
        _ => head.as_str(),
    };
    format!("{cut}{suffix}")
}

/// Why a query was refused before reaching retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryRejection {
    TooLong { max: usize },
    Unsafe,
}

impl std::fmt::Display for QueryRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryRejection::TooLong { max } => {
                write!(f, "Query too long. Maximum {max} characters allowed.")
            }
            QueryRejection::Unsafe => write!(f, "Query contains potentially unsafe content."),
        }
    }
}

/// Check a query for length and script-injection patterns.
///
/// Empty queries pass: they simply produce a low-relevance retrieval.
pub fn validate_query(query: &str, max_chars: usize) -> Result<(), QueryRejection> {
    let query = query.trim();
    if query.chars().count() > max_chars {
        return Err(QueryRejection::TooLong { max: max_chars });
    }
    if UNSAFE_PATTERNS.iter().any(|re| re.is_match(query)) {
        return Err(QueryRejection::Unsafe);
    }
    Ok(())
}

/// Render a technique as a readable multi-section block.
pub fn format_technique(t: &Technique) -> String {
    let mut parts = vec![format!(
        "**Technique**: {} ({})",
        t.display_name(),
        t.display_id()
    )];

    if !t.tactics.is_empty() {
        parts.push(format!("**Tactics**: {}", t.tactics_joined()));
    }
    if !t.description.trim().is_empty() {
        parts.push(format!("**Description**: {}", clean_text(&t.description)));
    }
    if !t.platforms.is_empty() {
        parts.push(format!("**Platforms**: {}", t.platforms_joined()));
    }
    if !t.datasources.is_empty() {
        parts.push(format!("**Data Sources**: {}", t.datasources_joined()));
    }
    if let Some(detection) = t.detection.as_deref().filter(|d| !d.trim().is_empty()) {
        parts.push(format!("**Detection**: {}", clean_text(detection)));
    }
    if !t.mitigations.is_empty() {
        let lines: Vec<String> = t
            .mitigations
            .iter()
            .map(|m| {
                if m.description.is_empty() {
                    format!("- {}", m.name)
                } else {
                    format!("- {}: {}", m.name, clean_text(&m.description))
                }
            })
            .collect();
        parts.push(format!("**Mitigations**:\n{}", lines.join("\n")));
    }
    if let Some(url) = t.url.as_deref().filter(|u| !u.is_empty()) {
        parts.push(format!("**Reference**: {url}"));
    }

    parts.join("\n\n")
}
