//! Stateless content redaction preview.
//!
//! Pure string in, string out: no filesystem access and no shared state. Rules are applied in a
//! fixed order, each over the output of the previous one.
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionKind {
    ApiKey,
    BearerToken,
    AwsKey,
    Password,
    PrivateKey,
    ConnectionString,
    Jwt,
    GithubToken,
    SlackToken,
    CreditCard,
    Ssn,
}

struct RedactionRule {
    kind: RedactionKind,
    regex: Regex,
    replacement: &'static str,
}

const RULE_SOURCES: &[(RedactionKind, &str, &str)] = &[
    (
        RedactionKind::ApiKey,
        r#"(?i)(api[_-]?key|apikey)\s*[:=]\s*["']?([a-zA-Z0-9_\-]{20,})["']?"#,
        "${1}=<REDACTED_API_KEY>",
    ),
    (
        RedactionKind::BearerToken,
        r"(?i)(bearer)\s+([a-zA-Z0-9_\-\.]+)",
        "${1} <REDACTED_BEARER_TOKEN>",
    ),
    (
        RedactionKind::AwsKey,
        r#"(?i)(aws[_-]?(?:access[_-]?key[_-]?id|secret[_-]?access[_-]?key))\s*[:=]\s*["']?([A-Z0-9/+=]{16,})["']?"#,
        "${1}=<REDACTED_AWS_KEY>",
    ),
    (
        RedactionKind::Password,
        r#"(?i)(password|passwd|pwd|secret|token)\s*[:=]\s*["']?([^\s"']{8,})["']?"#,
        "${1}=<REDACTED>",
    ),
    (
        RedactionKind::PrivateKey,
        r"-----BEGIN\s+(?:RSA\s+)?PRIVATE\s+KEY-----[\s\S]*?-----END\s+(?:RSA\s+)?PRIVATE\s+KEY-----",
        "<REDACTED_PRIVATE_KEY>",
    ),
    (
        RedactionKind::ConnectionString,
        r"(?i)((?:mongodb|postgres|mysql|redis|amqp)(?:\+\w+)?://[^:]+:)([^@]+)(@.+)",
        "${1}<REDACTED>${3}",
    ),
    (
        RedactionKind::Jwt,
        r"eyJ[a-zA-Z0-9_-]+\.eyJ[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+",
        "<REDACTED_JWT>",
    ),
    (
        RedactionKind::GithubToken,
        r"gh[pousr]_[a-zA-Z0-9]{36,}",
        "<REDACTED_GITHUB_TOKEN>",
    ),
    (
        RedactionKind::SlackToken,
        r"xox[baprs]-[a-zA-Z0-9-]+",
        "<REDACTED_SLACK_TOKEN>",
    ),
    (
        RedactionKind::CreditCard,
        r"\b(?:\d{4}[- ]?){3}\d{4}\b",
        "<REDACTED_CARD_NUMBER>",
    ),
    (RedactionKind::Ssn, r"\b\d{3}-\d{2}-\d{4}\b", "<REDACTED_SSN>"),
];

static RULES: LazyLock<Vec<RedactionRule>> = LazyLock::new(|| {
    RULE_SOURCES
        .iter()
        .filter_map(|&(kind, source, replacement)| match Regex::new(source) {
            Ok(regex) => Some(RedactionRule {
                kind,
                regex,
                replacement,
            }),
            Err(err) => {
                tracing::error!(?kind, error = %err, "redaction rule failed to compile");
                None
            }
        })
        .collect()
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactPreviewRequest {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactPreviewResponse {
    pub content: String,
    pub redactions_applied: usize,
    /// Kinds that matched at least once, in rule order.
    pub redaction_types: Vec<RedactionKind>,
    /// Lengths in characters.
    pub original_length: usize,
    pub redacted_length: usize,
}

pub fn redact_preview(content: &str) -> RedactPreviewResponse {
    let mut redacted = content.to_string();
    let mut redactions_applied = 0usize;
    let mut redaction_types = Vec::<RedactionKind>::new();

    for rule in RULES.iter() {
        let hits = rule.regex.find_iter(&redacted).count();
        if hits == 0 {
            continue;
        }
        redactions_applied += hits;
        if !redaction_types.contains(&rule.kind) {
            redaction_types.push(rule.kind);
        }
        redacted = rule
            .regex
            .replace_all(&redacted, rule.replacement)
            .into_owned();
    }

    RedactPreviewResponse {
        original_length: content.chars().count(),
        redacted_length: redacted.chars().count(),
        content: redacted,
        redactions_applied,
        redaction_types,
    }
}

/// Redacted text only.
pub fn redact_text(content: &str) -> String {
    redact_preview(content).content
}
