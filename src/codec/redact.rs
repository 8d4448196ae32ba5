//! Redaction chokepoint for text leaving or entering the membrane.

use regex::Regex;

use super::CodecError;
use crate::packet::RedactionPolicy;

/// Canonical replacement marker for redacted content.
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Upper bound on replacement passes.
const MAX_PASSES: usize = 4;

/// Redacts e-mail addresses, phone numbers, credential-shaped tokens and any
/// caller-supplied pattern.
#[derive(Debug, Clone)]
pub struct Redactor {
    patterns: Vec<Regex>,
}

impl Redactor {
    /// Create a redactor with the built-in patterns plus `extra` patterns.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidPattern`] if an extra pattern fails to compile.
    pub fn new(extra: &[String]) -> Result<Self, CodecError> {
        let mut patterns = default_patterns();
        patterns.extend(compile_all(extra)?);
        Ok(Self { patterns })
    }

    /// Redact `text` using the built-in patterns and the given policy.
    ///
    /// Field values named in `policy.redact_fields` are replaced first
    /// (`field: value`, `field=value`, case-insensitive). Pattern replacement
    /// then repeats until no pattern matches or the pass limit is reached.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidPattern`] if a policy pattern fails to compile.
    pub fn redact(&self, text: &str, policy: &RedactionPolicy) -> Result<String, CodecError> {
        let mut sanitized = text.to_owned();

        for field in &policy.redact_fields {
            if field.trim().is_empty() {
                continue;
            }
            let re = field_pattern(field)?;
            sanitized = re
                .replace_all(&sanitized, format!("${{key}}${{sep}}{REDACTION_MARKER}").as_str())
                .to_string();
        }

        let extra = compile_all(&policy.redact_patterns)?;
        let all: Vec<&Regex> = self.patterns.iter().chain(extra.iter()).collect();

        for _ in 0..MAX_PASSES {
            for pattern in &all {
                sanitized = pattern
                    .replace_all(&sanitized, REDACTION_MARKER)
                    .to_string();
            }
            if !all.iter().any(|p| p.is_match(&sanitized)) {
                break;
            }
        }
        Ok(sanitized)
    }
}

fn field_pattern(field: &str) -> Result<Regex, CodecError> {
    let pattern = format!(
        r#"(?i)(?P<key>\b{})(?P<sep>\s*[:=]\s*)("[^"]*"|[^\s,;]+)"#,
        regex::escape(field.trim())
    );
    Regex::new(&pattern).map_err(|source| CodecError::InvalidPattern {
        pattern: field.to_owned(),
        source,
    })
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>, CodecError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|source| CodecError::InvalidPattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}

fn default_patterns() -> Vec<Regex> {
    let patterns = [
        // e-mail
        r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}",
        // phone numbers
        r"(?:\+\d{1,3}[\s.\-]?)?(?:\(\d{3}\)\s?|\d{3}[\s.\-]?)\d{3}[\s.\-]?\d{4}\b",
        // credentials
        r"sk-ant-[A-Za-z0-9_\-]{10,}",
        r"sk-[A-Za-z0-9]{32,}",
        r"ghp_[A-Za-z0-9]{20,}",
        r"glpat-[A-Za-z0-9_\-]{16,}",
        r"xoxb-[A-Za-z0-9\-]{20,}",
    ];

    patterns
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
}
