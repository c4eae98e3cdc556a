//! Output guardrails: PII redaction, disallowed content, groundedness.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::search::tokenize;

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("static"));
static PHONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+?\d[\d\s().-]{7,}\d").expect("static"));
static CARD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d[ -]?){13,16}\b").expect("static"));

/// Replaces emails, phone numbers, and card-like digit runs. Returns the
/// redacted text and the number of replacements.
pub fn redact_pii(text: &str) -> (String, usize) {
    let mut count = 0;
    let mut out = text.to_string();
    for (pattern, placeholder) in [
        (&*CARD, "[redacted-card]"),
        (&*EMAIL, "[redacted-email]"),
        (&*PHONE, "[redacted-phone]"),
    ] {
        let replaced = pattern.replace_all(&out, placeholder);
        if replaced != out {
            count += pattern.find_iter(&out).count();
            out = replaced.into_owned();
        }
    }
    (out, count)
}

/// Fraction of the answer's content words supported by the retrieved context.
/// 1.0 when every content word appears in the context; 0.0 for an empty
/// context with a non-empty answer.
pub fn groundedness(answer: &str, context: &str) -> f32 {
    let answer_tokens: Vec<String> = tokenize(answer)
        .into_iter()
        .filter(|t| t.len() > 3)
        .collect();
    if answer_tokens.is_empty() {
        return 1.0;
    }
    let context_tokens: std::collections::HashSet<String> = tokenize(context).into_iter().collect();
    let supported = answer_tokens
        .iter()
        .filter(|t| context_tokens.contains(*t))
        .count();
    supported as f32 / answer_tokens.len() as f32
}

/// Outcome of the output checks.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputVerdict {
    /// The (possibly redacted) answer may be sent.
    Pass { answer: String, redactions: usize },
    /// The answer is unsupported by the context; escalate instead.
    Ungrounded { score: f32 },
    /// The model produced disallowed content; escalate instead.
    Disallowed,
}

/// The output guardrail set.
pub struct OutputGuardrails {
    /// Answers below this support fraction are replaced with an escalation.
    pub groundedness_floor: f32,
}

impl OutputGuardrails {
    pub fn new(groundedness_floor: f32) -> Self {
        Self { groundedness_floor }
    }

    pub fn check(&self, answer: &str, context: &str) -> OutputVerdict {
        let lowered = answer.to_lowercase();
        for marker in ["kill", "bomb", "matar", "bomba"] {
            if lowered.contains(marker) {
                return OutputVerdict::Disallowed;
            }
        }

        let score = groundedness(answer, context);
        if score < self.groundedness_floor {
            return OutputVerdict::Ungrounded { score };
        }

        let (redacted, redactions) = redact_pii(answer);
        OutputVerdict::Pass {
            answer: redacted,
            redactions,
        }
    }
}
