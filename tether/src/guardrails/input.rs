//! Input guardrails: length bounds, disallowed-content rules, injection
//! heuristics.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::LimitsSettings;

/// A denylist rule: a name reported as the block reason and the patterns that
/// trigger it.
#[derive(Debug, Clone)]
pub struct ContentRule {
    pub name: &'static str,
    patterns: Vec<&'static str>,
}

static INJECTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)ignore (all |any )?(previous|prior|above) (instructions|rules|prompts)",
        r"(?i)you are now [a-z]",
        r"(?i)system prompt",
        r"(?i)\bdisregard\b.*\b(instructions|guidelines)\b",
        r"(?i)(;|--)\s*(drop|delete|truncate)\s+(table|from|database)",
        r"(?i)\bunion\s+select\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

fn default_rules() -> Vec<ContentRule> {
    vec![
        ContentRule {
            name: "violence",
            patterns: vec!["kill", "bomb", "shoot", "matar", "bomba"],
        },
        ContentRule {
            name: "illegal_goods",
            patterns: vec!["buy drugs", "stolen card", "counterfeit", "tarjeta robada"],
        },
        ContentRule {
            name: "abuse",
            patterns: vec!["idiot", "stupid bot", "imbécil"],
        },
    ]
}

/// Outcome of the input checks.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardrailVerdict {
    pub blocked: bool,
    pub risk_score: f32,
    pub reason: Option<String>,
}

impl GuardrailVerdict {
    fn clean() -> Self {
        Self {
            blocked: false,
            risk_score: 0.0,
            reason: None,
        }
    }

    fn blocked(reason: impl Into<String>, risk_score: f32) -> Self {
        Self {
            blocked: true,
            risk_score,
            reason: Some(reason.into()),
        }
    }
}

/// The input guardrail set. Rules are checked case-insensitively against the
/// raw question.
pub struct InputGuardrails {
    limits: LimitsSettings,
    rules: Vec<ContentRule>,
}

impl InputGuardrails {
    pub fn new(limits: LimitsSettings) -> Self {
        Self {
            limits,
            rules: default_rules(),
        }
    }

    pub fn check(&self, question: &str) -> GuardrailVerdict {
        let trimmed = question.trim();
        if trimmed.chars().count() < self.limits.min_question_chars {
            return GuardrailVerdict::blocked("too_short", 0.1);
        }
        if trimmed.chars().count() > self.limits.max_question_chars {
            return GuardrailVerdict::blocked("too_long", 0.1);
        }

        let lowered = trimmed.to_lowercase();
        for rule in &self.rules {
            if rule.patterns.iter().any(|p| lowered.contains(p)) {
                return GuardrailVerdict::blocked(format!("disallowed_content:{}", rule.name), 0.9);
            }
        }

        for pattern in INJECTION_PATTERNS.iter() {
            if pattern.is_match(trimmed) {
                return GuardrailVerdict::blocked("injection_suspected", 0.8);
            }
        }

        GuardrailVerdict::clean()
    }
}
