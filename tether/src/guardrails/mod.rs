//! Input and output guardrails.
//!
//! Input checks run before anything else touches the query, in particular
//! before the cache, so disallowed content is never cached or served from
//! cache. Output checks run after generation: PII redaction, disallowed
//! content, and the groundedness gate that turns unsupported answers into
//! escalations.

mod input;
mod output;

pub use input::{GuardrailVerdict, InputGuardrails};
pub use output::{groundedness, redact_pii, OutputGuardrails, OutputVerdict};
