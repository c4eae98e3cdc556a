//! Language detection node. Heuristic, no model call.

use async_trait::async_trait;
use once_cell::sync::Lazy;

use crate::contract::NodeContract;
use crate::error::NodeError;
use crate::graph::{Next, PipelineContext, PipelineNode};
use crate::model::Language;
use crate::search::tokenize;
use crate::state::{Field, QueryState};

use super::require_question;

static SPANISH_MARKERS: Lazy<std::collections::HashSet<&'static str>> = Lazy::new(|| {
    [
        "el", "la", "los", "las", "un", "una", "es", "está", "cómo", "como", "qué", "que",
        "dónde", "donde", "cuándo", "cuando", "por", "para", "mi", "tu", "su", "puedo", "quiero",
        "necesito", "hacer", "pedido", "contraseña", "cuenta", "ayuda", "gracias", "hola",
        "factura", "envío", "devolución", "reembolso",
    ]
    .into_iter()
    .collect()
});

fn detect(question: &str) -> Language {
    if question
        .chars()
        .any(|c| matches!(c, '¿' | '¡' | 'á' | 'é' | 'í' | 'ó' | 'ú' | 'ñ' | 'ü'))
    {
        return Language::Es;
    }
    let tokens = tokenize(question);
    if tokens.is_empty() {
        return Language::En;
    }
    let spanish = tokens
        .iter()
        .filter(|t| SPANISH_MARKERS.contains(t.as_str()))
        .count();
    if spanish * 3 >= tokens.len() {
        Language::Es
    } else {
        Language::En
    }
}

/// Detects the question language for prompt and word-list selection.
pub struct LanguageNode;

#[async_trait]
impl PipelineNode for LanguageNode {
    fn id(&self) -> &str {
        "language"
    }

    fn contract(&self) -> NodeContract {
        NodeContract::new()
            .requires(&[Field::Question])
            .guarantees(&[Field::Language])
    }

    fn recovery_patch(&self) -> QueryState {
        QueryState {
            language: Some(Language::En),
            ..Default::default()
        }
    }

    async fn execute(
        &self,
        _ctx: &PipelineContext,
        input: &QueryState,
    ) -> Result<(QueryState, Next), NodeError> {
        let question = require_question(input)?;
        let patch = QueryState {
            language: Some(detect(question)),
            ..Default::default()
        };
        Ok((patch, Next::Continue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: English and Spanish questions are told apart.
    #[test]
    fn detects_both_languages() {
        assert_eq!(detect("How do I reset my password?"), Language::En);
        assert_eq!(detect("¿Cómo cambio mi contraseña?"), Language::Es);
        assert_eq!(detect("necesito ayuda con mi pedido"), Language::Es);
    }

    /// **Scenario**: Ambiguous or empty input defaults to English.
    #[test]
    fn defaults_to_english() {
        assert_eq!(detect("???"), Language::En);
        assert_eq!(detect("ok"), Language::En);
    }
}
