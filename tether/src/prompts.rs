//! System prompts per (language, mode) and the refusal token contract.
//!
//! The generation prompt mandates answering only from the supplied context;
//! when the context is insufficient the model must reply with exactly
//! [`REFUSAL_TOKEN`], which downstream maps to escalation.

use std::collections::HashMap;

use crate::model::Language;

/// The token the model must emit when the context cannot answer the question.
pub const REFUSAL_TOKEN: &str = "[NO_ANSWER]";

/// Prompt selection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptMode {
    /// Normal grounded answering.
    Answer,
    /// The refusal/escalation message shown to the user.
    Escalation,
}

const ANSWER_EN: &str = "You are a customer support assistant. Answer the user's question using ONLY the context provided below. Do not use outside knowledge. If the context does not contain the information needed to answer, reply with exactly [NO_ANSWER] and nothing else. Keep answers short and factual.";

const ANSWER_ES: &str = "Eres un asistente de atención al cliente. Responde la pregunta del usuario usando SOLAMENTE el contexto proporcionado abajo. No uses conocimiento externo. Si el contexto no contiene la información necesaria, responde exactamente [NO_ANSWER] y nada más. Mantén las respuestas breves y factuales.";

const ESCALATION_EN: &str = "I wasn't able to find a reliable answer to your question. I'm forwarding the conversation to a human agent who will follow up with you shortly.";

const ESCALATION_ES: &str = "No pude encontrar una respuesta fiable a tu pregunta. Estoy remitiendo la conversación a un agente humano que te contactará en breve.";

/// Prompt set keyed by (language, mode). Construct once and share.
pub struct PromptSet {
    prompts: HashMap<(Language, PromptMode), String>,
}

impl PromptSet {
    pub fn new() -> Self {
        let mut prompts = HashMap::new();
        prompts.insert((Language::En, PromptMode::Answer), ANSWER_EN.to_string());
        prompts.insert((Language::Es, PromptMode::Answer), ANSWER_ES.to_string());
        prompts.insert(
            (Language::En, PromptMode::Escalation),
            ESCALATION_EN.to_string(),
        );
        prompts.insert(
            (Language::Es, PromptMode::Escalation),
            ESCALATION_ES.to_string(),
        );
        Self { prompts }
    }

    pub fn system_prompt(&self, language: Language, mode: PromptMode) -> &str {
        self.prompts
            .get(&(language, mode))
            .or_else(|| self.prompts.get(&(Language::En, mode)))
            .map(String::as_str)
            .unwrap_or(ANSWER_EN)
    }

    /// The user-facing escalation message for a language.
    pub fn escalation_message(&self, language: Language) -> &str {
        self.system_prompt(language, PromptMode::Escalation)
    }

    /// Assembles the final user message: merged context + question.
    pub fn user_message(&self, language: Language, context: &str, question: &str) -> String {
        match language {
            Language::Es => format!("Contexto:\n{}\n\nPregunta: {}", context, question),
            Language::En => format!("Context:\n{}\n\nQuestion: {}", context, question),
        }
    }
}

impl Default for PromptSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a model reply is the refusal token (alone or wrapping whitespace).
pub fn is_refusal(reply: &str) -> bool {
    reply.trim() == REFUSAL_TOKEN
}
