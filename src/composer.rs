//! Answer synthesis from retrieved notes and weather facts.
//!
//! The composer assembles a grounding context (notes in relevance order,
//! weather as a labeled block), asks the completion backend to answer only
//! from that context, and provides a deterministic raw fallback for when
//! the completion call itself fails.

use std::sync::Arc;

use tracing::error;

use crate::index::ScoredNote;
use crate::ollama::{OllamaClientTrait, OllamaError};
use crate::weather::WeatherSnapshot;

/// Prompt template for grounded travel answers.
const PROMPT_TEMPLATE: &str = r#"You are a concise travel advisor. Answer the user's question using ONLY the context provided below.

RULES:
1. Only use information from the SAVED NOTES and CURRENT WEATHER sections - do not add outside knowledge
2. If the notes section says no notes matched, state clearly that you have no saved notes on this topic
3. If the weather section says weather is unavailable, state clearly that current weather could not be retrieved - never invent weather conditions
4. Keep the answer short and directly relevant to the question

QUESTION:
{question}

{context}

ANSWER:"#;

/// Composes grounded natural-language answers.
///
/// Cheap to clone (the backend is shared), so a compose call can run on a
/// short-lived thread and be abandoned at a deadline.
#[derive(Clone)]
pub struct AnswerComposer {
    client: Arc<dyn OllamaClientTrait>,
    model: String,
}

impl AnswerComposer {
    /// Creates a composer using the given completion backend and model.
    pub fn new(client: Arc<dyn OllamaClientTrait>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// Produces an answer from the question and grounding inputs.
    ///
    /// Notes must already be ordered by descending relevance. A `None`
    /// weather argument means the weather branch degraded; the prompt
    /// then instructs the model to say so explicitly. Errors from the
    /// completion backend are returned to the caller, which falls back to
    /// `fallback_answer`.
    pub fn compose(
        &self,
        question: &str,
        notes: &[ScoredNote],
        weather: Option<&WeatherSnapshot>,
    ) -> Result<String, OllamaError> {
        let context = build_grounding_context(notes, weather);
        let prompt = PROMPT_TEMPLATE
            .replace("{question}", question)
            .replace("{context}", &context);

        let response = self.client.generate(&self.model, &prompt).inspect_err(|e| {
            error!(error = %e, "completion backend failed, caller will use raw fallback");
        })?;

        Ok(response.trim().to_string())
    }

    /// Builds an answer directly from the raw inputs, without the
    /// language-model step.
    ///
    /// Used when the completion backend is unavailable. Contains the
    /// verbatim content of the retrieved notes (at minimum the top note)
    /// and the weather facts, with the same unavailability statements a
    /// composed answer would carry. With no notes and no weather this
    /// degrades to a fixed no-information message.
    pub fn fallback_answer(notes: &[ScoredNote], weather: Option<&WeatherSnapshot>) -> String {
        if notes.is_empty() && weather.is_none() {
            return "No information available for this destination.".to_string();
        }

        let mut parts = Vec::new();

        if notes.is_empty() {
            parts.push("No saved notes matched this question.".to_string());
        } else {
            let mut section = String::from("From your saved notes:");
            for note in notes {
                section.push_str("\n- ");
                section.push_str(&note.text);
            }
            parts.push(section);
        }

        match weather {
            Some(snapshot) => parts.push(format_weather(snapshot)),
            None => parts.push("Current weather could not be retrieved.".to_string()),
        }

        parts.join("\n\n")
    }
}

/// Formats the grounding context: notes by descending relevance, then the
/// weather block, each with explicit unavailability markers.
fn build_grounding_context(notes: &[ScoredNote], weather: Option<&WeatherSnapshot>) -> String {
    let mut context = String::from("SAVED NOTES:\n");

    if notes.is_empty() {
        context.push_str("(no saved notes matched this question)\n");
    } else {
        for note in notes {
            context.push_str(&format!(
                "[NOTE {} relevance={:.2}] {}\n",
                note.note_id, note.score, note.text
            ));
        }
    }

    context.push_str("\nCURRENT WEATHER:\n");
    match weather {
        Some(snapshot) => {
            context.push_str(&format_weather(snapshot));
            context.push('\n');
        }
        None => context.push_str("(unavailable - current weather could not be retrieved)\n"),
    }

    context
}

/// Renders a weather snapshot as a single sentence.
fn format_weather(snapshot: &WeatherSnapshot) -> String {
    format!(
        "Current weather in {}: {}, {:.1}°C.",
        snapshot.coordinate.name, snapshot.summary, snapshot.temperature_c
    )
}
