//! The answer synthesis pipeline.
//!
//! Per request the orchestrator runs two independent branches in parallel:
//! local-knowledge retrieval (index build + question embedding + top-k
//! search) and weather resolution (geocode, then current conditions). The
//! branches share no mutable state and are joined against an outer
//! deadline; the synthesis step runs against the remainder of the same
//! deadline. Every internal failure becomes a degraded
//! source marker or a fallback answer; the orchestrator never raises past
//! its own boundary except for store-level validation errors
//! (`DestinationNotFound` and friends), which belong to the caller.

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::composer::AnswerComposer;
use crate::geo::{GeoResolver, Geocoder};
use crate::index::{DEFAULT_TOP_K, IndexManager, ScoredNote};
use crate::models::{DestinationId, Note, NoteId};
use crate::ollama::{OllamaClientTrait, OllamaError};
use crate::store::{StoreError, TravelStore};
use crate::weather::{WeatherFetcher, WeatherService, WeatherSnapshot};

/// An external input that failed but did not abort the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedSource {
    /// Retrieval over the saved notes failed (embedding backend down).
    LocalNotes,
    /// Geocoding or the weather service failed, or the branch timed out.
    Weather,
    /// The completion backend failed; the answer is the raw fallback.
    Synthesis,
}

impl fmt::Display for DegradedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalNotes => write!(f, "local notes"),
            Self::Weather => write!(f, "weather"),
            Self::Synthesis => write!(f, "synthesis"),
        }
    }
}

/// A note that contributed to the answer, with its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceNote {
    /// The contributing note.
    pub note_id: NoteId,
    /// Cosine similarity between the question and the note, in [-1, 1].
    pub score: f32,
}

/// The structured outcome of one answer request.
///
/// Always produced, even under total external-service outage. Transient:
/// returned per request, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerResult {
    /// The question that was asked.
    pub question: String,
    /// The destination the question was about.
    pub destination_id: DestinationId,
    /// The final answer text.
    pub answer: String,
    /// Notes used as grounding, in descending relevance order.
    pub sources: Vec<SourceNote>,
    /// True if live weather facts made it into the answer.
    pub weather_included: bool,
    /// Sources that failed during this request.
    pub degraded: Vec<DegradedSource>,
}

/// Outcome of the local-knowledge branch.
struct LocalOutcome {
    retrieved: Vec<ScoredNote>,
    degraded: bool,
}

/// Builder for `Answerer` instances.
#[derive(Default)]
pub struct AnswererBuilder {
    ollama: Option<Arc<dyn OllamaClientTrait>>,
    geocoder: Option<Box<dyn Geocoder>>,
    weather: Option<Box<dyn WeatherService>>,
    model: Option<String>,
    embed_model: Option<String>,
    top_k: Option<usize>,
    outer_deadline: Option<Duration>,
}

impl AnswererBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the Ollama client used for embeddings and completion.
    pub fn ollama(mut self, client: Arc<dyn OllamaClientTrait>) -> Self {
        self.ollama = Some(client);
        self
    }

    /// Sets the geocoding backend.
    pub fn geocoder(mut self, geocoder: Box<dyn Geocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    /// Sets the weather backend.
    pub fn weather(mut self, weather: Box<dyn WeatherService>) -> Self {
        self.weather = Some(weather);
        self
    }

    /// Sets the completion model name.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the embedding model name.
    pub fn embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = Some(model.into());
        self
    }

    /// Sets the number of notes retrieved per question.
    pub fn top_k(mut self, k: usize) -> Self {
        self.top_k = Some(k);
        self
    }

    /// Sets the outer deadline after which pending branches are abandoned.
    pub fn outer_deadline(mut self, deadline: Duration) -> Self {
        self.outer_deadline = Some(deadline);
        self
    }

    /// Builds the `Answerer`.
    ///
    /// # Panics
    ///
    /// Panics if `ollama()`, `geocoder()`, or `weather()` was not called.
    #[must_use]
    pub fn build(self) -> Answerer {
        let ollama = self.ollama.expect("ollama client must be set");
        let model = self.model.unwrap_or_default();

        Answerer {
            composer: AnswerComposer::new(Arc::clone(&ollama), model),
            ollama,
            embed_model: self
                .embed_model
                .unwrap_or_else(|| "nomic-embed-text".to_string()),
            indexes: Arc::new(IndexManager::new()),
            geo: Arc::new(GeoResolver::new(self.geocoder.expect("geocoder must be set"))),
            weather: Arc::new(WeatherFetcher::new(
                self.weather.expect("weather service must be set"),
            )),
            top_k: self.top_k.unwrap_or(DEFAULT_TOP_K),
            outer_deadline: self.outer_deadline.unwrap_or(Duration::from_secs(20)),
        }
    }
}

/// Orchestrates the answer synthesis pipeline.
///
/// Owns the per-destination index cache, the geo cache, and the backend
/// clients. One instance serves many requests; branches for a single
/// request run on short-lived threads.
pub struct Answerer {
    ollama: Arc<dyn OllamaClientTrait>,
    embed_model: String,
    composer: AnswerComposer,
    indexes: Arc<IndexManager>,
    geo: Arc<GeoResolver<Box<dyn Geocoder>>>,
    weather: Arc<WeatherFetcher<Box<dyn WeatherService>>>,
    top_k: usize,
    outer_deadline: Duration,
}

impl Answerer {
    /// Returns the index manager, for invalidation after note or
    /// destination mutations.
    pub fn index_manager(&self) -> &Arc<IndexManager> {
        &self.indexes
    }

    /// Answers a question about a destination.
    ///
    /// This is the single entry point the request layer invokes. Unknown
    /// destination IDs surface as `StoreError::DestinationNotFound`; all
    /// external-service failures are absorbed into the result's
    /// `degraded` list instead of erroring.
    pub fn answer(
        &self,
        store: &TravelStore,
        destination_id: DestinationId,
        question: &str,
    ) -> Result<AnswerResult, StoreError> {
        let destination = store.get_destination(destination_id)?;
        let notes = store.list_notes(destination_id)?;

        info!(
            destination = %destination.name,
            notes = notes.len(),
            "answering question"
        );

        let deadline = Instant::now() + self.outer_deadline;
        let local_rx = self.spawn_local_branch(destination_id, notes, question);
        let weather_rx = self.spawn_weather_branch(destination.name.clone());

        let mut degraded = Vec::new();

        let local = match recv_until(&local_rx, deadline) {
            Some(outcome) => {
                if outcome.degraded {
                    degraded.push(DegradedSource::LocalNotes);
                }
                outcome.retrieved
            }
            None => {
                warn!("local knowledge branch missed the deadline, abandoning it");
                degraded.push(DegradedSource::LocalNotes);
                Vec::new()
            }
        };

        let weather = match recv_until(&weather_rx, deadline) {
            Some(Some(snapshot)) => Some(snapshot),
            Some(None) => {
                degraded.push(DegradedSource::Weather);
                None
            }
            None => {
                warn!("weather branch missed the deadline, abandoning it");
                degraded.push(DegradedSource::Weather);
                None
            }
        };

        let weather_included = weather.is_some();
        let sources: Vec<SourceNote> = local
            .iter()
            .map(|n| SourceNote {
                note_id: n.note_id,
                score: n.score,
            })
            .collect();

        // With nothing to ground on there is nothing to synthesize
        let answer = if local.is_empty() && weather.is_none() {
            AnswerComposer::fallback_answer(&local, None)
        } else {
            let compose_rx = self.spawn_compose(question, local.clone(), weather.clone());
            match recv_until(&compose_rx, deadline) {
                Some(Ok(text)) => text,
                Some(Err(_)) => {
                    degraded.push(DegradedSource::Synthesis);
                    AnswerComposer::fallback_answer(&local, weather.as_ref())
                }
                None => {
                    warn!("synthesis missed the deadline, abandoning it");
                    degraded.push(DegradedSource::Synthesis);
                    AnswerComposer::fallback_answer(&local, weather.as_ref())
                }
            }
        };

        Ok(AnswerResult {
            question: question.to_string(),
            destination_id,
            answer,
            sources,
            weather_included,
            degraded,
        })
    }

    /// Spawns the local-knowledge branch: freshen the index, embed the
    /// question, retrieve top-k.
    fn spawn_local_branch(
        &self,
        destination_id: DestinationId,
        notes: Vec<Note>,
        question: &str,
    ) -> mpsc::Receiver<LocalOutcome> {
        let (tx, rx) = mpsc::channel();
        let ollama = Arc::clone(&self.ollama);
        let indexes = Arc::clone(&self.indexes);
        let embed_model = self.embed_model.clone();
        let question = question.to_string();
        let top_k = self.top_k;

        thread::spawn(move || {
            let outcome = if notes.is_empty() {
                // No notes is a valid empty-knowledge state, not a failure
                LocalOutcome {
                    retrieved: Vec::new(),
                    degraded: false,
                }
            } else {
                let index =
                    indexes.ensure_fresh(destination_id, &notes, ollama.as_ref(), &embed_model);
                if index.is_empty() {
                    // Build degraded to an empty index under backend outage
                    LocalOutcome {
                        retrieved: Vec::new(),
                        degraded: true,
                    }
                } else {
                    match ollama.embed(&embed_model, &question) {
                        Ok(embedding) => LocalOutcome {
                            retrieved: index.retrieve(&embedding, top_k),
                            degraded: false,
                        },
                        Err(e) => {
                            warn!(error = %e, "question embedding failed");
                            LocalOutcome {
                                retrieved: Vec::new(),
                                degraded: true,
                            }
                        }
                    }
                }
            };

            // Receiver may have hit the outer deadline and gone away
            let _ = tx.send(outcome);
        });

        rx
    }

    /// Spawns the synthesis step so the outer deadline also bounds the
    /// completion call. A backend that never returns leaves a detached
    /// thread behind, same as an abandoned branch.
    fn spawn_compose(
        &self,
        question: &str,
        notes: Vec<ScoredNote>,
        weather: Option<WeatherSnapshot>,
    ) -> mpsc::Receiver<Result<String, OllamaError>> {
        let (tx, rx) = mpsc::channel();
        let composer = self.composer.clone();
        let question = question.to_string();

        thread::spawn(move || {
            let _ = tx.send(composer.compose(&question, &notes, weather.as_ref()));
        });

        rx
    }

    /// Spawns the weather branch: resolve coordinates, then fetch current
    /// conditions. Geocoding failure short-circuits the fetch.
    fn spawn_weather_branch(&self, destination_name: String) -> mpsc::Receiver<Option<WeatherSnapshot>> {
        let (tx, rx) = mpsc::channel();
        let geo = Arc::clone(&self.geo);
        let weather = Arc::clone(&self.weather);

        thread::spawn(move || {
            let snapshot = match geo.resolve(&destination_name) {
                Ok(coordinate) => match weather.fetch(&coordinate) {
                    Ok(snapshot) => Some(snapshot),
                    Err(e) => {
                        warn!(destination = %destination_name, error = %e, "weather fetch degraded");
                        None
                    }
                },
                Err(e) => {
                    warn!(destination = %destination_name, error = %e, "geocoding degraded");
                    None
                }
            };

            let _ = tx.send(snapshot);
        });

        rx
    }
}

/// Receives from a branch channel until the shared deadline.
///
/// `None` means the branch is still pending at the deadline (or its thread
/// died); the caller marks it degraded and moves on.
fn recv_until<T>(rx: &mpsc::Receiver<T>, deadline: Instant) -> Option<T> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    rx.recv_timeout(remaining).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::geo::GeoError;
    use crate::ollama::OllamaError;
    use crate::weather::WeatherError;

    /// Deterministic fake model backend: embeds by word counts and
    /// answers by echoing the prompt behind a marker.
    struct FakeOllama {
        fail_embed: bool,
        fail_generate: bool,
        slow_embed: Option<Duration>,
        slow_generate: Option<Duration>,
    }

    impl FakeOllama {
        fn working() -> Self {
            Self {
                fail_embed: false,
                fail_generate: false,
                slow_embed: None,
                slow_generate: None,
            }
        }

        fn embeddings_down() -> Self {
            Self {
                fail_embed: true,
                ..Self::working()
            }
        }

        fn completion_down() -> Self {
            Self {
                fail_generate: true,
                ..Self::working()
            }
        }

        fn everything_down() -> Self {
            Self {
                fail_embed: true,
                fail_generate: true,
                ..Self::working()
            }
        }

        fn everything_slow(delay: Duration) -> Self {
            Self {
                slow_embed: Some(delay),
                slow_generate: Some(delay),
                ..Self::working()
            }
        }

        fn completion_slow(delay: Duration) -> Self {
            Self {
                slow_generate: Some(delay),
                ..Self::working()
            }
        }
    }

    impl OllamaClientTrait for FakeOllama {
        fn generate(&self, _model: &str, prompt: &str) -> Result<String, OllamaError> {
            if let Some(delay) = self.slow_generate {
                thread::sleep(delay);
            }
            if self.fail_generate {
                return Err(OllamaError::Http { status: 503 });
            }
            // Echo enough of the context to make assertions meaningful
            Ok(format!("GROUNDED ANSWER USING: {}", prompt))
        }

        fn embed(&self, _model: &str, text: &str) -> Result<Vec<f32>, OllamaError> {
            if let Some(delay) = self.slow_embed {
                thread::sleep(delay);
            }
            if self.fail_embed {
                return Err(OllamaError::Http { status: 503 });
            }
            // Bag-of-words over a tiny fixed vocabulary: similarity
            // orderings are exact and stable across rebuilds.
            const VOCAB: [&str; 6] = ["museum", "louvre", "bakeries", "art", "paris", "visit"];
            let lowered = text.to_lowercase();
            let v = VOCAB
                .iter()
                .map(|word| lowered.matches(word).count() as f32)
                .collect();
            Ok(v)
        }
    }

    struct FakeGeocoder {
        fail: bool,
    }

    impl Geocoder for FakeGeocoder {
        fn geocode(&self, name: &str) -> Result<(f64, f64), GeoError> {
            if self.fail {
                Err(GeoError::Unavailable("simulated outage".to_string()))
            } else if name == "Paris" {
                Ok((48.8566, 2.3522))
            } else {
                Err(GeoError::NotFound(name.to_string()))
            }
        }
    }

    struct FakeWeather {
        fail: bool,
    }

    impl WeatherService for FakeWeather {
        fn current_conditions(&self, _lat: f64, _lon: f64) -> Result<(f64, u32), WeatherError> {
            if self.fail {
                Err(WeatherError::Unavailable("simulated outage".to_string()))
            } else {
                Ok((18.5, 2))
            }
        }
    }

    fn answerer(ollama: FakeOllama, geo_fail: bool, weather_fail: bool) -> Answerer {
        AnswererBuilder::new()
            .ollama(Arc::new(ollama))
            .geocoder(Box::new(FakeGeocoder { fail: geo_fail }))
            .weather(Box::new(FakeWeather { fail: weather_fail }))
            .model("fake-model")
            .embed_model("fake-embed")
            .outer_deadline(Duration::from_secs(5))
            .build()
    }

    fn paris_store() -> (TravelStore, DestinationId) {
        let store = TravelStore::new(Database::in_memory().unwrap());
        let paris = store.create_destination("Paris").unwrap();
        store
            .create_note(paris.id, "The Louvre is a world-famous museum in Paris.")
            .unwrap();
        store
            .create_note(paris.id, "Paris has great bakeries.")
            .unwrap();
        (store, paris.id)
    }

    #[test]
    fn answer_grounds_on_relevant_note_and_weather() {
        let (store, paris) = paris_store();
        let answerer = answerer(FakeOllama::working(), false, false);

        let result = answerer
            .answer(&store, paris, "What museum should I visit in Paris?")
            .unwrap();

        assert!(result.answer.contains("Louvre"));
        assert!(result.weather_included);
        assert!(result.degraded.is_empty());
        assert_eq!(result.sources.len(), 2);

        // the museum note must outrank the bakery note
        let louvre = result
            .sources
            .iter()
            .find(|s| s.note_id == NoteId::new(1))
            .unwrap();
        let bakeries = result
            .sources
            .iter()
            .find(|s| s.note_id == NoteId::new(2))
            .unwrap();
        assert!(louvre.score > bakeries.score);
        assert_eq!(result.sources[0].note_id, NoteId::new(1));
    }

    #[test]
    fn answer_degrades_weather_without_losing_notes() {
        let (store, paris) = paris_store();
        let answerer = answerer(FakeOllama::working(), false, true);

        let result = answerer
            .answer(&store, paris, "What museum should I visit in Paris?")
            .unwrap();

        assert!(result.answer.contains("Louvre"));
        assert!(!result.weather_included);
        assert_eq!(result.degraded, vec![DegradedSource::Weather]);
        // the prompt marker makes it into the echoed answer
        assert!(result.answer.contains("current weather could not be retrieved"));
        assert!(!result.answer.contains("Current weather in Paris:"));
    }

    #[test]
    fn answer_degrades_weather_when_geocoding_fails() {
        let (store, paris) = paris_store();
        let answerer = answerer(FakeOllama::working(), true, false);

        let result = answerer.answer(&store, paris, "question").unwrap();

        assert!(!result.weather_included);
        assert_eq!(result.degraded, vec![DegradedSource::Weather]);
    }

    #[test]
    fn answer_survives_embedding_outage() {
        let (store, paris) = paris_store();
        let answerer = answerer(FakeOllama::embeddings_down(), false, false);

        let result = answerer.answer(&store, paris, "question").unwrap();

        assert!(result.degraded.contains(&DegradedSource::LocalNotes));
        assert!(result.sources.is_empty());
        // weather branch proceeds independently
        assert!(result.weather_included);
    }

    #[test]
    fn answer_falls_back_to_raw_notes_when_completion_fails() {
        let (store, paris) = paris_store();
        let answerer = answerer(FakeOllama::completion_down(), false, false);

        let result = answerer
            .answer(&store, paris, "What museum should I visit in Paris?")
            .unwrap();

        assert!(result.degraded.contains(&DegradedSource::Synthesis));
        // fallback carries the top retrieved note verbatim
        assert!(
            result
                .answer
                .contains("The Louvre is a world-famous museum in Paris.")
        );
        assert!(result.weather_included);
        assert!(result.answer.contains("Current weather in Paris:"));
    }

    #[test]
    fn answer_under_total_outage_still_produces_result() {
        let (store, paris) = paris_store();
        let answerer = answerer(FakeOllama::everything_down(), true, true);

        let result = answerer.answer(&store, paris, "question").unwrap();

        assert_eq!(result.answer, "No information available for this destination.");
        assert!(result.sources.is_empty());
        assert!(!result.weather_included);
        assert!(result.degraded.contains(&DegradedSource::LocalNotes));
        assert!(result.degraded.contains(&DegradedSource::Weather));
    }

    #[test]
    fn answer_with_no_notes_is_valid_empty_knowledge() {
        let store = TravelStore::new(Database::in_memory().unwrap());
        let paris = store.create_destination("Paris").unwrap();
        let answerer = answerer(FakeOllama::working(), false, false);

        let result = answerer.answer(&store, paris.id, "question").unwrap();

        assert!(result.sources.is_empty());
        // empty knowledge is not a degraded source
        assert!(!result.degraded.contains(&DegradedSource::LocalNotes));
        // the composed answer carries the explicit no-notes marker
        assert!(result.answer.contains("no saved notes matched this question"));
    }

    #[test]
    fn answer_for_unknown_destination_is_not_found() {
        let store = TravelStore::new(Database::in_memory().unwrap());
        let answerer = answerer(FakeOllama::working(), false, false);

        let result = answerer.answer(&store, DestinationId::new(99), "question");
        assert!(matches!(result, Err(StoreError::DestinationNotFound(_))));
    }

    #[test]
    fn answer_after_destination_deletion_is_not_found() {
        let (store, paris) = paris_store();
        let answerer = answerer(FakeOllama::working(), false, false);

        answerer.answer(&store, paris, "warm up the index").unwrap();

        store.delete_destination(paris).unwrap();
        answerer.index_manager().invalidate(paris);

        let result = answerer.answer(&store, paris, "question");
        assert!(matches!(result, Err(StoreError::DestinationNotFound(_))));
    }

    #[test]
    fn answer_picks_up_notes_added_after_first_query() {
        let (store, paris) = paris_store();
        let answerer = answerer(FakeOllama::working(), false, false);

        answerer.answer(&store, paris, "first question").unwrap();

        store
            .create_note(paris, "The Musee d'Orsay has impressionist art.")
            .unwrap();
        answerer.index_manager().invalidate(paris);

        let result = answerer.answer(&store, paris, "second question").unwrap();
        assert_eq!(result.sources.len(), 3);
    }

    fn answerer_with_deadline(ollama: FakeOllama, deadline: Duration) -> Answerer {
        AnswererBuilder::new()
            .ollama(Arc::new(ollama))
            .geocoder(Box::new(FakeGeocoder { fail: false }))
            .weather(Box::new(FakeWeather { fail: false }))
            .model("fake-model")
            .embed_model("fake-embed")
            .outer_deadline(deadline)
            .build()
    }

    #[test]
    fn slow_branches_are_abandoned_at_the_outer_deadline() {
        let (store, paris) = paris_store();
        let answerer = answerer_with_deadline(
            FakeOllama::everything_slow(Duration::from_secs(5)),
            Duration::from_millis(50),
        );

        let started = Instant::now();
        let result = answerer.answer(&store, paris, "question").unwrap();

        // Returned promptly instead of waiting out the slow backend
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(result.degraded.contains(&DegradedSource::LocalNotes));
        // Synthesis is bounded by the same deadline as the branches
        assert!(result.degraded.contains(&DegradedSource::Synthesis));
    }

    #[test]
    fn slow_completion_is_abandoned_and_falls_back_to_raw_notes() {
        let (store, paris) = paris_store();
        let answerer = answerer_with_deadline(
            FakeOllama::completion_slow(Duration::from_secs(5)),
            Duration::from_millis(200),
        );

        let started = Instant::now();
        let result = answerer
            .answer(&store, paris, "What museum should I visit in Paris?")
            .unwrap();

        // Retrieval and weather finished inside the deadline; only the
        // completion call was abandoned
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!result.degraded.contains(&DegradedSource::LocalNotes));
        assert!(result.degraded.contains(&DegradedSource::Synthesis));
        assert_eq!(result.sources.len(), 2);
        assert!(result.weather_included);
        assert!(
            result
                .answer
                .contains("The Louvre is a world-famous museum in Paris.")
        );
    }
}
