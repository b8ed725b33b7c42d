pub mod composer;
pub mod db;
pub mod doctor;
pub mod geo;
pub mod index;
pub mod models;
pub mod ollama;
pub mod pipeline;
pub mod store;
pub mod utils;
pub mod weather;

pub use composer::AnswerComposer;
pub use db::Database;
pub use geo::{GeoCoordinate, GeoError, GeoResolver, Geocoder, NominatimClient};
pub use index::{DEFAULT_TOP_K, IndexEntry, IndexManager, ScoredNote, VectorIndex};
pub use models::{Destination, DestinationId, Note, NoteBuilder, NoteId};
pub use ollama::{OllamaClient, OllamaClientBuilder, OllamaClientTrait, OllamaError};
pub use pipeline::{Answerer, AnswererBuilder, AnswerResult, DegradedSource, SourceNote};
pub use store::{StoreError, TravelStore};
pub use weather::{
    OpenMeteoClient, WeatherError, WeatherFetcher, WeatherService, WeatherSnapshot,
};
