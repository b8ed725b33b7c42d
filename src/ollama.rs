//! Ollama API client for text completion and embeddings.

mod client;

pub use client::{OllamaClient, OllamaClientBuilder, OllamaClientTrait, OllamaError, retry_with_backoff};
