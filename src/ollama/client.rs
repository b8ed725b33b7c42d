/// Ollama HTTP client implementation.
///
/// This module provides `OllamaClient` for making synchronous HTTP requests
/// to the Ollama API, covering both completion (`/api/generate`) and
/// embedding (`/api/embeddings`) endpoints, along with error types and a
/// builder pattern for configuration.
use std::thread;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when interacting with the Ollama API.
#[derive(Debug, Error)]
pub enum OllamaError {
    /// Network-related errors (connection failures, DNS resolution, etc.)
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    /// Request or response timeout errors
    #[error("Request timed out")]
    Timeout(#[source] reqwest::Error),

    /// HTTP errors with status code
    #[error("HTTP error: status {status}")]
    Http { status: u16 },

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Ollama API-specific errors
    #[error("Ollama API error: {message}")]
    Api { message: String },

    /// Invalid URL configuration error
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Builder for constructing `OllamaClient` instances.
///
/// # Examples
///
/// ```
/// use waypoint::OllamaClientBuilder;
///
/// let client = OllamaClientBuilder::new()
///     .base_url("http://localhost:11434")
///     .build()
///     .expect("Failed to create client");
/// ```
#[derive(Debug, Default)]
pub struct OllamaClientBuilder {
    base_url: Option<String>,
    model: Option<String>,
    embed_model: Option<String>,
}

impl OllamaClientBuilder {
    /// Creates a new `OllamaClientBuilder` with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base URL for the Ollama API.
    ///
    /// # Arguments
    ///
    /// * `url` - The base URL (e.g., "http://localhost:11434")
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the completion model name for Ollama API calls.
    ///
    /// # Arguments
    ///
    /// * `model` - The model name (e.g., "gemma3:4b" or "deepseek-r1:8b")
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the embedding model name for Ollama API calls.
    ///
    /// # Arguments
    ///
    /// * `model` - The embedding model name (e.g., "nomic-embed-text")
    pub fn embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = Some(model.into());
        self
    }

    /// Builds the `OllamaClient` with the configured settings.
    ///
    /// # Environment Variables
    ///
    /// If `base_url()` was not called, this method checks the `OLLAMA_HOST`
    /// environment variable, defaulting to `http://localhost:11434`.
    /// `model()` falls back to `OLLAMA_MODEL` (default empty), and
    /// `embed_model()` falls back to `OLLAMA_EMBED_MODEL` (default
    /// `nomic-embed-text`). Builder methods take precedence over the
    /// environment.
    pub fn build(self) -> Result<OllamaClient, OllamaError> {
        let base_url = if let Some(url) = self.base_url {
            url
        } else {
            std::env::var("OLLAMA_HOST").unwrap_or_else(|_| "http://localhost:11434".to_string())
        };

        let model = if let Some(m) = self.model {
            m
        } else {
            std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| String::new())
        };

        let embed_model = if let Some(m) = self.embed_model {
            m
        } else {
            std::env::var("OLLAMA_EMBED_MODEL").unwrap_or_else(|_| "nomic-embed-text".to_string())
        };

        // Validate URL
        reqwest::Url::parse(&base_url)
            .map_err(|e| OllamaError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        // Create reqwest blocking client with timeout configuration
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(OllamaError::Network)?;

        Ok(OllamaClient {
            client,
            base_url,
            model,
            embed_model,
        })
    }
}

/// Synchronous HTTP client for interacting with the Ollama API.
///
/// This client handles HTTP requests to Ollama with proper timeout and
/// retry handling. It should be constructed using `OllamaClientBuilder`.
pub struct OllamaClient {
    client: reqwest::blocking::Client,
    base_url: String,
    model: String,
    embed_model: String,
}

/// Trait for Ollama API client operations.
///
/// This trait enables mocking in unit tests and provides a clean interface
/// for the two external model backends the pipeline depends on: text
/// completion and text embedding.
pub trait OllamaClientTrait: Send + Sync {
    /// Generates text using the Ollama API.
    ///
    /// # Arguments
    ///
    /// * `model` - The name of the model to use (e.g., "deepseek-r1:8b")
    /// * `prompt` - The prompt text to send to the model
    ///
    /// # Returns
    ///
    /// Returns the generated text as a `String`, or an error if the request fails.
    fn generate(&self, model: &str, prompt: &str) -> Result<String, OllamaError>;

    /// Embeds text into a fixed-length vector using the Ollama API.
    ///
    /// Identical input text yields the same vector up to floating-point
    /// tolerance, which keeps index rebuilds functionally equivalent.
    ///
    /// # Arguments
    ///
    /// * `model` - The embedding model to use (e.g., "nomic-embed-text")
    /// * `text` - The text to embed
    fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, OllamaError>;
}

impl OllamaClient {
    /// Returns the base URL configured for this client.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the completion model name configured for this client.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the embedding model name configured for this client.
    pub fn embed_model(&self) -> &str {
        &self.embed_model
    }

    /// Lists the models installed on the Ollama server via `/api/tags`.
    ///
    /// Used by the `doctor` command as a reachability check. Single
    /// attempt, no retry: a health check should report the first failure,
    /// not paper over it.
    pub fn list_models(&self) -> Result<Vec<String>, OllamaError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(OllamaError::Http {
                status: status.as_u16(),
            });
        }

        let json: serde_json::Value = response.json().map_err(OllamaError::Network)?;

        let models = json
            .get("models")
            .and_then(|v| v.as_array())
            .ok_or_else(|| OllamaError::Api {
                message: "Missing 'models' field in API response".to_string(),
            })?;

        Ok(models
            .iter()
            .filter_map(|m| m.get("name").and_then(|v| v.as_str()))
            .map(|s| s.to_string())
            .collect())
    }

    /// Generates text using the Ollama API.
    ///
    /// This is the internal implementation that will be called by the trait method.
    fn generate_internal(&self, model: &str, prompt: &str) -> Result<String, OllamaError> {
        let url = format!("{}/api/generate", self.base_url);
        let request_body = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "stream": false
        });

        // Wrap the HTTP call with retry logic
        retry_with_backoff(|| {
            let response = self
                .client
                .post(&url)
                .json(&request_body)
                .send()
                .map_err(classify_reqwest_error)?;

            let status = response.status();
            if !status.is_success() {
                return Err(OllamaError::Http {
                    status: status.as_u16(),
                });
            }

            let json: serde_json::Value = response.json().map_err(OllamaError::Network)?;

            // Extract the "response" field from Ollama API response
            json.get("response")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| OllamaError::Api {
                    message: "Missing 'response' field in API response".to_string(),
                })
        })
    }

    /// Embeds text using the Ollama API.
    fn embed_internal(&self, model: &str, text: &str) -> Result<Vec<f32>, OllamaError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let request_body = serde_json::json!({
            "model": model,
            "prompt": text
        });

        retry_with_backoff(|| {
            let response = self
                .client
                .post(&url)
                .json(&request_body)
                .send()
                .map_err(classify_reqwest_error)?;

            let status = response.status();
            if !status.is_success() {
                return Err(OllamaError::Http {
                    status: status.as_u16(),
                });
            }

            let json: serde_json::Value = response.json().map_err(OllamaError::Network)?;

            // Extract the "embedding" field from Ollama API response
            let embedding = json
                .get("embedding")
                .and_then(|v| v.as_array())
                .ok_or_else(|| OllamaError::Api {
                    message: "Missing 'embedding' field in API response".to_string(),
                })?;

            let vector: Vec<f32> = embedding
                .iter()
                .filter_map(|v| v.as_f64())
                .map(|v| v as f32)
                .collect();

            if vector.len() != embedding.len() {
                return Err(OllamaError::Api {
                    message: "Non-numeric value in embedding vector".to_string(),
                });
            }

            Ok(vector)
        })
    }
}

impl OllamaClientTrait for OllamaClient {
    fn generate(&self, model: &str, prompt: &str) -> Result<String, OllamaError> {
        self.generate_internal(model, prompt)
    }

    fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, OllamaError> {
        self.embed_internal(model, text)
    }
}

/// Maps a reqwest error to the timeout variant when applicable.
fn classify_reqwest_error(error: reqwest::Error) -> OllamaError {
    if error.is_timeout() {
        OllamaError::Timeout(error)
    } else {
        OllamaError::Network(error)
    }
}

/// Retries an operation with exponential backoff.
///
/// This function will retry the operation up to 3 times with delays of 1s, 2s, and 4s.
/// It only retries on transient errors (HTTP 5xx and network errors), not on client errors (HTTP 4xx).
///
/// # Arguments
///
/// * `f` - A closure producing a `Result<T, OllamaError>`
///
/// # Returns
///
/// Returns the result of the operation if it succeeds, or the last error if all retries fail.
pub fn retry_with_backoff<F, T>(mut f: F) -> Result<T, OllamaError>
where
    F: FnMut() -> Result<T, OllamaError>,
{
    const MAX_RETRIES: usize = 3;
    const DELAYS: [u64; MAX_RETRIES] = [1, 2, 4]; // seconds

    // Try the operation first
    let mut last_error = match f() {
        Ok(result) => return Ok(result),
        Err(e) => {
            // Check if we should retry this error
            if !should_retry(&e) {
                return Err(e);
            }
            e
        }
    };

    // Retry up to MAX_RETRIES times
    for &delay_secs in &DELAYS {
        // Sleep before retry (exponential backoff)
        thread::sleep(Duration::from_secs(delay_secs));

        match f() {
            Ok(result) => return Ok(result),
            Err(e) => {
                // Check if we should retry this error
                if !should_retry(&e) {
                    return Err(e);
                }
                last_error = e;
            }
        }
    }

    // All retries exhausted
    Err(last_error)
}

/// Determines if an error should be retried.
///
/// Returns `true` for transient errors (HTTP 5xx, network errors, timeouts).
/// Returns `false` for client errors (HTTP 4xx) and other non-retryable errors.
fn should_retry(error: &OllamaError) -> bool {
    match error {
        OllamaError::Network(_) => true,
        OllamaError::Timeout(_) => true,
        OllamaError::Http { status } => {
            // Retry on 5xx server errors, not on 4xx client errors
            *status >= 500 && *status < 600
        }
        OllamaError::Serialization(_) => false, // Don't retry serialization errors
        OllamaError::Api { .. } => false,       // Don't retry API errors
        OllamaError::InvalidUrl(_) => false,    // Don't retry invalid URL errors
    }
}
