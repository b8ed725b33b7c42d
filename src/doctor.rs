//! Health checks for the `doctor` command.
//!
//! Probes every component an `ask` request depends on: the database, the
//! Ollama server (including whether a completion model is configured at
//! all), the geocoding endpoint, and the weather endpoint. Each check is
//! independent, so one broken service never hides the state of the others.

use anyhow::Result;

use crate::geo::{GeoError, Geocoder, NominatimClient};
use crate::ollama::OllamaClientBuilder;
use crate::store::TravelStore;
use crate::weather::{OpenMeteoClient, WeatherService};

// ANSI color codes for terminal output
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";

/// Known-good reference lookup used to exercise the live services.
const REFERENCE_CITY: &str = "Paris";
const REFERENCE_LATITUDE: f64 = 48.8566;
const REFERENCE_LONGITUDE: f64 = 2.3522;

/// Health status for a component.
#[derive(Debug, Clone)]
pub enum HealthStatus {
    /// Component is healthy
    Ok,
    /// Component has a warning but is functional
    Warning(String),
    /// Component is not functional
    Error(String),
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, HealthStatus::Ok)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, HealthStatus::Error(_))
    }
}

/// Database health information.
#[derive(Debug)]
pub struct DatabaseHealth {
    pub status: HealthStatus,
    pub file_path: String,
}

/// Ollama connectivity and model configuration.
#[derive(Debug)]
pub struct OllamaHealth {
    pub status: HealthStatus,
    pub base_url: String,
    pub models: Vec<String>,
    pub completion_model: String,
    pub embed_model: String,
}

/// Reachability of an external HTTP service.
#[derive(Debug)]
pub struct ServiceHealth {
    pub status: HealthStatus,
    pub base_url: String,
}

/// Row counts for the doctor report.
#[derive(Debug)]
pub struct TravelStats {
    pub total_destinations: i64,
    pub total_notes: i64,
}

// ============================================================================
// Health Check Functions
// ============================================================================

/// Performs all health checks and prints results.
///
/// Returns `false` when any component reported an error; warnings alone
/// still count as healthy.
pub fn run_health_checks(db_path: &str, store: &TravelStore) -> Result<bool> {
    let db_health = check_database_health(db_path, store);
    let ollama_health = check_ollama_health();
    let geo_health = check_geocoding_health();
    let weather_health = check_weather_health();
    let stats = get_travel_stats(store)?;

    print_health_report(
        &db_health,
        &ollama_health,
        &geo_health,
        &weather_health,
        &stats,
    );

    let statuses = [
        &db_health.status,
        &ollama_health.status,
        &geo_health.status,
        &weather_health.status,
    ];
    Ok(statuses.iter().all(|s| !s.is_error()))
}

fn check_database_health(db_path: &str, store: &TravelStore) -> DatabaseHealth {
    let conn = store.database().connection();
    let status = match conn.query_row("SELECT 1", [], |_| Ok(())) {
        Ok(_) => HealthStatus::Ok,
        Err(e) => HealthStatus::Error(format!("Connection test failed: {}", e)),
    };

    DatabaseHealth {
        status,
        file_path: db_path.to_string(),
    }
}

fn check_ollama_health() -> OllamaHealth {
    let client = match OllamaClientBuilder::new().build() {
        Ok(c) => c,
        Err(e) => {
            return OllamaHealth {
                status: HealthStatus::Error(format!("Failed to build client: {}", e)),
                base_url: String::new(),
                models: Vec::new(),
                completion_model: String::new(),
                embed_model: String::new(),
            };
        }
    };

    let base_url = client.base_url().to_string();
    let completion_model = client.model().to_string();
    let embed_model = client.embed_model().to_string();

    match client.list_models() {
        Ok(models) => OllamaHealth {
            status: model_configuration_status(&models, &completion_model, &embed_model),
            base_url,
            models,
            completion_model,
            embed_model,
        },
        Err(e) => OllamaHealth {
            status: HealthStatus::Error(format!("Connection failed: {}", e)),
            base_url,
            models: Vec::new(),
            completion_model,
            embed_model,
        },
    }
}

/// Judges the model configuration against what the server has installed.
///
/// An empty completion model is the most common misconfiguration: every
/// `ask` silently degrades to the raw-note fallback, so the doctor calls
/// it out explicitly.
fn model_configuration_status(
    models: &[String],
    completion_model: &str,
    embed_model: &str,
) -> HealthStatus {
    if completion_model.is_empty() {
        return HealthStatus::Warning(
            "No completion model configured (set OLLAMA_MODEL); \
             every ask will fall back to raw notes"
                .to_string(),
        );
    }
    if models.is_empty() {
        return HealthStatus::Warning("No models installed".to_string());
    }
    // Installed names usually carry a tag suffix, e.g. "nomic-embed-text:latest"
    if !models
        .iter()
        .any(|m| m == embed_model || m.starts_with(&format!("{}:", embed_model)))
    {
        return HealthStatus::Warning(format!(
            "Embedding model '{}' is not installed",
            embed_model
        ));
    }
    HealthStatus::Ok
}

fn check_geocoding_health() -> ServiceHealth {
    let client = match NominatimClient::from_env() {
        Ok(c) => c,
        Err(e) => {
            return ServiceHealth {
                status: HealthStatus::Error(format!("Failed to build client: {}", e)),
                base_url: String::new(),
            };
        }
    };

    let base_url = client.base_url().to_string();
    check_geocoder(&client, base_url)
}

fn check_geocoder<G: Geocoder>(geocoder: &G, base_url: String) -> ServiceHealth {
    let status = match geocoder.geocode(REFERENCE_CITY) {
        Ok(_) => HealthStatus::Ok,
        Err(GeoError::NotFound(name)) => HealthStatus::Warning(format!(
            "Reachable, but no match for reference city '{}'",
            name
        )),
        Err(e) => HealthStatus::Error(format!("Connection failed: {}", e)),
    };

    ServiceHealth { status, base_url }
}

fn check_weather_health() -> ServiceHealth {
    let client = match OpenMeteoClient::from_env() {
        Ok(c) => c,
        Err(e) => {
            return ServiceHealth {
                status: HealthStatus::Error(format!("Failed to build client: {}", e)),
                base_url: String::new(),
            };
        }
    };

    let base_url = client.base_url().to_string();
    check_weather_service(&client, base_url)
}

fn check_weather_service<W: WeatherService>(service: &W, base_url: String) -> ServiceHealth {
    let status = match service.current_conditions(REFERENCE_LATITUDE, REFERENCE_LONGITUDE) {
        Ok((temperature, _)) if temperature.is_finite() => HealthStatus::Ok,
        Ok(_) => HealthStatus::Warning("Service returned a non-finite temperature".to_string()),
        Err(e) => HealthStatus::Error(format!("Connection failed: {}", e)),
    };

    ServiceHealth { status, base_url }
}

fn get_travel_stats(store: &TravelStore) -> Result<TravelStats> {
    let conn = store.database().connection();

    let total_destinations: i64 =
        conn.query_row("SELECT COUNT(*) FROM destinations", [], |row| row.get(0))?;
    let total_notes: i64 = conn.query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0))?;

    Ok(TravelStats {
        total_destinations,
        total_notes,
    })
}

// ============================================================================
// Pretty Printing
// ============================================================================

fn status_symbol(status: &HealthStatus) -> &'static str {
    match status {
        HealthStatus::Ok => "\u{2713}",
        HealthStatus::Warning(_) => "!",
        HealthStatus::Error(_) => "\u{2717}",
    }
}

fn status_color(status: &HealthStatus) -> &'static str {
    match status {
        HealthStatus::Ok => GREEN,
        HealthStatus::Warning(_) => YELLOW,
        HealthStatus::Error(_) => RED,
    }
}

fn status_text(status: &HealthStatus, ok_text: &str) -> String {
    match status {
        HealthStatus::Ok => ok_text.to_string(),
        HealthStatus::Warning(w) => w.clone(),
        HealthStatus::Error(e) => e.clone(),
    }
}

fn print_service_section(title: &str, health: &ServiceHealth) {
    println!("{}{}{}", BOLD, title, RESET);
    println!(
        "  {}{}{} Status: {}",
        status_color(&health.status),
        status_symbol(&health.status),
        RESET,
        status_text(&health.status, "Reachable")
    );
    if !health.base_url.is_empty() {
        println!("    {}URL: {}{}", DIM, health.base_url, RESET);
    }
    println!();
}

fn print_health_report(
    db: &DatabaseHealth,
    ollama: &OllamaHealth,
    geo: &ServiceHealth,
    weather: &ServiceHealth,
    stats: &TravelStats,
) {
    println!("{}waypoint doctor{}", BOLD, RESET);
    println!();

    // Database section
    println!("{}Database{}", BOLD, RESET);
    println!(
        "  {}{}{} Connection: {}",
        status_color(&db.status),
        status_symbol(&db.status),
        RESET,
        if db.status.is_ok() { "OK" } else { "FAILED" }
    );
    println!("    {}Path: {}{}", DIM, db.file_path, RESET);
    println!();

    // Ollama section
    println!("{}Ollama{}", BOLD, RESET);
    println!(
        "  {}{}{} Status: {}",
        status_color(&ollama.status),
        status_symbol(&ollama.status),
        RESET,
        status_text(&ollama.status, "Connected")
    );
    if !ollama.base_url.is_empty() {
        println!("    {}URL: {}{}", DIM, ollama.base_url, RESET);
    }
    let completion_display = if ollama.completion_model.is_empty() {
        "(not set)"
    } else {
        &ollama.completion_model
    };
    println!(
        "    {}Completion model: {}  Embedding model: {}{}",
        DIM, completion_display, ollama.embed_model, RESET
    );
    if !ollama.models.is_empty() {
        let models_display = if ollama.models.len() > 3 {
            format!(
                "{}, ... ({} more)",
                ollama.models[..3].join(", "),
                ollama.models.len() - 3
            )
        } else {
            ollama.models.join(", ")
        };
        println!("    {}Installed: {}{}", DIM, models_display, RESET);
    }
    println!();

    print_service_section("Geocoding (Nominatim)", geo);
    print_service_section("Weather (Open-Meteo)", weather);

    // Statistics section
    println!("{}Statistics{}", BOLD, RESET);
    println!("  Destinations: {:>6}", stats.total_destinations);
    println!("  Notes:        {:>6}", stats.total_notes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::weather::WeatherError;

    #[test]
    fn health_status_is_ok_only_for_ok() {
        assert!(HealthStatus::Ok.is_ok());
        assert!(!HealthStatus::Warning("w".to_string()).is_ok());
        assert!(!HealthStatus::Error("e".to_string()).is_ok());

        assert!(!HealthStatus::Ok.is_error());
        assert!(!HealthStatus::Warning("w".to_string()).is_error());
        assert!(HealthStatus::Error("e".to_string()).is_error());
    }

    #[test]
    fn database_check_passes_for_open_store() {
        let store = TravelStore::new(Database::in_memory().unwrap());

        let health = check_database_health(":memory:", &store);

        assert!(health.status.is_ok());
        assert_eq!(health.file_path, ":memory:");
    }

    #[test]
    fn stats_count_destinations_and_notes() {
        let store = TravelStore::new(Database::in_memory().unwrap());
        let paris = store.create_destination("Paris").unwrap();
        store.create_destination("Tokyo").unwrap();
        store.create_note(paris.id, "a note").unwrap();

        let stats = get_travel_stats(&store).unwrap();

        assert_eq!(stats.total_destinations, 2);
        assert_eq!(stats.total_notes, 1);
    }

    #[test]
    fn missing_completion_model_is_flagged() {
        let models = vec!["nomic-embed-text:latest".to_string()];

        let status = model_configuration_status(&models, "", "nomic-embed-text");

        match status {
            HealthStatus::Warning(message) => {
                assert!(message.contains("OLLAMA_MODEL"));
                assert!(message.contains("fall back"));
            }
            other => panic!("expected warning, got {:?}", other),
        }
    }

    #[test]
    fn missing_embed_model_is_flagged() {
        let models = vec!["gemma3:4b".to_string()];

        let status = model_configuration_status(&models, "gemma3:4b", "nomic-embed-text");

        assert!(matches!(status, HealthStatus::Warning(_)));
    }

    #[test]
    fn installed_models_with_tag_suffix_satisfy_the_check() {
        let models = vec![
            "gemma3:4b".to_string(),
            "nomic-embed-text:latest".to_string(),
        ];

        let status = model_configuration_status(&models, "gemma3:4b", "nomic-embed-text");

        assert!(status.is_ok());
    }

    struct MockGeocoder {
        result: fn(&str) -> Result<(f64, f64), GeoError>,
    }

    impl Geocoder for MockGeocoder {
        fn geocode(&self, name: &str) -> Result<(f64, f64), GeoError> {
            (self.result)(name)
        }
    }

    #[test]
    fn reachable_geocoder_is_healthy() {
        let geocoder = MockGeocoder {
            result: |_| Ok((48.8566, 2.3522)),
        };

        let health = check_geocoder(&geocoder, "http://example.test".to_string());

        assert!(health.status.is_ok());
        assert_eq!(health.base_url, "http://example.test");
    }

    #[test]
    fn unreachable_geocoder_reports_error() {
        let geocoder = MockGeocoder {
            result: |_| Err(GeoError::Unavailable("connection refused".to_string())),
        };

        let health = check_geocoder(&geocoder, "http://example.test".to_string());

        assert!(health.status.is_error());
    }

    struct MockWeather {
        available: bool,
    }

    impl WeatherService for MockWeather {
        fn current_conditions(&self, _lat: f64, _lon: f64) -> Result<(f64, u32), WeatherError> {
            if self.available {
                Ok((18.5, 2))
            } else {
                Err(WeatherError::Unavailable("simulated outage".to_string()))
            }
        }
    }

    #[test]
    fn reachable_weather_service_is_healthy() {
        let health =
            check_weather_service(&MockWeather { available: true }, "http://w.test".to_string());

        assert!(health.status.is_ok());
    }

    #[test]
    fn weather_outage_reports_error() {
        let health = check_weather_service(
            &MockWeather { available: false },
            "http://w.test".to_string(),
        );

        assert!(health.status.is_error());
    }
}
