use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use waypoint::doctor;
use waypoint::utils::{ensure_database_directory, get_database_path};
use waypoint::{
    AnswererBuilder, Database, DestinationId, NominatimClient, OllamaClientBuilder,
    OpenMeteoClient, StoreError, TravelStore,
};

/// waypoint - travel destination notes with grounded Q&A
#[derive(Parser)]
#[command(name = "waypoint")]
#[command(about = "Record travel destinations and notes, then ask grounded questions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Manage destinations
    #[command(subcommand)]
    Destination(DestinationCommands),

    /// Manage notes attached to a destination
    #[command(subcommand)]
    Note(NoteCommands),

    /// Ask a question about a destination
    Ask(AskCommand),

    /// Check the database and external services an `ask` depends on
    Doctor,
}

#[derive(Subcommand)]
enum DestinationCommands {
    /// Add a new destination
    Add {
        /// The destination name (also used for geocoding)
        name: String,
    },
    /// List all destinations
    List,
    /// Remove a destination and all of its notes
    Remove {
        /// The destination ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum NoteCommands {
    /// Add a note to a destination
    Add {
        /// The destination ID
        destination_id: i64,
        /// The note content
        content: String,
    },
    /// List a destination's notes
    List {
        /// The destination ID
        destination_id: i64,
    },
}

/// Ask a question about a destination
#[derive(Parser)]
struct AskCommand {
    /// The destination ID
    destination_id: i64,

    /// The question to answer from saved notes and current weather
    question: String,
}

fn main() {
    // Load .env before reading any backend configuration
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Destination(cmd) => handle_destination(cmd),
        Commands::Note(cmd) => handle_note(cmd),
        Commands::Ask(cmd) => handle_ask(cmd),
        Commands::Doctor => handle_doctor(),
    };

    if let Err(e) = result {
        // Determine exit code based on error type
        let exit_code = if is_user_error(&e) { 1 } else { 2 };
        eprintln!("Error: {e}");
        std::process::exit(exit_code);
    }
}

/// Determines if an error is a user error (vs internal error).
///
/// User errors include validation failures, unknown destinations, and
/// duplicate names. Internal errors include database and I/O failures.
fn is_user_error(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<StoreError>(),
        Some(
            StoreError::DestinationNotFound(_)
                | StoreError::DuplicateName(_)
                | StoreError::InvalidInput(_)
        )
    )
}

/// Opens the store backed by the on-disk database.
fn open_store() -> Result<TravelStore> {
    let db_path = get_database_path()?;
    ensure_database_directory(&db_path)?;
    let db = Database::open(&db_path).context("Failed to open database")?;
    Ok(TravelStore::new(db))
}

fn handle_destination(cmd: &DestinationCommands) -> Result<()> {
    let store = open_store()?;

    match cmd {
        DestinationCommands::Add { name } => {
            let destination = store.create_destination(name)?;
            println!("Added destination {} (ID: {})", destination.name, destination.id);
        }
        DestinationCommands::List => {
            let destinations = store.list_destinations()?;
            if destinations.is_empty() {
                println!("No destinations yet. Add one with: waypoint destination add <name>");
            }
            for destination in destinations {
                println!("{}\t{}", destination.id, destination.name);
            }
        }
        DestinationCommands::Remove { id } => {
            let id = DestinationId::new(*id);
            store.delete_destination(id)?;
            println!("Removed destination {id} and its notes");
        }
    }

    Ok(())
}

fn handle_note(cmd: &NoteCommands) -> Result<()> {
    let store = open_store()?;

    match cmd {
        NoteCommands::Add {
            destination_id,
            content,
        } => {
            let note = store.create_note(DestinationId::new(*destination_id), content)?;
            println!("Added note {} to destination {}", note.id, note.destination_id);
        }
        NoteCommands::List { destination_id } => {
            let notes = store.list_notes(DestinationId::new(*destination_id))?;
            if notes.is_empty() {
                println!("No notes for this destination yet.");
            }
            for note in notes {
                println!("{}\t{}", note.id, note.content);
            }
        }
    }

    Ok(())
}

fn handle_doctor() -> Result<()> {
    let db_path = get_database_path()?;
    ensure_database_directory(&db_path)?;
    let store = open_store()?;

    let healthy = doctor::run_health_checks(&db_path.display().to_string(), &store)?;
    if !healthy {
        std::process::exit(2);
    }

    Ok(())
}

fn handle_ask(cmd: &AskCommand) -> Result<()> {
    let store = open_store()?;

    let ollama = OllamaClientBuilder::new()
        .build()
        .context("Failed to create Ollama client")?;
    let model = ollama.model().to_string();
    let embed_model = ollama.embed_model().to_string();
    let geocoder = NominatimClient::from_env().context("Failed to create geocoding client")?;
    let weather = OpenMeteoClient::from_env().context("Failed to create weather client")?;

    let answerer = AnswererBuilder::new()
        .ollama(Arc::new(ollama))
        .geocoder(Box::new(geocoder))
        .weather(Box::new(weather))
        .model(model)
        .embed_model(embed_model)
        .build();

    let result = answerer.answer(
        &store,
        DestinationId::new(cmd.destination_id),
        &cmd.question,
    )?;

    println!("{}", result.answer);

    if !result.sources.is_empty() {
        println!();
        println!("Sources:");
        for source in &result.sources {
            println!("  note {} (similarity {:.2})", source.note_id, source.score);
        }
    }

    if !result.degraded.is_empty() {
        let names: Vec<String> = result.degraded.iter().map(|d| d.to_string()).collect();
        println!();
        println!("Degraded sources: {}", names.join(", "));
    }

    Ok(())
}
