use rusqlite::OptionalExtension;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::info;

use crate::{Database, Destination, DestinationId, Note, NoteId};

/// Errors produced by destination and note operations.
///
/// `DestinationNotFound` and `DuplicateName` are user-facing validation
/// errors and propagate unchanged to the boundary. `Db` wraps unexpected
/// storage failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced destination does not exist.
    #[error("Destination {0} not found")]
    DestinationNotFound(DestinationId),

    /// A destination with this name already exists.
    #[error("Destination '{0}' already exists")]
    DuplicateName(String),

    /// Input failed validation (empty name or content).
    #[error("{0}")]
    InvalidInput(String),

    /// Underlying database failure.
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),
}

/// Service layer for destination and note management.
///
/// `TravelStore` owns a `Database` instance and provides the CRUD
/// collaborators the answer pipeline reads from: destinations (the
/// geocoding keys) and their notes (the local knowledge base). It is
/// UI-independent and is exercised by both the CLI and the pipeline.
pub struct TravelStore {
    db: Database,
}

impl TravelStore {
    /// Creates a new store owning the given database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns a reference to the underlying database.
    ///
    /// Useful for testing or advanced operations that need direct access.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Lists all destinations in creation order.
    pub fn list_destinations(&self) -> Result<Vec<Destination>, StoreError> {
        let conn = self.db.connection();
        let mut stmt =
            conn.prepare("SELECT id, name, created_at FROM destinations ORDER BY id")?;
        let rows = stmt.query_map([], destination_from_row)?;

        let mut destinations = Vec::new();
        for row in rows {
            destinations.push(row?);
        }
        Ok(destinations)
    }

    /// Creates a new destination with the given name.
    ///
    /// The name is trimmed before insertion. Returns `DuplicateName` if a
    /// destination with the same name already exists and `InvalidInput`
    /// if the name is empty or whitespace-only.
    pub fn create_destination(&self, name: &str) -> Result<Destination, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::InvalidInput(
                "Destination name cannot be empty".to_string(),
            ));
        }

        let conn = self.db.connection();
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM destinations WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(StoreError::DuplicateName(name.to_string()));
        }

        let now = OffsetDateTime::now_utc();
        conn.execute(
            "INSERT INTO destinations (name, created_at) VALUES (?1, ?2)",
            rusqlite::params![name, now.unix_timestamp()],
        )?;
        let id = DestinationId::new(conn.last_insert_rowid());

        info!(destination = %name, %id, "created destination");
        Ok(Destination {
            id,
            name: name.to_string(),
            created_at: now,
        })
    }

    /// Finds a destination by ID.
    pub fn find_destination(
        &self,
        id: DestinationId,
    ) -> Result<Option<Destination>, StoreError> {
        let conn = self.db.connection();
        let destination = conn
            .query_row(
                "SELECT id, name, created_at FROM destinations WHERE id = ?1",
                [id.get()],
                destination_from_row,
            )
            .optional()?;
        Ok(destination)
    }

    /// Returns the destination with the given ID, or `DestinationNotFound`.
    pub fn get_destination(&self, id: DestinationId) -> Result<Destination, StoreError> {
        self.find_destination(id)?
            .ok_or(StoreError::DestinationNotFound(id))
    }

    /// Deletes a destination and all of its notes.
    ///
    /// The cascade is enforced by the schema's foreign key. Callers that
    /// hold a vector index for this destination must invalidate it.
    pub fn delete_destination(&self, id: DestinationId) -> Result<(), StoreError> {
        let conn = self.db.connection();
        let deleted = conn.execute("DELETE FROM destinations WHERE id = ?1", [id.get()])?;
        if deleted == 0 {
            return Err(StoreError::DestinationNotFound(id));
        }

        info!(%id, "deleted destination and its notes");
        Ok(())
    }

    /// Lists a destination's notes in creation order.
    ///
    /// Returns `DestinationNotFound` if the destination does not exist,
    /// distinguishing "unknown destination" from "no notes yet".
    pub fn list_notes(&self, destination_id: DestinationId) -> Result<Vec<Note>, StoreError> {
        self.get_destination(destination_id)?;

        let conn = self.db.connection();
        let mut stmt = conn.prepare(
            "SELECT id, destination_id, content, created_at FROM notes
             WHERE destination_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([destination_id.get()], note_from_row)?;

        let mut notes = Vec::new();
        for row in rows {
            notes.push(row?);
        }
        Ok(notes)
    }

    /// Creates a note under the given destination.
    ///
    /// Returns `DestinationNotFound` if the destination does not exist
    /// and `InvalidInput` for empty content. Callers that hold a vector
    /// index for this destination must invalidate it so the new note is
    /// picked up on the next retrieval.
    pub fn create_note(
        &self,
        destination_id: DestinationId,
        content: &str,
    ) -> Result<Note, StoreError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(StoreError::InvalidInput(
                "Note content cannot be empty".to_string(),
            ));
        }

        self.get_destination(destination_id)?;

        let conn = self.db.connection();
        let now = OffsetDateTime::now_utc();
        conn.execute(
            "INSERT INTO notes (destination_id, content, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![destination_id.get(), content, now.unix_timestamp()],
        )?;
        let id = NoteId::new(conn.last_insert_rowid());

        info!(%destination_id, note = %id, "created note");
        Ok(Note {
            id,
            destination_id,
            content: content.to_string(),
            created_at: now,
        })
    }
}

fn destination_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Destination> {
    let timestamp: i64 = row.get(2)?;
    Ok(Destination {
        id: DestinationId::new(row.get(0)?),
        name: row.get(1)?,
        created_at: OffsetDateTime::from_unix_timestamp(timestamp)
            .unwrap_or_else(|_| OffsetDateTime::UNIX_EPOCH),
    })
}

fn note_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Note> {
    let timestamp: i64 = row.get(3)?;
    Ok(Note {
        id: NoteId::new(row.get(0)?),
        destination_id: DestinationId::new(row.get(1)?),
        content: row.get(2)?,
        created_at: OffsetDateTime::from_unix_timestamp(timestamp)
            .unwrap_or_else(|_| OffsetDateTime::UNIX_EPOCH),
    })
}
