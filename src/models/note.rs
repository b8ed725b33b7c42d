use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{DestinationId, NoteId};

/// A free-text note attached to a destination.
///
/// Notes are the unit of local knowledge: each contributes exactly one
/// embedding to its destination's vector index. Notes are immutable once
/// created - there is no edit path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Unique identifier from the database.
    pub id: NoteId,
    /// The destination this note belongs to.
    pub destination_id: DestinationId,
    /// The note's content.
    pub content: String,
    /// When this note was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Builder for constructing `Note` instances with optional fields.
///
/// # Examples
///
/// ```
/// use waypoint::{DestinationId, NoteBuilder, NoteId};
///
/// let note = NoteBuilder::new()
///     .id(NoteId::new(1))
///     .destination_id(DestinationId::new(1))
///     .content("The Louvre is a world-famous museum in Paris.")
///     .build();
///
/// assert_eq!(note.id.get(), 1);
/// ```
#[derive(Debug, Default)]
pub struct NoteBuilder {
    id: Option<NoteId>,
    destination_id: Option<DestinationId>,
    content: Option<String>,
    created_at: Option<OffsetDateTime>,
}

impl NoteBuilder {
    /// Creates a new `NoteBuilder`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the note ID.
    pub fn id(mut self, id: NoteId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the owning destination ID.
    pub fn destination_id(mut self, destination_id: DestinationId) -> Self {
        self.destination_id = Some(destination_id);
        self
    }

    /// Sets the note content.
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Sets the created timestamp.
    pub fn created_at(mut self, created_at: OffsetDateTime) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Builds the `Note`, using the current time for an unset timestamp.
    ///
    /// # Panics
    ///
    /// Panics if `id`, `destination_id`, or `content` have not been set.
    pub fn build(self) -> Note {
        Note {
            id: self.id.expect("id is required"),
            destination_id: self.destination_id.expect("destination_id is required"),
            content: self.content.expect("content is required"),
            created_at: self.created_at.unwrap_or_else(OffsetDateTime::now_utc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_builder_creates_note_with_current_timestamp() {
        let note = NoteBuilder::new()
            .id(NoteId::new(1))
            .destination_id(DestinationId::new(2))
            .content("Test note")
            .build();

        assert_eq!(note.id, NoteId::new(1));
        assert_eq!(note.destination_id, DestinationId::new(2));
        assert_eq!(note.content, "Test note");
    }

    #[test]
    fn note_builder_allows_setting_all_fields() {
        let now = OffsetDateTime::now_utc();

        let note = NoteBuilder::new()
            .id(NoteId::new(42))
            .destination_id(DestinationId::new(3))
            .content("Complete note")
            .created_at(now)
            .build();

        assert_eq!(note.id, NoteId::new(42));
        assert_eq!(note.content, "Complete note");
        assert_eq!(note.created_at, now);
    }

    #[test]
    fn note_serialization_roundtrip() {
        let now = OffsetDateTime::now_utc();
        let note = NoteBuilder::new()
            .id(NoteId::new(1))
            .destination_id(DestinationId::new(1))
            .content("Test content")
            .created_at(now)
            .build();

        let json = serde_json::to_string(&note).unwrap();
        let deserialized: Note = serde_json::from_str(&json).unwrap();

        assert_eq!(note, deserialized);
    }
}
