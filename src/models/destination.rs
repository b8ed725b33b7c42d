use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::DestinationId;

/// A travel destination the user is collecting knowledge about.
///
/// The name doubles as the geocoding key, so it is unique across the
/// system. Deleting a destination cascades to its notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// Unique identifier from the database.
    pub id: DestinationId,
    /// User-facing name, unique, used for geocoding lookups.
    pub name: String,
    /// When this destination was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Destination {
    /// Creates a destination with the current time as its creation timestamp.
    pub fn new(id: DestinationId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            created_at: OffsetDateTime::now_utc(),
        }
    }
}
