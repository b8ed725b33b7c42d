/// Complete database schema for the travel advisor.
///
/// Uses CREATE TABLE/INDEX IF NOT EXISTS for idempotent execution.
/// All statements are designed to be run in a single transaction.
pub const INITIAL_SCHEMA: &str = r#"
-- Destinations table: one row per travel destination, name is the geocoding key
CREATE TABLE IF NOT EXISTS destinations (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL
);

-- Notes table: free-text knowledge entries owned by a destination
CREATE TABLE IF NOT EXISTS notes (
    id INTEGER PRIMARY KEY,
    destination_id INTEGER NOT NULL,
    content TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (destination_id) REFERENCES destinations(id) ON DELETE CASCADE
);

-- Index for listing a destination's notes in creation order
CREATE INDEX IF NOT EXISTS idx_notes_destination ON notes(destination_id);

-- Index for name lookups when validating duplicates
CREATE INDEX IF NOT EXISTS idx_destinations_name ON destinations(name);
"#;
