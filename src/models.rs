//! Domain types: destinations, notes, and their typed identifiers.

mod destination;
mod ids;
mod note;

pub use destination::Destination;
pub use ids::{DestinationId, NoteId};
pub use note::{Note, NoteBuilder};
