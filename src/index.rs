//! Semantic vector index over a destination's notes.
//!
//! Each note contributes exactly one embedding. Retrieval ranks entries by
//! cosine similarity against a question embedding. `IndexManager` keeps one
//! lazily built index per destination and replaces a stale index atomically
//! rather than mutating it in place, so concurrent readers always see either
//! the prior complete index or the new one.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::models::{DestinationId, Note, NoteId};
use crate::ollama::OllamaClientTrait;

/// Default number of notes returned by retrieval.
pub const DEFAULT_TOP_K: usize = 3;

/// One indexed note: its identifier, normalized embedding, and a snapshot
/// of the note text at index-build time.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    note_id: NoteId,
    embedding: Vec<f32>,
    text: String,
}

impl IndexEntry {
    /// Returns the ID of the indexed note.
    pub fn note_id(&self) -> NoteId {
        self.note_id
    }

    /// Returns the text snapshot taken at index-build time.
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// A retrieved note with its similarity score.
///
/// Scores are cosine similarities on normalized vectors and therefore lie
/// in [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredNote {
    /// The ID of the retrieved note.
    pub note_id: NoteId,
    /// The note text as captured in the index.
    pub text: String,
    /// Cosine similarity between the question and this note.
    pub score: f32,
}

/// Semantic vector index for a single destination.
///
/// Built from the destination's notes in creation order. An index whose
/// embedding backend was unreachable at build time is empty; retrieval
/// against an empty index returns no results, which callers treat as
/// "no local knowledge" rather than an error.
#[derive(Debug)]
pub struct VectorIndex {
    destination_id: DestinationId,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Creates an empty index for a destination.
    pub fn empty(destination_id: DestinationId) -> Self {
        Self {
            destination_id,
            entries: Vec::new(),
        }
    }

    /// Builds an index from a destination's notes, one embedding per note.
    ///
    /// If the embedding backend cannot be reached for any note, the whole
    /// build degrades to an empty index instead of propagating the error.
    /// Rebuilding from the same note set yields a functionally equivalent
    /// index (same nearest-neighbor ordering for any query, modulo
    /// embedding-backend variance).
    pub fn build(
        destination_id: DestinationId,
        notes: &[Note],
        embedder: &dyn OllamaClientTrait,
        embed_model: &str,
    ) -> Self {
        let mut entries = Vec::with_capacity(notes.len());

        for note in notes {
            match embedder.embed(embed_model, &note.content) {
                Ok(embedding) => entries.push(IndexEntry {
                    note_id: note.id,
                    embedding: normalize(embedding),
                    text: note.content.clone(),
                }),
                Err(e) => {
                    warn!(
                        %destination_id,
                        note = %note.id,
                        error = %e,
                        "embedding backend unavailable, serving empty index"
                    );
                    return Self::empty(destination_id);
                }
            }
        }

        debug!(%destination_id, entries = entries.len(), "built vector index");
        Self {
            destination_id,
            entries,
        }
    }

    /// Appends a single note to the index.
    ///
    /// Unlike `build`, an embedding failure here is surfaced to the caller
    /// so it can fall back to a full rebuild later.
    pub fn add(
        &mut self,
        note: &Note,
        embedder: &dyn OllamaClientTrait,
        embed_model: &str,
    ) -> Result<(), crate::ollama::OllamaError> {
        let embedding = embedder.embed(embed_model, &note.content)?;
        self.entries.push(IndexEntry {
            note_id: note.id,
            embedding: normalize(embedding),
            text: note.content.clone(),
        });
        Ok(())
    }

    /// Returns the destination this index belongs to.
    pub fn destination_id(&self) -> DestinationId {
        self.destination_id
    }

    /// Returns the number of indexed notes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the IDs of all indexed notes in insertion order.
    pub fn note_ids(&self) -> Vec<NoteId> {
        self.entries.iter().map(|e| e.note_id).collect()
    }

    /// Returns the top-`k` entries most similar to the question embedding.
    ///
    /// Results are ordered by descending cosine similarity; ties keep
    /// insertion order, so the earliest note wins. If `k` exceeds the
    /// number of indexed notes, all notes are returned. An empty index
    /// yields an empty result.
    pub fn retrieve(&self, question_embedding: &[f32], k: usize) -> Vec<ScoredNote> {
        let query = normalize(question_embedding.to_vec());

        let mut scored: Vec<ScoredNote> = self
            .entries
            .iter()
            .map(|entry| ScoredNote {
                note_id: entry.note_id,
                text: entry.text.clone(),
                score: dot(&entry.embedding, &query),
            })
            .collect();

        // Stable sort preserves insertion order among equal scores
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        scored
    }
}

/// Keyed store of one vector index per destination.
///
/// Indexes are built lazily on first use and replaced wholesale when the
/// underlying note set changes. Readers hold an `Arc` to a complete,
/// immutable index; a rebuild publishes a new `Arc` with a single map
/// insert, never exposing a partially built index.
#[derive(Debug, Default)]
pub struct IndexManager {
    indexes: RwLock<HashMap<DestinationId, Arc<VectorIndex>>>,
}

impl IndexManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh index for the destination, building or rebuilding
    /// as needed.
    ///
    /// The cached index is reused only when its note-id set matches the
    /// current notes exactly; otherwise it is stale and rebuilt before
    /// being served, so retrieval never silently runs against a note set
    /// that differs from the store. The build happens outside the lock.
    pub fn ensure_fresh(
        &self,
        destination_id: DestinationId,
        notes: &[Note],
        embedder: &dyn OllamaClientTrait,
        embed_model: &str,
    ) -> Arc<VectorIndex> {
        let current_ids: Vec<NoteId> = notes.iter().map(|n| n.id).collect();

        {
            let indexes = self.indexes.read().expect("index lock poisoned");
            if let Some(index) = indexes.get(&destination_id) {
                // An empty index over a non-empty note set means the last
                // build degraded; retry the build rather than caching the
                // outage.
                let degraded = index.is_empty() && !notes.is_empty();
                if !degraded && index.note_ids() == current_ids {
                    return Arc::clone(index);
                }
            }
        }

        let rebuilt = Arc::new(VectorIndex::build(
            destination_id,
            notes,
            embedder,
            embed_model,
        ));

        let mut indexes = self.indexes.write().expect("index lock poisoned");
        indexes.insert(destination_id, Arc::clone(&rebuilt));
        rebuilt
    }

    /// Drops the cached index for a destination.
    ///
    /// Called when a note is added or the destination is deleted; the next
    /// query rebuilds from the then-current note set.
    pub fn invalidate(&self, destination_id: DestinationId) {
        let mut indexes = self.indexes.write().expect("index lock poisoned");
        indexes.remove(&destination_id);
    }

    /// Returns the cached index for a destination, if any.
    pub fn get(&self, destination_id: DestinationId) -> Option<Arc<VectorIndex>> {
        let indexes = self.indexes.read().expect("index lock poisoned");
        indexes.get(&destination_id).map(Arc::clone)
    }
}

/// Scales a vector to unit length. Zero vectors are returned unchanged
/// (their similarity against anything is 0).
fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Dot product over the shared prefix of two vectors.
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
