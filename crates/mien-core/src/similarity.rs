//! Brute-force cosine similarity search over enrolled embeddings.

use crate::types::{cosine, Recognition};

/// Default minimum cosine similarity for a match.
pub const DEFAULT_THRESHOLD: f32 = 0.6;

/// Ranks stored embeddings against a query by cosine similarity.
///
/// Every stored vector is compared (no approximate indexing). Only entries
/// with similarity >= threshold are kept, results are sorted descending and
/// cut to `top_k`. Equal similarities keep the order in which candidates were
/// offered, so a store that feeds rows in insertion order gets insertion-order
/// tie-breaking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityIndex {
    threshold: f32,
}

impl Default for SimilarityIndex {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl SimilarityIndex {
    /// Create an index with the given threshold, clamped into [0, 1].
    pub fn new(threshold: f32) -> Self {
        if !threshold.is_finite() {
            tracing::warn!(threshold, default = DEFAULT_THRESHOLD, "non-finite similarity threshold; using default");
            return Self::default();
        }
        let clamped = threshold.clamp(0.0, 1.0);
        if clamped != threshold {
            tracing::warn!(threshold, clamped, "similarity threshold outside [0, 1]; clamped");
        }
        Self { threshold: clamped }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Start an incremental ranking for `query`.
    ///
    /// Stores that stream rows (and reuse a decode buffer) offer each stored
    /// vector in turn and call [`Ranking::finish`].
    pub fn ranking<'q>(&self, query: &'q [f32], top_k: usize) -> Ranking<'q> {
        Ranking {
            query,
            threshold: self.threshold,
            top_k,
            hits: Vec::new(),
        }
    }

    /// Rank an in-memory candidate set of `(person, stored_vector)` pairs.
    pub fn search<'a, I>(&self, query: &[f32], candidates: I, top_k: usize) -> Vec<Recognition>
    where
        I: IntoIterator<Item = (&'a str, &'a [f32])>,
    {
        let mut ranking = self.ranking(query, top_k);
        for (person, stored) in candidates {
            ranking.offer(person, stored);
        }
        ranking.finish()
    }
}

/// In-progress similarity ranking for one query.
pub struct Ranking<'q> {
    query: &'q [f32],
    threshold: f32,
    top_k: usize,
    hits: Vec<Recognition>,
}

impl Ranking<'_> {
    /// Score one stored vector. Vectors of a different dimension than the
    /// query are ignored.
    pub fn offer(&mut self, person: &str, stored: &[f32]) {
        if self.top_k == 0 || stored.len() != self.query.len() {
            return;
        }

        let (similarity, stored_norm) = cosine(self.query, stored);

        if similarity >= self.threshold {
            self.hits.push(Recognition {
                person: person.to_string(),
                similarity,
                embedding_norm: stored_norm,
            });
        }
    }

    /// Best matches first, at most `top_k` of them.
    pub fn finish(mut self) -> Vec<Recognition> {
        // Stable sort: equal scores stay in offer order.
        self.hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.hits.truncate(self.top_k);
        self.hits
    }
}
