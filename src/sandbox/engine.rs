//! In-memory document store owned by a sandbox task.
//!
//! The store keeps documents in insertion order, enforces unique ids and a single embedding
//! dimension, and answers brute-force cosine queries. Documents without vectors (hydrated from
//! partial cold data) are stored and counted but never match queries.

use std::collections::HashMap;

use super::{SandboxDocument, SandboxError, SearchHit, SearchOptions};

/// Insertion-ordered vector store backing one sandbox.
#[derive(Default)]
pub struct DocumentStore {
    dimension: Option<usize>,
    documents: Vec<SandboxDocument>,
    by_id: HashMap<String, usize>,
}

impl DocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the store holds no documents.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Embedding dimension established by the first stored vector, if any.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Append a batch of documents.
    ///
    /// The batch is validated before anything is stored: a duplicate id within the batch or
    /// against stored ids, or a vector whose length disagrees with the established dimension,
    /// rejects the whole batch. Returns the number of documents appended.
    pub fn add_documents(&mut self, docs: Vec<SandboxDocument>) -> Result<usize, SandboxError> {
        let mut batch_ids = HashMap::with_capacity(docs.len());
        let mut dimension = self.dimension;
        for doc in &docs {
            if self.by_id.contains_key(&doc.id) || batch_ids.insert(doc.id.clone(), ()).is_some() {
                return Err(SandboxError::DuplicateDocument(doc.id.clone()));
            }
            if let Some(vector) = &doc.vector {
                match dimension {
                    Some(expected) if vector.len() != expected => {
                        return Err(SandboxError::DimensionMismatch {
                            id: doc.id.clone(),
                            expected,
                            actual: vector.len(),
                        });
                    }
                    Some(_) => {}
                    None => dimension = Some(vector.len()),
                }
            }
        }

        let added = docs.len();
        self.dimension = dimension;
        for doc in docs {
            self.by_id.insert(doc.id.clone(), self.documents.len());
            self.documents.push(doc);
        }
        Ok(added)
    }

    /// Score every stored vector against the query and return the best hits.
    pub fn query(
        &self,
        query: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>, SandboxError> {
        if let Some(expected) = self.dimension
            && query.len() != expected
        {
            return Err(SandboxError::DimensionMismatch {
                id: String::new(),
                expected,
                actual: query.len(),
            });
        }

        let mut hits: Vec<SearchHit> = self
            .documents
            .iter()
            .filter_map(|doc| {
                let vector = doc.vector.as_ref()?;
                let score = similarity_score(query, vector);
                if let Some(threshold) = options.threshold
                    && score < threshold
                {
                    return None;
                }
                Some(SearchHit {
                    id: doc.id.clone(),
                    score,
                    text: doc.text.clone(),
                    metadata: if options.include_metadata {
                        doc.metadata.clone()
                    } else {
                        None
                    },
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        if let Some(k) = options.k {
            hits.truncate(k);
        }
        Ok(hits)
    }

    /// Remove the given ids, ignoring unknown ones. Returns the count actually removed.
    pub fn remove_documents(&mut self, ids: &[String]) -> usize {
        let before = self.documents.len();
        let doomed: std::collections::HashSet<&String> = ids.iter().collect();
        self.documents.retain(|doc| !doomed.contains(&doc.id));

        let removed = before - self.documents.len();
        if removed > 0 {
            self.by_id.clear();
            for (position, doc) in self.documents.iter().enumerate() {
                self.by_id.insert(doc.id.clone(), position);
            }
        }
        removed
    }

    /// Every stored document, in insertion order.
    pub fn documents(&self) -> Vec<SandboxDocument> {
        self.documents.clone()
    }
}

/// Cosine similarity mapped affinely onto `[0, 1]`.
///
/// Raw cosine lives in `[-1, 1]`; the sandbox contract promises non-negative scores, so the
/// value is shifted and halved before clamping away float noise.
fn similarity_score(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let cosine = dot / (norm_a.sqrt() * norm_b.sqrt());
    ((1.0 + cosine) / 2.0).clamp(0.0, 1.0)
}
