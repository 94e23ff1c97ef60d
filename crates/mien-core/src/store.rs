//! Person store interface and an in-memory implementation.

use crate::error::StoreError;
use crate::similarity::SimilarityIndex;
use crate::types::{Embedding, PersonRecord, Recognition};
use chrono::Utc;
use std::sync::RwLock;

/// Persistence of enrolled identities and their embeddings.
///
/// Implementations must add a person together with all of its embeddings
/// atomically, cascade embedding removal on delete, and make every
/// `topk_similar` call observe the latest committed state.
pub trait PersonStore: Send + Sync {
    /// Create a person with the given embeddings. Fails with
    /// [`StoreError::DuplicateIdentity`] if the name is taken.
    fn add_person(
        &self,
        name: &str,
        embeddings: &[Embedding],
        notes: Option<&str>,
    ) -> Result<PersonRecord, StoreError>;

    /// Delete a person and all of their embeddings. `false` if not found.
    fn delete_person(&self, id: i64) -> Result<bool, StoreError>;

    /// A page of persons, newest first, and the total person count.
    fn list_persons(&self, limit: usize, offset: usize) -> Result<(Vec<PersonRecord>, usize), StoreError>;

    /// The best `top_k` matches for `query` at or above the store's threshold.
    fn topk_similar(&self, query: &[f32], top_k: usize) -> Result<Vec<Recognition>, StoreError>;
}

struct StoredPerson {
    record: PersonRecord,
    vectors: Vec<Vec<f32>>,
}

#[derive(Default)]
struct MemoryInner {
    next_id: i64,
    persons: Vec<StoredPerson>,
}

/// Volatile [`PersonStore`] holding everything behind a single lock.
#[derive(Default)]
pub struct MemoryStore {
    index: SimilarityIndex,
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new(index: SimilarityIndex) -> Self {
        Self {
            index,
            inner: RwLock::default(),
        }
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("memory store lock poisoned".into())
}

impl PersonStore for MemoryStore {
    fn add_person(
        &self,
        name: &str,
        embeddings: &[Embedding],
        notes: Option<&str>,
    ) -> Result<PersonRecord, StoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        if inner.persons.iter().any(|p| p.record.name == name) {
            return Err(StoreError::DuplicateIdentity(name.to_string()));
        }

        inner.next_id += 1;
        let record = PersonRecord {
            id: inner.next_id,
            name: name.to_string(),
            notes: notes.map(str::to_string),
            embedding_count: embeddings.len(),
            created_at: Utc::now(),
        };
        inner.persons.push(StoredPerson {
            record: record.clone(),
            vectors: embeddings.iter().map(|e| e.values.clone()).collect(),
        });
        Ok(record)
    }

    fn delete_person(&self, id: i64) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let before = inner.persons.len();
        inner.persons.retain(|p| p.record.id != id);
        Ok(inner.persons.len() != before)
    }

    fn list_persons(&self, limit: usize, offset: usize) -> Result<(Vec<PersonRecord>, usize), StoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        let page = inner
            .persons
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .map(|p| p.record.clone())
            .collect();
        Ok((page, inner.persons.len()))
    }

    fn topk_similar(&self, query: &[f32], top_k: usize) -> Result<Vec<Recognition>, StoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        let candidates = inner
            .persons
            .iter()
            .flat_map(|p| p.vectors.iter().map(move |v| (p.record.name.as_str(), v.as_slice())));
        Ok(self.index.search(query, candidates, top_k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::new(SimilarityIndex::new(0.6))
    }

    #[test]
    fn test_add_and_list() {
        let s = store();
        s.add_person("alice", &[Embedding::new(vec![1.0, 0.0])], Some("front desk")).unwrap();
        s.add_person("bob", &[Embedding::new(vec![0.0, 1.0]), Embedding::new(vec![0.1, 1.0])], None)
            .unwrap();

        let (page, total) = s.list_persons(50, 0).unwrap();
        assert_eq!(total, 2);
        assert_eq!(page[0].name, "bob");
        assert_eq!(page[0].embedding_count, 2);
        assert_eq!(page[1].notes.as_deref(), Some("front desk"));

        let (page, total) = s.list_persons(1, 1).unwrap();
        assert_eq!(total, 2);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "alice");
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let s = store();
        s.add_person("alice", &[], None).unwrap();
        let err = s.add_person("alice", &[], None).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateIdentity(ref n) if n == "alice"));
    }

    #[test]
    fn test_delete_cascades_embeddings() {
        let s = store();
        let v = vec![0.2, 0.9, 0.4];
        let alice = s.add_person("alice", &[Embedding::new(v.clone())], None).unwrap();
        assert_eq!(s.topk_similar(&v, 3).unwrap()[0].person, "alice");

        assert!(s.delete_person(alice.id).unwrap());
        assert!(s.topk_similar(&v, 3).unwrap().is_empty());
        assert!(!s.delete_person(alice.id).unwrap());
    }

    #[test]
    fn test_topk_ranks_across_persons() {
        let s = store();
        s.add_person("far", &[Embedding::new(vec![0.0, 1.0])], None).unwrap();
        s.add_person("near", &[Embedding::new(vec![0.9, 0.2])], None).unwrap();
        s.add_person("exact", &[Embedding::new(vec![1.0, 0.0])], None).unwrap();

        let matches = s.topk_similar(&[1.0, 0.0], 5).unwrap();
        let names: Vec<_> = matches.iter().map(|m| m.person.as_str()).collect();
        assert_eq!(names, vec!["exact", "near"]);
    }
}
