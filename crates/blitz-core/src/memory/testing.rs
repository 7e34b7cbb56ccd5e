//! In-process fakes for memory tests.

use std::sync::{Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use blitz_types::error::{EmbeddingError, RepositoryError};
use blitz_types::memory::{HistoryQuery, Message, MemoryScope, ScopeFilter, SemanticMatch};
use chrono::{DateTime, Utc};

use super::embedder::Embedder;
use super::similarity::cosine_similarity;
use super::store::MessageStore;

/// Bag-of-words embedder: each lowercase word sets one FNV-hashed bucket.
pub struct HashEmbedder {
    pub dimension: usize,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0; self.dimension];
        for word in text.split_whitespace() {
            let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
            for byte in word.to_lowercase().bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x0100_0000_01b3);
            }
            v[(hash % self.dimension as u64) as usize] += 1.0;
        }
        v
    }
}

impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(EmbeddingError::Api {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    fn model_name(&self) -> &str {
        "hash-bow"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

impl Embedder for std::sync::Arc<HashEmbedder> {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.as_ref().embed(texts).await
    }

    fn model_name(&self) -> &str {
        self.as_ref().model_name()
    }

    fn dimension(&self) -> usize {
        self.as_ref().dimension()
    }
}

/// Vec-backed store with the same observable semantics as the SQL stores.
#[derive(Default)]
pub struct InMemoryMessageStore {
    rows: Mutex<Vec<(Message, Vec<f32>)>>,
    pub fail_inserts: AtomicBool,
}

impl InMemoryMessageStore {
    fn rows(&self) -> std::sync::MutexGuard<'_, Vec<(Message, Vec<f32>)>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert with an explicit timestamp, bypassing the service clock.
    pub fn insert_at(&self, mut message: Message, embedding: Vec<f32>, at: DateTime<Utc>) {
        message.timestamp = at;
        self.rows().push((message, embedding));
    }
}

fn history_matches(scope: &MemoryScope, filter: &MemoryScope) -> bool {
    let eq = |want: &Option<String>, have: &Option<String>| {
        want.as_ref().is_none_or(|w| have.as_ref() == Some(w))
    };
    eq(&filter.user_id, &scope.user_id)
        && eq(&filter.session_id, &scope.session_id)
        && eq(&filter.thread_id, &scope.thread_id)
        && eq(&filter.resource_id, &scope.resource_id)
}

impl MessageStore for InMemoryMessageStore {
    async fn insert(&self, message: &Message, embedding: &[f32]) -> Result<(), RepositoryError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(RepositoryError::Query("disk full".to_string()));
        }
        let mut stored = message.clone();
        stored.embedding = None;
        self.rows().push((stored, embedding.to_vec()));
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        filter: &ScopeFilter,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<SemanticMatch>, RepositoryError> {
        let mut matches: Vec<SemanticMatch> = self
            .rows()
            .iter()
            .filter(|(m, _)| filter.contains(&m.scope))
            .map(|(m, e)| SemanticMatch {
                message: m.clone(),
                similarity: cosine_similarity(embedding, e),
                context: Vec::new(),
            })
            .filter(|m| m.similarity >= threshold)
            .collect();
        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn context_window(
        &self,
        anchor: &Message,
        filter: &ScopeFilter,
        range: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let mut scoped: Vec<Message> = self
            .rows()
            .iter()
            .filter(|(m, _)| filter.contains(&m.scope) && m.id != anchor.id)
            .map(|(m, _)| m.clone())
            .collect();
        scoped.sort_by_key(|m| m.timestamp);
        let mut before: Vec<Message> = scoped
            .iter()
            .filter(|m| m.timestamp < anchor.timestamp)
            .rev()
            .take(range)
            .cloned()
            .collect();
        before.reverse();
        let after = scoped
            .iter()
            .filter(|m| m.timestamp > anchor.timestamp)
            .take(range)
            .cloned();
        before.extend(after);
        Ok(before)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut rows = self.rows();
        let before = rows.len();
        rows.retain(|(m, _)| m.timestamp >= cutoff);
        Ok((before - rows.len()) as u64)
    }

    async fn history(&self, query: &HistoryQuery) -> Result<Vec<Message>, RepositoryError> {
        let mut scoped: Vec<Message> = self
            .rows()
            .iter()
            .filter(|(m, _)| history_matches(&m.scope, &query.scope))
            .map(|(m, _)| m.clone())
            .collect();
        scoped.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(scoped
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect())
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        Ok(self.rows().len() as u64)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
