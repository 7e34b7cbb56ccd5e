//! Semantic memory service.
//!
//! Embeds messages on write, answers similarity recall with surrounding
//! conversation context, and prunes messages past the retention window.
//! Generic over the [`MessageStore`] backend; the embedder is type-erased.

use std::sync::Arc;
use std::time::{Duration, Instant};

use blitz_types::config::MemoryConfig;
use blitz_types::error::{EmbeddingError, MemoryError};
use blitz_types::memory::{
    HistoryQuery, MemoryHealth, Message, NewMessage, RecallOptions, SemanticMatch,
};
use blitz_types::metrics::MemoryOp;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::box_embedder::BoxEmbedder;
use super::clock::MonotonicClock;
use super::store::MessageStore;
use crate::metrics::MetricsCollector;

pub struct SemanticMemory<S> {
    store: Arc<S>,
    embedder: BoxEmbedder,
    config: MemoryConfig,
    metrics: Arc<MetricsCollector>,
    clock: MonotonicClock,
}

impl<S: MessageStore> SemanticMemory<S> {
    pub fn new(
        store: Arc<S>,
        embedder: BoxEmbedder,
        config: MemoryConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
            metrics,
            clock: MonotonicClock::new(),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    // -----------------------------------------------------------------------
    // Store
    // -----------------------------------------------------------------------

    /// Embed and persist one message.
    ///
    /// Nothing is written when embedding fails. The returned message carries
    /// its id, assigned timestamp and embedding.
    pub async fn store(&self, new: NewMessage) -> Result<Message, MemoryError> {
        let started = Instant::now();
        let result = self.store_inner(new).await;
        self.record(MemoryOp::Store, started, result.is_ok());
        if let Err(e) = &result {
            tracing::warn!(error = %e, "failed to store message");
        }
        result
    }

    async fn store_inner(&self, new: NewMessage) -> Result<Message, MemoryError> {
        if !self.config.enabled {
            return Err(MemoryError::Disabled);
        }
        if new.content.trim().is_empty() {
            return Err(MemoryError::InvalidInput(
                "message content must not be empty".to_string(),
            ));
        }

        let embedding = self.embed(&new.content).await?;
        let message = Message {
            id: Uuid::now_v7(),
            content: new.content,
            role: new.role,
            timestamp: self.clock.now(),
            scope: new.scope,
            metadata: new.metadata,
            embedding: None,
        };
        self.store.insert(&message, &embedding).await?;

        tracing::debug!(
            message_id = %message.id,
            role = %message.role,
            scope = %message.scope.resolve(),
            "stored message"
        );
        Ok(Message {
            embedding: Some(embedding),
            ..message
        })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let vector = self.embedder.embed_one(text).await?;
        let expected = self.config.storage.dimension;
        if vector.len() != expected {
            return Err(EmbeddingError::Dimension {
                expected,
                actual: vector.len(),
            }
            .into());
        }
        Ok(vector)
    }

    // -----------------------------------------------------------------------
    // Recall
    // -----------------------------------------------------------------------

    /// Messages similar to `query` inside the resolved scope, each with up to
    /// `message_range` neighbours on either side.
    ///
    /// Unset options fall back to the configured recall defaults. When memory
    /// is disabled the result is empty.
    pub async fn recall(
        &self,
        query: &str,
        options: RecallOptions,
    ) -> Result<Vec<SemanticMatch>, MemoryError> {
        let started = Instant::now();
        let result = self.recall_inner(query, options).await;
        self.record(MemoryOp::Recall, started, result.is_ok());
        if let Err(e) = &result {
            tracing::warn!(error = %e, "recall failed");
        }
        result
    }

    async fn recall_inner(
        &self,
        query: &str,
        options: RecallOptions,
    ) -> Result<Vec<SemanticMatch>, MemoryError> {
        if !self.config.enabled {
            tracing::debug!("semantic memory disabled, recall returns nothing");
            return Ok(Vec::new());
        }
        if query.trim().is_empty() {
            return Err(MemoryError::InvalidInput(
                "query must not be empty".to_string(),
            ));
        }

        let defaults = &self.config.recall;
        let top_k = options.top_k.unwrap_or(defaults.top_k);
        let threshold = options
            .similarity_threshold
            .unwrap_or(defaults.similarity_threshold);
        let range = options.message_range.unwrap_or(defaults.message_range);

        if top_k == 0 {
            return Err(MemoryError::InvalidInput(
                "top_k must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(MemoryError::InvalidInput(format!(
                "similarity_threshold must be within [0, 1], got {threshold}"
            )));
        }

        let filter = options.scope.resolve();
        let embedding = self.embed(query).await?;
        let mut matches = self
            .store
            .search(&embedding, &filter, top_k, threshold)
            .await?;

        matches.retain(|m| m.similarity >= threshold);
        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches.truncate(top_k);

        if range > 0 {
            for m in &mut matches {
                m.context = self
                    .store
                    .context_window(&m.message, &filter, range)
                    .await?;
            }
        }

        tracing::debug!(
            scope = %filter,
            top_k,
            threshold,
            matches = matches.len(),
            "recall complete"
        );
        Ok(matches)
    }

    // -----------------------------------------------------------------------
    // Retention and reads
    // -----------------------------------------------------------------------

    /// Delete messages older than the configured retention window.
    pub async fn cleanup_old_messages(&self) -> Result<u64, MemoryError> {
        self.cleanup_older_than(self.config.storage.max_message_age())
            .await
    }

    /// Delete messages older than `max_age`. Returns how many were removed.
    pub async fn cleanup_older_than(&self, max_age: chrono::Duration) -> Result<u64, MemoryError> {
        let started = Instant::now();
        let cutoff = Utc::now() - max_age;
        let result = self
            .store
            .delete_older_than(cutoff)
            .await
            .map_err(MemoryError::from);
        self.record(MemoryOp::Cleanup, started, result.is_ok());
        match &result {
            Ok(deleted) => tracing::info!(deleted, cutoff = %cutoff, "retention cleanup complete"),
            Err(e) => tracing::warn!(error = %e, "retention cleanup failed"),
        }
        result
    }

    pub async fn history(&self, query: &HistoryQuery) -> Result<Vec<Message>, MemoryError> {
        Ok(self.store.history(query).await?)
    }

    pub async fn count(&self) -> Result<u64, MemoryError> {
        Ok(self.store.count().await?)
    }

    /// Probe the backend with a count query.
    pub async fn health_check(&self) -> MemoryHealth {
        let started = Instant::now();
        let result = self.store.count().await;
        let latency_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(message_count) => MemoryHealth {
                healthy: true,
                backend: self.store.backend().to_string(),
                message_count,
                latency_ms,
                error: None,
            },
            Err(e) => MemoryHealth {
                healthy: false,
                backend: self.store.backend().to_string(),
                message_count: 0,
                latency_ms,
                error: Some(e.to_string()),
            },
        }
    }

    fn record(&self, op: MemoryOp, started: Instant, success: bool) {
        self.metrics
            .record_memory_op(op, started.elapsed(), success);
        if !success {
            self.metrics
                .record_error("memory", &format!("{op:?} failed"), None);
        }
    }
}

impl<S: MessageStore + 'static> SemanticMemory<S> {
    /// Run `cleanup_old_messages` every `interval` until `shutdown` fires.
    ///
    /// The first sweep happens one interval after start. Failures are logged
    /// and the loop keeps going.
    pub fn spawn_retention_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let memory = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!("retention sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let _ = memory.cleanup_old_messages().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use blitz_types::config::MetricsConfig;
    use blitz_types::memory::{MemoryScope, Role};

    use super::*;
    use crate::memory::testing::{HashEmbedder, InMemoryMessageStore};

    const DIM: usize = 64;

    struct Fixture {
        memory: Arc<SemanticMemory<InMemoryMessageStore>>,
        store: Arc<InMemoryMessageStore>,
        embedder: Arc<HashEmbedder>,
        metrics: Arc<MetricsCollector>,
    }

    fn fixture_with(config: MemoryConfig) -> Fixture {
        let store = Arc::new(InMemoryMessageStore::default());
        let embedder = Arc::new(HashEmbedder::new(DIM));
        let metrics = Arc::new(MetricsCollector::new(MetricsConfig::default()));
        let memory = Arc::new(SemanticMemory::new(
            Arc::clone(&store),
            BoxEmbedder::new(Arc::clone(&embedder)),
            config,
            Arc::clone(&metrics),
        ));
        Fixture {
            memory,
            store,
            embedder,
            metrics,
        }
    }

    fn config() -> MemoryConfig {
        let mut config = MemoryConfig::default();
        config.storage.dimension = DIM;
        config
    }

    fn fixture() -> Fixture {
        fixture_with(config())
    }

    fn in_thread(content: &str, thread: &str) -> NewMessage {
        NewMessage::new(content, Role::User).with_scope(MemoryScope::thread(thread))
    }

    #[tokio::test]
    async fn test_store_then_recall_exact_text() {
        let f = fixture();
        let stored = f
            .memory
            .store(in_thread("the deploy pipeline uses blue green", "t1"))
            .await
            .unwrap();
        assert_eq!(stored.embedding.as_ref().map(Vec::len), Some(DIM));

        let matches = f
            .memory
            .recall(
                "the deploy pipeline uses blue green",
                RecallOptions::scoped(MemoryScope::thread("t1")).threshold(0.5),
            )
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].message.id, stored.id);
        assert!(matches[0].similarity > 0.99);
    }

    #[tokio::test]
    async fn test_store_rejects_empty_content_without_writing() {
        let f = fixture();
        let err = f
            .memory
            .store(NewMessage::new("   ", Role::User))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidInput(_)));
        assert_eq!(f.memory.count().await.unwrap(), 0);
        assert_eq!(f.embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_embedding_failure_writes_nothing() {
        let f = fixture();
        f.embedder.fail.store(true, Ordering::SeqCst);
        let err = f
            .memory
            .store(in_thread("hello", "t1"))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Embedding(_)));
        assert_eq!(f.memory.count().await.unwrap(), 0);

        let snap = f.metrics.snapshot();
        assert_eq!(snap.memory[&MemoryOp::Store].errors, 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_rejected() {
        let mut config = config();
        config.storage.dimension = DIM * 2;
        let f = fixture_with(config);
        let err = f
            .memory
            .store(in_thread("hello", "t1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MemoryError::Embedding(EmbeddingError::Dimension { .. })
        ));
        assert_eq!(f.memory.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_storage_failure_surfaces() {
        let f = fixture();
        f.store.fail_inserts.store(true, Ordering::SeqCst);
        let err = f
            .memory
            .store(in_thread("hello", "t1"))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Storage(_)));
    }

    #[tokio::test]
    async fn test_recall_never_crosses_thread_scope() {
        let f = fixture();
        f.memory
            .store(in_thread("postgres connection pool exhausted", "a"))
            .await
            .unwrap();
        f.memory
            .store(in_thread("postgres connection pool exhausted", "b"))
            .await
            .unwrap();

        let matches = f
            .memory
            .recall(
                "postgres connection pool exhausted",
                RecallOptions::scoped(MemoryScope::thread("a")).threshold(0.0),
            )
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].message.scope.thread_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_thread_takes_precedence_over_resource() {
        let f = fixture();
        let scope = MemoryScope {
            resource_id: Some("r".to_string()),
            ..MemoryScope::thread("t1")
        };
        f.memory
            .store(NewMessage::new("shared resource note", Role::User).with_scope(scope.clone()))
            .await
            .unwrap();
        f.memory
            .store(
                NewMessage::new("shared resource note", Role::User)
                    .with_scope(MemoryScope::resource("r")),
            )
            .await
            .unwrap();

        let by_thread = f
            .memory
            .recall(
                "shared resource note",
                RecallOptions::scoped(scope).threshold(0.0),
            )
            .await
            .unwrap();
        assert_eq!(by_thread.len(), 1);

        let by_resource = f
            .memory
            .recall(
                "shared resource note",
                RecallOptions::scoped(MemoryScope::resource("r")).threshold(0.0),
            )
            .await
            .unwrap();
        assert_eq!(by_resource.len(), 2);
    }

    #[tokio::test]
    async fn test_recall_respects_top_k_threshold_and_order() {
        let f = fixture();
        for text in [
            "alpha beta gamma delta",
            "alpha beta gamma",
            "alpha beta",
            "zeta eta theta iota",
        ] {
            f.memory.store(in_thread(text, "t")).await.unwrap();
        }

        let matches = f
            .memory
            .recall(
                "alpha beta gamma delta",
                RecallOptions::scoped(MemoryScope::thread("t"))
                    .top_k(2)
                    .threshold(0.5),
            )
            .await
            .unwrap();
        assert!(matches.len() <= 2);
        assert!(matches.iter().all(|m| m.similarity >= 0.5));
        assert!(matches.windows(2).all(|w| w[0].similarity >= w[1].similarity));
        assert_eq!(matches[0].message.content, "alpha beta gamma delta");
    }

    #[tokio::test]
    async fn test_unrelated_query_above_high_threshold_is_empty() {
        let f = fixture();
        f.memory
            .store(in_thread("kubernetes ingress certificates", "t"))
            .await
            .unwrap();
        let matches = f
            .memory
            .recall(
                "banana bread recipe",
                RecallOptions::scoped(MemoryScope::thread("t")).threshold(0.99),
            )
            .await
            .unwrap();
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn test_recall_validates_options() {
        let f = fixture();
        let err = f
            .memory
            .recall("x", RecallOptions::default().top_k(0))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidInput(_)));

        let err = f
            .memory
            .recall("x", RecallOptions::default().threshold(1.5))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidInput(_)));

        let err = f
            .memory
            .recall("", RecallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_context_window_surrounds_match() {
        let f = fixture();
        let texts = [
            "turn one about weather",
            "turn two about lunch",
            "the database migration failed on index creation",
            "turn four about coffee",
            "turn five about music",
        ];
        for text in texts {
            f.memory.store(in_thread(text, "t")).await.unwrap();
        }

        let matches = f
            .memory
            .recall(
                "the database migration failed on index creation",
                RecallOptions::scoped(MemoryScope::thread("t"))
                    .top_k(1)
                    .threshold(0.9)
                    .message_range(1),
            )
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        let context: Vec<&str> = matches[0]
            .context
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(context, vec!["turn two about lunch", "turn four about coffee"]);
    }

    #[tokio::test]
    async fn test_zero_message_range_has_no_context() {
        let f = fixture();
        f.memory.store(in_thread("first", "t")).await.unwrap();
        f.memory.store(in_thread("second", "t")).await.unwrap();
        let matches = f
            .memory
            .recall(
                "second",
                RecallOptions::scoped(MemoryScope::thread("t"))
                    .threshold(0.9)
                    .message_range(0),
            )
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert!(matches[0].context.is_empty());
    }

    #[tokio::test]
    async fn test_timestamps_strictly_increase() {
        let f = fixture();
        let mut last = None;
        for i in 0..20 {
            let m = f
                .memory
                .store(in_thread(&format!("msg {i}"), "t"))
                .await
                .unwrap();
            if let Some(prev) = last {
                assert!(m.timestamp > prev);
            }
            last = Some(m.timestamp);
        }
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired() {
        let f = fixture();
        let expired = Message {
            id: Uuid::now_v7(),
            content: "old news".to_string(),
            role: Role::User,
            timestamp: Utc::now(),
            scope: MemoryScope::thread("t"),
            metadata: Default::default(),
            embedding: None,
        };
        f.store.insert_at(
            expired,
            f.embedder.vector("old news"),
            Utc::now() - chrono::Duration::days(100),
        );
        f.memory.store(in_thread("fresh news", "t")).await.unwrap();

        let deleted = f.memory.cleanup_old_messages().await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(f.memory.count().await.unwrap(), 1);

        let again = f.memory.cleanup_old_messages().await.unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn test_disabled_memory() {
        let mut config = config();
        config.enabled = false;
        let f = fixture_with(config);
        let err = f
            .memory
            .store(in_thread("x", "t"))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Disabled));
        let matches = f
            .memory
            .recall("x", RecallOptions::default())
            .await
            .unwrap();
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn test_history_newest_first_and_paginated() {
        let f = fixture();
        for i in 0..5 {
            f.memory
                .store(in_thread(&format!("entry {i}"), "t"))
                .await
                .unwrap();
        }
        f.memory.store(in_thread("elsewhere", "u")).await.unwrap();

        let page = f
            .memory
            .history(&HistoryQuery {
                scope: MemoryScope::thread("t"),
                limit: 2,
                offset: 1,
            })
            .await
            .unwrap();
        let contents: Vec<&str> = page.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["entry 3", "entry 2"]);
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let f = fixture();
        f.memory.store(in_thread("x", "t")).await.unwrap();
        f.memory
            .recall("x", RecallOptions::scoped(MemoryScope::thread("t")))
            .await
            .unwrap();

        let health = f.memory.health_check().await;
        assert!(health.healthy);
        assert_eq!(health.backend, "memory");
        assert_eq!(health.message_count, 1);

        let snap = f.metrics.snapshot();
        assert_eq!(snap.memory[&MemoryOp::Store].count, 1);
        assert_eq!(snap.memory[&MemoryOp::Recall].count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retention_sweeper_stops_on_cancel() {
        let f = fixture();
        let token = CancellationToken::new();
        let handle = f
            .memory
            .spawn_retention_sweeper(Duration::from_secs(60), token.clone());
        tokio::time::sleep(Duration::from_secs(125)).await;
        token.cancel();
        handle.await.unwrap();
        let snap = f.metrics.snapshot();
        assert_eq!(snap.memory[&MemoryOp::Cleanup].count, 2);
    }
}
