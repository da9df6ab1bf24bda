use std::sync::Arc;

use dashmap::DashMap;
use parley_core::types::MemoryStrategy;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::store::MessageStore;
use crate::types::{ContextBlob, NewMessage, StoredMessage, Summarizer};

/// Per-conversation conversational context under one of three strategies.
///
/// The cache is keyed by conversation id; each key owns a `tokio::Mutex`
/// so two concurrent turns on the same conversation serialize while
/// different conversations never contend. Entries are rebuilt from the
/// `MessageStore` when absent — the cache is never the source of truth.
///
/// A "turn" here is one stored message (user or assistant), matching the
/// window the persistence collaborator returns.
pub struct MemoryManager {
    store: Arc<dyn MessageStore>,
    summarizer: Arc<dyn Summarizer>,
    /// Raw-turn window K for the rolling-summary strategy.
    window: usize,
    cache: DashMap<String, Arc<Mutex<CacheEntry>>>,
}

#[derive(Default)]
struct CacheEntry {
    loaded: bool,
    summary: Option<String>,
    messages: Vec<StoredMessage>,
}

impl MemoryManager {
    pub fn new(
        store: Arc<dyn MessageStore>,
        summarizer: Arc<dyn Summarizer>,
        window: usize,
    ) -> Self {
        Self {
            store,
            summarizer,
            window,
            cache: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Context for the next model call, per the conversation's strategy.
    pub async fn get_context(
        &self,
        conversation_id: &str,
        strategy: MemoryStrategy,
    ) -> Result<ContextBlob> {
        if strategy == MemoryStrategy::None {
            // Stateless: every call is independent, no store access.
            return Ok(ContextBlob::default());
        }

        let entry = self.entry(conversation_id);
        let mut state = entry.lock().await;
        self.ensure_loaded(conversation_id, &mut state)?;

        Ok(ContextBlob {
            summary: state.summary.clone(),
            messages: state.messages.clone(),
        })
    }

    /// Persist a message and fold it into the cached state.
    ///
    /// For rolling-summary conversations this is where the window is
    /// enforced: once the raw list would exceed K, the oldest turns are
    /// folded into the running summary with one summarizer call. If that
    /// call fails the oversized window is kept and retried on the next
    /// append — context degrades, it is never lost.
    pub async fn append(
        &self,
        conversation_id: &str,
        strategy: MemoryStrategy,
        msg: NewMessage,
    ) -> Result<StoredMessage> {
        if strategy == MemoryStrategy::None {
            return self.store.append_message(conversation_id, msg);
        }

        let entry = self.entry(conversation_id);
        let mut state = entry.lock().await;
        self.ensure_loaded(conversation_id, &mut state)?;

        // Persist under the per-conversation lock so two concurrent turns
        // cannot interleave their store writes.
        let stored = self.store.append_message(conversation_id, msg)?;
        state.messages.push(stored.clone());

        if strategy == MemoryStrategy::RollingSummary && state.messages.len() > self.window {
            let keep_from = state.messages.len() - self.window;
            let evicted: Vec<StoredMessage> = state.messages[..keep_from].to_vec();
            match self
                .summarizer
                .summarize(state.summary.as_deref(), &evicted)
                .await
            {
                Ok(summary) => {
                    debug!(
                        conversation_id,
                        evicted = evicted.len(),
                        "rolling summary regenerated"
                    );
                    state.summary = Some(summary);
                    state.messages.drain(..keep_from);
                }
                Err(e) => {
                    warn!(conversation_id, error = %e, "summary regeneration failed — keeping raw window");
                }
            }
        }

        Ok(stored)
    }

    /// Discard the in-process cache entry. Persisted messages survive; the
    /// next `get_context` rebuilds from the store (full-buffer semantics
    /// for rolling-summary conversations until the summary regenerates).
    pub fn clear(&self, conversation_id: &str) {
        self.cache.remove(conversation_id);
    }

    fn entry(&self, conversation_id: &str) -> Arc<Mutex<CacheEntry>> {
        self.cache
            .entry(conversation_id.to_string())
            .or_default()
            .clone()
    }

    fn ensure_loaded(&self, conversation_id: &str, state: &mut CacheEntry) -> Result<()> {
        if state.loaded {
            return Ok(());
        }
        state.messages = self.store.load_history(conversation_id)?;
        state.summary = None;
        state.loaded = true;
        debug!(
            conversation_id,
            messages = state.messages.len(),
            "memory state rebuilt from store"
        );
        Ok(())
    }
}
