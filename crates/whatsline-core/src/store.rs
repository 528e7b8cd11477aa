//! Message persistence contract and the in-memory reference store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{error::ClientError, types::CanonicalMessage};

/// Time-bounded history query over one chat.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryQuery {
    /// Only messages with `timestamp_ms > after_ms`.
    pub after_ms: Option<u64>,
    /// Only messages with `timestamp_ms < before_ms`.
    pub before_ms: Option<u64>,
    /// Keep only the newest `limit` of the filtered set.
    pub limit: Option<usize>,
}

/// Append-only message persistence keyed by `(chat_id, message_id)`.
///
/// Append is idempotent: a message whose id already exists in the chat is
/// ignored and reported as such, so replayed transport batches and history
/// sync overlaps never duplicate records.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist one message. Returns `false` when the id was already present.
    async fn append(&self, message: &CanonicalMessage) -> Result<bool, ClientError>;

    /// Fetch one message by chat and id.
    async fn get(&self, chat_id: &str, message_id: &str)
    -> Result<Option<CanonicalMessage>, ClientError>;

    /// Query a chat's messages, oldest first.
    async fn query(
        &self,
        chat_id: &str,
        query: HistoryQuery,
    ) -> Result<Vec<CanonicalMessage>, ClientError>;
}

/// Volatile store backed by a per-chat vector. Used by tests and as the
/// default when no persistence directory is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    chats: RwLock<HashMap<String, Vec<CanonicalMessage>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Apply time bounds and the newest-`limit` tail, preserving append order.
///
/// Shared by store implementations so every backend answers a query the
/// same way.
pub fn filter_history(
    messages: &[CanonicalMessage],
    query: HistoryQuery,
) -> Vec<CanonicalMessage> {
    let mut matched: Vec<CanonicalMessage> = messages
        .iter()
        .filter(|message| {
            query
                .after_ms
                .is_none_or(|after| message.timestamp_ms > after)
                && query
                    .before_ms
                    .is_none_or(|before| message.timestamp_ms < before)
        })
        .cloned()
        .collect();
    if let Some(limit) = query.limit
        && matched.len() > limit
    {
        matched.drain(..matched.len() - limit);
    }
    matched
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, message: &CanonicalMessage) -> Result<bool, ClientError> {
        let mut chats = self.chats.write().await;
        let messages = chats.entry(message.chat_id.clone()).or_default();
        if messages.iter().any(|existing| existing.id == message.id) {
            return Ok(false);
        }
        messages.push(message.clone());
        Ok(true)
    }

    async fn get(
        &self,
        chat_id: &str,
        message_id: &str,
    ) -> Result<Option<CanonicalMessage>, ClientError> {
        let chats = self.chats.read().await;
        Ok(chats
            .get(chat_id)
            .and_then(|messages| messages.iter().find(|message| message.id == message_id))
            .cloned())
    }

    async fn query(
        &self,
        chat_id: &str,
        query: HistoryQuery,
    ) -> Result<Vec<CanonicalMessage>, ClientError> {
        let chats = self.chats.read().await;
        Ok(chats
            .get(chat_id)
            .map(|messages| filter_history(messages, query))
            .unwrap_or_default())
    }
}
