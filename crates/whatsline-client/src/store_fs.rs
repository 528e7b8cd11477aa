//! File-backed message store: one JSON document per chat.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::{fs, sync::Mutex};

use whatsline_core::{
    error::ClientError,
    store::{HistoryQuery, MessageStore, filter_history},
    types::CanonicalMessage,
};

const CHATS_DIR: &str = "chats";

/// Persistent store rooted at `<data_dir>/<session_name>/chats/`.
///
/// Every chat lives in its own JSON array file. Writes rewrite the whole
/// file; chat histories in this store are append-mostly and small enough
/// that a journal is not worth its complexity.
pub struct FileStore {
    root: PathBuf,
    // One writer at a time; read-modify-write of a chat file is not atomic.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (and create) the store directory for one session.
    pub async fn open(data_dir: &Path, session_name: &str) -> Result<Self, ClientError> {
        let root = data_dir.join(session_name).join(CHATS_DIR);
        fs::create_dir_all(&root)
            .await
            .map_err(|err| ClientError::storage("store_create_failed", err.to_string()))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn chat_path(&self, chat_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize(chat_id)))
    }

    async fn load_chat(&self, chat_id: &str) -> Result<Vec<CanonicalMessage>, ClientError> {
        let path = self.chat_path(chat_id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(ClientError::storage("store_read_failed", err.to_string())),
        };
        serde_json::from_slice(&bytes)
            .map_err(|err| ClientError::serialization(format!("chat file corrupt: {err}")))
    }

    async fn save_chat(
        &self,
        chat_id: &str,
        messages: &[CanonicalMessage],
    ) -> Result<(), ClientError> {
        let encoded = serde_json::to_vec(messages)
            .map_err(|err| ClientError::serialization(err.to_string()))?;
        fs::write(self.chat_path(chat_id), encoded)
            .await
            .map_err(|err| ClientError::storage("store_write_failed", err.to_string()))
    }
}

/// Chat ids become file names; anything outside a conservative set maps to
/// `_` so ids with separators or device suffixes stay on one path segment.
fn sanitize(chat_id: &str) -> String {
    chat_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '@') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl MessageStore for FileStore {
    async fn append(&self, message: &CanonicalMessage) -> Result<bool, ClientError> {
        let _guard = self.write_lock.lock().await;
        let mut messages = self.load_chat(&message.chat_id).await?;
        if messages.iter().any(|existing| existing.id == message.id) {
            return Ok(false);
        }
        messages.push(message.clone());
        self.save_chat(&message.chat_id, &messages).await?;
        Ok(true)
    }

    async fn get(
        &self,
        chat_id: &str,
        message_id: &str,
    ) -> Result<Option<CanonicalMessage>, ClientError> {
        let messages = self.load_chat(chat_id).await?;
        Ok(messages.into_iter().find(|message| message.id == message_id))
    }

    async fn query(
        &self,
        chat_id: &str,
        query: HistoryQuery,
    ) -> Result<Vec<CanonicalMessage>, ClientError> {
        let messages = self.load_chat(chat_id).await?;
        Ok(filter_history(&messages, query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use whatsline_core::types::MessageKind;

    fn message(id: &str, chat_id: &str, timestamp_ms: u64) -> CanonicalMessage {
        CanonicalMessage {
            id: id.into(),
            chat_id: chat_id.into(),
            sender_id: "123@s.whatsapp.net".into(),
            from_me: false,
            kind: MessageKind::Text,
            body: format!("body {id}"),
            media: None,
            location: None,
            poll: None,
            quoted: None,
            forwarded: false,
            mentions: vec![],
            timestamp_ms,
            edited: false,
            raw: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = FileStore::open(dir.path(), "main").await.expect("open");
            store
                .append(&message("A", "123@s.whatsapp.net", 1_000))
                .await
                .expect("append");
        }

        let store = FileStore::open(dir.path(), "main").await.expect("reopen");
        let found = store.get("123@s.whatsapp.net", "A").await.expect("get");
        assert_eq!(found.map(|m| m.body), Some("body A".into()));
    }

    #[tokio::test]
    async fn append_is_idempotent_across_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::open(dir.path(), "main").await.expect("open");
        let msg = message("A", "123@s.whatsapp.net", 1_000);
        assert!(store.append(&msg).await.expect("append"));

        let again = FileStore::open(dir.path(), "main").await.expect("reopen");
        assert!(!again.append(&msg).await.expect("duplicate append"));
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let work = FileStore::open(dir.path(), "work").await.expect("open");
        let home = FileStore::open(dir.path(), "home").await.expect("open");

        work.append(&message("A", "1@s.whatsapp.net", 1_000))
            .await
            .expect("append");
        let found = home.get("1@s.whatsapp.net", "A").await.expect("get");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn query_filters_like_the_memory_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::open(dir.path(), "main").await.expect("open");
        for (id, ts) in [("A", 1_000), ("B", 2_000), ("C", 3_000)] {
            store
                .append(&message(id, "123@g.us", ts))
                .await
                .expect("append");
        }

        let tail = store
            .query(
                "123@g.us",
                HistoryQuery {
                    after_ms: Some(1_000),
                    before_ms: None,
                    limit: Some(1),
                },
            )
            .await
            .expect("query");
        let ids: Vec<&str> = tail.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["C"]);
    }

    #[test]
    fn sanitizes_path_hostile_ids() {
        assert_eq!(sanitize("123@g.us"), "123@g.us");
        assert_eq!(sanitize("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize("1:2@s.whatsapp.net"), "1_2@s.whatsapp.net");
    }
}
