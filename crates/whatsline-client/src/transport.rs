//! Transport seam: the contract a concrete protocol engine implements.
//!
//! The runtime is transport-agnostic: everything protocol-specific
//! (framing, crypto, pairing mechanics) lives behind [`Transport`], and the
//! engine pushes [`TransportEvent`]s into the channel handed to `connect`.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use whatsline_core::error::ClientError;

/// Channel state reported by a connection update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Close,
}

/// One step of the transport's connection lifecycle.
#[derive(Debug, Clone, Default)]
pub struct ConnectionUpdate {
    pub connection: Option<ConnectionState>,
    /// Protocol close/status code accompanying a close, when any.
    pub status_code: Option<u16>,
    /// Fresh pairing code; rotates while pairing is pending.
    pub pairing_code: Option<String>,
    /// Free-form diagnostic text from the engine.
    pub details: String,
}

/// Raw events pushed by the transport engine into the session runtime.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Credentials changed and were persisted by the engine.
    CredentialsUpdate,
    Connection(ConnectionUpdate),
    /// Batch of newly received or sent message envelopes.
    MessageUpsert { envelopes: Vec<Value> },
    MessageUpdate(Value),
    MessageDelete(Value),
    MessageReaction(Value),
    Call(Value),
    GroupUpdate(Value),
    GroupParticipantsUpdate(Value),
    PresenceUpdate(Value),
    ContactsUpdate(Vec<Value>),
    BlocklistUpdate(Value),
    ChatUpdate(Value),
    ChatDelete(Value),
    Notification(Value),
    /// One chunk of the initial history stream.
    HistorySync {
        contacts: Vec<Value>,
        envelopes: Vec<Value>,
        progress_done: bool,
    },
}

/// Group metadata looked up on demand.
#[derive(Debug, Clone, Default)]
pub struct GroupInfo {
    pub subject: Option<String>,
    pub description: Option<String>,
    pub participants: Vec<String>,
    pub raw: Value,
}

/// Newsletter metadata looked up on demand.
#[derive(Debug, Clone, Default)]
pub struct NewsletterInfo {
    pub name: Option<String>,
    pub description: Option<String>,
    pub raw: Value,
}

/// Encrypted poll vote payload as carried on the wire.
#[derive(Debug, Clone)]
pub struct PollVoteCipher {
    pub enc_payload: Vec<u8>,
    pub enc_iv: Vec<u8>,
}

/// Everything the engine needs to decrypt one poll vote.
#[derive(Debug, Clone)]
pub struct PollVoteContext {
    /// Id of the poll creation message.
    pub creation_id: String,
    pub chat_id: String,
    /// Stable id of the poll creator.
    pub creator_id: String,
    /// Stable id of the voter.
    pub voter_id: String,
    /// Poll encryption secret from the creation envelope.
    pub secret: Vec<u8>,
}

/// Protocol engine contract.
///
/// Lookup methods are best-effort: `Ok(None)` means the engine has no
/// answer, and callers degrade rather than fail. Errors are reserved for
/// faults worth logging.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the channel and start pushing events into `events`.
    ///
    /// Returns once the engine's event loop is running; the channel itself
    /// may still be handshaking.
    async fn connect(&self, events: mpsc::Sender<TransportEvent>) -> Result<(), ClientError>;

    /// Close the channel without discarding credentials.
    async fn close(&self) -> Result<(), ClientError>;

    /// Close the channel and discard credentials.
    async fn logout(&self) -> Result<(), ClientError>;

    /// Own stable id, once authenticated.
    async fn own_id(&self) -> Option<String>;

    /// Own display name, once authenticated.
    async fn own_name(&self) -> Option<String>;

    async fn profile_picture_url(&self, id: &str) -> Result<Option<String>, ClientError>;

    async fn status_text(&self, id: &str) -> Result<Option<String>, ClientError>;

    async fn group_info(&self, id: &str) -> Result<Option<GroupInfo>, ClientError>;

    async fn newsletter_info(&self, id: &str) -> Result<Option<NewsletterInfo>, ClientError>;

    /// Business profile blob for an individual chat, when the account is a
    /// business.
    async fn business_profile(&self, id: &str) -> Result<Option<Value>, ClientError>;

    /// Map an alternate-namespace id to its stable counterpart.
    async fn resolve_stable_id(&self, id: &str) -> Result<Option<String>, ClientError>;

    /// Decrypt one poll vote into the selected option hashes.
    async fn decrypt_poll_vote(
        &self,
        context: &PollVoteContext,
        cipher: &PollVoteCipher,
    ) -> Result<Vec<Vec<u8>>, ClientError>;

    /// Download an attachment by its opaque fetch reference.
    async fn download_media(&self, fetch_ref: &Value) -> Result<Vec<u8>, ClientError>;

    /// Lightweight keepalive probe.
    async fn send_presence_ping(&self) -> Result<(), ClientError>;

    /// Advertise this device as the active presence.
    async fn mark_online(&self) -> Result<(), ClientError>;

    /// Reject an incoming call.
    async fn reject_call(&self, call_id: &str, from: &str) -> Result<(), ClientError>;
}
