use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DisconnectReason;

/// Connection lifecycle state of the single live session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionStatus {
    /// Session object exists but bring-up has not started.
    Init,
    /// Transport handshake is in progress (initial connect or reconnect).
    Connecting,
    /// The transport requires a pairing artifact to be presented on a companion device.
    PairingRequired,
    /// Transport channel is open and authenticated.
    Connected,
    /// Transport channel closed; may re-enter `Connecting` depending on cause.
    Disconnected,
    /// Credentials were revoked or the user logged out. Terminal.
    LoggedOut,
}

/// Chat kind derived from the chat id's domain suffix.
///
/// Business is not a kind of its own: it is a secondary attribute of an
/// individual chat (see [`Contact::is_business`]).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatKind {
    Individual,
    Group,
    Newsletter,
}

/// Canonical identity record for a chat.
///
/// `id` is always the stable, non-device-scoped identifier; the volatile
/// device-scoped id, when known, lives in `lid`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contact {
    /// Stable chat identifier.
    pub id: String,
    /// Alternate-namespace (device-scoped) identifier, when known.
    pub lid: Option<String>,
    /// Best-effort display name (see directory precedence rules).
    pub name: Option<String>,
    /// Chat kind derived from the id domain.
    pub kind: ChatKind,
    /// Whether an individual chat belongs to a business account.
    pub is_business: bool,
    /// Status line / about text.
    pub status_text: Option<String>,
    /// Profile picture URL, when available.
    pub profile_picture_url: Option<String>,
    /// Group/newsletter/business description, by kind precedence.
    pub description: Option<String>,
    /// Free-form protocol metadata carried through untouched.
    pub metadata: Value,
}

impl Contact {
    /// Minimal contact for a stable id with everything else unknown.
    pub fn bare(id: impl Into<String>, kind: ChatKind) -> Self {
        Self {
            id: id.into(),
            lid: None,
            name: None,
            kind,
            is_business: false,
            status_text: None,
            profile_picture_url: None,
            description: None,
            metadata: Value::Null,
        }
    }
}

/// Closed semantic message type enumeration.
///
/// Unrecognized wire variants classify as `Unknown`; they never fail
/// normalization.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Sticker,
    Location,
    ContactCard,
    InteractiveReply,
    Reaction,
    PollCreation,
    PollUpdate,
    Unknown,
}

impl MessageKind {
    /// Whether messages of this kind carry a media descriptor.
    pub fn is_media(self) -> bool {
        matches!(
            self,
            MessageKind::Image
                | MessageKind::Video
                | MessageKind::Audio
                | MessageKind::Document
                | MessageKind::Sticker
        )
    }
}

/// Media descriptor attached to media-kind messages.
///
/// `fetch_ref` is the opaque reference the transport needs to perform the
/// deferred attachment download; the download itself is on demand and never
/// memoized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaInfo {
    pub mimetype: Option<String>,
    pub file_name: Option<String>,
    pub duration_secs: Option<u32>,
    pub view_once: bool,
    /// Opaque transport reference used by the attachment fetch.
    pub fetch_ref: Value,
}

/// Geographic location payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationInfo {
    pub latitude: f64,
    pub longitude: f64,
    pub name: Option<String>,
}

/// Decrypted selection set for a poll vote.
///
/// A degraded state (missing creation record, missing secret, decryption
/// failure) carries a non-empty `error` and empty `selections`; it is never
/// surfaced as a hard error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollState {
    /// Option labels the voter selected.
    pub selections: Vec<String>,
    /// Voter's stable id, when derivable.
    pub voter: Option<String>,
    /// Reason the vote could not be decrypted, if any.
    pub error: Option<String>,
}

impl PollState {
    /// Build a degraded vote state with an explicit reason.
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self {
            selections: Vec::new(),
            voter: None,
            error: Some(reason.into()),
        }
    }
}

/// Normalized incoming-call descriptor. Transient, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallInfo {
    pub id: String,
    pub from: String,
    pub is_video: bool,
    pub is_group: bool,
    pub status: String,
    pub timestamp_ms: u64,
}

/// The normalized message exposed to consumers.
///
/// Immutable once constructed. `id` is the deduplication identity in the
/// message store; an edit produces a new value carrying the *original*
/// message id with `edited` set, not a mutation of the stored record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalMessage {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub from_me: bool,
    pub kind: MessageKind,
    /// Extracted body text (first non-empty match of the extractor chain).
    pub body: String,
    pub media: Option<MediaInfo>,
    pub location: Option<LocationInfo>,
    pub poll: Option<PollState>,
    /// Recursively normalized quoted message, when the envelope carries one.
    pub quoted: Option<Box<CanonicalMessage>>,
    pub forwarded: bool,
    pub mentions: Vec<String>,
    pub timestamp_ms: u64,
    pub edited: bool,
    /// The original raw envelope payload.
    pub raw: Value,
}

/// Summary emitted when a history sync batch finishes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistorySyncSummary {
    pub chats: usize,
    pub messages: usize,
}

/// Domain events published on the session event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SessionEvent {
    /// Channel open and authenticated; carries the resolved self contact.
    Connected { user: Contact },
    /// Classified disconnect, with the raw cause for diagnostics.
    Disconnected {
        reason: DisconnectReason,
        status_code: Option<u16>,
        details: String,
    },
    /// A pairing artifact must be presented; re-emitted on each rotation.
    PairingRequired { code: String, attempt: u32 },
    /// Pairing completed and the channel opened.
    PairingSucceeded,
    /// Lifecycle transition.
    StatusChanged { status: SessionStatus },
    MessageReceived(CanonicalMessage),
    MessageSent(CanonicalMessage),
    MessageUpdate(Value),
    MessageDeleted(Value),
    MessageReaction(Value),
    Call(CallInfo),
    GroupUpdate(Value),
    GroupParticipantsUpdate(Value),
    PresenceUpdate(Value),
    ContactUpdate(Contact),
    BlocklistUpdate(Value),
    ChatUpdate(Value),
    ChatDeleted(Value),
    BroadcastMessage(Value),
    Notification(Value),
    HistorySyncDone(HistorySyncSummary),
    /// Session-scoped fault surfaced to subscribers instead of being thrown.
    Error { code: String, message: String },
}
