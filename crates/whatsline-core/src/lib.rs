//! Core contract shared between the session runtime and its consumers.
//!
//! This crate defines the canonical message model, the wire envelope
//! decoder, identity helpers, the disconnect/error taxonomy, the event bus,
//! and the message store contract.

/// Session event bus primitives.
pub mod channel;
/// Wire envelope decoding into the closed content model.
pub mod envelope;
/// Stable client error types and disconnect classification.
pub mod error;
/// Chat identifier domain helpers.
pub mod identity;
/// Backoff policy used by reconnect loops.
pub mod retry;
/// Message persistence contract and in-memory store.
pub mod store;
/// Canonical message model and session event payloads.
pub mod types;

pub use channel::{EventBus, EventStream};
pub use envelope::{
    EnvelopeKey, MediaContent, MessageContent, MessageContext, QuotedRef, RawEnvelope, body_text,
};
pub use error::{ClientError, DisconnectReason, ErrorCategory, classify_disconnect, close_code};
pub use identity::{chat_kind, is_broadcast, is_device_scoped, is_group, is_newsletter,
    strip_device_suffix};
pub use retry::ReconnectBackoff;
pub use store::{HistoryQuery, MemoryStore, MessageStore, filter_history};
pub use types::{
    CallInfo, CanonicalMessage, ChatKind, Contact, HistorySyncSummary, LocationInfo, MediaInfo,
    MessageKind, PollState, SessionEvent, SessionStatus,
};
