//! Session runtime over a pluggable real-time messaging transport.
//!
//! The crate binds the core contracts together: a lifecycle state machine
//! drives the connection, raw transport events flow through per-chat
//! normalization pipelines into the message store and out on the event bus.

/// Environment-backed runtime configuration.
pub mod config;
/// Contact directory with on-demand enrichment.
pub mod directory;
/// Session lifecycle state machine.
pub mod lifecycle;
/// Tracing bootstrap.
pub mod logging;
/// Envelope-to-canonical-message normalization.
pub mod normalize;
/// Alternate-namespace id resolution.
pub mod resolver;
/// Session handle and runtime loop.
pub mod session;
/// File-backed message store.
pub mod store_fs;
/// Transport contract and raw transport events.
pub mod transport;

#[cfg(test)]
mod testutil;

pub use config::{ConfigError, SessionConfig};
pub use directory::ContactDirectory;
pub use lifecycle::{MAX_PAIRING_ATTEMPTS, SessionStateMachine};
pub use normalize::EventNormalizer;
pub use resolver::IdentityResolver;
pub use session::Session;
pub use store_fs::FileStore;
pub use transport::{
    ConnectionState, ConnectionUpdate, GroupInfo, NewsletterInfo, PollVoteCipher, PollVoteContext,
    Transport, TransportEvent,
};
