use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SessionStatus;

/// Broad error category used for containment and recovery decisions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transport-level fault (connection drop, handshake failure).
    Transport,
    /// Credentials rejected or revoked.
    Auth,
    /// Operation attempted without a live connection.
    NotConnected,
    /// Device-to-stable identifier mapping failed.
    Identity,
    /// Persistence I/O failure.
    Storage,
    /// Encode/decode failure.
    Serialization,
    /// Invalid configuration input.
    Config,
    /// Internal invariant break.
    Internal,
}

/// Structured error carried across the session's public boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ClientError {
    /// High-level category.
    pub category: ErrorCategory,
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ClientError {
    pub fn new(
        category: ErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Fail-fast precondition error for operations requiring a live channel.
    pub fn not_connected(action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ErrorCategory::NotConnected,
            "not_connected",
            format!("cannot run '{action}' while the session is not connected"),
        )
    }

    /// Unresolvable device-scoped to stable id mapping.
    pub fn identity_not_found(id: &str) -> Self {
        Self::new(
            ErrorCategory::Identity,
            "identity_not_found",
            format!("no stable id known for device-scoped id '{id}'"),
        )
    }

    /// Standard invalid-lifecycle-transition error.
    pub fn invalid_state(current: SessionStatus, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while session is in state {current:?}"),
        )
    }

    pub fn storage(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Storage, code, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Serialization, "codec_error", message)
    }
}

/// Wire status codes the transport attaches to connection-close payloads.
pub mod close_code {
    /// Credentials revoked server-side.
    pub const LOGGED_OUT: u16 = 401;
    /// Protocol asks the client to restart the socket immediately.
    pub const RESTART_REQUIRED: u16 = 515;
    /// Transient service unavailability.
    pub const SERVICE_UNAVAILABLE: u16 = 503;
}

/// Classified cause of a connection close.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Protocol-level restart; re-enter connecting silently.
    RestartRequired,
    /// Caller asked for the disconnect; no auto-reconnect.
    Manual,
    /// Credentials revoked; purge session state, terminal.
    LoggedOut,
    /// Pairing attempts exhausted without a successful scan.
    PairingExhausted,
    /// Transient service unavailability; reconnect immediately.
    ServiceUnavailable,
    /// Anything else; reconnect only if policy allows.
    ConnectionError,
}

/// Classify a connection close into a [`DisconnectReason`].
///
/// Pure function of the close status code, the manual-disconnect flag, and
/// whether pairing attempts ran out, checked in that fixed priority order.
pub fn classify_disconnect(
    status_code: Option<u16>,
    manual: bool,
    pairing_exhausted: bool,
) -> DisconnectReason {
    match status_code {
        Some(close_code::RESTART_REQUIRED) => DisconnectReason::RestartRequired,
        _ if manual => DisconnectReason::Manual,
        Some(close_code::LOGGED_OUT) => DisconnectReason::LoggedOut,
        _ if pairing_exhausted => DisconnectReason::PairingExhausted,
        Some(close_code::SERVICE_UNAVAILABLE) => DisconnectReason::ServiceUnavailable,
        _ => DisconnectReason::ConnectionError,
    }
}

impl DisconnectReason {
    /// Whether the lifecycle should re-enter `Connecting` on its own.
    ///
    /// `ConnectionError` reconnects only when the configured policy allows;
    /// that decision is the caller's.
    pub fn auto_reconnects(self) -> bool {
        matches!(
            self,
            DisconnectReason::RestartRequired | DisconnectReason::ServiceUnavailable
        )
    }

    /// Whether this close ends the session for good.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DisconnectReason::LoggedOut | DisconnectReason::PairingExhausted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_required_wins_over_everything() {
        // A restart code classifies as RestartRequired even when the manual
        // flag is set or pairing ran out.
        assert_eq!(
            classify_disconnect(Some(close_code::RESTART_REQUIRED), true, true),
            DisconnectReason::RestartRequired
        );
    }

    #[test]
    fn manual_wins_over_logged_out_code() {
        assert_eq!(
            classify_disconnect(Some(close_code::LOGGED_OUT), true, false),
            DisconnectReason::Manual
        );
    }

    #[test]
    fn logged_out_code_without_manual_flag_is_logged_out() {
        assert_eq!(
            classify_disconnect(Some(close_code::LOGGED_OUT), false, false),
            DisconnectReason::LoggedOut
        );
    }

    #[test]
    fn exhausted_pairing_beats_transient_codes() {
        assert_eq!(
            classify_disconnect(Some(close_code::SERVICE_UNAVAILABLE), false, true),
            DisconnectReason::PairingExhausted
        );
    }

    #[test]
    fn unavailable_service_reconnects() {
        let reason = classify_disconnect(Some(close_code::SERVICE_UNAVAILABLE), false, false);
        assert_eq!(reason, DisconnectReason::ServiceUnavailable);
        assert!(reason.auto_reconnects());
    }

    #[test]
    fn unknown_code_is_generic_connection_error() {
        let reason = classify_disconnect(Some(500), false, false);
        assert_eq!(reason, DisconnectReason::ConnectionError);
        assert!(!reason.auto_reconnects());
        assert!(!reason.is_terminal());
    }

    #[test]
    fn terminal_reasons_are_logged_out_and_pairing_exhausted() {
        assert!(DisconnectReason::LoggedOut.is_terminal());
        assert!(DisconnectReason::PairingExhausted.is_terminal());
        assert!(!DisconnectReason::Manual.is_terminal());
        assert!(!DisconnectReason::RestartRequired.is_terminal());
    }

    #[test]
    fn keeps_stable_error_codes() {
        assert_eq!(ClientError::not_connected("send_presence").code, "not_connected");
        assert_eq!(
            ClientError::identity_not_found("1:2@lid").code,
            "identity_not_found"
        );
        assert_eq!(
            ClientError::invalid_state(SessionStatus::Init, "heartbeat").code,
            "invalid_state_transition"
        );
    }
}
