//! Pure session lifecycle state machine.
//!
//! The runtime drives this machine from transport connection updates; the
//! machine decides the next status and which lifecycle events to emit, and
//! rejects transitions that make no sense for the current status.

use whatsline_core::{
    error::{ClientError, DisconnectReason, classify_disconnect},
    types::{SessionEvent, SessionStatus},
};

/// Pairing codes rotate a bounded number of times before the session gives
/// up and reports the attempt ceiling.
pub const MAX_PAIRING_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    status: SessionStatus,
    pairing_attempts: u32,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self {
            status: SessionStatus::Init,
            pairing_attempts: 0,
        }
    }
}

impl SessionStateMachine {
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Whether the configured pairing attempt ceiling has been reached.
    pub fn pairing_exhausted(&self) -> bool {
        self.pairing_attempts >= MAX_PAIRING_ATTEMPTS
    }

    /// Bring-up or reconnect started.
    pub fn on_connecting(&mut self) -> Result<Vec<SessionEvent>, ClientError> {
        match self.status {
            SessionStatus::Init | SessionStatus::Connecting | SessionStatus::Disconnected => {
                self.transition(SessionStatus::Connecting)
            }
            status => Err(ClientError::invalid_state(status, "connect")),
        }
    }

    /// A pairing code arrived (first issue or rotation).
    ///
    /// Returns the attempt ordinal to report alongside the code.
    pub fn on_pairing_code(&mut self) -> Result<(u32, Vec<SessionEvent>), ClientError> {
        match self.status {
            SessionStatus::Connecting | SessionStatus::PairingRequired => {
                self.pairing_attempts += 1;
                let events = self.transition(SessionStatus::PairingRequired)?;
                Ok((self.pairing_attempts, events))
            }
            status => Err(ClientError::invalid_state(status, "pairing_code")),
        }
    }

    /// Channel opened and authenticated.
    ///
    /// The second element reports whether this open completed a pairing
    /// flow; the counter resets either way.
    pub fn on_open(&mut self) -> Result<(bool, Vec<SessionEvent>), ClientError> {
        match self.status {
            SessionStatus::Connecting | SessionStatus::PairingRequired => {
                let paired = self.status == SessionStatus::PairingRequired;
                self.pairing_attempts = 0;
                let events = self.transition(SessionStatus::Connected)?;
                Ok((paired, events))
            }
            status => Err(ClientError::invalid_state(status, "open")),
        }
    }

    /// Channel closed. Classifies the cause and moves to the matching
    /// terminal or restartable status.
    pub fn on_close(
        &mut self,
        status_code: Option<u16>,
        manual: bool,
    ) -> Result<(DisconnectReason, Vec<SessionEvent>), ClientError> {
        match self.status {
            SessionStatus::Connecting
            | SessionStatus::PairingRequired
            | SessionStatus::Connected => {
                let reason = classify_disconnect(status_code, manual, self.pairing_exhausted());
                let next = if reason == DisconnectReason::LoggedOut {
                    SessionStatus::LoggedOut
                } else {
                    SessionStatus::Disconnected
                };
                let events = self.transition(next)?;
                Ok((reason, events))
            }
            status => Err(ClientError::invalid_state(status, "close")),
        }
    }

    /// Credentials discarded by an explicit logout.
    pub fn on_logout(&mut self) -> Result<Vec<SessionEvent>, ClientError> {
        match self.status {
            SessionStatus::LoggedOut => Ok(Vec::new()),
            _ => self.transition(SessionStatus::LoggedOut),
        }
    }

    fn transition(&mut self, next: SessionStatus) -> Result<Vec<SessionEvent>, ClientError> {
        if self.status == next {
            return Ok(Vec::new());
        }
        self.status = next;
        Ok(vec![SessionEvent::StatusChanged { status: next }])
    }
}
