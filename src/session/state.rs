//! Session state machine.

/// Represents the lifecycle state of a multiplexed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Record exists and the establishment request is being processed.
    #[default]
    Initializing,
    /// Handshake completed; the session accepts requests.
    Active,
    /// Termination started; in-flight requests are draining.
    Closing,
    /// Handler released and record removed. Terminal.
    Closed,
}

impl SessionState {
    /// Check if transition to target state is valid.
    ///
    /// Valid transitions:
    /// - Initializing -> Active
    /// - Initializing -> Closing (failed handshake)
    /// - Active -> Closing
    /// - Closing -> Closed
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (*self, target),
            (Initializing, Active) | (Initializing, Closing) | (Active, Closing) | (Closing, Closed)
        )
    }

    /// Attempt to transition to a new state.
    ///
    /// Returns `Ok(())` if the transition is valid, or an error otherwise.
    pub fn transition_to(&mut self, target: SessionState) -> crate::Result<()> {
        if self.can_transition_to(target) {
            *self = target;
            Ok(())
        } else {
            Err(crate::error::MuxError::InvalidStateTransition {
                from: *self,
                to: target,
            })
        }
    }

    /// Check if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed)
    }

    /// Check if the session is being or has been torn down.
    pub fn is_closing(&self) -> bool {
        matches!(self, SessionState::Closing | SessionState::Closed)
    }

    /// Check if session can accept requests.
    pub fn can_process(&self) -> bool {
        matches!(self, SessionState::Initializing | SessionState::Active)
    }
}
