//! Pure session state transitions

use tracing::{info, warn};

/// Connection state of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Inputs that move a session between states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    ConnectStarted,
    ConnectSucceeded,
    ConnectFailed(String),
    ConnectionLost(String),
    DisconnectRequested,
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }

    /// Determine next state after a transition (pure function)
    pub fn next(self, transition: &Transition) -> SessionState {
        match transition {
            Transition::ConnectStarted => SessionState::Connecting,
            Transition::ConnectSucceeded => {
                info!("Session connected");
                SessionState::Connected
            }
            Transition::ConnectFailed(reason) => {
                warn!(reason = %reason, "Connect attempt failed");
                SessionState::Disconnected
            }
            Transition::ConnectionLost(reason) => {
                warn!(reason = %reason, "Session lost its connection");
                SessionState::Disconnected
            }
            Transition::DisconnectRequested => SessionState::Disconnected,
        }
    }

    /// Whether a transition into `next` should be announced as a disconnect
    pub fn leaves_connected(self, next: SessionState) -> bool {
        self.is_connected() && !next.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_sequence() {
        let state = SessionState::default();
        assert_eq!(state, SessionState::Disconnected);

        let state = state.next(&Transition::ConnectStarted);
        assert_eq!(state, SessionState::Connecting);
        assert!(!state.is_connected());

        let state = state.next(&Transition::ConnectSucceeded);
        assert!(state.is_connected());
    }

    #[test]
    fn test_failed_connect_returns_to_disconnected() {
        let state = SessionState::Connecting.next(&Transition::ConnectFailed("refused".into()));
        assert_eq!(state, SessionState::Disconnected);
    }

    #[test]
    fn test_leaves_connected_only_from_connected() {
        let lost = SessionState::Connected.next(&Transition::ConnectionLost("eof".into()));
        assert!(SessionState::Connected.leaves_connected(lost));
        assert!(!SessionState::Connecting.leaves_connected(SessionState::Disconnected));
        assert!(!SessionState::Disconnected.leaves_connected(SessionState::Disconnected));
    }
}
