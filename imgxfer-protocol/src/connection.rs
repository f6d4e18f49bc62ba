//! Connection mode state machine
//!
//! Tracks whether the endpoint is hosting the wireless link or joining one,
//! driven by events from the link collaborator. The state is advisory: the
//! receive pipeline runs whenever the socket is open.

use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;

/// Which side of the wireless link this endpoint plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionMode {
    /// Runs the access point
    Host,
    /// Joins a host's access point as a station
    Join,
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionMode::Host => write!(f, "host"),
            ConnectionMode::Join => write!(f, "join"),
        }
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not started
    Idle,
    /// Host requested, access point not up yet
    HostStarting,
    /// Access point is up
    HostRunning,
    /// Looking for the host's access point
    JoinConnecting,
    /// Associated with the host and addressed
    JoinConnected,
    /// Hard failure reported by the link
    Error,
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::HostStarting => "host-starting",
            ConnectionState::HostRunning => "host-running",
            ConnectionState::JoinConnecting => "join-connecting",
            ConnectionState::JoinConnected => "join-connected",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Notifications from the wireless link collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Access point came up
    HostStarted,
    /// Access point went down
    HostStopped,
    /// A station joined our access point and got an address
    StationAssigned(SocketAddr),
    /// We joined the host and got an address
    Joined(SocketAddr),
    /// We lost the host
    Disconnected,
    /// Unrecoverable link failure
    Failed(String),
}

/// A state change, reported to observers after the state lock is released
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    /// Human readable cause
    pub reason: String,
}

/// Connection errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Cannot start {mode} mode while {state}")]
    InvalidState {
        mode: ConnectionMode,
        state: ConnectionState,
    },
}

/// Connection state machine
///
/// ```text
/// Idle -> HostStarting -> HostRunning -> (HostStopped) Idle
/// Idle -> JoinConnecting <-> JoinConnected
/// any  -> Error (Failed), any -> Idle (stop)
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    mode: Option<ConnectionMode>,
    /// Last peer address learned from the link
    peer: Option<SocketAddr>,
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        ConnectionStateMachine {
            state: ConnectionState::Idle,
            mode: None,
            peer: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn mode(&self) -> Option<ConnectionMode> {
        self.mode
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Host is running or join is connected
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::HostRunning | ConnectionState::JoinConnected
        )
    }

    fn transition(&mut self, to: ConnectionState, reason: impl Into<String>) -> Option<Transition> {
        if self.state == to {
            return None;
        }
        let transition = Transition {
            from: self.state,
            to,
            reason: reason.into(),
        };
        self.state = to;
        tracing::debug!(
            from = %transition.from,
            to = %transition.to,
            reason = %transition.reason,
            "Connection state changed"
        );
        Some(transition)
    }

    /// Begin hosting or joining
    ///
    /// Allowed from `Idle` and `Error`.
    pub fn start(&mut self, mode: ConnectionMode) -> Result<Transition, ConnectionError> {
        if !matches!(self.state, ConnectionState::Idle | ConnectionState::Error) {
            return Err(ConnectionError::InvalidState {
                mode,
                state: self.state,
            });
        }

        self.mode = Some(mode);
        self.peer = None;
        let (to, reason) = match mode {
            ConnectionMode::Host => (ConnectionState::HostStarting, "Starting host"),
            ConnectionMode::Join => (ConnectionState::JoinConnecting, "Connecting to host"),
        };
        let transition = Transition {
            from: self.state,
            to,
            reason: reason.to_string(),
        };
        self.state = to;
        tracing::debug!(%mode, to = %to, "Connection starting");
        Ok(transition)
    }

    /// Apply a link event
    ///
    /// Events that do not apply to the current mode are ignored.
    pub fn on_link_event(&mut self, event: LinkEvent) -> Option<Transition> {
        let Some(mode) = self.mode else {
            tracing::debug!(?event, "Link event ignored, transfer not started");
            return None;
        };

        match (mode, event) {
            (_, LinkEvent::Failed(reason)) => self.transition(ConnectionState::Error, reason),

            (ConnectionMode::Host, LinkEvent::HostStarted) => {
                self.transition(ConnectionState::HostRunning, "AP started")
            }
            (ConnectionMode::Host, LinkEvent::HostStopped) => {
                self.mode = None;
                self.peer = None;
                self.transition(ConnectionState::Idle, "AP stopped")
            }
            (ConnectionMode::Host, LinkEvent::StationAssigned(addr)) => {
                tracing::info!(%addr, "Station assigned address");
                self.peer = Some(addr);
                None
            }

            (ConnectionMode::Join, LinkEvent::Joined(addr)) => {
                self.peer = Some(addr);
                self.transition(ConnectionState::JoinConnected, "STA connected")
            }
            (ConnectionMode::Join, LinkEvent::Disconnected) => {
                self.peer = None;
                self.transition(ConnectionState::JoinConnecting, "STA disconnected")
            }

            (mode, event) => {
                tracing::debug!(%mode, ?event, "Link event does not apply to mode");
                None
            }
        }
    }

    /// Go back to `Idle`, forgetting the mode
    pub fn stop(&mut self) -> Option<Transition> {
        self.mode = None;
        self.peer = None;
        self.transition(ConnectionState::Idle, "Stopped")
    }

    /// Enter `Error` for a local failure
    pub fn fail(&mut self, reason: impl Into<String>) -> Option<Transition> {
        self.transition(ConnectionState::Error, reason)
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "192.168.4.2:6789".parse().unwrap()
    }

    #[test]
    fn test_host_lifecycle() {
        let mut sm = ConnectionStateMachine::new();
        assert_eq!(sm.state(), ConnectionState::Idle);

        let t = sm.start(ConnectionMode::Host).unwrap();
        assert_eq!(t.from, ConnectionState::Idle);
        assert_eq!(t.to, ConnectionState::HostStarting);
        assert!(!sm.is_active());

        let t = sm.on_link_event(LinkEvent::HostStarted).unwrap();
        assert_eq!(t.to, ConnectionState::HostRunning);
        assert_eq!(t.reason, "AP started");
        assert!(sm.is_active());

        assert_eq!(sm.on_link_event(LinkEvent::StationAssigned(addr())), None);
        assert_eq!(sm.peer(), Some(addr()));

        let t = sm.on_link_event(LinkEvent::HostStopped).unwrap();
        assert_eq!(t.to, ConnectionState::Idle);
        assert_eq!(sm.mode(), None);
    }

    #[test]
    fn test_join_reconnect() {
        let mut sm = ConnectionStateMachine::new();
        sm.start(ConnectionMode::Join).unwrap();
        assert_eq!(sm.state(), ConnectionState::JoinConnecting);

        let t = sm.on_link_event(LinkEvent::Joined(addr())).unwrap();
        assert_eq!(t.to, ConnectionState::JoinConnected);
        assert_eq!(t.reason, "STA connected");

        let t = sm.on_link_event(LinkEvent::Disconnected).unwrap();
        assert_eq!(t.from, ConnectionState::JoinConnected);
        assert_eq!(t.to, ConnectionState::JoinConnecting);
        assert_eq!(sm.peer(), None);

        // Repeated disconnects while already connecting are not transitions
        assert_eq!(sm.on_link_event(LinkEvent::Disconnected), None);
    }

    #[test]
    fn test_events_for_other_mode_are_ignored() {
        let mut sm = ConnectionStateMachine::new();
        sm.start(ConnectionMode::Host).unwrap();
        assert_eq!(sm.on_link_event(LinkEvent::Joined(addr())), None);
        assert_eq!(sm.on_link_event(LinkEvent::Disconnected), None);
        assert_eq!(sm.state(), ConnectionState::HostStarting);

        let mut sm = ConnectionStateMachine::new();
        sm.start(ConnectionMode::Join).unwrap();
        assert_eq!(sm.on_link_event(LinkEvent::HostStarted), None);
        assert_eq!(sm.state(), ConnectionState::JoinConnecting);
    }

    #[test]
    fn test_events_before_start_are_ignored() {
        let mut sm = ConnectionStateMachine::new();
        assert_eq!(sm.on_link_event(LinkEvent::HostStarted), None);
        assert_eq!(sm.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_failure_and_restart() {
        let mut sm = ConnectionStateMachine::new();
        sm.start(ConnectionMode::Join).unwrap();

        let t = sm
            .on_link_event(LinkEvent::Failed("radio init failed".into()))
            .unwrap();
        assert_eq!(t.to, ConnectionState::Error);
        assert_eq!(t.reason, "radio init failed");

        let t = sm.start(ConnectionMode::Host).unwrap();
        assert_eq!(t.from, ConnectionState::Error);
        assert_eq!(t.to, ConnectionState::HostStarting);
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let mut sm = ConnectionStateMachine::new();
        sm.start(ConnectionMode::Host).unwrap();
        assert_eq!(
            sm.start(ConnectionMode::Join),
            Err(ConnectionError::InvalidState {
                mode: ConnectionMode::Join,
                state: ConnectionState::HostStarting
            })
        );
    }

    #[test]
    fn test_stop() {
        let mut sm = ConnectionStateMachine::new();
        assert_eq!(sm.stop(), None);

        sm.start(ConnectionMode::Join).unwrap();
        sm.on_link_event(LinkEvent::Joined(addr()));
        let t = sm.stop().unwrap();
        assert_eq!(t.to, ConnectionState::Idle);
        assert_eq!(t.reason, "Stopped");
        assert_eq!(sm.mode(), None);
    }
}
