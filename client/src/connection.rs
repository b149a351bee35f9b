//! Connection lifecycle: handshake, liveness and reconnection
//!
//! The manager walks a small state machine:
//!
//! ```text
//! Disconnected --connect--> Connecting --initial_state--> Joined
//!      ^                        |                            |
//!      +--- reconnect delay ----+------ unexpected close ----+
//! ```
//!
//! Opening the socket is not enough to be `Joined`: the manager sends `join`
//! as soon as the socket opens, but only flips to `Joined` once the server
//! answers with `initial_state`. Anything that closes the socket without the
//! caller asking for it schedules another attempt after a fixed delay, for as
//! long as the caller supplied a display name. An attempt that never gets its
//! `initial_state` is abandoned after the handshake timeout and retried the
//! same way.

use crate::config::ClientConfig;
use crate::transport::Transport;
use log::{debug, error, info, warn};
use shared::{
    ActorId, Customization, Envelope, JoinData, DEFAULT_ANIMATION, SPAWN_POSITION,
    SPAWN_ROTATION,
};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Joined,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub display_name: String,
    pub customization: Customization,
}

/// Liveness snapshot for the host application.
///
/// The core never gives up reconnecting; a host that wants a give-up policy
/// watches `failed_attempts` and `last_inbound`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionHealth {
    pub state: ConnectionState,
    /// Attempts that ended before reaching `Joined`, reset on every join
    pub failed_attempts: u32,
    pub last_inbound: Option<Instant>,
    pub reconnect_at: Option<Instant>,
}

pub struct ConnectionManager<T: Transport> {
    transport: T,
    url: String,
    reconnect_delay: Duration,
    handshake_timeout: Duration,

    state: ConnectionState,
    credentials: Option<Credentials>,
    local_actor_id: Option<ActorId>,
    socket_open: bool,

    attempt_started: Option<Instant>,
    reconnect_at: Option<Instant>,
    failed_attempts: u32,
    last_inbound: Option<Instant>,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T, config: &ClientConfig) -> Self {
        Self {
            transport,
            url: config.server_url.clone(),
            reconnect_delay: config.reconnect_delay,
            handshake_timeout: config.handshake_timeout,
            state: ConnectionState::Disconnected,
            credentials: None,
            local_actor_id: None,
            socket_open: false,
            attempt_started: None,
            reconnect_at: None,
            failed_attempts: 0,
            last_inbound: None,
        }
    }

    /// Starts a session. Returns false when a connection is already live
    /// or being established.
    pub fn connect(
        &mut self,
        display_name: &str,
        customization: Customization,
        now: Instant,
    ) -> bool {
        if self.state != ConnectionState::Disconnected {
            warn!("connect() called while {:?}; ignoring", self.state);
            return false;
        }

        self.credentials = Some(Credentials {
            display_name: display_name.to_string(),
            customization,
        });
        self.reconnect_at = None;
        self.failed_attempts = 0;
        self.begin_attempt(now);
        true
    }

    /// Closes the session from any state. Cancels a pending reconnect.
    pub fn disconnect(&mut self) {
        if self.reconnect_at.take().is_some() {
            debug!("Cancelled pending reconnect");
        }

        if self.state != ConnectionState::Disconnected {
            info!("Disconnecting from {}", self.url);
            self.transport.close();
        }

        self.state = ConnectionState::Disconnected;
        self.credentials = None;
        self.local_actor_id = None;
        self.socket_open = false;
        self.attempt_started = None;
    }

    fn begin_attempt(&mut self, now: Instant) {
        info!("Connecting to {}...", self.url);
        self.state = ConnectionState::Connecting;
        self.local_actor_id = None;
        self.socket_open = false;
        self.attempt_started = Some(now);
        self.transport.open(&self.url);
    }

    /// Socket is open: introduce ourselves.
    pub fn on_opened(&mut self) {
        if self.state != ConnectionState::Connecting {
            debug!("Ignoring socket open while {:?}", self.state);
            return;
        }

        let Some(credentials) = self.credentials.clone() else {
            warn!("Socket opened without credentials; closing");
            self.transport.close();
            return;
        };

        self.socket_open = true;
        let join = Envelope::Join(JoinData {
            display_name: credentials.display_name,
            customization: credentials.customization,
            position: SPAWN_POSITION,
            rotation: SPAWN_ROTATION,
            animation: DEFAULT_ANIMATION.to_string(),
        });
        if self.write(&join) {
            info!("Sent join, waiting for initial state");
        }
    }

    /// Completes the handshake. Returns false if no handshake was in flight.
    pub fn on_initial_state(&mut self, local_actor_id: ActorId) -> bool {
        if self.state != ConnectionState::Connecting || !self.socket_open {
            warn!(
                "Unexpected initial_state while {:?}; ignoring",
                self.state
            );
            return false;
        }

        info!("Joined! Local actor ID: {}", local_actor_id);
        self.state = ConnectionState::Joined;
        self.local_actor_id = Some(local_actor_id);
        self.attempt_started = None;
        self.failed_attempts = 0;
        true
    }

    /// Socket went away. Returns true if this ended a live session or attempt.
    pub fn on_closed(&mut self, reason: &str, now: Instant) -> bool {
        if self.state == ConnectionState::Disconnected {
            debug!("Socket closed while already disconnected: {}", reason);
            return false;
        }

        warn!("Connection lost ({:?}): {}", self.state, reason);
        self.drop_connection(now);
        true
    }

    fn drop_connection(&mut self, now: Instant) {
        if self.state == ConnectionState::Connecting {
            self.failed_attempts += 1;
        }

        self.state = ConnectionState::Disconnected;
        self.local_actor_id = None;
        self.socket_open = false;
        self.attempt_started = None;

        let can_retry = self
            .credentials
            .as_ref()
            .is_some_and(|c| !c.display_name.is_empty());
        if can_retry {
            info!("Reconnecting in {:?}", self.reconnect_delay);
            self.reconnect_at = Some(now + self.reconnect_delay);
        } else {
            info!("No credentials to rejoin with; staying disconnected");
        }
    }

    /// Advances timers: fires due reconnects and abandons stalled handshakes.
    pub fn poll(&mut self, now: Instant) {
        if let Some(at) = self.reconnect_at {
            if now >= at {
                self.reconnect_at = None;
                self.begin_attempt(now);
            }
        }

        if self.state == ConnectionState::Connecting {
            if let Some(started) = self.attempt_started {
                if now.duration_since(started) >= self.handshake_timeout {
                    warn!(
                        "No initial_state within {:?}; abandoning attempt",
                        self.handshake_timeout
                    );
                    self.transport.close();
                    self.drop_connection(now);
                }
            }
        }
    }

    pub fn note_inbound(&mut self, now: Instant) {
        self.last_inbound = Some(now);
    }

    /// Sends an envelope on the joined session. Returns false (and logs) when
    /// not joined.
    pub fn send(&mut self, envelope: &Envelope) -> bool {
        if self.state != ConnectionState::Joined {
            debug!("Not joined; dropping outbound {}", envelope.kind());
            return false;
        }
        self.write(envelope)
    }

    fn write(&mut self, envelope: &Envelope) -> bool {
        match envelope.encode() {
            Ok(frame) => {
                self.transport.send(frame);
                true
            }
            Err(e) => {
                error!("Failed to encode {}: {}", envelope.kind(), e);
                false
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_joined(&self) -> bool {
        self.state == ConnectionState::Joined
    }

    pub fn local_actor_id(&self) -> Option<&ActorId> {
        self.local_actor_id.as_ref()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn health(&self) -> ConnectionHealth {
        ConnectionHealth {
            state: self.state,
            failed_attempts: self.failed_attempts,
            last_inbound: self.last_inbound,
            reconnect_at: self.reconnect_at,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn manager() -> ConnectionManager<MemoryTransport> {
        ConnectionManager::new(MemoryTransport::new(), &ClientConfig::default())
    }

    fn join_name(frame: &str) -> String {
        match Envelope::decode(frame).unwrap() {
            Envelope::Join(join) => join.display_name,
            other => panic!("Expected join, got {:?}", other),
        }
    }

    fn joined(now: Instant) -> ConnectionManager<MemoryTransport> {
        let mut manager = manager();
        assert!(manager.connect("Alice", Customization::default(), now));
        manager.on_opened();
        assert!(manager.on_initial_state(ActorId::new("a1")));
        manager
    }

    #[test]
    fn test_handshake_requires_initial_state() {
        let now = Instant::now();
        let mut manager = manager();
        manager.connect("Alice", Customization::default(), now);
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert_eq!(manager.transport().opened.len(), 1);

        manager.on_opened();
        assert_eq!(manager.state(), ConnectionState::Connecting);
        let sent = manager.transport_mut().take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(join_name(&sent[0]), "Alice");

        assert!(manager.on_initial_state(ActorId::new("a1")));
        assert_eq!(manager.state(), ConnectionState::Joined);
        assert_eq!(manager.local_actor_id(), Some(&ActorId::new("a1")));
    }

    #[test]
    fn test_initial_state_before_open_is_ignored() {
        let mut manager = manager();
        manager.connect("Alice", Customization::default(), Instant::now());
        assert!(!manager.on_initial_state(ActorId::new("a1")));
        assert_eq!(manager.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_connect_while_joined_is_noop() {
        let now = Instant::now();
        let mut manager = joined(now);
        assert!(!manager.connect("Alice", Customization::default(), now));
        assert_eq!(manager.transport().opened.len(), 1);
        assert_eq!(manager.state(), ConnectionState::Joined);
    }

    #[test]
    fn test_connect_while_connecting_is_noop() {
        let now = Instant::now();
        let mut manager = manager();
        manager.connect("Alice", Customization::default(), now);
        assert!(!manager.connect("Bob", Customization::default(), now));
        assert_eq!(manager.transport().opened.len(), 1);
        assert_eq!(manager.credentials().unwrap().display_name, "Alice");
    }

    #[test]
    fn test_abrupt_close_reconnects_after_delay() {
        let start = Instant::now();
        let mut manager = joined(start);
        manager.transport_mut().take_sent();

        assert!(manager.on_closed("reset by peer", start));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.local_actor_id(), None);

        manager.poll(start + Duration::from_millis(4999));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.transport().opened.len(), 1);

        manager.poll(start + Duration::from_secs(5));
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert_eq!(manager.transport().opened.len(), 2);

        manager.on_opened();
        let sent = manager.transport_mut().take_sent();
        assert_eq!(join_name(&sent[0]), "Alice");
    }

    #[test]
    fn test_disconnect_cancels_pending_reconnect() {
        let start = Instant::now();
        let mut manager = joined(start);
        manager.on_closed("gone", start);
        assert!(manager.health().reconnect_at.is_some());

        manager.disconnect();
        manager.poll(start + Duration::from_secs(60));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.transport().opened.len(), 1);
    }

    #[test]
    fn test_disconnect_is_safe_from_any_state() {
        let mut manager = manager();
        manager.disconnect();
        manager.disconnect();
        assert_eq!(manager.transport().close_calls, 0);

        let mut manager = joined(Instant::now());
        manager.disconnect();
        assert_eq!(manager.transport().close_calls, 1);
        assert!(!manager.on_closed("late close", Instant::now()));
    }

    #[test]
    fn test_empty_display_name_does_not_reconnect() {
        let now = Instant::now();
        let mut manager = manager();
        manager.connect("", Customization::default(), now);
        manager.on_closed("refused", now);
        assert_eq!(manager.health().reconnect_at, None);
        manager.poll(now + Duration::from_secs(30));
        assert_eq!(manager.transport().opened.len(), 1);
    }

    #[test]
    fn test_handshake_timeout_abandons_attempt() {
        let start = Instant::now();
        let mut manager = manager();
        manager.connect("Alice", Customization::default(), start);
        manager.on_opened();

        manager.poll(start + Duration::from_secs(14));
        assert_eq!(manager.state(), ConnectionState::Connecting);

        manager.poll(start + Duration::from_secs(15));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.transport().close_calls, 1);

        let health = manager.health();
        assert_eq!(health.failed_attempts, 1);
        assert_eq!(
            health.reconnect_at,
            Some(start + Duration::from_secs(15) + Duration::from_secs(5))
        );
    }

    #[test]
    fn test_send_requires_join() {
        let mut manager = manager();
        assert!(!manager.send(&Envelope::Ping));
        assert!(manager.transport().sent.is_empty());

        let mut manager = joined(Instant::now());
        manager.transport_mut().take_sent();
        assert!(manager.send(&Envelope::Ping));
        assert_eq!(manager.transport().sent.len(), 1);
    }

    #[test]
    fn test_failed_attempts_reset_on_join() {
        let start = Instant::now();
        let mut manager = manager();
        manager.connect("Alice", Customization::default(), start);
        manager.on_closed("refused", start);
        manager.poll(start + Duration::from_secs(5));
        manager.on_closed("refused", start + Duration::from_secs(5));
        assert_eq!(manager.health().failed_attempts, 2);

        manager.poll(start + Duration::from_secs(10));
        manager.on_opened();
        manager.on_initial_state(ActorId::new("a1"));
        assert_eq!(manager.health().failed_attempts, 0);
    }
}
