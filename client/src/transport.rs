//! Socket seam between the connection manager and the actual network
//!
//! The connection manager never touches a socket directly. It issues
//! fire-and-forget commands through [`Transport`] and is told about the
//! results later through [`TransportEvent`]s fed in by whoever owns the
//! event loop. This keeps the whole synchronization layer single-threaded
//! and lets tests script a server without opening ports.

use std::collections::VecDeque;

/// What happened on the socket, delivered in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Frame(String),
    /// The socket closed or failed to open. Always recoverable.
    Closed { reason: String },
}

pub trait Transport {
    /// Starts opening a connection. Completion arrives as [`TransportEvent::Opened`].
    fn open(&mut self, url: &str);

    /// Queues one text frame on the live connection.
    fn send(&mut self, frame: String);

    /// Tears down the live connection, if any. Must not fail.
    fn close(&mut self);
}

/// In-process transport that records every command it receives.
///
/// Events are never generated on its own; the test (or replay tool) drives
/// the owning session with whatever [`TransportEvent`]s it wants.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    pub opened: Vec<String>,
    pub sent: VecDeque<String>,
    pub close_calls: usize,
    connected: bool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// True between an `open` and the next `close`.
    pub fn is_open(&self) -> bool {
        self.connected
    }

    pub fn take_sent(&mut self) -> Vec<String> {
        self.sent.drain(..).collect()
    }
}

impl Transport for MemoryTransport {
    fn open(&mut self, url: &str) {
        self.opened.push(url.to_string());
        self.connected = true;
    }

    fn send(&mut self, frame: String) {
        self.sent.push_back(frame);
    }

    fn close(&mut self) {
        self.close_calls += 1;
        self.connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_transport_records_commands() {
        let mut transport = MemoryTransport::new();
        assert!(!transport.is_open());

        transport.open("ws://world");
        transport.send("a".to_string());
        transport.send("b".to_string());
        assert!(transport.is_open());
        assert_eq!(transport.take_sent(), vec!["a".to_string(), "b".to_string()]);
        assert!(transport.take_sent().is_empty());

        transport.close();
        assert!(!transport.is_open());
        assert_eq!(transport.close_calls, 1);
        assert_eq!(transport.opened, vec!["ws://world".to_string()]);
    }
}
