//! # Metaverse Client Library
//!
//! Client-side synchronization layer for a shared 3D trading world. It keeps
//! a local replica of every connected actor, runs positional voice chat,
//! relays chat, trade offers and friend requests, and tracks which key areas
//! of the world the local user has explored.
//!
//! ## Architecture Overview
//!
//! Everything hangs off one [`session::Session`], an explicitly owned value
//! with no global state. The session is a single-threaded state machine:
//! the host feeds it socket events and calls `tick` once per frame, passing
//! the current time in. Timers, smoothing and throttling are therefore fully
//! deterministic and can be driven from tests without a network.
//!
//! ```text
//! transport -> connection -> dispatcher -> presence / voice / messaging / location -> host
//! ```
//!
//! ## Module Organization
//!
//! ### Connection (`connection`, `transport`, `network`)
//! - Handshake: `join` out, `initial_state` in, only then `Joined`
//! - Fixed-delay reconnection and a handshake timeout
//! - The [`transport::Transport`] seam, with an in-memory implementation for
//!   tests and a tokio-tungstenite WebSocket implementation in `network`
//!
//! ### Protocol (`dispatcher`)
//! - Frame decoding that tells malformed frames from unknown message types
//! - Typed publish/subscribe with explicit unsubscribe handles
//!
//! ### Presence (`presence`, `motion`)
//! - One record per actor, last writer wins per field
//! - Exponential smoothing of remote poses, shortest-arc yaw
//! - Throttled, change-detected local updates
//!
//! ### Voice (`voice`)
//! - Chunked 16-bit PCM capture, base64 on the wire
//! - Spatial playback relative to the listener, muted senders dropped
//!   before decode
//! - A debounced "currently speaking" set
//!
//! ### Social (`messaging`)
//! - Bounded chat, trade and activity histories in receipt order
//! - Friend requests and a locally derived friend list
//!
//! ### Exploration (`location`)
//! - Zone entry detection and a visit ledger that only grows
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::ClientConfig;
//! use client::session::Session;
//! use client::transport::{MemoryTransport, TransportEvent};
//! use client::voice::NullSink;
//! use shared::Customization;
//! use std::time::Instant;
//!
//! let config = ClientConfig::default();
//! let mut session = Session::new(MemoryTransport::new(), NullSink::default(), &config);
//! session.connect("Trader", Customization::default(), Instant::now());
//!
//! // Whoever owns the socket reports what happened on it
//! session.handle_transport_event(TransportEvent::Opened, Instant::now());
//!
//! // Once per frame
//! session.tick(1.0 / 60.0, Instant::now());
//! for actor in session.presence().list_actors() {
//!     println!("{} at {:?}", actor.display_name, actor.rendered_position);
//! }
//! ```

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod location;
pub mod messaging;
pub mod motion;
pub mod network;
pub mod presence;
pub mod session;
pub mod transport;
pub mod voice;
