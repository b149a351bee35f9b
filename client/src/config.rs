//! Tunables for a client session
//!
//! Every timing constant the synchronization layer depends on lives here so
//! the binary can expose them on the command line and tests can shrink them.

use crate::location::Zone;
use shared::Vec3;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint of the world server
    pub server_url: String,
    /// Delay between an unexpected close and the next connection attempt
    pub reconnect_delay: Duration,
    /// Maximum time from opening a connection to receiving `initial_state`
    pub handshake_timeout: Duration,
    /// Minimum spacing between outbound local-actor updates
    pub update_interval: Duration,
    /// Exponential smoothing rate for remote actors, in 1/s
    pub smoothing_rate: f32,
    pub chat_history_cap: usize,
    pub trade_history_cap: usize,
    pub activity_history_cap: usize,
    pub voice: VoiceConfig,
    pub location: LocationConfig,
}

#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub sample_rate: u32,
    /// Samples per outbound `voice_data` frame
    pub chunk_samples: usize,
    /// Silence after which a sender leaves the speaking set
    pub speaking_window: Duration,
}

#[derive(Debug, Clone)]
pub struct LocationConfig {
    pub sample_interval: Duration,
    pub zones: Vec<Zone>,
    /// Post a `social_activity` envelope when every key zone is visited
    pub announce_milestones: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8080".to_string(),
            reconnect_delay: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(15),
            update_interval: Duration::from_millis(100),
            smoothing_rate: 10.0,
            chat_history_cap: 100,
            trade_history_cap: 50,
            activity_history_cap: 50,
            voice: VoiceConfig::default(),
            location: LocationConfig::default(),
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            chunk_samples: 2048,
            speaking_window: Duration::from_millis(500),
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_millis(500),
            zones: default_zones(),
            announce_milestones: true,
        }
    }
}

/// Key areas of the trading-floor world.
pub fn default_zones() -> Vec<Zone> {
    vec![
        Zone::key(
            "trading_floor",
            Vec3::new(-20.0, -1.0, -20.0),
            Vec3::new(20.0, 10.0, 20.0),
        ),
        Zone::key(
            "crypto_lounge",
            Vec3::new(30.0, -1.0, -15.0),
            Vec3::new(55.0, 10.0, 15.0),
        ),
        Zone::key(
            "stock_exchange",
            Vec3::new(-55.0, -1.0, -15.0),
            Vec3::new(-30.0, 10.0, 15.0),
        ),
        Zone::key(
            "nft_gallery",
            Vec3::new(-15.0, -1.0, 30.0),
            Vec3::new(15.0, 10.0, 55.0),
        ),
        Zone::key(
            "social_plaza",
            Vec3::new(-15.0, -1.0, -55.0),
            Vec3::new(15.0, 10.0, -30.0),
        ),
    ]
}
