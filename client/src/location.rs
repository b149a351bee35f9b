//! Zone triggers and the visit ledger behind the "visited every key zone"
//! milestone
//!
//! The tracker is a pure consumer of the local actor's rendered position.
//! Samples closer together than the sample interval are ignored.

use log::{debug, info};
use shared::Vec3;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// Named axis-aligned volume.
#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub id: String,
    pub min: Vec3,
    pub max: Vec3,
    /// Counts toward the milestone
    pub key: bool,
}

impl Zone {
    pub fn new(id: &str, a: Vec3, b: Vec3, key: bool) -> Self {
        Self {
            id: id.to_string(),
            min: Vec3::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: Vec3::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
            key,
        }
    }

    pub fn key(id: &str, a: Vec3, b: Vec3) -> Self {
        Self::new(id, a, b, true)
    }

    /// Boundaries count as inside.
    pub fn contains(&self, point: Vec3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }

    pub fn center(&self) -> Vec3 {
        self.min.lerp(self.max, 0.5)
    }
}

/// Zones visited during this process. Only ever grows.
#[derive(Debug, Default, Clone)]
pub struct VisitLedger {
    visited: BTreeSet<String>,
}

impl VisitLedger {
    /// Returns true the first time `zone` is recorded.
    pub fn record(&mut self, zone: &str) -> bool {
        self.visited.insert(zone.to_string())
    }

    pub fn contains(&self, zone: &str) -> bool {
        self.visited.contains(zone)
    }

    pub fn len(&self) -> usize {
        self.visited.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visited.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.visited.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocationEvent {
    ZoneEntered {
        zone: String,
        first_visit: bool,
        progress: f32,
    },
    ZoneExited {
        zone: String,
    },
    /// Every key zone has been visited. Raised once per process.
    MilestoneReached {
        visited: usize,
        total: usize,
    },
}

pub struct LocationTracker {
    zones: Vec<Zone>,
    ledger: VisitLedger,
    sample_interval: Duration,
    last_sample_at: Option<Instant>,
    inside: BTreeSet<String>,
    milestone_reached: bool,
}

fn key_progress(zones: &[Zone], ledger: &VisitLedger) -> (usize, usize) {
    let total = zones.iter().filter(|z| z.key).count();
    let visited = zones
        .iter()
        .filter(|z| z.key && ledger.contains(&z.id))
        .count();
    (visited, total)
}

impl LocationTracker {
    pub fn new(zones: Vec<Zone>, sample_interval: Duration) -> Self {
        Self {
            zones,
            ledger: VisitLedger::default(),
            sample_interval,
            last_sample_at: None,
            inside: BTreeSet::new(),
            milestone_reached: false,
        }
    }

    /// Feeds one position sample. Returns nothing if sampled too recently.
    pub fn observe(&mut self, position: Vec3, now: Instant) -> Vec<LocationEvent> {
        if let Some(last) = self.last_sample_at {
            if now.saturating_duration_since(last) < self.sample_interval {
                return Vec::new();
            }
        }
        self.last_sample_at = Some(now);

        let mut events = Vec::new();
        for zone in &self.zones {
            let inside_now = zone.contains(position);
            let was_inside = self.inside.contains(&zone.id);

            if inside_now && !was_inside {
                self.inside.insert(zone.id.clone());
                let first_visit = self.ledger.record(&zone.id);
                let (visited, total) = key_progress(&self.zones, &self.ledger);
                let progress = if total == 0 {
                    0.0
                } else {
                    visited as f32 / total as f32
                };

                debug!("Entered zone {} (progress {:.2})", zone.id, progress);
                events.push(LocationEvent::ZoneEntered {
                    zone: zone.id.clone(),
                    first_visit,
                    progress,
                });

                if total > 0 && visited == total && !self.milestone_reached {
                    info!("Visited all {} key zones", total);
                    self.milestone_reached = true;
                    events.push(LocationEvent::MilestoneReached { visited, total });
                }
            } else if !inside_now && was_inside {
                self.inside.remove(&zone.id);
                events.push(LocationEvent::ZoneExited {
                    zone: zone.id.clone(),
                });
            }
        }
        events
    }

    /// Fraction of key zones visited so far.
    pub fn progress(&self) -> f32 {
        match key_progress(&self.zones, &self.ledger) {
            (_, 0) => 0.0,
            (visited, total) => visited as f32 / total as f32,
        }
    }

    /// Forgets which zones we are standing in, e.g. after respawning.
    /// The ledger is kept.
    pub fn reset_position(&mut self) {
        self.inside.clear();
        self.last_sample_at = None;
    }

    pub fn ledger(&self) -> &VisitLedger {
        &self.ledger
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn current_zones(&self) -> impl Iterator<Item = &str> {
        self.inside.iter().map(String::as_str)
    }

    pub fn milestone_reached(&self) -> bool {
        self.milestone_reached
    }
}
