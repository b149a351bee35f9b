//! Outbound local-actor updates with throttling and change detection

use shared::{Customization, PlayerUpdateData, Vec3};
use std::time::{Duration, Instant};

const POSITION_EPSILON: f32 = 1e-3;
const ROTATION_EPSILON: f32 = 1e-3;

/// Local pose as the host last reported it.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionSample {
    pub position: Vec3,
    pub rotation: f32,
    pub animation: String,
    pub customization: Customization,
}

/// Decides when the local actor's pose goes out as a `player_update`.
///
/// Updates leave at most once per `interval`, and only when something
/// changed since the last one that was sent. Customization is attached only
/// when it differs from what the server last saw.
pub struct MotionSender {
    interval: Duration,
    last_sent_at: Option<Instant>,
    last_sent: Option<MotionSample>,
}

impl MotionSender {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent_at: None,
            last_sent: None,
        }
    }

    /// Forgets what was sent; the next poll always produces an update.
    pub fn reset(&mut self) {
        self.last_sent_at = None;
        self.last_sent = None;
    }

    pub fn poll(
        &mut self,
        sample: &MotionSample,
        now: Instant,
        timestamp: u64,
    ) -> Option<PlayerUpdateData> {
        if let Some(at) = self.last_sent_at {
            if now.duration_since(at) < self.interval {
                return None;
            }
        }

        let customization_changed = match &self.last_sent {
            Some(last) if !Self::pose_changed(last, sample) => {
                if last.customization == sample.customization {
                    return None;
                }
                true
            }
            Some(last) => last.customization != sample.customization,
            None => true,
        };

        self.last_sent_at = Some(now);
        self.last_sent = Some(sample.clone());

        Some(PlayerUpdateData {
            actor_id: None,
            position: sample.position,
            rotation: sample.rotation,
            animation: sample.animation.clone(),
            customization: customization_changed.then(|| sample.customization.clone()),
            timestamp,
        })
    }

    fn pose_changed(last: &MotionSample, sample: &MotionSample) -> bool {
        last.position.distance(sample.position) > POSITION_EPSILON
            || (last.rotation - sample.rotation).abs() > ROTATION_EPSILON
            || last.animation != sample.animation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(x: f32) -> MotionSample {
        MotionSample {
            position: Vec3::new(x, 0.0, 0.0),
            rotation: 0.0,
            animation: "idle".to_string(),
            customization: Customization::default(),
        }
    }

    #[test]
    fn test_first_poll_sends_with_customization() {
        let mut sender = MotionSender::new(Duration::from_millis(100));
        let update = sender.poll(&sample(1.0), Instant::now(), 7).unwrap();
        assert_eq!(update.position.x, 1.0);
        assert_eq!(update.timestamp, 7);
        assert!(update.customization.is_some());
        assert!(update.actor_id.is_none());
    }

    #[test]
    fn test_throttled_within_interval() {
        let start = Instant::now();
        let mut sender = MotionSender::new(Duration::from_millis(100));
        assert!(sender.poll(&sample(1.0), start, 0).is_some());
        assert!(sender
            .poll(&sample(2.0), start + Duration::from_millis(50), 0)
            .is_none());

        let later = sender
            .poll(&sample(2.0), start + Duration::from_millis(100), 0)
            .unwrap();
        assert_eq!(later.position.x, 2.0);
        assert!(later.customization.is_none());
    }

    #[test]
    fn test_unchanged_pose_is_skipped() {
        let start = Instant::now();
        let mut sender = MotionSender::new(Duration::from_millis(100));
        sender.poll(&sample(1.0), start, 0);
        assert!(sender
            .poll(&sample(1.0), start + Duration::from_secs(1), 0)
            .is_none());

        let mut walking = sample(1.0);
        walking.animation = "walk".to_string();
        assert!(sender
            .poll(&walking, start + Duration::from_secs(2), 0)
            .is_some());
    }

    #[test]
    fn test_customization_change_alone_sends() {
        let start = Instant::now();
        let mut sender = MotionSender::new(Duration::from_millis(100));
        sender.poll(&sample(1.0), start, 0);

        let mut styled = sample(1.0);
        styled.customization.glasses = true;
        let update = sender
            .poll(&styled, start + Duration::from_millis(200), 0)
            .unwrap();
        assert_eq!(update.customization.map(|c| c.glasses), Some(true));
    }

    #[test]
    fn test_reset_forces_next_send() {
        let start = Instant::now();
        let mut sender = MotionSender::new(Duration::from_millis(100));
        sender.poll(&sample(1.0), start, 0);
        sender.reset();
        assert!(sender.poll(&sample(1.0), start, 0).is_some());
    }
}
