//! Canonical record of every connected actor
//!
//! The presence model is the only writer of actor records. Network updates
//! land on the authoritative fields (`position`, `rotation`, ...) and the
//! renderer reads the smoothed `rendered_*` fields, which [`PresenceModel::tick`]
//! pulls a fraction of the remaining distance toward the latest sample every
//! frame. Remote updates are discrete snapshots, so without smoothing every
//! packet would show up as a teleport.
//!
//! The local actor is driven by the host through [`PresenceModel::set_local_pose`]
//! and is never smoothed.

use log::{debug, warn};
use shared::{
    ActorId, ActorSnapshot, Customization, PlayerUpdateData, PresenceStatus, Vec3,
};
use std::collections::HashMap;
use std::f32::consts::{PI, TAU};

/// Below this distance the rendered pose snaps onto the authoritative one.
const SNAP_EPSILON: f32 = 1e-4;

#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub id: ActorId,
    pub display_name: String,
    pub customization: Customization,
    pub position: Vec3,
    pub rotation: f32,
    pub animation: String,
    pub updated_at: u64,
    pub status: PresenceStatus,
    pub status_changed_at: u64,

    // Render-only; never sent over the network
    pub rendered_position: Vec3,
    pub rendered_rotation: f32,
}

impl Actor {
    fn from_snapshot(snapshot: ActorSnapshot) -> Self {
        let display_name = if snapshot.display_name.is_empty() {
            snapshot.id.to_string()
        } else {
            snapshot.display_name
        };

        Self {
            id: snapshot.id,
            display_name,
            customization: snapshot.customization,
            position: snapshot.position,
            rotation: snapshot.rotation,
            animation: snapshot.animation,
            updated_at: snapshot.timestamp,
            status: snapshot.status,
            status_changed_at: snapshot.timestamp,
            rendered_position: snapshot.position,
            rendered_rotation: snapshot.rotation,
        }
    }
}

/// Authoritative fields carried by one kinematic update.
#[derive(Debug, Clone, PartialEq)]
pub struct ActorUpdate {
    pub position: Vec3,
    pub rotation: f32,
    pub animation: String,
    pub customization: Option<Customization>,
    pub timestamp: u64,
}

impl From<PlayerUpdateData> for ActorUpdate {
    fn from(data: PlayerUpdateData) -> Self {
        Self {
            position: data.position,
            rotation: data.rotation,
            animation: data.animation,
            customization: data.customization,
            timestamp: data.timestamp,
        }
    }
}

/// Wraps an angle into `[-PI, PI)`.
pub fn wrap_angle(angle: f32) -> f32 {
    (angle + PI).rem_euclid(TAU) - PI
}

pub struct PresenceModel {
    actors: HashMap<ActorId, Actor>,
    local_id: Option<ActorId>,
    smoothing_rate: f32,
}

impl PresenceModel {
    pub fn new(smoothing_rate: f32) -> Self {
        Self {
            actors: HashMap::new(),
            local_id: None,
            smoothing_rate,
        }
    }

    /// Replaces the whole world with the handshake snapshot.
    pub fn replace_all(&mut self, local_id: ActorId, snapshots: Vec<ActorSnapshot>) {
        self.actors.clear();
        for snapshot in snapshots {
            let actor = Actor::from_snapshot(snapshot);
            self.actors.insert(actor.id.clone(), actor);
        }

        if !self.actors.contains_key(&local_id) {
            debug!("Local actor {} missing from initial state; adding", local_id);
            let snapshot = ActorSnapshot {
                id: local_id.clone(),
                display_name: String::new(),
                customization: Customization::default(),
                position: shared::SPAWN_POSITION,
                rotation: shared::SPAWN_ROTATION,
                animation: shared::DEFAULT_ANIMATION.to_string(),
                status: PresenceStatus::Online,
                timestamp: 0,
            };
            self.actors.insert(local_id.clone(), Actor::from_snapshot(snapshot));
        }

        self.local_id = Some(local_id);
    }

    pub fn clear(&mut self) {
        self.actors.clear();
        self.local_id = None;
    }

    /// Inserts or replaces by id, last writer wins per field. Returns true if
    /// the actor was new.
    pub fn upsert(&mut self, id: ActorId, update: ActorUpdate) -> bool {
        match self.actors.get_mut(&id) {
            Some(actor) => {
                actor.position = update.position;
                actor.rotation = update.rotation;
                actor.animation = update.animation;
                if let Some(customization) = update.customization {
                    actor.customization = customization;
                }
                actor.updated_at = update.timestamp;
                false
            }
            None => {
                let snapshot = ActorSnapshot {
                    id: id.clone(),
                    display_name: String::new(),
                    customization: update.customization.unwrap_or_default(),
                    position: update.position,
                    rotation: update.rotation,
                    animation: update.animation,
                    status: PresenceStatus::Online,
                    timestamp: update.timestamp,
                };
                debug!("Actor {} appeared", id);
                self.actors.insert(id, Actor::from_snapshot(snapshot));
                true
            }
        }
    }

    /// Applies a relayed `player_update`. Returns the id it was applied to.
    pub fn apply_remote_update(&mut self, data: PlayerUpdateData) -> Option<ActorId> {
        let Some(id) = data.actor_id.clone() else {
            warn!("player_update without actorId; dropping");
            return None;
        };

        if self.local_id.as_ref() == Some(&id) {
            debug!("Ignoring server echo of local actor");
            return None;
        }

        self.upsert(id.clone(), data.into());
        Some(id)
    }

    pub fn remove(&mut self, id: &ActorId) -> Option<Actor> {
        let removed = self.actors.remove(id);
        if removed.is_none() {
            debug!("leave for unknown actor {}", id);
        }
        removed
    }

    pub fn set_status(&mut self, id: &ActorId, status: PresenceStatus, timestamp: u64) -> bool {
        match self.actors.get_mut(id) {
            Some(actor) => {
                if actor.status != status {
                    actor.status = status;
                    actor.status_changed_at = timestamp;
                }
                true
            }
            None => {
                debug!("Status for unknown actor {}; ignoring", id);
                false
            }
        }
    }

    /// Moves the local actor. Local poses are authoritative and render as-is.
    pub fn set_local_pose(
        &mut self,
        position: Vec3,
        rotation: f32,
        animation: &str,
        timestamp: u64,
    ) -> bool {
        let Some(actor) = self.local_actor_mut() else {
            debug!("No local actor yet; pose ignored");
            return false;
        };

        actor.position = position;
        actor.rotation = rotation;
        actor.animation = animation.to_string();
        actor.updated_at = timestamp;
        actor.rendered_position = position;
        actor.rendered_rotation = rotation;
        true
    }

    pub fn set_local_customization(&mut self, customization: Customization) -> bool {
        match self.local_actor_mut() {
            Some(actor) => {
                actor.customization = customization;
                true
            }
            None => false,
        }
    }

    /// Advances every remote actor's rendered pose by one frame.
    pub fn tick(&mut self, delta_time: f32) {
        let alpha = (delta_time * self.smoothing_rate).clamp(0.0, 1.0);
        if alpha == 0.0 {
            return;
        }

        for actor in self.actors.values_mut() {
            if self.local_id.as_ref() == Some(&actor.id) {
                continue;
            }

            if alpha >= 1.0 || actor.rendered_position.distance(actor.position) < SNAP_EPSILON {
                actor.rendered_position = actor.position;
            } else {
                actor.rendered_position = actor.rendered_position.lerp(actor.position, alpha);
            }

            let remaining = wrap_angle(actor.rotation - actor.rendered_rotation);
            if alpha >= 1.0 || remaining.abs() < SNAP_EPSILON {
                actor.rendered_rotation = actor.rotation;
            } else {
                actor.rendered_rotation = wrap_angle(actor.rendered_rotation + remaining * alpha);
            }
        }
    }

    /// Vector from the local actor's rendered position to `id`'s.
    pub fn offset_from_local(&self, id: &ActorId) -> Option<Vec3> {
        let local = self.local_actor()?;
        let remote = self.actors.get(id)?;
        Some(remote.rendered_position - local.rendered_position)
    }

    pub fn get_actor(&self, id: &ActorId) -> Option<&Actor> {
        self.actors.get(id)
    }

    pub fn contains(&self, id: &ActorId) -> bool {
        self.actors.contains_key(id)
    }

    /// All actors, ordered by id.
    pub fn list_actors(&self) -> Vec<&Actor> {
        let mut actors: Vec<&Actor> = self.actors.values().collect();
        actors.sort_by(|a, b| a.id.cmp(&b.id));
        actors
    }

    pub fn local_id(&self) -> Option<&ActorId> {
        self.local_id.as_ref()
    }

    pub fn local_actor(&self) -> Option<&Actor> {
        self.local_id.as_ref().and_then(|id| self.actors.get(id))
    }

    fn local_actor_mut(&mut self) -> Option<&mut Actor> {
        let id = self.local_id.as_ref()?;
        self.actors.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}
