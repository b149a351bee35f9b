//! One client's view of the shared world
//!
//! A [`Session`] owns every component and is the only thing the host talks
//! to. It is driven from outside: socket activity arrives through
//! [`Session::handle_transport_event`], and [`Session::tick`] runs once per
//! frame to advance timers, smoothing and outbound motion. Nothing in here
//! spawns tasks or reads the clock on its own apart from wall-clock
//! timestamps stamped on outbound payloads.
//!
//! Inbound envelopes are first routed to the component that owns their
//! state and then published on the dispatcher, so subscribers always observe
//! the world with the envelope already applied.

use crate::config::ClientConfig;
use crate::connection::{ConnectionHealth, ConnectionManager, ConnectionState};
use crate::dispatcher::{Dispatcher, Subscription};
use crate::location::{LocationEvent, LocationTracker};
use crate::messaging::{Messaging, Sender};
use crate::motion::{MotionSample, MotionSender};
use crate::presence::PresenceModel;
use crate::transport::{Transport, TransportEvent};
use crate::voice::{AudioSink, VoicePipeline};
use log::{debug, info, warn};
use shared::{
    now_millis, ActorId, ChatScope, Customization, Envelope, FriendRequestData,
    InitialStateData, MessageKind, PresenceStatus, SocialActivityData, TradeSide, TradeSignal,
    UserStatusData, Vec3,
};
use std::collections::VecDeque;
use std::time::Instant;

/// Lifecycle and world changes the host may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Joined { local_actor_id: ActorId },
    Disconnected { reason: String },
    ActorAppeared(ActorId),
    ActorLeft(ActorId),
    Location(LocationEvent),
}

fn local_sender<T: Transport>(connection: &ConnectionManager<T>) -> Option<Sender<'_>> {
    let id = connection.local_actor_id()?;
    let credentials = connection.credentials()?;
    Some(Sender {
        id,
        display_name: &credentials.display_name,
    })
}

pub struct Session<T: Transport, A: AudioSink> {
    connection: ConnectionManager<T>,
    dispatcher: Dispatcher,
    presence: PresenceModel,
    motion: MotionSender,
    voice: VoicePipeline<A>,
    messaging: Messaging,
    location: LocationTracker,
    announce_milestones: bool,
    events: VecDeque<SessionEvent>,
}

impl<T: Transport, A: AudioSink> Session<T, A> {
    pub fn new(transport: T, sink: A, config: &ClientConfig) -> Self {
        Self {
            connection: ConnectionManager::new(transport, config),
            dispatcher: Dispatcher::new(),
            presence: PresenceModel::new(config.smoothing_rate),
            motion: MotionSender::new(config.update_interval),
            voice: VoicePipeline::new(sink, &config.voice),
            messaging: Messaging::new(
                config.chat_history_cap,
                config.trade_history_cap,
                config.activity_history_cap,
            ),
            location: LocationTracker::new(
                config.location.zones.clone(),
                config.location.sample_interval,
            ),
            announce_milestones: config.location.announce_milestones,
            events: VecDeque::new(),
        }
    }

    // Lifecycle

    pub fn connect(&mut self, display_name: &str, customization: Customization, now: Instant) -> bool {
        self.connection.connect(display_name, customization, now)
    }

    /// Leaves the world. Safe from any state.
    pub fn disconnect(&mut self) {
        let was_connected = self.connection.state() != ConnectionState::Disconnected;
        self.connection.disconnect();
        self.voice.release_all();
        self.motion.reset();
        self.location.reset_position();
        self.presence.clear();

        if was_connected {
            self.events.push_back(SessionEvent::Disconnected {
                reason: "disconnected by client".to_string(),
            });
        }
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::Opened => self.connection.on_opened(),
            TransportEvent::Frame(frame) => {
                self.connection.note_inbound(now);
                if let Some(envelope) = Dispatcher::decode(&frame) {
                    self.handle_envelope(envelope, now);
                }
            }
            TransportEvent::Closed { reason } => {
                if self.connection.on_closed(&reason, now) {
                    self.connection_lost(reason);
                }
            }
        }
    }

    fn connection_lost(&mut self, reason: String) {
        self.voice.release_all();
        self.motion.reset();
        self.location.reset_position();
        self.events.push_back(SessionEvent::Disconnected { reason });
    }

    /// Applies a decoded envelope and publishes it to subscribers.
    pub fn handle_envelope(&mut self, envelope: Envelope, now: Instant) {
        let handshake = matches!(envelope, Envelope::InitialState(_) | Envelope::Ping);
        if !self.connection.is_joined() && !handshake {
            debug!("Not joined yet; dropping inbound {}", envelope.kind());
            return;
        }

        if self.route(&envelope, now) {
            self.dispatcher.publish(&envelope);
        }
    }

    fn route(&mut self, envelope: &Envelope, now: Instant) -> bool {
        let timestamp = now_millis();

        match envelope {
            Envelope::InitialState(data) => return self.on_initial_state(data),
            Envelope::Ping => {}
            Envelope::Join(data) => {
                debug!("Server relayed join for {}", data.display_name);
            }
            Envelope::PlayerUpdate(data) => {
                let known = data
                    .actor_id
                    .as_ref()
                    .is_some_and(|id| self.presence.contains(id));
                if let Some(id) = self.presence.apply_remote_update(data.clone()) {
                    if !known {
                        info!("Actor {} joined the world", id);
                        self.messaging.set_friend_online(&id, true, timestamp);
                        self.events.push_back(SessionEvent::ActorAppeared(id));
                    }
                }
            }
            Envelope::Leave(data) => {
                if let Some(actor) = self.presence.remove(&data.actor_id) {
                    info!("Actor {} ({}) left", actor.id, actor.display_name);
                    self.voice.forget(&actor.id);
                    self.messaging.set_friend_online(&actor.id, false, timestamp);
                    self.events.push_back(SessionEvent::ActorLeft(actor.id));
                }
            }
            Envelope::UserStatus(data) => {
                if self
                    .presence
                    .set_status(&data.actor_id, data.status, data.timestamp)
                {
                    let online = data.status != PresenceStatus::Offline;
                    self.messaging
                        .set_friend_online(&data.actor_id, online, data.timestamp);
                }
            }
            Envelope::ChatMessage(data) => {
                self.messaging.receive_chat(data.clone());
            }
            Envelope::TradeOffer(data) => self.messaging.record_trade_offer(data.clone()),
            Envelope::SocialActivity(data) => self.messaging.record_activity(data.clone()),
            Envelope::FriendRequest(data) => {
                let for_us = match (&data.target_id, self.connection.local_actor_id()) {
                    (Some(target), Some(local)) => target == local,
                    _ => true,
                };
                if for_us {
                    self.messaging.receive_friend_request(data.clone());
                } else {
                    debug!("Friend request for {:?} is not ours", data.target_id);
                }
            }
            Envelope::FriendResponse(data) => {
                let online = self.is_online(&data.sender_id);
                if self.messaging.receive_friend_response(data.clone(), online) {
                    info!("{} is now a friend", data.sender_display_name);
                }
            }
            Envelope::VoiceStatus(data) => self.voice.on_status(data),
            Envelope::VoiceData(data) => {
                self.voice.receive(data, &self.presence, now);
            }
        }
        true
    }

    fn on_initial_state(&mut self, data: &InitialStateData) -> bool {
        if !self.connection.on_initial_state(data.local_actor_id.clone()) {
            return false;
        }

        let timestamp = now_millis();
        self.presence
            .replace_all(data.local_actor_id.clone(), data.actors.clone());
        self.messaging
            .reset_session(data.chat_history.clone(), timestamp);
        for actor in self.presence.list_actors() {
            let online = actor.status != PresenceStatus::Offline;
            self.messaging.set_friend_online(&actor.id, online, timestamp);
        }

        self.voice.release_all();
        self.motion.reset();
        self.location.reset_position();

        info!(
            "World has {} actors and {} chat messages",
            self.presence.len(),
            data.chat_history.len()
        );
        self.events.push_back(SessionEvent::Joined {
            local_actor_id: data.local_actor_id.clone(),
        });
        true
    }

    fn is_online(&self, id: &ActorId) -> bool {
        self.presence
            .get_actor(id)
            .is_some_and(|actor| actor.status != PresenceStatus::Offline)
    }

    /// Per-frame update.
    pub fn tick(&mut self, delta_time: f32, now: Instant) {
        let before = self.connection.state();
        self.connection.poll(now);
        if before != ConnectionState::Disconnected
            && self.connection.state() == ConnectionState::Disconnected
        {
            self.connection_lost("handshake timed out".to_string());
        }

        self.presence.tick(delta_time);
        self.voice.tick(now);

        if !self.connection.is_joined() {
            return;
        }

        let Some(local) = self.presence.local_actor() else {
            return;
        };
        let position = local.rendered_position;
        let sample = MotionSample {
            position: local.position,
            rotation: local.rotation,
            animation: local.animation.clone(),
            customization: local.customization.clone(),
        };

        for event in self.location.observe(position, now) {
            if let LocationEvent::MilestoneReached { total, .. } = &event {
                if self.announce_milestones {
                    let content = format!("visited all {} key zones", total);
                    self.send_social_activity("exploration", &content);
                }
            }
            self.events.push_back(SessionEvent::Location(event));
        }

        if let Some(update) = self.motion.poll(&sample, now, now_millis()) {
            self.connection.send(&Envelope::PlayerUpdate(update));
        }
    }

    // Local actor

    /// Moves the local actor. The change goes out on a later tick.
    pub fn set_local_pose(&mut self, position: Vec3, rotation: f32, animation: &str) -> bool {
        self.presence
            .set_local_pose(position, rotation, animation, now_millis())
    }

    pub fn set_customization(&mut self, customization: Customization) -> bool {
        self.presence.set_local_customization(customization)
    }

    /// Broadcasts our own presence status.
    pub fn set_status(&mut self, status: PresenceStatus) -> bool {
        let Some(id) = self.connection.local_actor_id().cloned() else {
            debug!("Not joined; status not sent");
            return false;
        };

        let timestamp = now_millis();
        self.presence.set_status(&id, status, timestamp);
        self.connection.send(&Envelope::UserStatus(UserStatusData {
            actor_id: id,
            status,
            timestamp,
        }))
    }

    // Messaging

    /// Sends a chat message. It shows up in the history once the server
    /// relays it back with an id.
    pub fn send_chat(
        &mut self,
        body: &str,
        scope: ChatScope,
        target: Option<ActorId>,
        trade_signal: Option<TradeSignal>,
    ) -> bool {
        let Some(sender) = local_sender(&self.connection) else {
            debug!("Not joined; chat not sent");
            return false;
        };
        let Some(message) =
            self.messaging
                .compose_chat(sender, body, scope, target, trade_signal, now_millis())
        else {
            return false;
        };
        self.connection.send(&Envelope::ChatMessage(message))
    }

    /// Soft-deletes a held message and asks the server to do the same.
    pub fn delete_chat(&mut self, id: &str) -> bool {
        if !self.connection.is_joined() {
            debug!("Not joined; chat {} not deleted", id);
            return false;
        }
        let Some(mut intent) = self.messaging.delete_chat(id) else {
            return false;
        };
        intent.timestamp = now_millis();
        self.connection.send(&Envelope::ChatMessage(intent))
    }

    pub fn send_trade_offer(
        &mut self,
        target: Option<ActorId>,
        symbol: &str,
        side: TradeSide,
        price: f64,
        quantity: f64,
    ) -> bool {
        let Some(sender) = local_sender(&self.connection) else {
            debug!("Not joined; trade offer not sent");
            return false;
        };
        let Some(offer) = self.messaging.compose_trade_offer(
            sender,
            target,
            symbol,
            side,
            price,
            quantity,
            now_millis(),
        ) else {
            return false;
        };
        self.connection.send(&Envelope::TradeOffer(offer))
    }

    pub fn send_social_activity(&mut self, activity_type: &str, content: &str) -> bool {
        let Some(actor) = self.connection.local_actor_id().cloned() else {
            debug!("Not joined; social activity not sent");
            return false;
        };
        self.connection
            .send(&Envelope::SocialActivity(SocialActivityData {
                activity_type: activity_type.to_string(),
                content: content.to_string(),
                actor: Some(actor),
                timestamp: now_millis(),
            }))
    }

    pub fn send_friend_request(&mut self, target: &ActorId) -> bool {
        if !self.presence.contains(target) {
            warn!("Cannot befriend unknown actor {}", target);
            return false;
        }
        let Some(sender) = local_sender(&self.connection) else {
            return false;
        };
        let request: Option<FriendRequestData> =
            self.messaging
                .compose_friend_request(sender, target, now_millis());
        match request {
            Some(request) => self.connection.send(&Envelope::FriendRequest(request)),
            None => false,
        }
    }

    pub fn accept_friend_request(&mut self, request_id: &str) -> bool {
        let online = self
            .messaging
            .pending_requests()
            .iter()
            .find(|r| r.id == request_id)
            .is_some_and(|r| self.is_online(&r.sender_id));

        let Some(responder) = local_sender(&self.connection) else {
            debug!("Not joined; cannot answer friend request");
            return false;
        };
        let Some(response) =
            self.messaging
                .accept_request(request_id, responder, online, now_millis())
        else {
            return false;
        };
        self.connection.send(&Envelope::FriendResponse(response));
        true
    }

    pub fn reject_friend_request(&mut self, request_id: &str) -> bool {
        let Some(responder) = local_sender(&self.connection) else {
            debug!("Not joined; cannot answer friend request");
            return false;
        };
        let Some(response) = self
            .messaging
            .reject_request(request_id, responder, now_millis())
        else {
            return false;
        };
        self.connection.send(&Envelope::FriendResponse(response));
        true
    }

    // Voice

    /// Toggles the microphone and tells everyone about it.
    pub fn set_voice_enabled(&mut self, enabled: bool) -> bool {
        let Some(id) = self.connection.local_actor_id().cloned() else {
            debug!("Not joined; voice toggle ignored");
            return false;
        };
        let status = self.voice.set_enabled(enabled, &id, now_millis());
        self.connection.send(&Envelope::VoiceStatus(status))
    }

    /// Feeds microphone samples. Returns how many frames went out.
    pub fn capture_audio(
        &mut self,
        samples: &[f32],
        targets: Option<Vec<ActorId>>,
        now: Instant,
    ) -> usize {
        let Some(id) = self.connection.local_actor_id().cloned() else {
            return 0;
        };

        let frames = self
            .voice
            .capture(samples, &id, targets, now, now_millis());
        frames
            .into_iter()
            .map(Envelope::VoiceData)
            .filter(|envelope| self.connection.send(envelope))
            .count()
    }

    pub fn mute(&mut self, id: &ActorId) -> bool {
        if !self.presence.contains(id) {
            warn!("Cannot mute unknown actor {}", id);
            return false;
        }
        self.voice.mute(id)
    }

    pub fn unmute(&mut self, id: &ActorId) -> bool {
        if !self.presence.contains(id) {
            warn!("Cannot unmute unknown actor {}", id);
            return false;
        }
        self.voice.unmute(id)
    }

    // Subscriptions

    pub fn subscribe<F>(&mut self, kind: MessageKind, callback: F) -> Subscription
    where
        F: FnMut(&Envelope) + 'static,
    {
        self.dispatcher.subscribe(kind, callback)
    }

    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        self.dispatcher.unsubscribe(subscription)
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    // Accessors

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_joined(&self) -> bool {
        self.connection.is_joined()
    }

    pub fn health(&self) -> ConnectionHealth {
        self.connection.health()
    }

    pub fn local_actor_id(&self) -> Option<&ActorId> {
        self.connection.local_actor_id()
    }

    pub fn presence(&self) -> &PresenceModel {
        &self.presence
    }

    pub fn messaging(&self) -> &Messaging {
        &self.messaging
    }

    pub fn voice(&self) -> &VoicePipeline<A> {
        &self.voice
    }

    pub fn location(&self) -> &LocationTracker {
        &self.location
    }

    pub fn transport(&self) -> &T {
        self.connection.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.connection.transport_mut()
    }
}
