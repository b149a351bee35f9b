//! WebSocket transport and the headless client loop

use crate::config::ClientConfig;
use crate::session::{Session, SessionEvent};
use crate::transport::{Transport, TransportEvent};
use crate::voice::NullSink;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use rand::Rng;
use shared::{ChatScope, Customization, Envelope, MessageKind, TradeSide, TradeSignal, Vec3};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// [`Transport`] over a tokio-tungstenite client socket.
///
/// Each `open` spawns one task that owns the socket, and gets a fresh pair
/// of channels. `close` drops both ends, so nothing from a previous
/// connection can reach the session after it has moved on.
#[derive(Default)]
pub struct WsTransport {
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next event from the live connection. Stays pending while there is none.
    pub async fn next_event(&mut self) -> TransportEvent {
        let event = match self.events.as_mut() {
            Some(events) => events.recv().await,
            None => None,
        };
        match event {
            Some(event) => event,
            None => {
                self.events = None;
                std::future::pending::<TransportEvent>().await
            }
        }
    }
}

impl Transport for WsTransport {
    fn open(&mut self, url: &str) {
        self.close();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.events = Some(event_rx);
        self.outbound = Some(outbound_tx);

        tokio::spawn(run_socket(url.to_string(), event_tx, outbound_rx));
    }

    fn send(&mut self, frame: String) {
        match &self.outbound {
            Some(outbound) => {
                if outbound.send(frame).is_err() {
                    debug!("Socket task gone; frame dropped");
                }
            }
            None => debug!("No socket; frame dropped"),
        }
    }

    fn close(&mut self) {
        self.outbound = None;
        self.events = None;
    }
}

/// Owns one socket for its whole life. Exits when either side goes away.
async fn run_socket(
    url: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            error!("Failed to connect to {}: {}", url, e);
            let _ = events.send(TransportEvent::Closed {
                reason: e.to_string(),
            });
            return;
        }
    };

    if events.send(TransportEvent::Opened).is_err() {
        return;
    }
    let (mut ws_sender, mut ws_receiver) = stream.split();

    let reason = loop {
        tokio::select! {
            message = ws_receiver.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if events.send(TransportEvent::Frame(text)).is_err() {
                        debug!("Session dropped the connection");
                        let _ = ws_sender.send(Message::Close(None)).await;
                        return;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame.map_or_else(
                        || "server closed the connection".to_string(),
                        |f| f.reason.to_string(),
                    );
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break e.to_string(),
                None => break "stream ended".to_string(),
            },

            frame = outbound.recv() => match frame {
                Some(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text)).await {
                        break e.to_string();
                    }
                }
                None => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    debug!("Socket closed by client");
                    return;
                }
            },
        }
    };

    let _ = events.send(TransportEvent::Closed { reason });
}

/// Random walk around the spawn point for headless clients.
pub struct Wanderer {
    radius: f32,
    speed: f32,
    position: Vec3,
    target: Vec3,
    rotation: f32,
}

impl Wanderer {
    pub fn new(radius: f32, speed: f32) -> Self {
        Self {
            radius: radius.max(0.0),
            speed,
            position: shared::SPAWN_POSITION,
            target: shared::SPAWN_POSITION,
            rotation: shared::SPAWN_ROTATION,
        }
    }

    /// Moves toward the current target, picking a new one on arrival.
    /// Returns the new pose and its animation tag.
    pub fn step<R: Rng>(&mut self, delta_time: f32, rng: &mut R) -> (Vec3, f32, &'static str) {
        let to_target = self.target - self.position;
        let distance = to_target.length();
        let stride = self.speed * delta_time;

        if distance <= stride || distance < f32::EPSILON {
            self.position = self.target;
            if self.radius > 0.0 {
                self.target = Vec3::new(
                    rng.gen_range(-self.radius..=self.radius),
                    0.0,
                    rng.gen_range(-self.radius..=self.radius),
                );
            }
            return (self.position, self.rotation, shared::DEFAULT_ANIMATION);
        }

        self.position = self.position + to_target * (stride / distance);
        self.rotation = to_target.x.atan2(to_target.z);
        (self.position, self.rotation, "walk")
    }
}

const CHAT_LINES: [&str; 5] = [
    "Anyone watching the open?",
    "Volume is picking up",
    "gm traders",
    "That candle though",
    "Heading to the lounge",
];

const SYMBOLS: [&str; 4] = ["BTC", "ETH", "AAPL", "TSLA"];

/// Headless bot: joins, wanders, chats and logs what it sees.
pub struct Client {
    session: Session<WsTransport, NullSink>,
    display_name: String,
    wanderer: Wanderer,
    chat_every: Option<Duration>,
}

impl Client {
    pub fn new(
        config: ClientConfig,
        display_name: &str,
        wander_radius: f32,
        chat_every: Option<Duration>,
    ) -> Self {
        let mut session = Session::new(WsTransport::new(), NullSink::default(), &config);

        session.subscribe(MessageKind::ChatMessage, |envelope| {
            if let Envelope::ChatMessage(message) = envelope {
                if !message.deleted {
                    info!(
                        "[{:?}] {}: {}",
                        message.scope,
                        message.sender_name.as_deref().unwrap_or("?"),
                        message.body
                    );
                }
            }
        });
        session.subscribe(MessageKind::TradeOffer, |envelope| {
            if let Envelope::TradeOffer(offer) = envelope {
                info!(
                    "Trade offer: {:?} {} {} @ {}",
                    offer.side, offer.quantity, offer.symbol, offer.price
                );
            }
        });

        Self {
            session,
            display_name: display_name.to_string(),
            wanderer: Wanderer::new(wander_radius, 3.0),
            chat_every: chat_every.filter(|every| !every.is_zero()),
        }
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.session
            .connect(&self.display_name, Customization::default(), Instant::now());

        let mut frame_interval = interval(Duration::from_millis(16));
        let chat_enabled = self.chat_every.is_some();
        let mut chat_interval = interval(self.chat_every.unwrap_or(Duration::from_secs(60)));
        chat_interval.tick().await;

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        let mut last_frame = Instant::now();

        loop {
            tokio::select! {
                event = self.session.transport_mut().next_event() => {
                    self.session.handle_transport_event(event, Instant::now());
                    self.report_events();
                },

                _ = frame_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_frame).as_secs_f32();
                    last_frame = now;

                    if self.session.is_joined() {
                        let (position, rotation, animation) =
                            self.wanderer.step(dt, &mut rand::thread_rng());
                        self.session.set_local_pose(position, rotation, animation);
                    }
                    self.session.tick(dt, now);
                    self.report_events();
                },

                _ = chat_interval.tick(), if chat_enabled => {
                    self.chat();
                },

                result = &mut shutdown => {
                    if let Err(e) = result {
                        error!("Failed to listen for ctrl-c: {}", e);
                    }
                    info!("Shutting down");
                    break;
                },
            }
        }

        self.session.disconnect();
        Ok(())
    }

    fn chat(&mut self) {
        if !self.session.is_joined() {
            return;
        }

        let mut rng = rand::thread_rng();
        let line = CHAT_LINES[rng.gen_range(0..CHAT_LINES.len())];
        let signal = rng.gen_bool(0.3).then(|| TradeSignal {
            symbol: SYMBOLS[rng.gen_range(0..SYMBOLS.len())].to_string(),
            side: if rng.gen_bool(0.5) {
                TradeSide::Buy
            } else {
                TradeSide::Sell
            },
            price: rng.gen_range(10.0..50_000.0),
            confidence: Some(rng.gen_range(0.5..1.0)),
        });

        if !self.session.send_chat(line, ChatScope::Global, None, signal) {
            warn!("Chat not sent");
        }
    }

    fn report_events(&mut self) {
        for event in self.session.drain_events() {
            match event {
                SessionEvent::Joined { local_actor_id } => {
                    info!(
                        "In world as {} with {} actors",
                        local_actor_id,
                        self.session.presence().len()
                    );
                }
                SessionEvent::Disconnected { reason } => {
                    warn!("Disconnected: {}", reason);
                }
                SessionEvent::ActorAppeared(id) => info!("{} appeared", id),
                SessionEvent::ActorLeft(id) => info!("{} left", id),
                SessionEvent::Location(event) => info!("Location: {:?}", event),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tokio_test::{assert_pending, task};

    #[test]
    fn test_next_event_pends_without_connection() {
        let mut transport = WsTransport::new();
        let mut next = task::spawn(transport.next_event());
        assert_pending!(next.poll());
    }

    #[test]
    fn test_send_and_close_without_connection() {
        let mut transport = WsTransport::new();
        transport.send("{}".to_string());
        transport.close();
        transport.close();
    }

    #[test]
    fn test_wanderer_stays_within_radius() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut wanderer = Wanderer::new(10.0, 3.0);

        for _ in 0..2000 {
            let (position, _, _) = wanderer.step(0.1, &mut rng);
            assert!(position.x.abs() <= 10.0 + 1e-3);
            assert!(position.z.abs() <= 10.0 + 1e-3);
            assert_approx_eq!(position.y, 0.0);
        }
    }

    #[test]
    fn test_wanderer_walks_then_idles() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut wanderer = Wanderer::new(5.0, 3.0);

        let (_, _, first) = wanderer.step(0.1, &mut rng);
        assert_eq!(first, "idle");
        let (_, _, second) = wanderer.step(0.01, &mut rng);
        assert_eq!(second, "walk");
    }

    #[test]
    fn test_zero_radius_never_moves() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut wanderer = Wanderer::new(0.0, 3.0);
        for _ in 0..10 {
            let (position, _, animation) = wanderer.step(0.5, &mut rng);
            assert_eq!(position, Vec3::ZERO);
            assert_eq!(animation, "idle");
        }
    }
}
