//! Spatial voice: capture framing, muted-sender filtering, 3D playback and
//! the debounced "currently speaking" set
//!
//! Audio travels as 16-bit little-endian PCM, base64 encoded into the
//! `audio` field of `voice_data`. The pipeline never interprets the audio
//! beyond that.
//!
//! A sender is "speaking" from its first frame until both of these hold:
//! no frame has arrived for the speaking window, and every source scheduled
//! for it has finished playing. Each frame re-arms the window.

use crate::config::VoiceConfig;
use crate::presence::PresenceModel;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, warn};
use shared::{ActorId, Vec3, VoiceDataPayload, VoiceStatusData};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::{Duration, Instant};

pub type SourceId = u64;

/// Platform mixer. Any number of sources may play at once; every source
/// handed out is eventually passed back through [`AudioSink::release`].
pub trait AudioSink {
    /// Plays from a 3D point at `offset` relative to the listener.
    fn play_spatial(&mut self, source: SourceId, samples: &[f32], sample_rate: u32, offset: Vec3);

    /// Plays straight to the output, without panning.
    fn play_direct(&mut self, source: SourceId, samples: &[f32], sample_rate: u32);

    fn release(&mut self, source: SourceId);
}

/// Sink for headless clients: discards audio, keeps counts.
#[derive(Debug, Default)]
pub struct NullSink {
    pub spatial_plays: usize,
    pub direct_plays: usize,
    pub released: usize,
}

impl NullSink {
    pub fn plays(&self) -> usize {
        self.spatial_plays + self.direct_plays
    }
}

impl AudioSink for NullSink {
    fn play_spatial(&mut self, _: SourceId, _: &[f32], _: u32, _: Vec3) {
        self.spatial_plays += 1;
    }

    fn play_direct(&mut self, _: SourceId, _: &[f32], _: u32) {
        self.direct_plays += 1;
    }

    fn release(&mut self, _: SourceId) {
        self.released += 1;
    }
}

#[derive(Debug)]
pub enum DecodeError {
    Base64(base64::DecodeError),
    OddLength(usize),
    Empty,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Base64(e) => write!(f, "invalid base64 audio: {}", e),
            DecodeError::OddLength(len) => write!(f, "{} bytes is not whole 16-bit samples", len),
            DecodeError::Empty => write!(f, "empty audio payload"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Quantizes to 16-bit PCM and base64-encodes.
pub fn encode_pcm(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        let quantized = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&quantized.to_le_bytes());
    }
    STANDARD.encode(bytes)
}

pub fn decode_pcm(audio: &str) -> Result<Vec<f32>, DecodeError> {
    let bytes = STANDARD.decode(audio).map_err(DecodeError::Base64)?;
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddLength(bytes.len()));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / i16::MAX as f32)
        .collect())
}

#[derive(Debug)]
struct ScheduledSource {
    id: SourceId,
    sender: ActorId,
    ends_at: Instant,
}

#[derive(Debug)]
struct Speaker {
    last_frame_at: Instant,
}

pub struct VoicePipeline<A: AudioSink> {
    sink: A,
    sample_rate: u32,
    chunk_samples: usize,
    speaking_window: Duration,

    enabled: bool,
    capture_buffer: Vec<f32>,
    muted: HashSet<ActorId>,
    speakers: HashMap<ActorId, Speaker>,
    sources: Vec<ScheduledSource>,
    next_source_id: SourceId,
}

impl<A: AudioSink> VoicePipeline<A> {
    pub fn new(sink: A, config: &VoiceConfig) -> Self {
        Self {
            sink,
            sample_rate: config.sample_rate.max(1),
            chunk_samples: config.chunk_samples.max(1),
            speaking_window: config.speaking_window,
            enabled: false,
            capture_buffer: Vec::new(),
            muted: HashSet::new(),
            speakers: HashMap::new(),
            sources: Vec::new(),
            next_source_id: 1,
        }
    }

    /// Toggles the microphone. Returns the `voice_status` to broadcast.
    pub fn set_enabled(
        &mut self,
        enabled: bool,
        local_id: &ActorId,
        timestamp: u64,
    ) -> VoiceStatusData {
        self.enabled = enabled;
        if !enabled {
            self.capture_buffer.clear();
            self.speakers.remove(local_id);
        }

        VoiceStatusData {
            actor_id: local_id.clone(),
            enabled,
            timestamp,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Buffers microphone samples and slices off every full chunk as a frame.
    pub fn capture(
        &mut self,
        samples: &[f32],
        local_id: &ActorId,
        target_ids: Option<Vec<ActorId>>,
        now: Instant,
        timestamp: u64,
    ) -> Vec<VoiceDataPayload> {
        if !self.enabled {
            return Vec::new();
        }

        self.capture_buffer.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.capture_buffer.len() >= self.chunk_samples {
            let chunk: Vec<f32> = self.capture_buffer.drain(..self.chunk_samples).collect();
            frames.push(VoiceDataPayload {
                actor_id: local_id.clone(),
                audio: encode_pcm(&chunk),
                timestamp,
                target_ids: target_ids.clone(),
            });
        }

        if !frames.is_empty() {
            self.mark_speaking(local_id, now);
        }
        frames
    }

    /// A remote peer toggled its microphone.
    pub fn on_status(&mut self, status: &VoiceStatusData) {
        if !status.enabled && self.speakers.remove(&status.actor_id).is_some() {
            debug!("{} disabled voice; no longer speaking", status.actor_id);
        }
    }

    /// Schedules an inbound frame for playback. Returns the source it plays on.
    pub fn receive(
        &mut self,
        frame: &VoiceDataPayload,
        presence: &PresenceModel,
        now: Instant,
    ) -> Option<SourceId> {
        let sender = &frame.actor_id;

        if presence.local_id() == Some(sender) {
            return None;
        }

        if self.muted.contains(sender) {
            debug!("Discarding frame from muted {}", sender);
            return None;
        }

        self.mark_speaking(sender, now);

        let samples = match decode_pcm(&frame.audio) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Skipping voice frame from {}: {}", sender, e);
                return None;
            }
        };

        let id = self.next_source_id;
        self.next_source_id += 1;

        match presence.offset_from_local(sender) {
            Some(offset) => self
                .sink
                .play_spatial(id, &samples, self.sample_rate, offset),
            None => {
                debug!("No position for {}; playing without panning", sender);
                self.sink.play_direct(id, &samples, self.sample_rate);
            }
        }

        let length = Duration::from_secs_f64(samples.len() as f64 / self.sample_rate as f64);
        self.sources.push(ScheduledSource {
            id,
            sender: sender.clone(),
            ends_at: now + length,
        });

        Some(id)
    }

    fn mark_speaking(&mut self, id: &ActorId, now: Instant) {
        match self.speakers.get_mut(id) {
            Some(speaker) => speaker.last_frame_at = now,
            None => {
                debug!("{} started speaking", id);
                self.speakers
                    .insert(id.clone(), Speaker { last_frame_at: now });
            }
        }
    }

    /// Releases finished sources and expires silent speakers.
    pub fn tick(&mut self, now: Instant) {
        let (finished, playing): (Vec<_>, Vec<_>) = std::mem::take(&mut self.sources)
            .into_iter()
            .partition(|source| source.ends_at <= now);
        self.sources = playing;

        for source in finished {
            self.sink.release(source.id);
        }

        // A speaker stays while any of its sources is still scheduled
        let window = self.speaking_window;
        let sources = &self.sources;
        self.speakers.retain(|id, speaker| {
            let silent = now.saturating_duration_since(speaker.last_frame_at) >= window;
            let keep = !silent || sources.iter().any(|source| &source.sender == id);
            if !keep {
                debug!("{} stopped speaking", id);
            }
            keep
        });
    }

    fn release_sender(&mut self, id: &ActorId) {
        let (theirs, others): (Vec<_>, Vec<_>) = std::mem::take(&mut self.sources)
            .into_iter()
            .partition(|source| &source.sender == id);
        self.sources = others;

        for source in theirs {
            self.sink.release(source.id);
        }
        self.speakers.remove(id);
    }

    /// Stops playback from `id` and drops its future frames before decoding.
    /// Returns false if it was already muted.
    pub fn mute(&mut self, id: &ActorId) -> bool {
        if !self.muted.insert(id.clone()) {
            return false;
        }
        self.release_sender(id);
        true
    }

    pub fn unmute(&mut self, id: &ActorId) -> bool {
        self.muted.remove(id)
    }

    pub fn is_muted(&self, id: &ActorId) -> bool {
        self.muted.contains(id)
    }

    /// Actor left the world.
    pub fn forget(&mut self, id: &ActorId) {
        self.release_sender(id);
    }

    /// Drops every scheduled source and the speaking set.
    pub fn release_all(&mut self) {
        for source in std::mem::take(&mut self.sources) {
            self.sink.release(source.id);
        }
        self.speakers.clear();
        self.capture_buffer.clear();
    }

    /// Currently speaking actors, ordered by id.
    pub fn speaking(&self) -> Vec<ActorId> {
        let mut ids: Vec<ActorId> = self.speakers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_speaking(&self, id: &ActorId) -> bool {
        self.speakers.contains_key(id)
    }

    pub fn active_sources(&self) -> usize {
        self.sources.len()
    }

    pub fn sink(&self) -> &A {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut A {
        &mut self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::{ActorSnapshot, Customization, PresenceStatus};

    fn snapshot(id: &str, position: Vec3) -> ActorSnapshot {
        ActorSnapshot {
            id: ActorId::new(id),
            display_name: id.to_string(),
            customization: Customization::default(),
            position,
            rotation: 0.0,
            animation: "idle".to_string(),
            status: PresenceStatus::Online,
            timestamp: 0,
        }
    }

    fn world() -> PresenceModel {
        let mut presence = PresenceModel::new(10.0);
        presence.replace_all(
            ActorId::new("me"),
            vec![
                snapshot("me", Vec3::new(1.0, 0.0, 1.0)),
                snapshot("bob", Vec3::new(4.0, 0.0, 5.0)),
            ],
        );
        presence
    }

    fn pipeline() -> VoicePipeline<NullSink> {
        VoicePipeline::new(NullSink::default(), &VoiceConfig::default())
    }

    /// 1600 samples at 16 kHz: 100 ms of audio.
    fn frame(sender: &str) -> VoiceDataPayload {
        VoiceDataPayload {
            actor_id: ActorId::new(sender),
            audio: encode_pcm(&vec![0.25; 1600]),
            timestamp: 0,
            target_ids: None,
        }
    }

    #[test]
    fn test_pcm_encoding_preserves_samples() {
        let samples = [0.0, 0.5, -0.5, 1.0, -1.0];
        let decoded = decode_pcm(&encode_pcm(&samples)).unwrap();
        assert_eq!(decoded.len(), samples.len());
        for (a, b) in samples.iter().zip(decoded.iter()) {
            assert_approx_eq!(*a, *b, 1e-3);
        }

        let clipped = decode_pcm(&encode_pcm(&[3.0])).unwrap();
        assert_approx_eq!(clipped[0], 1.0, 1e-3);
    }

    #[test]
    fn test_decode_rejects_bad_payloads() {
        assert!(matches!(decode_pcm("%%%"), Err(DecodeError::Base64(_))));
        assert!(matches!(decode_pcm(""), Err(DecodeError::Empty)));
        assert!(matches!(
            decode_pcm(&STANDARD.encode([1u8, 2, 3])),
            Err(DecodeError::OddLength(3))
        ));
    }

    #[test]
    fn test_muted_sender_never_reaches_the_sink() {
        let presence = world();
        let mut voice = pipeline();
        let bob = ActorId::new("bob");
        let now = Instant::now();

        assert!(voice.mute(&bob));
        assert!(!voice.mute(&bob));
        assert_eq!(voice.receive(&frame("bob"), &presence, now), None);
        assert_eq!(voice.sink().plays(), 0);
        assert!(!voice.is_speaking(&bob));

        assert!(voice.unmute(&bob));
        assert!(voice.receive(&frame("bob"), &presence, now).is_some());
        assert_eq!(voice.sink().plays(), 1);
    }

    #[test]
    fn test_spatial_offset_and_direct_fallback() {
        let presence = world();
        let mut voice = pipeline();
        let now = Instant::now();

        voice.receive(&frame("bob"), &presence, now);
        assert_eq!(voice.sink().spatial_plays, 1);

        // Unknown to the presence model: no position to pan from
        voice.receive(&frame("stranger"), &presence, now);
        assert_eq!(voice.sink().direct_plays, 1);
    }

    #[test]
    fn test_own_echo_is_ignored() {
        let presence = world();
        let mut voice = pipeline();
        assert_eq!(voice.receive(&frame("me"), &presence, Instant::now()), None);
        assert_eq!(voice.sink().plays(), 0);
    }

    #[test]
    fn test_bad_audio_is_skipped() {
        let presence = world();
        let mut voice = pipeline();
        let mut broken = frame("bob");
        broken.audio = "not base64!".to_string();
        assert_eq!(voice.receive(&broken, &presence, Instant::now()), None);
        assert_eq!(voice.sink().plays(), 0);
        assert_eq!(voice.active_sources(), 0);
    }

    #[test]
    fn test_speaking_debounce() {
        let presence = world();
        let mut voice = pipeline();
        let bob = ActorId::new("bob");
        let start = Instant::now();

        // Frames every 200ms keep bob speaking throughout
        for i in 0..5u64 {
            let at = start + Duration::from_millis(200 * i);
            voice.receive(&frame("bob"), &presence, at);
            voice.tick(at + Duration::from_millis(150));
            assert!(voice.is_speaking(&bob), "dropped after frame {}", i);
        }

        let last = start + Duration::from_millis(800);
        voice.tick(last + Duration::from_millis(499));
        assert!(voice.is_speaking(&bob));
        voice.tick(last + Duration::from_millis(500));
        assert!(!voice.is_speaking(&bob));
    }

    #[test]
    fn test_speaking_outlasts_window_while_source_plays() {
        let presence = world();
        let mut voice = pipeline();
        let bob = ActorId::new("bob");
        let start = Instant::now();

        // One second of audio in a single frame
        let mut long = frame("bob");
        long.audio = encode_pcm(&vec![0.1; 16_000]);
        voice.receive(&long, &presence, start);

        voice.tick(start + Duration::from_millis(600));
        assert!(voice.is_speaking(&bob));
        assert_eq!(voice.active_sources(), 1);

        voice.tick(start + Duration::from_millis(1000));
        assert!(!voice.is_speaking(&bob));
        assert_eq!(voice.active_sources(), 0);
        assert_eq!(voice.sink().released, 1);
    }

    #[test]
    fn test_every_source_is_released() {
        let presence = world();
        let mut voice = pipeline();
        let start = Instant::now();

        for i in 0..10u64 {
            voice.receive(&frame("bob"), &presence, start + Duration::from_millis(i * 10));
        }
        assert_eq!(voice.active_sources(), 10);

        voice.tick(start + Duration::from_secs(1));
        assert_eq!(voice.active_sources(), 0);
        assert_eq!(voice.sink().released, 10);
    }

    #[test]
    fn test_disabled_status_clears_speaker_immediately() {
        let presence = world();
        let mut voice = pipeline();
        let bob = ActorId::new("bob");
        voice.receive(&frame("bob"), &presence, Instant::now());
        assert!(voice.is_speaking(&bob));

        voice.on_status(&VoiceStatusData {
            actor_id: bob.clone(),
            enabled: false,
            timestamp: 0,
        });
        assert!(!voice.is_speaking(&bob));
    }

    #[test]
    fn test_capture_slices_full_chunks() {
        let mut voice = pipeline();
        let me = ActorId::new("me");
        let now = Instant::now();

        assert!(voice.capture(&[0.1; 4096], &me, None, now, 0).is_empty());

        voice.set_enabled(true, &me, 0);
        let frames = voice.capture(&[0.1; 3000], &me, None, now, 5);
        assert_eq!(frames.len(), 1);
        assert_eq!(decode_pcm(&frames[0].audio).unwrap().len(), 2048);
        assert!(voice.is_speaking(&me));

        let targets = Some(vec![ActorId::new("bob")]);
        let frames = voice.capture(&[0.1; 1200], &me, targets.clone(), now, 6);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].target_ids, targets);

        let status = voice.set_enabled(false, &me, 7);
        assert!(!status.enabled);
        assert!(!voice.is_speaking(&me));
    }

    #[test]
    fn test_release_all_and_forget() {
        let presence = world();
        let mut voice = pipeline();
        let now = Instant::now();
        voice.receive(&frame("bob"), &presence, now);
        voice.receive(&frame("stranger"), &presence, now);

        voice.forget(&ActorId::new("bob"));
        assert_eq!(voice.active_sources(), 1);
        assert_eq!(voice.speaking(), vec![ActorId::new("stranger")]);

        voice.release_all();
        assert_eq!(voice.active_sources(), 0);
        assert!(voice.speaking().is_empty());
        assert_eq!(voice.sink().released, 2);
    }

    #[test]
    fn test_old_source_ending_does_not_cut_off_new_stream() {
        let presence = world();
        let mut voice = pipeline();
        let bob = ActorId::new("bob");
        let start = Instant::now();

        let mut long = frame("bob");
        long.audio = encode_pcm(&vec![0.1; 16_000]);
        voice.receive(&long, &presence, start);

        voice.on_status(&VoiceStatusData {
            actor_id: bob.clone(),
            enabled: false,
            timestamp: 0,
        });
        assert!(!voice.is_speaking(&bob));

        voice.receive(&long, &presence, start + Duration::from_millis(200));
        assert!(voice.is_speaking(&bob));

        // First source ends; the second plays until 1200ms
        voice.tick(start + Duration::from_millis(1000));
        assert_eq!(voice.active_sources(), 1);
        assert!(voice.is_speaking(&bob));

        voice.tick(start + Duration::from_millis(1200));
        assert_eq!(voice.active_sources(), 0);
        assert!(!voice.is_speaking(&bob));
    }

    #[test]
    fn test_zero_sample_rate_is_clamped() {
        let presence = world();
        let config = VoiceConfig {
            sample_rate: 0,
            ..VoiceConfig::default()
        };
        let mut voice = VoicePipeline::new(NullSink::default(), &config);
        assert!(voice.receive(&frame("bob"), &presence, Instant::now()).is_some());
        assert_eq!(voice.sink().plays(), 1);
    }
}
