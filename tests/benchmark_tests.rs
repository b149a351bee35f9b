//! Performance benchmarks for hot paths of the synchronization layer

use client::config::default_zones;
use client::location::LocationTracker;
use client::messaging::BoundedLog;
use client::presence::{ActorUpdate, PresenceModel};
use client::voice::{decode_pcm, encode_pcm};
use shared::{ActorId, ActorSnapshot, Customization, Envelope, PlayerUpdateData, Vec3};
use std::time::{Duration, Instant};

/// Benchmarks smoothing a crowded world
#[test]
fn benchmark_presence_tick() {
    let mut presence = PresenceModel::new(10.0);
    presence.replace_all(ActorId::new("me"), Vec::new());

    for i in 0..500 {
        presence.upsert(
            ActorId::new(&format!("actor{}", i)),
            ActorUpdate {
                position: Vec3::new(i as f32, 0.0, 0.0),
                rotation: 0.0,
                animation: "walk".to_string(),
                customization: None,
                timestamp: 0,
            },
        );
    }

    let iterations = 1_000;
    let start = Instant::now();

    for frame in 0..iterations {
        if frame % 6 == 0 {
            for i in (0..500).step_by(10) {
                presence.upsert(
                    ActorId::new(&format!("actor{}", i)),
                    ActorUpdate {
                        position: Vec3::new(i as f32, 0.0, frame as f32 * 0.1),
                        rotation: frame as f32 * 0.01,
                        animation: "walk".to_string(),
                        customization: None,
                        timestamp: frame,
                    },
                );
            }
        }
        presence.tick(1.0 / 60.0);
    }

    let duration = start.elapsed();
    println!(
        "Presence tick (500 actors): {} frames in {:?} ({:.2} μs/frame)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 5 seconds even unoptimized
    assert!(duration.as_secs() < 5);
}

/// Benchmarks decoding inbound player updates
#[test]
fn benchmark_envelope_decode() {
    let frame = Envelope::PlayerUpdate(PlayerUpdateData {
        actor_id: Some(ActorId::new("actor42")),
        position: Vec3::new(12.5, 0.0, -3.25),
        rotation: 1.57,
        animation: "walk".to_string(),
        customization: Some(Customization::default()),
        timestamp: 1_700_000_000_000,
    })
    .encode()
    .unwrap();

    let iterations = 20_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let envelope = Envelope::decode(&frame).unwrap();
        assert!(matches!(envelope, Envelope::PlayerUpdate(_)));
    }

    let duration = start.elapsed();
    println!(
        "Envelope decode: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_secs() < 5);
}

/// Benchmarks decoding a large initial state
#[test]
fn benchmark_initial_state_decode() {
    let actors: Vec<ActorSnapshot> = (0..1_000)
        .map(|i| ActorSnapshot {
            id: ActorId::new(&format!("actor{}", i)),
            display_name: format!("Trader {}", i),
            customization: Customization::default(),
            position: Vec3::new(i as f32, 0.0, -(i as f32)),
            rotation: 0.0,
            animation: "idle".to_string(),
            status: Default::default(),
            timestamp: i,
        })
        .collect();
    let frame = Envelope::InitialState(shared::InitialStateData {
        local_actor_id: ActorId::new("actor0"),
        actors,
        chat_history: Vec::new(),
    })
    .encode()
    .unwrap();

    let iterations = 50;
    let start = Instant::now();

    for _ in 0..iterations {
        let mut presence = PresenceModel::new(10.0);
        if let Envelope::InitialState(state) = Envelope::decode(&frame).unwrap() {
            presence.replace_all(state.local_actor_id, state.actors);
        }
        assert_eq!(presence.len(), 1_000);
    }

    let duration = start.elapsed();
    println!(
        "Initial state (1000 actors): {} iterations in {:?} ({:.2} ms/iter)",
        iterations,
        duration,
        duration.as_millis() as f64 / iterations as f64
    );

    assert!(duration.as_secs() < 10);
}

/// Benchmarks PCM encoding and decoding of voice chunks
#[test]
fn benchmark_voice_codec() {
    let chunk: Vec<f32> = (0..2048).map(|i| (i as f32 * 0.05).sin() * 0.5).collect();

    let iterations = 2_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let audio = encode_pcm(&chunk);
        let samples = decode_pcm(&audio).unwrap();
        assert_eq!(samples.len(), chunk.len());
    }

    let duration = start.elapsed();
    println!(
        "Voice codec (2048 samples): {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // One chunk is 128 ms of audio; coding must stay far below real time
    assert!(duration.as_secs() < 5);
}

/// Benchmarks zone checks along a long walk
#[test]
fn benchmark_location_observe() {
    let mut tracker = LocationTracker::new(default_zones(), Duration::ZERO);
    let start_time = Instant::now();

    let iterations = 100_000;
    let start = Instant::now();

    for i in 0..iterations {
        let angle = i as f32 * 0.001;
        let position = Vec3::new(angle.cos() * 40.0, 0.0, angle.sin() * 40.0);
        tracker.observe(position, start_time + Duration::from_millis(i));
    }

    let duration = start.elapsed();
    println!(
        "Location observe: {} samples in {:?} ({:.2} ns/sample)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_secs() < 5);
}

/// Benchmarks the bounded history ring under sustained chat
#[test]
fn benchmark_bounded_log() {
    let mut log = BoundedLog::new(100);

    let iterations = 200_000;
    let start = Instant::now();

    for i in 0..iterations {
        log.push(i);
    }

    let duration = start.elapsed();
    println!(
        "Bounded log: {} pushes in {:?} ({:.2} ns/push)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert_eq!(log.len(), 100);
    assert_eq!(log.latest(1), vec![&(iterations - 1)]);
    assert!(duration.as_millis() < 1000);
}
