//! Performance benchmarks for the frame codec and update filtering

use shared::chunks::{ChunkMPlayer, ChunkUUpdate, Vec2};
use shared::{ChunkRegistry, Frame, UpdateFilter};
use std::time::Instant;

fn update_frame(index: u32) -> Frame {
    let mut frame = Frame::with_head(7);
    frame.set(ChunkUUpdate {
        update_index: index,
        position: Vec2::new(120.0, 64.0),
        speed: Vec2::new(90.0, -105.0),
        scale: Vec2::new(1.0, 1.0),
        animation_id: "runFast".to_string(),
        animation_frame: 3,
        hair_count: 5,
        ..ChunkUUpdate::default()
    });
    frame
}

/// Benchmarks encoding of a typical position update
#[test]
fn benchmark_update_encode() {
    let registry = ChunkRegistry::with_builtin();
    let frame = update_frame(1);

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let _ = frame.write(&registry).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Update encode: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // Should stay well under a second in debug builds
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks decoding of a typical position update
#[test]
fn benchmark_update_decode() {
    let registry = ChunkRegistry::with_builtin();
    let bytes = update_frame(1).write(&registry).unwrap();

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let frame = Frame::read(&registry, &bytes).unwrap();
        assert!(frame.has::<ChunkUUpdate>());
    }

    let duration = start.elapsed();
    println!(
        "Update decode: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 1500);
}

/// Benchmarks a management frame mixing a status and unknown chunks
#[test]
fn benchmark_passthrough_frame() {
    let registry = ChunkRegistry::with_builtin();
    let mut bytes = Frame::with(ChunkMPlayer::new("Madeline"))
        .write(&registry)
        .unwrap();
    // splice an unknown record in before the terminator
    bytes.truncate(bytes.len() - 3);
    bytes.extend_from_slice(b"zzzz\0");
    bytes.extend_from_slice(&64u32.to_le_bytes());
    bytes.extend_from_slice(&[0xab; 64]);
    bytes.extend_from_slice(b"\r\n\0");

    let iterations = 50_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let frame = Frame::read(&registry, &bytes).unwrap();
        let _ = frame.passthrough().write(&registry).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Passthrough: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 1500);
}

/// Benchmarks the stale-update filter across many players
#[test]
fn benchmark_update_filter() {
    let mut filter = UpdateFilter::new();

    let iterations = 1_000_000u32;
    let start = Instant::now();

    let mut accepted = 0;
    for i in 0..iterations {
        // every third update arrives late
        let index = if i % 3 == 0 { i / 2 } else { i };
        if filter.accept(i % 16, index) {
            accepted += 1;
        }
    }

    let duration = start.elapsed();
    println!(
        "Update filter: {} iterations in {:?} ({} accepted)",
        iterations, duration, accepted
    );

    assert!(accepted > 0);
    assert!(duration.as_millis() < 500);
}
