//! Acquisition loop test suite.
//!
//! Runs the full read / convert / aggregate / handoff path against simulated
//! receivers.
//!
//! # Test Coverage
//!
//! | Test | Description |
//! |------|-------------|
//! | `test_hundred_constant_blocks_make_one_frame` | Aggregation of 100 blocks into one normalized frame |
//! | `test_loop_delivers_normalized_frames` | Same scenario through the loop thread |
//! | `test_fifo_delivery` | Sequence-tagged blocks arrive in read order |
//! | `test_stop_latency_bound` | Stop during a blocked read returns after that read |
//! | `test_control_waits_at_most_one_read` | Tune during a blocked read |
//! | `test_transient_misses_absorbed` | Misses are counted, never surfaced |
//! | `test_consumer_closed_ends_session` | Dropping the reader ends the loop in order |
//! | `test_stall_escalation` | Sustained misses end the session with `ReadStalled` |

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use kcsdr_source::mock::{MockConfig, MockDriver, SamplePattern};
use kcsdr_source::{
    Aggregator, ExitReason, FrameSizing, KcsdrSource, NullHost, RetryPolicy, SessionState,
    SourceConfig, SourceHandler, FULL_SCALE,
};
use sdr_stream::{frame_stream, StreamReader};

// =============================================================================
// Helpers
// =============================================================================

const SERIAL: &str = "KC0001";

fn source_with(mock: MockConfig, config: SourceConfig) -> (KcsdrSource, Arc<MockDriver>) {
    let driver = Arc::new(MockDriver::single(SERIAL, mock));
    let source = KcsdrSource::new("kc908", driver.clone(), Arc::new(NullHost), config).unwrap();
    (source, driver)
}

fn small_frames() -> SourceConfig {
    SourceConfig {
        sample_rate: 48_000.0,
        block_samples: Some(4),
        target_frame_rate: 4_000.0,
        ..Default::default()
    }
}

fn wait_for_state(source: &KcsdrSource, state: SessionState) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while source.state() != state && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(source.state(), state);
}

fn next_frame(reader: &StreamReader) -> sdr_stream::Frame {
    reader
        .read_timeout(Duration::from_secs(5))
        .expect("frame within timeout")
}

// =============================================================================
// Aggregation scenario
// =============================================================================

#[test]
fn test_hundred_constant_blocks_make_one_frame() {
    let sizing = FrameSizing::compute(40_000_000.0, 2_000, 200.0, 1_000_000).unwrap();
    assert_eq!(sizing.blocks_per_frame, 100);

    let (writer, reader) = frame_stream(1_000_000, 2);
    let mut aggregator = Aggregator::new(writer, sizing).unwrap();

    let block: Vec<i16> = [1234i16, -4321].repeat(2_000);
    for _ in 0..100 {
        assert!(!aggregator.is_full());
        aggregator.append(&block);
    }
    assert!(aggregator.is_full());
    assert!(aggregator.take_frame());

    let frame = reader.try_read().unwrap();
    assert!(reader.try_read().is_none());
    assert_eq!(frame.len(), 200_000);
    for s in frame.iter() {
        assert_eq!(s.re, 1234.0 / FULL_SCALE);
        assert_eq!(s.im, -4321.0 / FULL_SCALE);
    }
}

#[test]
fn test_loop_delivers_normalized_frames() {
    let (mut source, _driver) = source_with(
        MockConfig {
            pattern: SamplePattern::Constant { i: 4096, q: -2048 },
            ..Default::default()
        },
        SourceConfig {
            block_samples: Some(2_000),
            ..Default::default()
        },
    );
    let (writer, reader) = frame_stream(1_000_000, 2);
    source.set_stream(writer).unwrap();
    source.on_start().unwrap();

    let frame = next_frame(&reader);
    assert_eq!(frame.len(), 200_000);
    assert!(frame.iter().all(|s| s.re == 0.5 && s.im == -0.25));
    drop(frame);

    source.on_stop().unwrap();
    let stats = source.stats().unwrap();
    assert!(stats.frames_delivered >= 1);
    assert!(stats.blocks_read >= 100);
    assert_eq!(stats.exit_reason, Some(ExitReason::Stopped));
}

// =============================================================================
// Ordering
// =============================================================================

#[test]
fn test_fifo_delivery() {
    let (mut source, _driver) = source_with(
        MockConfig {
            pattern: SamplePattern::Sequence,
            ..Default::default()
        },
        small_frames(),
    );
    let sizing = source.sizing().unwrap();
    assert_eq!(sizing.blocks_per_frame, 3);

    let (writer, reader) = frame_stream(64, 3);
    source.set_stream(writer).unwrap();
    source.on_start().unwrap();

    let mut expected_tag = 0i64;
    let mut last_sequence = None;
    for _ in 0..20 {
        let frame = next_frame(&reader);
        assert_eq!(frame.len(), 12);
        if let Some(prev) = last_sequence {
            assert_eq!(frame.sequence(), prev + 1);
        }
        last_sequence = Some(frame.sequence());

        for block in frame.chunks(sizing.block_samples) {
            let tag = (block[0].re * FULL_SCALE).round() as i64;
            assert_eq!(tag, expected_tag, "block out of order");
            assert!(block.iter().all(|s| s.re == block[0].re && s.im == block[0].re));
            expected_tag += 1;
        }
    }

    source.on_stop().unwrap();
}

// =============================================================================
// Cancellation
// =============================================================================

#[test]
fn test_stop_latency_bound() {
    let read_delay = Duration::from_millis(200);
    let (mut source, _driver) = source_with(
        MockConfig {
            read_delay,
            ..Default::default()
        },
        small_frames(),
    );
    let (writer, _reader) = frame_stream(64, 2);
    source.set_stream(writer).unwrap();
    source.on_start().unwrap();

    // Let the loop enter its first blocked read.
    thread::sleep(Duration::from_millis(50));

    let start = Instant::now();
    source.on_stop().unwrap();
    let elapsed = start.elapsed();

    assert!(
        elapsed < read_delay + Duration::from_millis(500),
        "stop took {elapsed:?}"
    );
    assert_eq!(source.state(), SessionState::Idle);
    assert_eq!(source.stats().unwrap().exit_reason, Some(ExitReason::Stopped));
}

#[test]
fn test_control_waits_at_most_one_read() {
    let read_delay = Duration::from_millis(100);
    let (mut source, _driver) = source_with(
        MockConfig {
            read_delay,
            ..Default::default()
        },
        small_frames(),
    );
    let (writer, reader) = frame_stream(64, 2);
    source.set_stream(writer).unwrap();
    source.on_start().unwrap();
    let _ = next_frame(&reader);

    let start = Instant::now();
    source.on_tune(433.92e6).unwrap();
    assert!(start.elapsed() < read_delay + Duration::from_millis(500));
    assert_eq!(source.selected().unwrap().setpoints().frequency, 433_920_000);

    source.on_stop().unwrap();
}

// =============================================================================
// Error handling
// =============================================================================

#[test]
fn test_transient_misses_absorbed() {
    let (mut source, driver) = source_with(
        MockConfig {
            misses_per_read: 5,
            ..Default::default()
        },
        small_frames(),
    );
    let (writer, reader) = frame_stream(64, 2);
    source.set_stream(writer).unwrap();
    source.on_start().unwrap();

    for _ in 0..4 {
        let _ = next_frame(&reader);
    }
    source.on_stop().unwrap();

    let stats = source.stats().unwrap();
    assert!(stats.read_misses >= 5 * stats.blocks_read);
    assert_eq!(stats.exit_reason, Some(ExitReason::Stopped));
    assert!(driver.probe(SERIAL).unwrap().misses() >= stats.read_misses);
}

#[test]
fn test_consumer_closed_ends_session() {
    let (mut source, _driver) = source_with(MockConfig::default(), small_frames());
    let (writer, reader) = frame_stream(64, 2);
    source.set_stream(writer).unwrap();
    source.on_start().unwrap();

    let _ = next_frame(&reader);
    drop(reader);

    wait_for_state(&source, SessionState::Stopping);
    assert!(source.is_running(), "exited thread is not joined yet");
    assert_eq!(
        source.stats().unwrap().exit_reason,
        Some(ExitReason::ConsumerClosed)
    );

    source.on_stop().unwrap();
    assert_eq!(source.state(), SessionState::Idle);
}

#[test]
fn test_stall_escalation() {
    let config = SourceConfig {
        retry: RetryPolicy {
            spin_limit: 8,
            backoff: Duration::from_micros(100),
            max_consecutive_misses: Some(200),
        },
        ..small_frames()
    };
    let (mut source, driver) = source_with(MockConfig::default(), config);
    driver.probe(SERIAL).unwrap().set_data_available(false);

    let (writer, _reader) = frame_stream(64, 2);
    source.set_stream(writer).unwrap();
    source.on_start().unwrap();

    wait_for_state(&source, SessionState::Stopping);
    source.on_stop().unwrap();

    let stats = source.stats().unwrap();
    assert_eq!(stats.frames_delivered, 0);
    match stats.exit_reason {
        Some(ExitReason::ReadStalled { misses }) => assert!(misses >= 200),
        other => panic!("unexpected exit reason {other:?}"),
    }
}
