//! Bounded capture: start a source, consume a number of frames, stop.

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use kcsdr_source::{AcquisitionStats, KcsdrSource, SourceHandler};
use num_complex::Complex32;
use sdr_stream::{frame_stream, StreamReader};
use tracing::{debug, info};

use crate::config::StreamSettings;

/// Summary of one delivered frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSummary {
    /// Handoff sequence number
    pub sequence: u64,
    /// Complex samples in the frame
    pub samples: usize,
    /// Mean power relative to full scale
    pub power_dbfs: f32,
}

/// Result of a bounded capture.
#[derive(Debug, Clone)]
pub struct CaptureReport {
    /// One summary per delivered frame, in order
    pub frames: Vec<FrameSummary>,
    /// Statistics of the acquisition session
    pub stats: Option<AcquisitionStats>,
    /// Wall time from start to stop
    pub elapsed: Duration,
}

/// Mean power of `samples` in dB relative to full scale.
///
/// An empty or all-zero frame reports `f32::NEG_INFINITY`.
pub fn mean_power_dbfs(samples: &[Complex32]) -> f32 {
    if samples.is_empty() {
        return f32::NEG_INFINITY;
    }
    let power: f64 = samples.iter().map(|s| s.norm_sqr() as f64).sum::<f64>() / samples.len() as f64;
    10.0 * (power as f32).log10()
}

/// Attach a fresh stream to `source`, deliver `frames` frames and stop.
///
/// Each frame must arrive within `frame_timeout`. The source is stopped
/// even when a frame times out. Invalid stream settings are an error.
pub fn capture(
    source: &mut KcsdrSource,
    stream: StreamSettings,
    frames: u64,
    frame_timeout: Duration,
) -> Result<CaptureReport> {
    if let Err(e) = stream.validate() {
        bail!("Invalid stream settings: {}", e);
    }

    let (writer, reader) = frame_stream(stream.capacity, stream.depth);
    source
        .set_stream(writer)
        .context("Failed to attach stream")?;

    let sizing = source.sizing()?;
    info!(
        frames,
        frame_samples = sizing.frame_samples(),
        blocks_per_frame = sizing.blocks_per_frame,
        "Starting capture"
    );

    let start = Instant::now();
    source.on_start().context("Failed to start acquisition")?;
    let collected = collect(&reader, frames, frame_timeout);
    source.on_stop().context("Failed to stop acquisition")?;

    Ok(CaptureReport {
        frames: collected?,
        stats: source.stats(),
        elapsed: start.elapsed(),
    })
}

fn collect(reader: &StreamReader, frames: u64, frame_timeout: Duration) -> Result<Vec<FrameSummary>> {
    let mut out = Vec::new();
    for n in 0..frames {
        let Some(frame) = reader.read_timeout(frame_timeout) else {
            if !reader.is_writer_open() {
                bail!("Acquisition ended after {} of {} frames", n, frames);
            }
            bail!("No frame within {:?} (frame {} of {})", frame_timeout, n + 1, frames);
        };

        let summary = FrameSummary {
            sequence: frame.sequence(),
            samples: frame.len(),
            power_dbfs: mean_power_dbfs(&frame),
        };
        debug!(
            sequence = summary.sequence,
            samples = summary.samples,
            power_dbfs = summary.power_dbfs,
            "Frame"
        );
        out.push(summary);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kcsdr_source::mock::{MockConfig, MockDriver, SamplePattern};
    use kcsdr_source::{NullHost, SourceConfig};
    use std::sync::Arc;

    #[test]
    fn test_mean_power() {
        let full = vec![Complex32::new(1.0, 0.0); 16];
        assert!(mean_power_dbfs(&full).abs() < 1e-6);

        let half = vec![Complex32::new(0.5, 0.0); 16];
        assert!((mean_power_dbfs(&half) + 6.0206).abs() < 1e-3);

        assert_eq!(mean_power_dbfs(&[]), f32::NEG_INFINITY);
    }

    #[test]
    fn test_capture_rejects_bad_stream_settings() {
        let driver = Arc::new(MockDriver::single("KC0001", MockConfig::default()));
        let mut source =
            KcsdrSource::new("kc908", driver, Arc::new(NullHost), SourceConfig::default()).unwrap();

        for settings in [
            StreamSettings {
                depth: 1,
                ..Default::default()
            },
            StreamSettings {
                capacity: 0,
                ..Default::default()
            },
        ] {
            let err = capture(&mut source, settings, 1, Duration::from_secs(1)).unwrap_err();
            assert!(err.to_string().contains("Invalid stream settings"));
        }
        assert!(!source.is_running());
    }

    #[test]
    fn test_capture_with_mock() {
        let driver = Arc::new(MockDriver::single(
            "KC0001",
            MockConfig {
                pattern: SamplePattern::Constant { i: 4096, q: 0 },
                ..Default::default()
            },
        ));
        let config = SourceConfig {
            block_samples: Some(2_000),
            ..Default::default()
        };
        let mut source = KcsdrSource::new("kc908", driver, Arc::new(NullHost), config).unwrap();

        let report = capture(
            &mut source,
            StreamSettings::default(),
            3,
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(report.frames.len(), 3);
        for (n, frame) in report.frames.iter().enumerate() {
            assert_eq!(frame.sequence, n as u64);
            assert_eq!(frame.samples, 200_000);
            assert!((frame.power_dbfs + 6.0206).abs() < 1e-3);
        }
        assert!(report.stats.unwrap().frames_delivered >= 3);
        assert!(!source.is_running());
    }
}
