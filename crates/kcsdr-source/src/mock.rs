//! Simulated receiver for testing without hardware.
//!
//! [`MockReceiver`] implements [`ReceiverDevice`] with a configurable sample
//! pattern, injected transient misses and an optional per-read delay. Every
//! configuration call is appended to a command log that tests inspect through
//! a [`MockProbe`]. [`MockDriver`] enumerates a mutable set of simulated
//! units, so hot-plug and stale-id cases can be exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::device::{DeviceDescriptor, DeviceId, GainRange, ReceiverDevice, ReceiverDriver};
use crate::error::{Result, SourceError};

/// Content of the blocks produced by the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplePattern {
    /// Every sample is `(i, q)`.
    Constant { i: i16, q: i16 },
    /// Every value of block `n` equals `n` (wrapping at `i16::MAX`), so the
    /// read order can be recovered downstream.
    Sequence,
}

impl Default for SamplePattern {
    fn default() -> Self {
        Self::Constant { i: 0, q: 0 }
    }
}

/// Behaviour of a simulated receiver.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Samples produced by every read
    pub pattern: SamplePattern,
    /// Transient misses reported before every successful read
    pub misses_per_read: u32,
    /// Time a successful read blocks before returning
    pub read_delay: Duration,
}

/// A configuration call observed by the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Tune, in Hz
    Frequency(u64),
    /// Amplifier level
    Amplifier(i32),
    /// Attenuation level
    Attenuation(i32),
    /// IF gain level
    IfGain(i32),
    /// Analog bandwidth, in Hz
    Bandwidth(u64),
    /// Streaming started
    Start,
    /// Streaming stopped
    Stop,
}

struct ProbeInner {
    commands: Mutex<Vec<DeviceCommand>>,
    blocks_read: AtomicU64,
    misses: AtomicU64,
    data_available: AtomicBool,
    read_delay_us: AtomicU64,
}

/// Test-side view of a mock receiver.
#[derive(Clone)]
pub struct MockProbe {
    inner: Arc<ProbeInner>,
}

impl MockProbe {
    fn new(read_delay: Duration) -> Self {
        Self {
            inner: Arc::new(ProbeInner {
                commands: Mutex::new(Vec::new()),
                blocks_read: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                data_available: AtomicBool::new(true),
                read_delay_us: AtomicU64::new(read_delay.as_micros() as u64),
            }),
        }
    }

    /// Every configuration call so far, oldest first.
    pub fn commands(&self) -> Vec<DeviceCommand> {
        self.inner.commands.lock().clone()
    }

    /// The most recent command matching `pick`.
    pub fn last<T>(&self, pick: impl Fn(&DeviceCommand) -> Option<T>) -> Option<T> {
        self.inner.commands.lock().iter().rev().find_map(pick)
    }

    /// Forget every recorded command.
    pub fn clear_commands(&self) {
        self.inner.commands.lock().clear();
    }

    /// Successful reads so far.
    pub fn blocks_read(&self) -> u64 {
        self.inner.blocks_read.load(Ordering::SeqCst)
    }

    /// Transient misses reported so far.
    pub fn misses(&self) -> u64 {
        self.inner.misses.load(Ordering::SeqCst)
    }

    /// Simulate sustained "no data" when `false`.
    pub fn set_data_available(&self, available: bool) {
        self.inner.data_available.store(available, Ordering::SeqCst);
    }

    /// Change the blocking time of successful reads.
    pub fn set_read_delay(&self, delay: Duration) {
        self.inner
            .read_delay_us
            .store(delay.as_micros() as u64, Ordering::SeqCst);
    }

    fn record(&self, command: DeviceCommand) {
        self.inner.commands.lock().push(command);
    }
}

/// Simulated KC908-class receiver.
pub struct MockReceiver {
    descriptor: DeviceDescriptor,
    config: MockConfig,
    probe: MockProbe,
    streaming: bool,
    block_counter: u64,
    pending_misses: u32,
}

impl MockReceiver {
    /// Receiver with its own probe.
    pub fn new(descriptor: DeviceDescriptor, config: MockConfig) -> Self {
        Self::with_probe(descriptor, config.clone(), MockProbe::new(config.read_delay))
    }

    fn with_probe(descriptor: DeviceDescriptor, config: MockConfig, probe: MockProbe) -> Self {
        let pending_misses = config.misses_per_read;
        Self {
            descriptor,
            config,
            probe,
            streaming: false,
            block_counter: 0,
            pending_misses,
        }
    }

    /// Descriptor with the ranges of a KC908-1.
    pub fn kc908_descriptor(serial: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            name: "KC908-1".to_string(),
            serial: serial.to_string(),
            amplifier: GainRange::new(0, 30),
            attenuation: GainRange::new(0, 30),
            if_gain: GainRange::new(0, 40),
        }
    }

    /// Probe shared with this receiver.
    pub fn probe(&self) -> MockProbe {
        self.probe.clone()
    }

    fn fill(&self, buf: &mut [i16]) {
        match self.config.pattern {
            SamplePattern::Constant { i, q } => {
                for iq in buf.chunks_exact_mut(2) {
                    iq[0] = i;
                    iq[1] = q;
                }
            }
            SamplePattern::Sequence => {
                let tag = (self.block_counter % (i16::MAX as u64 + 1)) as i16;
                buf.fill(tag);
            }
        }
    }
}

impl ReceiverDevice for MockReceiver {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn set_frequency(&mut self, hz: u64) {
        self.probe.record(DeviceCommand::Frequency(hz));
    }

    fn set_amplifier(&mut self, level: i32) {
        self.probe.record(DeviceCommand::Amplifier(level));
    }

    fn set_attenuation(&mut self, level: i32) {
        self.probe.record(DeviceCommand::Attenuation(level));
    }

    fn set_if_gain(&mut self, level: i32) {
        self.probe.record(DeviceCommand::IfGain(level));
    }

    fn set_bandwidth(&mut self, hz: u64) {
        self.probe.record(DeviceCommand::Bandwidth(hz));
    }

    fn start(&mut self) {
        self.streaming = true;
        self.probe.record(DeviceCommand::Start);
    }

    fn stop(&mut self) {
        self.streaming = false;
        self.probe.record(DeviceCommand::Stop);
    }

    fn read(&mut self, buf: &mut [i16]) -> bool {
        let probe = &self.probe.inner;
        if !self.streaming || !probe.data_available.load(Ordering::SeqCst) {
            probe.misses.fetch_add(1, Ordering::SeqCst);
            return false;
        }
        if self.pending_misses > 0 {
            self.pending_misses -= 1;
            probe.misses.fetch_add(1, Ordering::SeqCst);
            return false;
        }

        let delay = probe.read_delay_us.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_micros(delay));
        }

        self.fill(buf);
        self.block_counter += 1;
        self.pending_misses = self.config.misses_per_read;
        probe.blocks_read.fetch_add(1, Ordering::SeqCst);
        true
    }
}

struct MockUnit {
    descriptor: DeviceDescriptor,
    config: MockConfig,
    probe: MockProbe,
}

/// Driver over a set of simulated receivers.
///
/// Probes are created with the unit and survive re-opening, so a test can
/// hold one before the source selects the device.
#[derive(Default)]
pub struct MockDriver {
    units: Mutex<Vec<MockUnit>>,
    probes: Mutex<HashMap<String, MockProbe>>,
}

impl MockDriver {
    /// Driver with nothing plugged in.
    pub fn new() -> Self {
        Self::default()
    }

    /// A driver with a single KC908-1 unit.
    pub fn single(serial: &str, config: MockConfig) -> Self {
        let driver = Self::new();
        driver.plug(MockReceiver::kc908_descriptor(serial), config);
        driver
    }

    /// Attach a simulated unit and return its probe.
    pub fn plug(&self, descriptor: DeviceDescriptor, config: MockConfig) -> MockProbe {
        let probe = self
            .probes
            .lock()
            .entry(descriptor.serial.clone())
            .or_insert_with(|| MockProbe::new(config.read_delay))
            .clone();

        debug!(serial = %descriptor.serial, "Mock unit plugged");
        self.units.lock().push(MockUnit {
            descriptor,
            config,
            probe: probe.clone(),
        });
        probe
    }

    /// Detach a simulated unit. Returns whether it was attached.
    pub fn unplug(&self, serial: &str) -> bool {
        let mut units = self.units.lock();
        let before = units.len();
        units.retain(|u| u.descriptor.serial != serial);
        before != units.len()
    }

    /// Probe of a unit, if it was ever plugged.
    pub fn probe(&self, serial: &str) -> Option<MockProbe> {
        self.probes.lock().get(serial).cloned()
    }
}

impl ReceiverDriver for MockDriver {
    fn enumerate(&self) -> Vec<DeviceDescriptor> {
        self.units
            .lock()
            .iter()
            .map(|u| u.descriptor.clone())
            .collect()
    }

    fn open(&self, id: &DeviceId) -> Result<Box<dyn ReceiverDevice>> {
        let units = self.units.lock();
        let unit = units
            .iter()
            .find(|u| u.descriptor.serial == id.as_str())
            .ok_or_else(|| SourceError::DeviceNotFound { id: id.to_string() })?;

        Ok(Box::new(MockReceiver::with_probe(
            unit.descriptor.clone(),
            unit.config.clone(),
            unit.probe.clone(),
        )))
    }
}
