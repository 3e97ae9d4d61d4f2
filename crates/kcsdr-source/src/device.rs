//! Receiver device contract and the shared, lock-guarded device handle.
//!
//! Hardware backends implement [`ReceiverDevice`] (one opened unit) and
//! [`ReceiverDriver`] (enumeration and opening). The acquisition source never
//! talks to a `ReceiverDevice` directly; it goes through [`SharedDevice`],
//! which serializes every device call and the stored setpoints behind a
//! single mutex.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Inclusive integer range advertised for one front-end control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GainRange {
    /// Lowest accepted level
    pub minimum: i32,
    /// Highest accepted level
    pub maximum: i32,
}

impl GainRange {
    /// Create a range; bounds given in the wrong order are swapped.
    pub fn new(minimum: i32, maximum: i32) -> Self {
        if minimum <= maximum {
            Self { minimum, maximum }
        } else {
            Self {
                minimum: maximum,
                maximum: minimum,
            }
        }
    }

    /// Clamp `level` to the nearest bound.
    pub fn clamp(&self, level: i32) -> i32 {
        if level < self.minimum {
            self.minimum
        } else if level > self.maximum {
            self.maximum
        } else {
            level
        }
    }

    /// Check whether `level` lies inside the range.
    pub fn contains(&self, level: i32) -> bool {
        (self.minimum..=self.maximum).contains(&level)
    }
}

/// Opaque identifier of an attached unit, stable across refreshes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap a serial or backend id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity and capabilities of one physical receiver.
///
/// Immutable once discovered; a refresh replaces descriptors wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Model name (e.g., "KC908-1")
    pub name: String,
    /// Serial number, used as the opaque id
    pub serial: String,
    /// External amplifier range
    pub amplifier: GainRange,
    /// Attenuator range
    pub attenuation: GainRange,
    /// IF gain range
    pub if_gain: GainRange,
}

impl DeviceDescriptor {
    /// Name shown in the selection list, e.g. `"KC908-1 [0123ABCD]"`.
    pub fn display_name(&self) -> String {
        format!("{} [{}]", self.name, self.serial)
    }

    /// Id of this unit (its serial).
    pub fn id(&self) -> DeviceId {
        DeviceId::new(self.serial.clone())
    }
}

/// One opened receiver.
///
/// Implementations are not required to be thread-safe; [`SharedDevice`]
/// guarantees that at most one call is in progress at a time.
pub trait ReceiverDevice: Send {
    /// Capability descriptor of this unit.
    fn descriptor(&self) -> &DeviceDescriptor;

    /// Tune the receiver to `hz`.
    fn set_frequency(&mut self, hz: u64);

    /// Set the external amplifier level.
    fn set_amplifier(&mut self, level: i32);

    /// Set the attenuator level.
    fn set_attenuation(&mut self, level: i32);

    /// Set the IF gain level.
    fn set_if_gain(&mut self, level: i32);

    /// Set the analog bandwidth in Hz.
    fn set_bandwidth(&mut self, hz: u64);

    /// Start streaming.
    fn start(&mut self);

    /// Stop streaming.
    fn stop(&mut self);

    /// Blocking read of exactly one block of interleaved I/Q values.
    ///
    /// Returns `true` with `buf` completely filled, or `false` on a
    /// transient miss (no data yet) with `buf` untouched. Never fills
    /// `buf` partially. The byte length read is `2 * buf.len()`.
    fn read(&mut self, buf: &mut [i16]) -> bool;
}

/// Enumerates and opens receivers of one hardware family.
pub trait ReceiverDriver: Send + Sync {
    /// Descriptors of every attached unit, in display order.
    fn enumerate(&self) -> Vec<DeviceDescriptor>;

    /// Open the unit with the given id.
    ///
    /// Fails with `DeviceNotFound` if the id is stale.
    fn open(&self, id: &DeviceId) -> Result<Box<dyn ReceiverDevice>>;
}

/// Values the control surface wants applied to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Setpoints {
    /// Center frequency in Hz (last write wins)
    pub frequency: u64,
    /// Amplifier level, clamped
    pub amplifier: i32,
    /// Attenuation level, clamped
    pub attenuation: i32,
    /// IF gain level, clamped
    pub if_gain: i32,
    /// Analog bandwidth in Hz
    pub bandwidth: u64,
}

/// Device plus the setpoints, guarded together.
struct Guarded {
    device: Box<dyn ReceiverDevice>,
    setpoints: Setpoints,
}

struct DeviceInner {
    descriptor: DeviceDescriptor,
    /// Single exclusion domain for every device call and setpoint change.
    guarded: Mutex<Guarded>,
}

/// A selected receiver shared between the control and acquisition threads.
///
/// Cloning is cheap and yields another handle to the same device. Every
/// method takes the device lock, so a control command issued while the
/// acquisition thread is inside `read` waits for that read to return.
#[derive(Clone)]
pub struct SharedDevice {
    inner: Arc<DeviceInner>,
}

impl SharedDevice {
    /// Wrap an opened device. Initial gain setpoints are clamped to the
    /// device's advertised ranges.
    pub fn new(device: Box<dyn ReceiverDevice>, initial: Setpoints) -> Self {
        let descriptor = device.descriptor().clone();
        let setpoints = Setpoints {
            amplifier: descriptor.amplifier.clamp(initial.amplifier),
            attenuation: descriptor.attenuation.clamp(initial.attenuation),
            if_gain: descriptor.if_gain.clamp(initial.if_gain),
            ..initial
        };

        Self {
            inner: Arc::new(DeviceInner {
                descriptor,
                guarded: Mutex::new(Guarded { device, setpoints }),
            }),
        }
    }

    /// Descriptor captured when the device was opened.
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.inner.descriptor
    }

    /// Id of the opened unit.
    pub fn id(&self) -> DeviceId {
        self.inner.descriptor.id()
    }

    /// Execute a closure with exclusive access to the device.
    pub(crate) fn with_handle<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut dyn ReceiverDevice) -> R,
    {
        let mut guarded = self.inner.guarded.lock();
        f(guarded.device.as_mut())
    }

    /// Current setpoints.
    pub fn setpoints(&self) -> Setpoints {
        self.inner.guarded.lock().setpoints
    }

    /// Tune to `hz`.
    pub fn set_frequency(&self, hz: u64) {
        let mut guarded = self.inner.guarded.lock();
        guarded.setpoints.frequency = hz;
        guarded.device.set_frequency(hz);
    }

    /// Clamp and apply the amplifier level; returns the value sent.
    pub fn set_amplifier(&self, level: i32) -> i32 {
        let level = self.inner.descriptor.amplifier.clamp(level);
        let mut guarded = self.inner.guarded.lock();
        guarded.setpoints.amplifier = level;
        guarded.device.set_amplifier(level);
        level
    }

    /// Clamp and apply the attenuation level; returns the value sent.
    pub fn set_attenuation(&self, level: i32) -> i32 {
        let level = self.inner.descriptor.attenuation.clamp(level);
        let mut guarded = self.inner.guarded.lock();
        guarded.setpoints.attenuation = level;
        guarded.device.set_attenuation(level);
        level
    }

    /// Clamp and apply the IF gain level; returns the value sent.
    pub fn set_if_gain(&self, level: i32) -> i32 {
        let level = self.inner.descriptor.if_gain.clamp(level);
        let mut guarded = self.inner.guarded.lock();
        guarded.setpoints.if_gain = level;
        guarded.device.set_if_gain(level);
        level
    }

    /// Apply the analog bandwidth.
    pub fn set_bandwidth(&self, hz: u64) {
        let mut guarded = self.inner.guarded.lock();
        guarded.setpoints.bandwidth = hz;
        guarded.device.set_bandwidth(hz);
    }

    /// Push every stored setpoint and start streaming, under one lock.
    pub(crate) fn start_streaming(&self) {
        let mut guarded = self.inner.guarded.lock();
        let sp = guarded.setpoints;
        let device = guarded.device.as_mut();

        device.set_if_gain(sp.if_gain);
        device.set_amplifier(sp.amplifier);
        device.set_attenuation(sp.attenuation);
        device.set_bandwidth(sp.bandwidth);
        device.set_frequency(sp.frequency);
        device.start();

        debug!(
            serial = %self.inner.descriptor.serial,
            frequency = sp.frequency,
            amplifier = sp.amplifier,
            attenuation = sp.attenuation,
            if_gain = sp.if_gain,
            bandwidth = sp.bandwidth,
            "Pushed setpoints and started device"
        );
    }

    /// Stop streaming.
    pub(crate) fn stop_streaming(&self) {
        self.with_handle(|device| device.stop());
    }
}

impl fmt::Debug for SharedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedDevice")
            .field("descriptor", &self.inner.descriptor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_range_clamp() {
        let range = GainRange::new(-10, 30);
        assert_eq!(range.clamp(-50), -10);
        assert_eq!(range.clamp(50), 30);
        assert_eq!(range.clamp(12), 12);
        assert!(range.contains(30));
        assert!(!range.contains(31));
    }

    #[test]
    fn test_gain_range_swaps_reversed_bounds() {
        let range = GainRange::new(20, 0);
        assert_eq!(range.minimum, 0);
        assert_eq!(range.maximum, 20);
    }

    #[test]
    fn test_display_name() {
        let desc = DeviceDescriptor {
            name: "KC908-1".to_string(),
            serial: "0123ABCD".to_string(),
            amplifier: GainRange::new(0, 1),
            attenuation: GainRange::new(0, 31),
            if_gain: GainRange::new(0, 40),
        };
        assert_eq!(desc.display_name(), "KC908-1 [0123ABCD]");
        assert_eq!(desc.id().as_str(), "0123ABCD");
    }
}
