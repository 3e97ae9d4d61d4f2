//! The acquisition source: device selection, control surface and lifecycle
//! hooks.
//!
//! A [`KcsdrSource`] owns everything one receiver needs: the enumerated
//! descriptors, the selected [`SharedDevice`], the stream writer between
//! sessions and the running [`Acquisition`]. The host drives it through the
//! [`SourceHandler`] hooks; the hooks for one instance never run
//! concurrently, so they take `&mut self`.

use std::sync::Arc;

use sdr_stream::{StreamWriter, STREAM_BUFFER_SIZE};
use tracing::{debug, info, warn};

use crate::acquisition::{Acquisition, AcquisitionStats, SessionState};
use crate::aggregate::FrameSizing;
use crate::config::SourceConfig;
use crate::device::{DeviceDescriptor, DeviceId, ReceiverDriver, SharedDevice};
use crate::error::{Result, SourceError};

/// Callbacks from the source into its host.
pub trait SourceHost: Send + Sync {
    /// The source's output sample rate changed.
    fn set_input_sample_rate(&self, hz: f64);
}

/// Host that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl SourceHost for NullHost {
    fn set_input_sample_rate(&self, _hz: f64) {}
}

/// Lifecycle hooks invoked by the host's session manager.
pub trait SourceHandler {
    /// The source became the active input.
    fn on_select(&mut self) -> Result<()>;

    /// Another source became the active input.
    fn on_deselect(&mut self);

    /// Start acquisition. Starting a running source is a no-op.
    fn on_start(&mut self) -> Result<()>;

    /// Stop acquisition and wait for the loop thread. Stopping an idle source
    /// is a no-op.
    fn on_stop(&mut self) -> Result<()>;

    /// Tune the selected device to `frequency_hz`.
    fn on_tune(&mut self, frequency_hz: f64) -> Result<()>;
}

/// Acquisition source for one KC908-class receiver.
pub struct KcsdrSource {
    name: String,
    driver: Arc<dyn ReceiverDriver>,
    host: Arc<dyn SourceHost>,
    config: SourceConfig,
    devices: Vec<DeviceDescriptor>,
    selected: Option<SharedDevice>,
    writer: Option<StreamWriter>,
    session: Option<Acquisition>,
    last_stats: Option<AcquisitionStats>,
}

impl KcsdrSource {
    /// Create a source, enumerate the driver and select the first device.
    ///
    /// An empty device list is not an error; the source simply has no
    /// selection until [`refresh`](Self::refresh) finds one.
    pub fn new(
        name: impl Into<String>,
        driver: Arc<dyn ReceiverDriver>,
        host: Arc<dyn SourceHost>,
        config: SourceConfig,
    ) -> Result<Self> {
        config.validate()?;

        let mut source = Self {
            name: name.into(),
            driver,
            host,
            config,
            devices: Vec::new(),
            selected: None,
            writer: None,
            session: None,
            last_stats: None,
        };
        source.refresh()?;

        info!(
            name = %source.name,
            devices = source.devices.len(),
            sample_rate = source.config.sample_rate,
            "Created KC908 source"
        );
        Ok(source)
    }

    /// Instance name given by the host.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration the source was created with.
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Enumerated devices as `(display name, id)`, in driver order.
    pub fn list_devices(&self) -> Vec<(String, DeviceId)> {
        self.devices
            .iter()
            .map(|d| (d.display_name(), d.id()))
            .collect()
    }

    /// Re-enumerate the driver, replacing every descriptor.
    ///
    /// The previous selection is kept if its serial is still attached,
    /// otherwise the first device is selected.
    pub fn refresh(&mut self) -> Result<()> {
        self.ensure_idle()?;

        let previous = self.selected.as_ref().map(SharedDevice::id);
        self.devices = self.driver.enumerate();
        debug!(count = self.devices.len(), "Enumerated devices");

        self.select_first_or(previous.as_ref())
    }

    /// Select the device with `id`.
    ///
    /// Fails with [`SourceError::DeviceNotFound`] if `id` is not in the last
    /// enumeration; re-list and retry.
    pub fn select_device(&mut self, id: &DeviceId) -> Result<()> {
        self.ensure_idle()?;

        if !self.devices.iter().any(|d| d.id() == *id) {
            return Err(SourceError::DeviceNotFound { id: id.to_string() });
        }

        // Reopening the current unit keeps the last-written setpoints.
        let setpoints = match &self.selected {
            Some(current) if current.id() == *id => {
                let setpoints = current.setpoints();
                self.selected = None;
                setpoints
            }
            _ => self.config.initial_setpoints(),
        };
        let device = self.driver.open(id)?;
        let device = SharedDevice::new(device, setpoints);

        info!(
            device = %device.descriptor().display_name(),
            "Selected device"
        );
        self.selected = Some(device);
        self.host.set_input_sample_rate(self.config.sample_rate);
        Ok(())
    }

    /// Select `id` if it is attached, otherwise the first device.
    ///
    /// Clears the selection when nothing is attached.
    pub fn select_first_or(&mut self, id: Option<&DeviceId>) -> Result<()> {
        let target = id
            .filter(|id| self.devices.iter().any(|d| d.id() == **id))
            .cloned()
            .or_else(|| self.devices.first().map(DeviceDescriptor::id));

        match target {
            Some(id) => self.select_device(&id),
            None => {
                self.ensure_idle()?;
                if self.selected.take().is_some() {
                    info!("No devices attached, selection cleared");
                }
                Ok(())
            }
        }
    }

    /// The selected device, if any.
    pub fn selected(&self) -> Option<&SharedDevice> {
        self.selected.as_ref()
    }

    /// Set the amplifier level; returns the clamped value sent to the device.
    pub fn set_amplifier(&self, level: i32) -> Result<i32> {
        Ok(self.device_for("set_amplifier")?.set_amplifier(level))
    }

    /// Set the attenuation level; returns the clamped value sent to the device.
    pub fn set_attenuation(&self, level: i32) -> Result<i32> {
        Ok(self.device_for("set_attenuation")?.set_attenuation(level))
    }

    /// Set the IF gain level; returns the clamped value sent to the device.
    pub fn set_if_gain(&self, level: i32) -> Result<i32> {
        Ok(self.device_for("set_if_gain")?.set_if_gain(level))
    }

    /// Set the analog bandwidth in Hz.
    pub fn set_bandwidth(&self, hz: u64) -> Result<()> {
        self.device_for("set_bandwidth")?.set_bandwidth(hz);
        Ok(())
    }

    /// Tune the selected device. Last write wins.
    pub fn tune(&self, hz: u64) -> Result<()> {
        let device = self.device_for("tune")?;
        device.set_frequency(hz);
        debug!(frequency = hz, "Tuned");
        Ok(())
    }

    /// Fixed output sample rate of the receiver model.
    pub fn sample_rate(&self) -> f64 {
        self.config.sample_rate
    }

    /// Frame sizing for the attached stream (or the default capacity).
    pub fn sizing(&self) -> Result<FrameSizing> {
        let capacity = self
            .writer
            .as_ref()
            .map_or(STREAM_BUFFER_SIZE, StreamWriter::capacity);
        FrameSizing::compute(
            self.config.sample_rate,
            self.config.block_samples(),
            self.config.target_frame_rate,
            capacity,
        )
    }

    /// Attach the consumer's stream writer for the next session.
    pub fn set_stream(&mut self, writer: StreamWriter) -> Result<()> {
        self.ensure_idle()?;
        self.writer = Some(writer);
        Ok(())
    }

    /// Detach the stream writer. `None` while running.
    pub fn take_stream(&mut self) -> Option<StreamWriter> {
        if self.session.is_some() {
            return None;
        }
        self.writer.take()
    }

    /// `Stopping` means the loop thread has exited on its own and
    /// [`on_stop`](SourceHandler::on_stop) has not joined it yet.
    pub fn state(&self) -> SessionState {
        match &self.session {
            None => SessionState::Idle,
            Some(session) if session.is_active() => SessionState::Running,
            Some(_) => SessionState::Stopping,
        }
    }

    /// Whether a session exists (running or exited but not yet joined).
    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// Statistics of the running session, or of the last one.
    pub fn stats(&self) -> Option<AcquisitionStats> {
        self.session
            .as_ref()
            .map(Acquisition::stats)
            .or_else(|| self.last_stats.clone())
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.session.is_some() {
            return Err(SourceError::DeviceBusy {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    fn device_for(&self, operation: &str) -> Result<&SharedDevice> {
        self.selected.as_ref().ok_or_else(|| {
            warn!(operation, "Ignoring command, no device selected");
            SourceError::no_device(operation)
        })
    }
}

impl SourceHandler for KcsdrSource {
    fn on_select(&mut self) -> Result<()> {
        self.host.set_input_sample_rate(self.config.sample_rate);
        debug!(name = %self.name, "Source selected");
        Ok(())
    }

    fn on_deselect(&mut self) {
        debug!(name = %self.name, "Source deselected");
    }

    fn on_start(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let device = self.device_for("start")?.clone();
        let sizing = self.sizing()?;
        let writer = self.writer.take().ok_or(SourceError::ConsumerClosed)?;

        let session = Acquisition::start(device, writer, sizing, self.config.retry)?;
        self.session = Some(session);
        self.last_stats = None;

        info!(name = %self.name, "Source started");
        Ok(())
    }

    fn on_stop(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        let report = session.stop();
        if report.writer.is_none() {
            warn!(name = %self.name, "Stream writer lost, attach a new stream before restarting");
        }
        self.writer = report.writer;

        if let Some(err) = report.stats.exit_reason.and_then(|r| r.as_error()) {
            info!(name = %self.name, "Session ended early: {}", err);
        }
        self.last_stats = Some(report.stats);

        info!(name = %self.name, "Source stopped");
        Ok(())
    }

    fn on_tune(&mut self, frequency_hz: f64) -> Result<()> {
        self.tune(frequency_hz.max(0.0).round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockConfig, MockDriver};
    use tracing_test::traced_test;

    fn empty_source() -> KcsdrSource {
        KcsdrSource::new(
            "kc908",
            Arc::new(MockDriver::new()),
            Arc::new(NullHost),
            SourceConfig::default(),
        )
        .unwrap()
    }

    #[test]
    #[traced_test]
    fn test_tune_without_device_warns() {
        let mut source = empty_source();

        let err = source.on_tune(100e6).unwrap_err();
        assert!(err.is_invalid_configuration());
        assert!(logs_contain("no device selected"));
    }

    #[test]
    fn test_gain_without_device_is_rejected() {
        let source = empty_source();
        assert!(source.set_amplifier(3).unwrap_err().is_invalid_configuration());
        assert!(source.set_bandwidth(1).unwrap_err().is_invalid_configuration());
    }

    #[test]
    fn test_start_without_device() {
        let mut source = empty_source();
        assert!(source.on_start().unwrap_err().is_invalid_configuration());
        assert_eq!(source.state(), SessionState::Idle);
    }

    #[test]
    fn test_start_without_stream() {
        let driver = Arc::new(MockDriver::single("S1", MockConfig::default()));
        let mut source =
            KcsdrSource::new("kc908", driver, Arc::new(NullHost), SourceConfig::default()).unwrap();

        assert!(matches!(
            source.on_start(),
            Err(SourceError::ConsumerClosed)
        ));
    }

    #[test]
    fn test_default_sizing() {
        let source = empty_source();
        let sizing = source.sizing().unwrap();
        assert_eq!(sizing.block_samples, 200_000);
        assert_eq!(sizing.blocks_per_frame, 1);
    }
}
