use serde::{Deserialize, Serialize};

use crate::drivers::{
    ButterworthLowpass, ChannelRole, CommandSink, ConfigError, RollingBuffer,
};

pub const MIN_SAMPLE_RATE_HZ: f64 = 16.0;
pub const MAX_SAMPLE_RATE_HZ: f64 = 10_000.0;
pub const MIN_TIME_BASE_S: f64 = 0.001;
pub const MAX_TIME_BASE_S: f64 = 10.0;
/// Gap kept below Nyquist when the cutoff follows the sample rate.
pub const NYQUIST_EPSILON_HZ: f64 = 0.01;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    pub role: ChannelRole,
}

impl ChannelSpec {
    pub fn new(name: &str, role: ChannelRole) -> Self {
        Self {
            name: name.to_owned(),
            role,
        }
    }
}

/// Process-wide acquisition settings. Only [`Controller::apply`] mutates a live config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    pub sample_rate_hz: f64,
    pub cutoff_hz: f64,
    pub cutoff_tracks_nyquist: bool,
    /// Seconds per horizontal division.
    pub time_base_s: f64,
    pub divisions: usize,
    pub use_triggering: bool,
    pub plot_filtered: bool,
    pub pause: bool,
    pub file_logging: bool,
    /// Samples per aggregation window.
    pub data_sample_len: usize,
    /// Channel whose crossings align the display window.
    pub reference_channel: usize,
    pub channels: Vec<ChannelSpec>,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 500.0,
            cutoff_hz: 50.0,
            cutoff_tracks_nyquist: false,
            time_base_s: 1.0,
            divisions: 5,
            use_triggering: true,
            plot_filtered: true,
            pause: false,
            file_logging: true,
            data_sample_len: 2500,
            reference_channel: 0,
            channels: vec![
                ChannelSpec::new("x", ChannelRole::Triggered),
                ChannelSpec::new("y", ChannelRole::Triggered),
                ChannelSpec::new("z", ChannelRole::Continuous),
            ],
        }
    }
}

impl ScopeConfig {
    pub fn nyquist_hz(&self) -> f64 {
        self.sample_rate_hz / 2.0
    }

    /// Samples shown on screen: rate x seconds/div x divisions.
    pub fn display_len(&self) -> usize {
        (self.sample_rate_hz * self.time_base_s * self.divisions as f64).round() as usize
    }

    /// Rolling buffer capacity; doubled under triggering to hold pre/post-trigger context.
    pub fn window_capacity(&self) -> usize {
        let base = self.display_len();
        if self.use_triggering {
            base * 2
        } else {
            base
        }
    }

    /// Device sample period in whole microseconds.
    pub fn sample_period_us(&self) -> u64 {
        (1.0e6 / self.sample_rate_hz).round() as u64
    }

    pub fn roles(&self) -> Vec<ChannelRole> {
        self.channels.iter().map(|c| c.role).collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_sample_rate(self.sample_rate_hz)?;
        check_time_base(self.time_base_s)?;
        check_cutoff(self.cutoff_hz, self.nyquist_hz())?;
        let filter = ButterworthLowpass::design(self.sample_rate_hz, self.cutoff_hz)?;
        check_window(self.display_len(), filter.min_len())
    }
}

fn check_sample_rate(value: f64) -> Result<(), ConfigError> {
    if (MIN_SAMPLE_RATE_HZ..=MAX_SAMPLE_RATE_HZ).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::SampleRateOutOfRange {
            value,
            min: MIN_SAMPLE_RATE_HZ,
            max: MAX_SAMPLE_RATE_HZ,
        })
    }
}

fn check_time_base(value: f64) -> Result<(), ConfigError> {
    if (MIN_TIME_BASE_S..=MAX_TIME_BASE_S).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::TimeBaseOutOfRange {
            value,
            min: MIN_TIME_BASE_S,
            max: MAX_TIME_BASE_S,
        })
    }
}

/// The display window must be long enough for the zero-phase filter to run.
fn check_window(capacity: usize, min: usize) -> Result<(), ConfigError> {
    if capacity >= min {
        Ok(())
    } else {
        Err(ConfigError::WindowTooShort { capacity, min })
    }
}

fn check_cutoff(value: f64, nyquist: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value < nyquist {
        Ok(())
    } else {
        Err(ConfigError::CutoffOutOfRange { value, nyquist })
    }
}

/// A single requested change to the live configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConfigChange {
    SampleRate(f64),
    TimeBase(f64),
    Cutoff(f64),
    /// Pin the cutoff just under Nyquist and keep it there across rate changes.
    CutoffAtNyquist,
    ToggleTriggering,
    TogglePlotFiltered,
    TogglePause,
    ToggleFileLogging,
}

/// What an accepted change touched, so the caller can react (e.g. reopen a log file).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub rate_changed: bool,
    pub window_reset: bool,
    pub filter_redesigned: bool,
    pub command_sent: bool,
}

/// Owner of the live configuration and everything derived from it.
pub struct Controller {
    config: ScopeConfig,
    filter: ButterworthLowpass,
    buffer: RollingBuffer,
    offsets: Vec<f64>,
    sink: Box<dyn CommandSink>,
}

impl Controller {
    pub fn new(config: ScopeConfig, sink: Box<dyn CommandSink>) -> Result<Self, ConfigError> {
        config.validate()?;
        let filter = ButterworthLowpass::design(config.sample_rate_hz, config.cutoff_hz)?;
        let buffer = RollingBuffer::with_capacity(config.window_capacity());
        let offsets = vec![0.0; config.channels.len()];
        Ok(Self {
            config,
            filter,
            buffer,
            offsets,
            sink,
        })
    }

    pub fn config(&self) -> &ScopeConfig {
        &self.config
    }
    pub fn filter(&self) -> &ButterworthLowpass {
        &self.filter
    }
    pub fn buffer(&self) -> &RollingBuffer {
        &self.buffer
    }
    pub fn buffer_mut(&mut self) -> &mut RollingBuffer {
        &mut self.buffer
    }
    /// Per-channel zero offsets captured by [`Controller::calibrate`].
    pub fn offsets(&self) -> &[f64] {
        &self.offsets
    }

    /// Push the current sample period to the device, e.g. right after connecting.
    pub fn sync_device(&mut self) -> bool {
        self.send_period(self.config.sample_period_us())
    }

    /// Validates, then commits the new config together with its rolling-buffer capacity
    /// and filter design. On error nothing changes.
    pub fn apply(&mut self, change: ConfigChange) -> Result<ApplyOutcome, ConfigError> {
        let mut next = self.config.clone();
        match change {
            ConfigChange::SampleRate(rate) => {
                check_sample_rate(rate)?;
                next.sample_rate_hz = rate;
                if next.cutoff_tracks_nyquist {
                    next.cutoff_hz = next.nyquist_hz() - NYQUIST_EPSILON_HZ;
                }
            }
            ConfigChange::TimeBase(seconds) => {
                check_time_base(seconds)?;
                next.time_base_s = seconds;
            }
            ConfigChange::Cutoff(hz) => {
                next.cutoff_hz = hz;
                next.cutoff_tracks_nyquist = false;
            }
            ConfigChange::CutoffAtNyquist => {
                next.cutoff_tracks_nyquist = true;
                next.cutoff_hz = next.nyquist_hz() - NYQUIST_EPSILON_HZ;
            }
            ConfigChange::ToggleTriggering => next.use_triggering = !next.use_triggering,
            ConfigChange::TogglePlotFiltered => next.plot_filtered = !next.plot_filtered,
            ConfigChange::TogglePause => next.pause = !next.pause,
            ConfigChange::ToggleFileLogging => next.file_logging = !next.file_logging,
        }
        check_cutoff(next.cutoff_hz, next.nyquist_hz())?;

        let filter_redesigned = !self.filter.matches(next.sample_rate_hz, next.cutoff_hz);
        let filter = if filter_redesigned {
            ButterworthLowpass::design(next.sample_rate_hz, next.cutoff_hz)?
        } else {
            self.filter.clone()
        };
        check_window(next.display_len(), filter.min_len())?;
        let rate_changed = next.sample_rate_hz != self.config.sample_rate_hz;
        let window_reset = rate_changed || next.window_capacity() != self.buffer.capacity();

        // Everything fallible is done; commit.
        let command_sent = rate_changed && self.send_period(next.sample_period_us());
        if window_reset {
            self.buffer.resize(next.window_capacity());
        }
        self.filter = filter;
        self.config = next;
        log::debug!("config applied: {change:?}");
        Ok(ApplyOutcome {
            rate_changed,
            window_reset,
            filter_redesigned,
            command_sent,
        })
    }

    /// Captures each channel's mean over the full rolling window as its zero offset.
    pub fn calibrate(&mut self) -> Result<&[f64], ConfigError> {
        if !self.buffer.is_full() {
            return Err(ConfigError::NotEnoughData {
                have: self.buffer.len(),
                need: self.buffer.capacity(),
            });
        }
        let traces = self.buffer.traces(self.config.channels.len());
        self.offsets = traces
            .channels
            .iter()
            .map(|trace| trace.iter().sum::<f64>() / trace.len().max(1) as f64)
            .collect();
        log::info!("calibrated channel offsets: {:?}", self.offsets);
        Ok(&self.offsets)
    }

    fn send_period(&mut self, period_us: u64) -> bool {
        match self.sink.send_command(&period_us.to_string()) {
            Ok(()) => {
                log::info!("sample period set to {period_us} us");
                true
            }
            Err(e) => {
                log::warn!("failed to send sample period to device: {e}");
                false
            }
        }
    }
}
