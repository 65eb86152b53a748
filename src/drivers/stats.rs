use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::drivers::codec::round3;
use crate::drivers::{ButterworthLowpass, Sample, StatsError, Traces, TriggerPass};

/// How a channel is summarised once per aggregation window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelRole {
    /// Periodic: mean/std of peak-to-peak over interior trigger cycles.
    Triggered,
    /// Non-periodic: mean/std over the whole filtered trace.
    Continuous,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub mean: f64,
    pub std: f64,
}

impl ChannelStats {
    /// Population mean and standard deviation, rounded to three decimals.
    pub fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        Some(Self {
            mean: round3(mean),
            std: round3(variance.sqrt()),
        })
    }
}

/// One row of the summary log.
#[derive(Clone, Debug, PartialEq)]
pub struct StatisticsRecord {
    pub timestamp: NaiveDateTime,
    /// `None` when the channel has never produced a valid value.
    pub channels: Vec<Option<ChannelStats>>,
    pub delta_us: Option<ChannelStats>,
}

/// Accumulates samples into fixed windows and summarises each full window once.
/// The window is reset on every fill; there is no overlap between windows.
pub struct StatisticsAggregator {
    window_len: usize,
    window: Vec<Sample>,
    last: Option<StatisticsRecord>,
}

impl StatisticsAggregator {
    pub fn new(window_len: usize) -> Self {
        let window_len = window_len.max(1);
        Self {
            window_len,
            window: Vec::with_capacity(window_len),
            last: None,
        }
    }

    pub fn window_len(&self) -> usize {
        self.window_len
    }

    pub fn pending(&self) -> usize {
        self.window.len()
    }

    /// Throws away a partly filled window; returns how many samples were dropped.
    pub fn restart(&mut self) -> usize {
        let dropped = self.window.len();
        self.window.clear();
        dropped
    }

    /// Hands back the full window when this sample completes it.
    pub fn push(&mut self, sample: Sample) -> Option<Vec<Sample>> {
        self.window.push(sample);
        if self.window.len() < self.window_len {
            return None;
        }
        Some(std::mem::replace(
            &mut self.window,
            Vec::with_capacity(self.window_len),
        ))
    }

    /// Computes the record for one completed window. Channels whose statistics cannot be
    /// computed keep the value from the previous record.
    pub fn summarize(
        &mut self,
        traces: &Traces,
        roles: &[ChannelRole],
        filter: &ButterworthLowpass,
        timestamp: NaiveDateTime,
    ) -> StatisticsRecord {
        let channels = traces
            .channels
            .iter()
            .enumerate()
            .map(|(ch, trace)| {
                let role = roles.get(ch).copied().unwrap_or(ChannelRole::Continuous);
                match channel_stats(ch, trace, role, filter) {
                    Ok(stats) => Some(stats),
                    Err(e) => {
                        log::warn!("error calculating mean/std: {e}; keeping previous value");
                        self.last
                            .as_ref()
                            .and_then(|r| r.channels.get(ch).copied().flatten())
                    }
                }
            })
            .collect();
        let delta_us = ChannelStats::of(&traces.deltas_us)
            .or_else(|| self.last.as_ref().and_then(|r| r.delta_us));
        let record = StatisticsRecord {
            timestamp: timestamp.with_nanosecond(0).unwrap_or(timestamp),
            channels,
            delta_us,
        };
        self.last = Some(record.clone());
        record
    }
}

pub fn channel_stats(
    channel: usize,
    trace: &[f64],
    role: ChannelRole,
    filter: &ButterworthLowpass,
) -> Result<ChannelStats, StatsError> {
    if trace.is_empty() {
        return Err(StatsError::EmptyTrace { channel });
    }
    let filtered = filter.filtfilt_or_raw(trace, channel);
    let values = match role {
        ChannelRole::Triggered => {
            let pass = TriggerPass::run(&filtered);
            let p2p = pass.peak_to_peaks();
            if p2p.is_empty() {
                return Err(StatsError::NoInteriorCycles {
                    channel,
                    crossings: pass.crossings.len(),
                });
            }
            p2p
        }
        ChannelRole::Continuous => filtered,
    };
    ChannelStats::of(&values).ok_or(StatsError::EmptyTrace { channel })
}
