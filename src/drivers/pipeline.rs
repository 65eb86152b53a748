use chrono::{Local, NaiveDateTime};

use crate::drivers::fft::dominant_frequency;
use crate::drivers::trigger::{last_crossing_index, TriggerPass};
use crate::drivers::{
    ApplyOutcome, ChannelRole, CommandSink, ConfigChange, ConfigError, Controller, Sample,
    SampleQueue, ScopeConfig, StatisticsAggregator, StatisticsRecord, Traces,
};

/// One channel of the current display window.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelView {
    pub name: String,
    pub values: Vec<f64>,
    pub threshold: Option<f64>,
    /// Rising-edge indices within `values`; empty for continuous channels.
    pub crossings: Vec<usize>,
}

/// Ready-to-draw trace window.
#[derive(Clone, Debug, PartialEq)]
pub struct ScopeView {
    pub channels: Vec<ChannelView>,
    /// Position of the aligning crossing inside the window, when triggered.
    pub trigger_at: Option<usize>,
    pub dominant_hz: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompletedWindow {
    pub record: StatisticsRecord,
    /// Raw samples of the window, present when a snapshot was requested.
    pub snapshot: Option<Vec<Sample>>,
}

#[derive(Debug, Default)]
pub struct TickReport {
    pub consumed: usize,
    pub completed: Vec<CompletedWindow>,
    pub view: Option<ScopeView>,
}

/// Owns the configuration and every stage downstream of the sample queue.
pub struct ScopePipeline {
    controller: Controller,
    aggregator: StatisticsAggregator,
    snapshot_requested: bool,
}

impl ScopePipeline {
    pub fn new(config: ScopeConfig, sink: Box<dyn CommandSink>) -> Result<Self, ConfigError> {
        let aggregator = StatisticsAggregator::new(config.data_sample_len);
        let controller = Controller::new(config, sink)?;
        Ok(Self {
            controller,
            aggregator,
            snapshot_requested: false,
        })
    }

    pub fn config(&self) -> &ScopeConfig {
        self.controller.config()
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut Controller {
        &mut self.controller
    }

    pub fn aggregator(&self) -> &StatisticsAggregator {
        &self.aggregator
    }

    /// A rate change also discards the half-filled aggregation window, whose samples
    /// no longer match the redesigned filter.
    pub fn apply(&mut self, change: ConfigChange) -> Result<ApplyOutcome, ConfigError> {
        let outcome = self.controller.apply(change)?;
        if outcome.rate_changed {
            let dropped = self.aggregator.restart();
            if dropped > 0 {
                log::info!("sample rate changed, discarded {dropped} samples of the open window");
            }
        }
        Ok(outcome)
    }

    /// The raw samples of the next completed window will be handed out with its record.
    pub fn request_snapshot(&mut self) {
        self.snapshot_requested = true;
    }

    pub fn snapshot_pending(&self) -> bool {
        self.snapshot_requested
    }

    /// Drains the queue completely, then runs the display stages once.
    pub fn tick(&mut self, queue: &SampleQueue) -> TickReport {
        self.tick_at(queue, Local::now().naive_local())
    }

    pub fn tick_at(&mut self, queue: &SampleQueue, now: NaiveDateTime) -> TickReport {
        let samples = queue.drain();
        let consumed = samples.len();
        let completed = self.ingest(samples, now);
        let view = if self.config().pause {
            None
        } else {
            self.view()
        };
        TickReport {
            consumed,
            completed,
            view,
        }
    }

    /// Routes every sample to the rolling buffer (unless paused) and the aggregation window.
    pub fn ingest(&mut self, samples: Vec<Sample>, now: NaiveDateTime) -> Vec<CompletedWindow> {
        let mut completed = Vec::new();
        let paused = self.config().pause;
        for sample in samples {
            if !paused {
                self.controller.buffer_mut().push(sample.clone());
            }
            if let Some(window) = self.aggregator.push(sample) {
                completed.push(self.complete_window(window, now));
            }
        }
        completed
    }

    fn complete_window(&mut self, window: Vec<Sample>, now: NaiveDateTime) -> CompletedWindow {
        let config = self.controller.config();
        let mut traces = Traces::from_samples(window.iter(), config.channels.len());
        subtract_offsets(&mut traces, self.controller.offsets());
        let roles = config.roles();
        let record = self
            .aggregator
            .summarize(&traces, &roles, self.controller.filter(), now);
        log::info!("window complete at {}", record.timestamp.format("%H-%M-%S"));
        let snapshot = if self.snapshot_requested {
            self.snapshot_requested = false;
            Some(window)
        } else {
            None
        };
        CompletedWindow { record, snapshot }
    }

    /// Current display window, or `None` while the rolling buffer is still filling.
    pub fn view(&self) -> Option<ScopeView> {
        let buffer = self.controller.buffer();
        if !buffer.is_full() {
            return None;
        }
        let config = self.controller.config();
        let filter = self.controller.filter();
        let mut traces = buffer.traces(config.channels.len());
        subtract_offsets(&mut traces, self.controller.offsets());

        let shown: Vec<Vec<f64>> = traces
            .channels
            .iter()
            .enumerate()
            .map(|(ch, raw)| {
                if config.plot_filtered {
                    filter.filtfilt_or_raw(raw, ch)
                } else {
                    raw.clone()
                }
            })
            .collect();

        let len = buffer.len();
        let display_len = config.display_len().min(len);
        let reference = shown.get(config.reference_channel);
        let (start, trigger_at) = match reference {
            Some(trace) if config.use_triggering => {
                let half = display_len / 2;
                let aligned = TriggerPass::run(trace)
                    .threshold
                    .and_then(|thr| last_crossing_index(trace, half..len - half, thr));
                match aligned {
                    Some(i) => (i - half, Some(half)),
                    None => (len - display_len, None),
                }
            }
            _ => (len - display_len, None),
        };

        let channels = config
            .channels
            .iter()
            .zip(&shown)
            .map(|(spec, trace)| {
                let values = trace[start..start + display_len].to_vec();
                let (threshold, crossings) = match spec.role {
                    ChannelRole::Triggered => {
                        let pass = TriggerPass::run(&values);
                        (pass.threshold, pass.crossings)
                    }
                    ChannelRole::Continuous => (None, Vec::new()),
                };
                ChannelView {
                    name: spec.name.clone(),
                    values,
                    threshold,
                    crossings,
                }
            })
            .collect::<Vec<_>>();
        let dominant_hz = channels
            .get(config.reference_channel)
            .and_then(|c| dominant_frequency(&c.values, config.sample_rate_hz));

        Some(ScopeView {
            channels,
            trigger_at,
            dominant_hz,
        })
    }
}

fn subtract_offsets(traces: &mut Traces, offsets: &[f64]) {
    for (trace, offset) in traces.channels.iter_mut().zip(offsets) {
        if *offset != 0.0 {
            trace.iter_mut().for_each(|v| *v -= offset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{sample_queue, RecordingSink};
    use chrono::NaiveDate;
    use std::f64::consts::PI;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap()
    }

    fn sine_sample(i: usize, rate: f64) -> Sample {
        let t = i as f64 / rate;
        let x = (2.0 * PI * 5.0 * t + 0.3).sin();
        let y = 0.5 * (2.0 * PI * 5.0 * t + 1.1).sin();
        Sample::new(vec![x, y, 1.0 + 0.01 * x], Some(2000.0))
    }

    fn pipeline(config: ScopeConfig) -> (ScopePipeline, RecordingSink) {
        let sink = RecordingSink::new();
        (ScopePipeline::new(config, Box::new(sink.clone())).unwrap(), sink)
    }

    #[test]
    fn end_to_end_five_hz_sine() {
        let (mut pipe, _) = pipeline(ScopeConfig::default());
        let (producer, queue) = sample_queue();
        for i in 0..2500 {
            producer.push(sine_sample(i, 500.0));
        }
        let report = pipe.tick_at(&queue, now());
        assert_eq!(report.consumed, 2500);
        assert_eq!(report.completed.len(), 1);
        let record = &report.completed[0].record;
        let x = record.channels[0].unwrap();
        let y = record.channels[1].unwrap();
        assert!((x.mean - 2.0).abs() < 0.02, "x pk-pk {}", x.mean);
        assert!(x.std < 0.01);
        assert!((y.mean - 1.0).abs() < 0.01, "y pk-pk {}", y.mean);
        assert!((record.channels[2].unwrap().mean - 1.0).abs() < 0.001);
        assert_eq!(record.delta_us.unwrap().mean, 2000.0);
        assert_eq!(record.timestamp, now());
        // the rolling buffer (5000 under triggering) is not full yet
        assert!(report.view.is_none());
        assert_eq!(pipe.aggregator().pending(), 0);
    }

    #[test]
    fn crossing_count_matches_signal_frequency() {
        let config = ScopeConfig {
            use_triggering: false,
            ..ScopeConfig::default()
        };
        let (mut pipe, _) = pipeline(config);
        let samples = (0..2500).map(|i| sine_sample(i, 500.0)).collect();
        pipe.ingest(samples, now());
        let view = pipe.view().expect("buffer is full");
        assert_eq!(view.channels[0].values.len(), 2500);
        let crossings = view.channels[0].crossings.len();
        assert!((24..=26).contains(&crossings), "{crossings} crossings");
        assert!(view.channels[2].crossings.is_empty());
        let f = view.dominant_hz.unwrap();
        assert!((f - 5.0).abs() < 0.25, "{f}");
        let peak = view.channels[0].values.iter().fold(0.0f64, |m, v| m.max(*v));
        assert!((peak - 1.0).abs() < 0.02, "{peak}");
    }

    #[test]
    fn triggered_view_is_aligned_on_a_crossing() {
        let (mut pipe, _) = pipeline(ScopeConfig::default());
        let samples = (0..5000).map(|i| sine_sample(i + 17, 500.0)).collect();
        pipe.ingest(samples, now());
        let view = pipe.view().unwrap();
        assert_eq!(view.trigger_at, Some(1250));
        let x = &view.channels[0].values;
        assert_eq!(x.len(), 2500);
        let thr = view.channels[0].threshold.unwrap();
        assert!(x[1250] < thr + 0.05 && x[1251] >= thr - 0.05);
        assert!(x[1251] > x[1250]);
    }

    #[test]
    fn samples_land_in_exactly_one_window() {
        let config = ScopeConfig {
            data_sample_len: 100,
            ..ScopeConfig::default()
        };
        let (mut pipe, _) = pipeline(config);
        let (producer, queue) = sample_queue();
        let mut windows = 0;
        let mut consumed = 0;
        for tick in 0..7 {
            for i in 0..73 {
                producer.push(sine_sample(tick * 73 + i, 500.0));
            }
            let report = pipe.tick_at(&queue, now());
            consumed += report.consumed;
            windows += report.completed.len();
        }
        assert_eq!(consumed, 7 * 73);
        assert_eq!(windows, 7 * 73 / 100);
        assert_eq!(pipe.aggregator().pending(), 7 * 73 % 100);
    }

    #[test]
    fn snapshot_is_attached_to_next_window_only() {
        let config = ScopeConfig {
            data_sample_len: 10,
            ..ScopeConfig::default()
        };
        let (mut pipe, _) = pipeline(config);
        pipe.request_snapshot();
        let done = pipe.ingest((0..20).map(|i| sine_sample(i, 500.0)).collect(), now());
        assert_eq!(done.len(), 2);
        assert_eq!(done[0].snapshot.as_ref().map(Vec::len), Some(10));
        assert!(done[1].snapshot.is_none());
        assert!(!pipe.snapshot_pending());
    }

    #[test]
    fn pause_freezes_display_but_keeps_aggregating() {
        let config = ScopeConfig {
            data_sample_len: 50,
            use_triggering: false,
            time_base_s: 0.02,
            ..ScopeConfig::default()
        };
        let (mut pipe, _) = pipeline(config);
        pipe.apply(ConfigChange::TogglePause).unwrap();
        let done = pipe.ingest((0..100).map(|i| sine_sample(i, 500.0)).collect(), now());
        assert_eq!(done.len(), 2);
        assert!(pipe.controller().buffer().is_empty());
        pipe.apply(ConfigChange::TogglePause).unwrap();
        pipe.ingest((0..50).map(|i| sine_sample(i, 500.0)).collect(), now());
        assert!(pipe.view().is_some());
    }

    #[test]
    fn set_sample_rate_through_pipeline() {
        let (mut pipe, sink) = pipeline(ScopeConfig::default());
        pipe.ingest((0..100).map(|i| sine_sample(i, 500.0)).collect(), now());
        assert_eq!(pipe.aggregator().pending(), 100);
        pipe.apply(ConfigChange::SampleRate(2000.0)).unwrap();
        assert_eq!(pipe.aggregator().pending(), 0);
        assert!(pipe.controller().filter().matches(2000.0, 50.0));
        assert_eq!(pipe.controller().buffer().capacity(), 2000 * 5 * 2);
        assert!(pipe.controller().buffer().is_empty());
        assert_eq!(sink.sent(), vec!["500".to_string()]);

        // other changes leave the open window alone
        pipe.ingest((0..30).map(|i| sine_sample(i, 2000.0)).collect(), now());
        pipe.apply(ConfigChange::TimeBase(0.5)).unwrap();
        pipe.apply(ConfigChange::Cutoff(100.0)).unwrap();
        assert_eq!(pipe.aggregator().pending(), 30);
    }

    #[test]
    fn calibration_offsets_shift_continuous_channel() {
        let config = ScopeConfig {
            data_sample_len: 500,
            use_triggering: false,
            time_base_s: 0.2,
            ..ScopeConfig::default()
        };
        let (mut pipe, _) = pipeline(config);
        pipe.ingest((0..500).map(|i| sine_sample(i, 500.0)).collect(), now());
        pipe.controller_mut().calibrate().unwrap();
        let done = pipe.ingest((500..1000).map(|i| sine_sample(i, 500.0)).collect(), now());
        let z = done[0].record.channels[2].unwrap();
        assert!(z.mean.abs() < 0.001, "{}", z.mean);
    }
}
