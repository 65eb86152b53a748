use std::collections::VecDeque;

use crate::drivers::Sample;

/// Channels x samples, extracted from a run of [`Sample`]s.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Traces {
    pub channels: Vec<Vec<f64>>,
    pub deltas_us: Vec<f64>,
}

impl Traces {
    pub fn from_samples<'a>(
        samples: impl IntoIterator<Item = &'a Sample>,
        channels: usize,
    ) -> Self {
        let mut traces = Traces {
            channels: vec![Vec::new(); channels],
            deltas_us: Vec::new(),
        };
        for sample in samples {
            for (ch, trace) in traces.channels.iter_mut().enumerate() {
                trace.push(sample.value(ch).unwrap_or(f64::NAN));
            }
            if let Some(dt) = sample.delta_us() {
                traces.deltas_us.push(dt);
            }
        }
        traces
    }

    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, |c| c.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fixed-capacity sliding window over the most recent samples.
pub struct RollingBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl RollingBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Anything shorter than a full window is insufficient data for filtering/triggering.
    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.samples.len() == self.capacity
    }

    pub fn append(&mut self, sample: Sample) {
        self.samples.push_back(sample);
    }

    pub fn trim(&mut self) {
        let overage = self.samples.len().saturating_sub(self.capacity);
        self.samples.drain(..overage);
    }

    pub fn push(&mut self, sample: Sample) {
        self.append(sample);
        self.trim();
    }

    /// A new capacity never reinterprets old content: the window restarts empty.
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.samples = VecDeque::with_capacity(capacity);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn traces(&self, channels: usize) -> Traces {
        Traces::from_samples(self.samples.iter(), channels)
    }
}
