use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::drivers::codec::AsciiScale;
use crate::drivers::TransportError;

/// One decoded multi-channel reading.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    values: Vec<f64>,
    delta_us: Option<f64>,
}

impl Sample {
    pub fn new(values: Vec<f64>, delta_us: Option<f64>) -> Self {
        Self { values, delta_us }
    }
    pub fn values(&self) -> &[f64] {
        &self.values
    }
    pub fn value(&self, channel: usize) -> Option<f64> {
        self.values.get(channel).copied()
    }
    /// Time since the previous sample as reported by the device, in microseconds.
    pub fn delta_us(&self) -> Option<f64> {
        self.delta_us
    }
}

/// Reading half of the transport. Owned by the ingestion worker.
pub trait SerialLink: Send {
    /// Reads whatever arrives within the link's timeout. `Ok(0)` means the timeout elapsed.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

/// Writing half of the transport. Owned by the reconfiguration controller.
pub trait CommandSink: Send {
    fn send_command(&mut self, command: &str) -> Result<(), TransportError>;
}

/// In-memory link for tests and deterministic playback. Reports `Closed` once drained.
pub struct ManualLink {
    chunks: VecDeque<Vec<u8>>,
}

impl ManualLink {
    pub fn new(chunks: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into_iter().collect(),
        }
    }
}

impl SerialLink for ManualLink {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let Some(mut chunk) = self.chunks.pop_front() else {
            return Err(TransportError::Closed);
        };
        if chunk.len() > buf.len() {
            let rest = chunk.split_off(buf.len());
            self.chunks.push_front(rest);
        }
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }
}

/// Sink that remembers every command it was asked to send.
#[derive(Clone, Default)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl CommandSink for RecordingSink {
    fn send_command(&mut self, command: &str) -> Result<(), TransportError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(command.to_owned());
        }
        Ok(())
    }
}

/// One synthetic channel of the simulated device.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SimTone {
    pub freq_hz: f64,
    pub amplitude: f64,
    pub offset: f64,
}

/// Software stand-in for the acquisition board: emits ASCII frames in real time
/// and honours sample-period commands sent through its [`SimulatedCommandSink`].
pub struct SimulatedLink {
    tones: Vec<SimTone>,
    scale: AsciiScale,
    noise: f64,
    period_us: Arc<AtomicU64>,
    timeout: Duration,
    rng: StdRng,
    elapsed_s: f64,
    last_emit: Instant,
    pending: Vec<u8>,
}

impl SimulatedLink {
    pub fn new(
        tones: Vec<SimTone>,
        scale: AsciiScale,
        noise: f64,
        sample_rate_hz: f64,
        timeout: Duration,
    ) -> Self {
        let period_us = (1.0e6 / sample_rate_hz.max(1.0)).round() as u64;
        Self {
            tones,
            scale,
            noise,
            period_us: Arc::new(AtomicU64::new(period_us.max(1))),
            timeout,
            rng: StdRng::from_entropy(),
            elapsed_s: 0.0,
            last_emit: Instant::now(),
            pending: Vec::new(),
        }
    }

    pub fn command_sink(&self) -> SimulatedCommandSink {
        SimulatedCommandSink {
            period_us: Arc::clone(&self.period_us),
        }
    }

    fn generate(&mut self) {
        let period_us = self.period_us.load(Ordering::Relaxed).max(1);
        let period = Duration::from_micros(period_us);
        let due = (self.last_emit.elapsed().as_micros() / period.as_micros()) as u32;
        for _ in 0..due {
            self.elapsed_s += period_us as f64 * 1.0e-6;
            let mut fields = Vec::with_capacity(self.tones.len() + 1);
            for tone in &self.tones {
                let phase = 2.0 * std::f64::consts::PI * tone.freq_hz * self.elapsed_s;
                let jitter = if self.noise > 0.0 {
                    self.rng.gen_range(-self.noise..self.noise)
                } else {
                    0.0
                };
                let value = tone.offset + tone.amplitude * phase.sin() + jitter;
                fields.push(self.scale.to_raw(value).to_string());
            }
            fields.push(period_us.to_string());
            self.pending.extend_from_slice(fields.join(" ").as_bytes());
            self.pending.extend_from_slice(b"\r\n");
        }
        self.last_emit += period * due;
    }
}

impl SerialLink for SimulatedLink {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.pending.is_empty() {
            let period = Duration::from_micros(self.period_us.load(Ordering::Relaxed).max(1));
            thread::sleep(period.max(Duration::from_millis(5)).min(self.timeout));
            self.generate();
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

pub struct SimulatedCommandSink {
    period_us: Arc<AtomicU64>,
}

impl CommandSink for SimulatedCommandSink {
    fn send_command(&mut self, command: &str) -> Result<(), TransportError> {
        match command.trim().parse::<u64>() {
            Ok(period) if period > 0 => self.period_us.store(period, Ordering::Relaxed),
            _ => log::warn!("simulated device ignored command {command:?}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_link_splits_oversized_chunks() {
        let mut link = ManualLink::new(vec![b"abcdef".to_vec()]);
        let mut buf = [0u8; 4];
        assert_eq!(link.read_chunk(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(link.read_chunk(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert!(matches!(link.read_chunk(&mut buf), Err(TransportError::Closed)));
    }

    #[test]
    fn simulated_sink_updates_period() {
        let link = SimulatedLink::new(
            vec![],
            AsciiScale::default(),
            0.0,
            500.0,
            Duration::from_millis(10),
        );
        assert_eq!(link.period_us.load(Ordering::Relaxed), 2000);
        let mut sink = link.command_sink();
        sink.send_command("1000").unwrap();
        assert_eq!(link.period_us.load(Ordering::Relaxed), 1000);
        sink.send_command("bogus").unwrap();
        assert_eq!(link.period_us.load(Ordering::Relaxed), 1000);
    }

    #[test]
    fn simulated_link_emits_decodable_lines() {
        let tone = SimTone {
            freq_hz: 5.0,
            amplitude: 1.0,
            offset: 0.0,
        };
        let mut link = SimulatedLink::new(
            vec![tone, tone],
            AsciiScale::default(),
            0.0,
            1000.0,
            Duration::from_millis(20),
        );
        let mut buf = [0u8; 4096];
        let mut text = String::new();
        for _ in 0..10 {
            let n = link.read_chunk(&mut buf).unwrap();
            text.push_str(std::str::from_utf8(&buf[..n]).unwrap());
            if text.contains('\n') {
                break;
            }
        }
        let line = text.lines().next().expect("at least one frame");
        assert_eq!(line.split_whitespace().count(), 3);
    }
}
