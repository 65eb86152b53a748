//! Inbound frame decoding.
//!
//! Two wire formats are understood:
//! - ASCII lines of whitespace separated integers, one line per sample, each channel
//!   affine-scaled to physical units and rounded to three decimals. An optional
//!   trailing field carries the device's inter-sample delta in microseconds.
//! - Fixed-width binary frames in native byte order, decoded by channel stride.
use serde::{Deserialize, Serialize};

use crate::drivers::{DecodeError, Sample};

/// A line longer than this without a terminator is discarded as garbage.
pub const MAX_LINE_BYTES: usize = 4096;

/// `round(((raw / divisor) - offset) / span, 3)`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AsciiScale {
    pub divisor: f64,
    pub offset: f64,
    pub span: f64,
}

impl Default for AsciiScale {
    fn default() -> Self {
        // Analog accelerometer on a 678 uV/LSB ADC: microvolts to g.
        Self {
            divisor: 500_000.0,
            offset: 1.615,
            span: 0.3,
        }
    }
}

impl AsciiScale {
    pub fn apply(&self, raw: i64) -> f64 {
        round3(((raw as f64 / self.divisor) - self.offset) / self.span)
    }
    /// Inverse of [`AsciiScale::apply`], used by the simulated device.
    pub fn to_raw(&self, value: f64) -> i64 {
        ((value * self.span + self.offset) * self.divisor).round() as i64
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryEncoding {
    I16,
    I32,
    F32,
}

impl BinaryEncoding {
    pub fn width(self) -> usize {
        match self {
            BinaryEncoding::I16 => 2,
            BinaryEncoding::I32 | BinaryEncoding::F32 => 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrameFormat {
    AsciiLine {
        channels: usize,
        with_delta: bool,
        scale: AsciiScale,
    },
    Binary {
        channels: usize,
        encoding: BinaryEncoding,
    },
}

impl Default for FrameFormat {
    fn default() -> Self {
        FrameFormat::AsciiLine {
            channels: 3,
            with_delta: true,
            scale: AsciiScale::default(),
        }
    }
}

impl FrameFormat {
    pub fn channels(&self) -> usize {
        match self {
            FrameFormat::AsciiLine { channels, .. } | FrameFormat::Binary { channels, .. } => {
                *channels
            }
        }
    }
    pub fn has_delta(&self) -> bool {
        matches!(self, FrameFormat::AsciiLine { with_delta: true, .. })
    }
}

/// Incremental decoder: bytes go in as they arrive, whole frames come out.
pub struct FrameDecoder {
    format: FrameFormat,
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new(format: FrameFormat) -> Self {
        Self {
            format,
            pending: Vec::new(),
        }
    }

    pub fn format(&self) -> &FrameFormat {
        &self.format
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<Sample, DecodeError>> {
        self.pending.extend_from_slice(bytes);
        match self.format.clone() {
            FrameFormat::AsciiLine {
                channels,
                with_delta,
                scale,
            } => self.drain_lines(channels, with_delta, &scale),
            FrameFormat::Binary { channels, encoding } => self.drain_binary(channels, encoding),
        }
    }

    fn drain_lines(
        &mut self,
        channels: usize,
        with_delta: bool,
        scale: &AsciiScale,
    ) -> Vec<Result<Sample, DecodeError>> {
        let mut out = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            out.push(decode_line(&line[..pos], channels, with_delta, scale));
        }
        if self.pending.len() > MAX_LINE_BYTES {
            let len = self.pending.len();
            self.pending.clear();
            out.push(Err(DecodeError::Overlong { len }));
        }
        out
    }

    fn drain_binary(
        &mut self,
        channels: usize,
        encoding: BinaryEncoding,
    ) -> Vec<Result<Sample, DecodeError>> {
        let frame_len = channels * encoding.width();
        if frame_len == 0 {
            self.pending.clear();
            return Vec::new();
        }
        let frames = self.pending.len() / frame_len;
        let out = self
            .pending
            .chunks_exact(frame_len)
            .map(|frame| decode_binary(frame, encoding))
            .collect();
        self.pending.drain(..frames * frame_len);
        out
    }
}

pub fn decode_line(
    line: &[u8],
    channels: usize,
    with_delta: bool,
    scale: &AsciiScale,
) -> Result<Sample, DecodeError> {
    let text = std::str::from_utf8(line).map_err(|_| DecodeError::NotUtf8)?;
    let text = text.trim_end_matches('\r').trim();
    if text.is_empty() {
        return Err(DecodeError::Empty);
    }
    let raw = text
        .split_whitespace()
        .map(|tok| {
            tok.parse::<i64>()
                .map_err(|_| DecodeError::NonNumeric(tok.to_owned()))
        })
        .collect::<Result<Vec<i64>, _>>()?;
    let expected = channels + usize::from(with_delta);
    if raw.len() != expected {
        return Err(DecodeError::FieldCount {
            expected,
            actual: raw.len(),
        });
    }
    let values = raw[..channels].iter().map(|&r| scale.apply(r)).collect();
    let delta = with_delta.then(|| raw[channels] as f64);
    Ok(Sample::new(values, delta))
}

pub fn decode_binary(frame: &[u8], encoding: BinaryEncoding) -> Result<Sample, DecodeError> {
    let width = encoding.width();
    let mut values = Vec::with_capacity(frame.len() / width);
    for (channel, bytes) in frame.chunks_exact(width).enumerate() {
        let value = match encoding {
            BinaryEncoding::I16 => i16::from_ne_bytes([bytes[0], bytes[1]]) as f64,
            BinaryEncoding::I32 => {
                i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
            }
            BinaryEncoding::F32 => {
                let v = f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                if !v.is_finite() {
                    return Err(DecodeError::NonFinite { channel });
                }
                v as f64
            }
        };
        values.push(value);
    }
    Ok(Sample::new(values, None))
}

pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
