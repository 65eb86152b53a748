use std::f64::consts::PI;

use rustfft::num_complex::Complex64;

use crate::drivers::FilterError;

pub const ORDER: usize = 3;

/// Third-order Butterworth low-pass, bilinear transform with pre-warped cutoff.
///
/// Coefficients are normalised so `a[0] == 1`. The design is only valid while
/// `0 < cutoff < sample_rate / 2`.
#[derive(Clone, Debug, PartialEq)]
pub struct ButterworthLowpass {
    sample_rate_hz: f64,
    cutoff_hz: f64,
    b: Vec<f64>,
    a: Vec<f64>,
}

impl ButterworthLowpass {
    pub fn design(sample_rate_hz: f64, cutoff_hz: f64) -> Result<Self, FilterError> {
        if !(sample_rate_hz.is_finite() && sample_rate_hz > 0.0) {
            return Err(FilterError::InvalidSampleRate);
        }
        let nyquist_hz = sample_rate_hz / 2.0;
        if !(cutoff_hz > 0.0 && cutoff_hz < nyquist_hz) {
            return Err(FilterError::InvalidCutoff {
                cutoff_hz,
                nyquist_hz,
            });
        }
        // Analog prototype 1 / (s^3 + 2s^2 + 2s + 1) with s = (1/k)(1 - z^-1)/(1 + z^-1).
        let k = (PI * cutoff_hz / sample_rate_hz).tan();
        let (k2, k3) = (k * k, k * k * k);
        let a0 = 1.0 + 2.0 * k + 2.0 * k2 + k3;
        let a = vec![
            1.0,
            (-3.0 - 2.0 * k + 2.0 * k2 + 3.0 * k3) / a0,
            (3.0 - 2.0 * k - 2.0 * k2 + 3.0 * k3) / a0,
            (-1.0 + 2.0 * k - 2.0 * k2 + k3) / a0,
        ];
        let g = k3 / a0;
        let b = vec![g, 3.0 * g, 3.0 * g, g];
        Ok(Self {
            sample_rate_hz,
            cutoff_hz,
            b,
            a,
        })
    }

    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    pub fn cutoff_hz(&self) -> f64 {
        self.cutoff_hz
    }

    pub fn matches(&self, sample_rate_hz: f64, cutoff_hz: f64) -> bool {
        self.sample_rate_hz == sample_rate_hz && self.cutoff_hz == cutoff_hz
    }

    /// Feed-forward and feed-back vectors.
    pub fn coefficients(&self) -> (&[f64], &[f64]) {
        (&self.b, &self.a)
    }

    /// Samples of odd extension added at each end before the two passes.
    pub fn padlen(&self) -> usize {
        3 * self.a.len().max(self.b.len())
    }

    /// Shortest window [`ButterworthLowpass::filtfilt`] accepts.
    pub fn min_len(&self) -> usize {
        self.padlen() + 1
    }

    /// Magnitude response of a single pass at `freq_hz`.
    pub fn gain_at(&self, freq_hz: f64) -> f64 {
        let w = 2.0 * PI * freq_hz / self.sample_rate_hz;
        let z_inv = Complex64::from_polar(1.0, -w);
        let poly = |c: &[f64]| {
            c.iter()
                .rev()
                .fold(Complex64::new(0.0, 0.0), |acc, &coef| acc * z_inv + coef)
        };
        (poly(&self.b) / poly(&self.a)).norm()
    }

    /// Initial state of a pass that starts in steady state for a unit step.
    fn steady_state(&self) -> Vec<f64> {
        let dc = self.b.iter().sum::<f64>() / self.a.iter().sum::<f64>();
        let n = self.a.len() - 1;
        (0..n)
            .map(|i| {
                (i + 1..=n)
                    .map(|k| self.b[k] - self.a[k] * dc)
                    .sum::<f64>()
            })
            .collect()
    }

    /// Single causal pass, transposed direct form II.
    pub fn lfilter(&self, x: &[f64], zi: &[f64]) -> Vec<f64> {
        let n = self.a.len() - 1;
        let mut z = zi.to_vec();
        z.resize(n, 0.0);
        let mut y = Vec::with_capacity(x.len());
        for &xi in x {
            let yi = self.b[0] * xi + z[0];
            for i in 0..n {
                let next = if i + 1 < n { z[i + 1] } else { 0.0 };
                z[i] = self.b[i + 1] * xi - self.a[i + 1] * yi + next;
            }
            y.push(yi);
        }
        y
    }

    /// Zero-phase filtering: forward pass, backward pass, no group delay.
    pub fn filtfilt(&self, x: &[f64]) -> Result<Vec<f64>, FilterError> {
        let pad = self.padlen();
        if x.len() <= pad {
            return Err(FilterError::InsufficientLength {
                required: pad,
                actual: x.len(),
            });
        }
        let ext = odd_extend(x, pad);
        let zi = self.steady_state();

        let scaled = |seed: f64| zi.iter().map(|z| z * seed).collect::<Vec<f64>>();
        let mut y = self.lfilter(&ext, &scaled(ext[0]));
        y.reverse();
        let mut y = self.lfilter(&y, &scaled(y[0]));
        y.reverse();
        Ok(y[pad..pad + x.len()].to_vec())
    }

    /// [`ButterworthLowpass::filtfilt`], falling back to the raw trace with a warning.
    pub fn filtfilt_or_raw(&self, x: &[f64], channel: usize) -> Vec<f64> {
        match self.filtfilt(x) {
            Ok(y) => y,
            Err(e) => {
                log::warn!("channel {channel}: filtering skipped, using raw trace: {e}");
                x.to_vec()
            }
        }
    }
}

fn odd_extend(x: &[f64], pad: usize) -> Vec<f64> {
    let n = x.len();
    let (first, last) = (x[0], x[n - 1]);
    let mut ext = Vec::with_capacity(n + 2 * pad);
    ext.extend((1..=pad).rev().map(|k| 2.0 * first - x[k]));
    ext.extend_from_slice(x);
    ext.extend((1..=pad).map(|k| 2.0 * last - x[n - 1 - k]));
    ext
}
