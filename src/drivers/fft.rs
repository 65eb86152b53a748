use rustfft::{num_complex::Complex64, FftPlanner};

/// Magnitude spectrum of one trace.
#[derive(Clone, Debug)]
pub struct Spectrum {
    pub frequencies_hz: Vec<f64>,
    pub magnitudes: Vec<f64>,
}

impl Spectrum {
    /// Strongest non-DC bin.
    pub fn peak_hz(&self) -> Option<f64> {
        self.magnitudes
            .iter()
            .enumerate()
            .skip(1)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| self.frequencies_hz[i])
    }
}

/// Mean-removed, zero-padded FFT of `trace`.
pub fn spectrum(trace: &[f64], sample_rate_hz: f64) -> Spectrum {
    let fft_size = trace.len().next_power_of_two().max(2);
    let mean = if trace.is_empty() {
        0.0
    } else {
        trace.iter().sum::<f64>() / trace.len() as f64
    };
    let mut buffer: Vec<Complex64> = trace
        .iter()
        .map(|v| Complex64::new(v - mean, 0.0))
        .collect();
    buffer.resize(fft_size, Complex64::new(0.0, 0.0));
    FftPlanner::<f64>::new()
        .plan_fft_forward(fft_size)
        .process(&mut buffer);
    let bins = fft_size / 2;
    Spectrum {
        frequencies_hz: (0..bins)
            .map(|k| k as f64 * sample_rate_hz / fft_size as f64)
            .collect(),
        magnitudes: buffer
            .iter()
            .take(bins)
            .map(|c| c.norm() / fft_size as f64)
            .collect(),
    }
}

/// Frequency of the strongest tone, `None` if the trace is too short to tell.
pub fn dominant_frequency(trace: &[f64], sample_rate_hz: f64) -> Option<f64> {
    if trace.len() < 4 {
        return None;
    }
    spectrum(trace, sample_rate_hz).peak_hz()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn finds_tone_within_one_bin() {
        let rate = 500.0;
        let trace: Vec<f64> = (0..2500)
            .map(|i| 0.7 + (2.0 * PI * 5.0 * i as f64 / rate).sin())
            .collect();
        let f = dominant_frequency(&trace, rate).unwrap();
        let bin = rate / 4096.0;
        assert!((f - 5.0).abs() <= bin, "{f}");
    }

    #[test]
    fn short_traces_have_no_answer() {
        assert_eq!(dominant_frequency(&[1.0, 2.0], 100.0), None);
        let s = spectrum(&[], 100.0);
        assert_eq!(s.magnitudes.len(), 1);
    }
}
