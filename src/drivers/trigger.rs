//! Rising-edge triggering and cycle segmentation.
//!
//! A crossing is an index `i` with `trace[i] < threshold && trace[i + 1] >= threshold`.
//! A value sitting exactly on the threshold counts as *below* on the left side of the
//! comparison and as *reached* on the right side.
//!
//! Cycle `k` runs from just after crossing `k - 1` up to and including crossing `k`
//! (cycle 0 starts at the beginning of the trace). The first cycle is truncated by the
//! window edge and the last one is dropped as well, so `M` crossings yield
//! `max(0, M - 2)` interior cycles. Samples after the last crossing never form a cycle.
use std::ops::Range;

/// `(max + min) / 2`, or `None` for an empty or non-finite trace.
pub fn threshold(trace: &[f64]) -> Option<f64> {
    let (min, max) = min_max(trace)?;
    let mid = (max + min) / 2.0;
    mid.is_finite().then_some(mid)
}

pub fn find_crossings(trace: &[f64], threshold: f64) -> Vec<usize> {
    trace
        .windows(2)
        .enumerate()
        .filter(|(_, w)| is_rising(w[0], w[1], threshold))
        .map(|(i, _)| i)
        .collect()
}

/// Last crossing `i` such that both `i` and `i + 1` lie inside `range`.
pub fn last_crossing_index(trace: &[f64], range: Range<usize>, threshold: f64) -> Option<usize> {
    let end = range.end.min(trace.len());
    if range.start >= end {
        return None;
    }
    trace[range.start..end]
        .windows(2)
        .rposition(|w| is_rising(w[0], w[1], threshold))
        .map(|i| range.start + i)
}

#[inline]
fn is_rising(current: f64, next: f64, threshold: f64) -> bool {
    current < threshold && next >= threshold
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cycle {
    pub start: usize,
    /// Inclusive: the crossing index that closes the cycle.
    pub end: usize,
    pub min: f64,
    pub max: f64,
}

impl Cycle {
    pub fn peak_to_peak(&self) -> f64 {
        self.max - self.min
    }
}

pub fn segment_cycles(trace: &[f64], crossings: &[usize]) -> Vec<Cycle> {
    let mut cycles = Vec::with_capacity(crossings.len());
    let mut start = 0;
    for &end in crossings {
        if end >= trace.len() || end < start {
            break;
        }
        if let Some((min, max)) = min_max(&trace[start..=end]) {
            cycles.push(Cycle {
                start,
                end,
                min,
                max,
            });
        }
        start = end + 1;
    }
    cycles
}

/// Drops the leading and trailing cycle.
pub fn interior_cycles(cycles: &[Cycle]) -> &[Cycle] {
    if cycles.len() < 3 {
        return &[];
    }
    &cycles[1..cycles.len() - 1]
}

/// Everything one trigger pass derives from a single filtered channel.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TriggerPass {
    pub threshold: Option<f64>,
    pub crossings: Vec<usize>,
    pub interior: Vec<Cycle>,
}

impl TriggerPass {
    pub fn run(trace: &[f64]) -> Self {
        let Some(threshold) = threshold(trace) else {
            return Self::default();
        };
        let crossings = find_crossings(trace, threshold);
        let cycles = segment_cycles(trace, &crossings);
        let interior = interior_cycles(&cycles).to_vec();
        Self {
            threshold: Some(threshold),
            crossings,
            interior,
        }
    }

    pub fn peak_to_peaks(&self) -> Vec<f64> {
        self.interior.iter().map(Cycle::peak_to_peak).collect()
    }
}

fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    let mut iter = values.iter().copied();
    let first = iter.next()?;
    Some(iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn square(period: usize, cycles: usize) -> Vec<f64> {
        (0..period * cycles)
            .map(|i| if i % period < period / 2 { 1.0 } else { -1.0 })
            .collect()
    }

    #[test]
    fn equality_counts_as_below_then_reached() {
        let trace = [0.0, 1.0, 1.0, 2.0, 0.0, 1.0];
        // threshold 1.0: 0->1 rises (0 < 1, 1 >= 1); 1->1 and 1->2 do not (1 is not < 1).
        assert_eq!(find_crossings(&trace, 1.0), vec![0, 4]);
    }

    #[test]
    fn threshold_is_midpoint() {
        assert_eq!(threshold(&[-3.0, 1.0, 5.0]), Some(1.0));
        assert_eq!(threshold(&[]), None);
        assert_eq!(threshold(&[f64::INFINITY, f64::NEG_INFINITY]), None);
    }

    #[test]
    fn detection_is_deterministic() {
        let trace: Vec<f64> = (0..997)
            .map(|i| (i as f64 * 0.37).sin() + 0.25 * (i as f64 * 2.9).cos())
            .collect();
        let thr = threshold(&trace).unwrap();
        let first = find_crossings(&trace, thr);
        for _ in 0..5 {
            assert_eq!(find_crossings(&trace, thr), first);
        }
    }

    #[test]
    fn m_crossings_give_m_minus_two_interior_cycles() {
        for cycles in 0..8 {
            let trace = square(10, cycles);
            let pass = TriggerPass::run(&trace);
            let m = pass.crossings.len();
            assert_eq!(pass.interior.len(), m.saturating_sub(2), "{cycles} cycles");
        }
    }

    #[test]
    fn segments_end_on_crossings() {
        let trace = square(10, 4);
        // each low half ends at 9, 19, 29
        let crossings = find_crossings(&trace, 0.0);
        assert_eq!(crossings, vec![9, 19, 29]);
        let cycles = segment_cycles(&trace, &crossings);
        assert_eq!(cycles.len(), 3);
        assert_eq!((cycles[0].start, cycles[0].end), (0, 9));
        assert_eq!((cycles[1].start, cycles[1].end), (10, 19));
        let interior = interior_cycles(&cycles);
        assert_eq!(interior.len(), 1);
        assert_eq!(interior[0].peak_to_peak(), 2.0);
    }

    #[test]
    fn fewer_than_three_crossings_is_empty_not_error() {
        let trace = square(10, 2);
        let pass = TriggerPass::run(&trace);
        assert!(pass.crossings.len() < 3);
        assert!(pass.interior.is_empty());
        assert!(pass.peak_to_peaks().is_empty());
        assert_eq!(TriggerPass::run(&[]), TriggerPass::default());
    }

    #[test]
    fn clean_sine_interior_amplitude() {
        let rate = 500.0;
        let trace: Vec<f64> = (0..2500)
            .map(|i| 1.5 * (2.0 * PI * 5.0 * i as f64 / rate + 0.3).sin())
            .collect();
        let pass = TriggerPass::run(&trace);
        assert_eq!(pass.crossings.len(), 25);
        let p2p = pass.peak_to_peaks();
        assert_eq!(p2p.len(), 23);
        for v in p2p {
            assert!((v - 3.0).abs() < 1e-2, "{v}");
        }
    }

    #[test]
    fn last_crossing_respects_range_and_reports_absence() {
        let trace = square(10, 4);
        assert_eq!(last_crossing_index(&trace, 0..trace.len(), 0.0), Some(29));
        assert_eq!(last_crossing_index(&trace, 0..29, 0.0), Some(19));
        assert_eq!(last_crossing_index(&trace, 11..19, 0.0), None);
        assert_eq!(last_crossing_index(&trace, 30..10, 0.0), None);
        // a crossing at index 0 is a real answer, distinct from "none"
        assert_eq!(last_crossing_index(&[-1.0, 1.0, 1.0], 0..3, 0.0), Some(0));
    }
}
