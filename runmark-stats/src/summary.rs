//! Series Summary
//!
//! One `SeriesSummary` per monitor. Central tendency and spread are computed
//! from every sample (a resource series has no "outliers" to discard), and a
//! time-weighted mean is offered separately for series whose ticks drifted.

use crate::percentiles::percentile_of_sorted;

/// Summary of a single monitor's value series
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SeriesSummary {
    /// Number of samples
    pub count: usize,
    /// Smallest observed value
    pub min: f64,
    /// Largest observed value (the peak)
    pub max: f64,
    /// Arithmetic mean
    pub mean: f64,
    /// Median
    pub median: f64,
    /// Sample standard deviation (n - 1); zero below two samples
    pub std_dev: f64,
    /// 95th percentile
    pub p95: f64,
    /// Most recent value in series order
    pub last: f64,
}

/// Summarize a value series. Returns `None` for an empty series so callers
/// can tell "no data" apart from a series of zeros.
pub fn summarize(values: &[f64]) -> Option<SeriesSummary> {
    let last = *values.last()?;

    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;
    let std_dev = if count < 2 {
        0.0
    } else {
        let variance =
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
        variance.sqrt()
    };

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    Some(SeriesSummary {
        count,
        min: sorted[0],
        max: sorted[count - 1],
        mean,
        median: percentile_of_sorted(&sorted, 50.0),
        std_dev,
        p95: percentile_of_sorted(&sorted, 95.0),
        last,
    })
}

/// Trapezoidal time-weighted mean of `(t_secs, value)` points.
///
/// Points must be ordered by time. A single point (or a zero-length span)
/// degenerates to the plain mean.
pub fn time_weighted_mean(points: &[(f64, f64)]) -> Option<f64> {
    let (first_t, _) = *points.first()?;
    let (last_t, _) = *points.last()?;
    let span = last_t - first_t;

    if span <= 0.0 {
        let sum: f64 = points.iter().map(|(_, v)| v).sum();
        return Some(sum / points.len() as f64);
    }

    let area: f64 = points
        .windows(2)
        .map(|w| {
            let (t0, v0) = w[0];
            let (t1, v1) = w[1];
            (t1 - t0).max(0.0) * (v0 + v1) / 2.0
        })
        .sum();

    Some(area / span)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_series_has_no_summary() {
        assert!(summarize(&[]).is_none());
        assert!(time_weighted_mean(&[]).is_none());
    }

    #[test]
    fn test_summary_of_flat_series() {
        let summary = summarize(&[4.0, 4.0, 4.0]).unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.min, 4.0);
        assert_eq!(summary.max, 4.0);
        assert_eq!(summary.mean, 4.0);
        assert_eq!(summary.std_dev, 0.0);
    }

    #[test]
    fn test_summary_keeps_series_order_for_last() {
        let summary = summarize(&[1.0, 9.0, 3.0]).unwrap();
        assert_eq!(summary.last, 3.0);
        assert_eq!(summary.max, 9.0);
        assert_eq!(summary.median, 3.0);
        assert!((summary.mean - 13.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_std_dev_uses_sample_variance() {
        let summary = summarize(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((summary.std_dev - 2.138).abs() < 1e-3);
    }

    #[test]
    fn test_time_weighted_mean_weights_long_intervals() {
        // 0..1s at 0, then 1..3s at 100
        let points = [(0.0, 0.0), (1.0, 0.0), (1.0, 100.0), (3.0, 100.0)];
        let mean = time_weighted_mean(&points).unwrap();
        assert!((mean - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_time_weighted_mean_single_point() {
        assert_eq!(time_weighted_mean(&[(2.0, 7.0)]), Some(7.0));
    }
}
