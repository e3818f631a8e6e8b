//! Percentile Computation
//!
//! Percentiles over a raw resource series. Spikes are kept; for memory and
//! GPU series the tail is exactly what a reader of the report looks for.

/// Percentile (0..=100) of an ascending series by linear interpolation
/// between closest ranks; an empty series yields `0.0`.
pub(crate) fn percentile_of_sorted(sorted: &[f64], percentile: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }

    let clamped = percentile.clamp(0.0, 100.0) / 100.0;
    let rank = clamped * (n - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = (lower + 1).min(n - 1);
    let weight = rank - lower as f64;

    sorted[lower] + weight * (sorted[upper] - sorted[lower])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_of_odd_series() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((percentile_of_sorted(&values, 50.0) - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_interpolates_between_ranks() {
        let values = [0.0, 100.0];
        assert!((percentile_of_sorted(&values, 25.0) - 25.0).abs() < 1e-9);
        assert!((percentile_of_sorted(&values, 90.0) - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_range_percentile_is_clamped() {
        let values = [1.0, 2.0, 3.0];
        assert_eq!(percentile_of_sorted(&values, 150.0), 3.0);
        assert_eq!(percentile_of_sorted(&values, -5.0), 1.0);
    }

    #[test]
    fn test_single_and_empty() {
        assert_eq!(percentile_of_sorted(&[42.0], 99.0), 42.0);
        assert_eq!(percentile_of_sorted(&[], 50.0), 0.0);
    }

    #[test]
    fn test_p95_ignores_a_single_spike() {
        let mut values: Vec<f64> = vec![10.0; 99];
        values.push(1000.0);
        assert_eq!(percentile_of_sorted(&values, 95.0), 10.0);
        assert!(percentile_of_sorted(&values, 99.5) > 10.0);
    }
}
