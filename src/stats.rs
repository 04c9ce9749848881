use std::cmp::Ordering;

use indexmap::IndexMap;

use crate::models::{BoxPlot, DescriptiveStats};

pub const EXCELLENT_THRESHOLD: f64 = 0.85;
pub const GOOD_THRESHOLD: f64 = 0.70;
pub const PASS_THRESHOLD: f64 = 0.60;

const TAIL_FRACTION: f64 = 0.27;

/// Upper bound on histogram bins; the last bin absorbs everything above.
pub const MAX_HISTOGRAM_BINS: usize = 1000;

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance (divides by N).
pub fn population_variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = mean(values);
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

pub fn population_std_dev(values: &[f64]) -> f64 {
    population_variance(values).sqrt()
}

pub fn sorted_ascending(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    sorted
}

/// Linear-interpolation quantile over an already sorted slice, `p` in [0, 1].
pub fn quantile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = rank - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}

/// Size of each 27% tail used by the discrimination and structure metrics.
pub fn tail_size(n: usize) -> usize {
    ((n as f64 * TAIL_FRACTION).floor() as usize).max(1)
}

pub fn descriptive_stats(scores: &[f64], full_mark: f64, bin_width: u32) -> DescriptiveStats {
    let count = scores.len();
    if count == 0 {
        return DescriptiveStats::default();
    }

    let n = count as f64;
    let mean_raw = mean(scores);
    let variance = if count > 1 {
        population_variance(scores)
    } else {
        0.0
    };
    let std_dev = variance.sqrt();

    let sorted = sorted_ascending(scores);
    let min = sorted[0];
    let max = sorted[count - 1];
    // rounding must not push a quartile outside the observed range
    let q1 = round_to(quantile(&sorted, 0.25), 2).clamp(min, max);
    let median = round_to(quantile(&sorted, 0.50), 2).clamp(min, max);
    let q3 = round_to(quantile(&sorted, 0.75), 2).clamp(min, max);

    let (excellent_rate, good_rate, pass_rate, low_score_rate, difficulty, full_mark_count) =
        if full_mark > 0.0 {
            let excellent_line = full_mark * EXCELLENT_THRESHOLD;
            let good_line = full_mark * GOOD_THRESHOLD;
            let pass_line = full_mark * PASS_THRESHOLD;
            let excellent = scores.iter().filter(|&&s| s >= excellent_line).count();
            let good = scores
                .iter()
                .filter(|&&s| s >= good_line && s < excellent_line)
                .count();
            let pass = scores.iter().filter(|&&s| s >= pass_line).count();
            let low_score_rate = if pass == count {
                0.0
            } else {
                round_to(1.0 - pass as f64 / n, 3)
            };
            (
                round_to(excellent as f64 / n, 3),
                round_to(good as f64 / n, 3),
                round_to(pass as f64 / n, 3),
                low_score_rate,
                round_to(mean_raw / full_mark, 3),
                scores.iter().filter(|&&s| s == full_mark).count(),
            )
        } else {
            (0.0, 0.0, 0.0, 0.0, 0.0, 0)
        };

    let (skewness, kurtosis) = skewness_kurtosis(scores);

    DescriptiveStats {
        count,
        mean: round_to(mean_raw, 2),
        std_dev: round_to(std_dev, 2),
        variance: round_to(variance, 2),
        min,
        q1,
        median,
        q3,
        max,
        range: round_to(max - min, 2),
        excellent_rate,
        good_rate,
        pass_rate,
        low_score_rate,
        difficulty,
        skewness,
        kurtosis,
        full_mark_count,
        zero_mark_count: scores.iter().filter(|&&s| s == 0.0).count(),
        box_plot_data: BoxPlot {
            min,
            q1,
            median,
            q3,
            max,
        },
        frequency_distribution: frequency_distribution(scores, full_mark, bin_width),
    }
}

/// Counts scores into `[lo, lo + width)` bins over `[0, ceil(full_mark))`.
/// A score equal to the full mark lands in the last bin, which always
/// reaches up to the full mark. At most `MAX_HISTOGRAM_BINS` bins are built.
pub fn frequency_distribution(
    scores: &[f64],
    full_mark: f64,
    bin_width: u32,
) -> IndexMap<String, usize> {
    let mut bins = IndexMap::new();
    let upper = full_mark.ceil();
    if scores.is_empty() || bin_width == 0 || !(upper > 0.0) {
        return bins;
    }

    let upper = upper as u64;
    let width = u64::from(bin_width);
    let bin_count = upper.div_ceil(width).min(MAX_HISTOGRAM_BINS as u64) as usize;
    let mut counts = vec![0usize; bin_count];
    let last = bin_count - 1;

    for &score in scores {
        let idx = if score >= full_mark {
            last
        } else if score <= 0.0 {
            0
        } else {
            ((score / width as f64).floor() as usize).min(last)
        };
        counts[idx] += 1;
    }

    for (i, count) in counts.into_iter().enumerate() {
        let lower = i as u64 * width;
        let upper_bound = if i == last {
            upper
        } else {
            (lower + width).min(upper)
        };
        bins.insert(format!("{lower}-{upper_bound}"), count);
    }
    bins
}

/// Third and fourth standardized moments; kurtosis is excess kurtosis.
pub fn skewness_kurtosis(scores: &[f64]) -> (f64, f64) {
    let n = scores.len();
    if n < 4 {
        return (0.0, 0.0);
    }
    let mean = mean(scores);
    let std_dev = population_std_dev(scores);
    if std_dev == 0.0 {
        return (0.0, 0.0);
    }
    let m3 = scores.iter().map(|x| (x - mean).powi(3)).sum::<f64>() / n as f64;
    let m4 = scores.iter().map(|x| (x - mean).powi(4)).sum::<f64>() / n as f64;
    let skewness = m3 / std_dev.powi(3);
    let kurtosis = m4 / std_dev.powi(4) - 3.0;
    (round_to(skewness, 3), round_to(kurtosis, 3))
}

pub fn pearson_correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len();
    if n < 2 || b.len() != n {
        return 0.0;
    }
    let (mean_a, mean_b) = (mean(a), mean(b));
    let (std_a, std_b) = (population_std_dev(a), population_std_dev(b));
    if std_a == 0.0 || std_b == 0.0 {
        return 0.0;
    }
    let covariance = a
        .iter()
        .zip(b)
        .map(|(x, y)| (x - mean_a) * (y - mean_b))
        .sum::<f64>()
        / n as f64;
    round_to(covariance / (std_a * std_b), 3)
}

pub fn gini_coefficient(values: &[f64]) -> f64 {
    let total: f64 = values.iter().sum();
    if values.is_empty() || total == 0.0 {
        return 0.0;
    }
    let sorted = sorted_ascending(values);
    let n = sorted.len() as f64;
    let numerator: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, v)| (2.0 * (i as f64 + 1.0) - n - 1.0) * v)
        .sum();
    let denominator = n * total;
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Mean of the top 27% minus mean of the bottom 27%, over the full mark.
pub fn discrimination_index(scores: &[f64], full_mark: f64) -> f64 {
    let n = scores.len();
    if n < 10 || full_mark <= 0.0 {
        return 0.0;
    }
    let sorted = sorted_ascending(scores);
    let k = tail_size(n);
    let high = mean(&sorted[n - k..]);
    let low = mean(&sorted[..k]);
    round_to((high - low) / full_mark, 3)
}

/// OLS slope of the present values against their 1-based positions.
pub fn linear_trend_slope(values: &[Option<f64>]) -> f64 {
    let points: Vec<(f64, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|y| ((i + 1) as f64, y)))
        .collect();
    if points.len() < 2 {
        return 0.0;
    }

    let n = points.len() as f64;
    let sum_x: f64 = points.iter().map(|(x, _)| x).sum();
    let sum_y: f64 = points.iter().map(|(_, y)| y).sum();
    let sum_xy: f64 = points.iter().map(|(x, y)| x * y).sum();
    let sum_xx: f64 = points.iter().map(|(x, _)| x * x).sum();

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator == 0.0 {
        return 0.0;
    }
    round_to((n * sum_xy - sum_x * sum_y) / denominator, 3)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn empty_scores_give_complete_zeroed_stats() {
        let stats = descriptive_stats(&[], 100.0, 10);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.mean, 0.0);
        assert!(stats.frequency_distribution.is_empty());
        assert_eq!(stats.box_plot_data, BoxPlot::default());
    }

    #[test]
    fn single_perfect_score() {
        let stats = descriptive_stats(&[100.0], 100.0, 10);
        assert_eq!(stats.count, 1);
        assert_eq!(stats.mean, 100.0);
        assert_eq!(stats.std_dev, 0.0);
        assert_eq!(stats.q1, 100.0);
        assert_eq!(stats.median, 100.0);
        assert_eq!(stats.q3, 100.0);
        assert_eq!(stats.pass_rate, 1.0);
        assert_eq!(stats.excellent_rate, 1.0);
        assert_eq!(stats.low_score_rate, 0.0);
        assert_eq!(stats.full_mark_count, 1);
        assert_eq!(stats.frequency_distribution.get("90-100"), Some(&1));
        let total: usize = stats.frequency_distribution.values().sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn population_spread_and_rates() {
        let stats = descriptive_stats(&[80.0, 90.0, 60.0, 70.0], 100.0, 10);
        assert_eq!(stats.mean, 75.0);
        assert_eq!(stats.variance, 125.0);
        assert_eq!(stats.std_dev, 11.18);
        assert_eq!(stats.min, 60.0);
        assert_eq!(stats.max, 90.0);
        assert_eq!(stats.range, 30.0);
        assert_eq!(stats.q1, 67.5);
        assert_eq!(stats.median, 75.0);
        assert_eq!(stats.q3, 82.5);
        assert_eq!(stats.excellent_rate, 0.25);
        assert_eq!(stats.good_rate, 0.5);
        assert_eq!(stats.pass_rate, 1.0);
        assert_eq!(stats.difficulty, 0.75);
    }

    #[test]
    fn quartiles_are_ordered() {
        let samples: [&[f64]; 5] = [
            &[5.0],
            &[60.0, 70.0],
            &[3.0, 1.0, 2.0],
            &[12.5, 99.0, 0.0, 47.3, 47.3, 88.1, 5.5],
            &[1.004, 1.006, 1.001],
        ];
        for scores in samples {
            let s = descriptive_stats(scores, 100.0, 10);
            assert!(s.min <= s.q1, "{scores:?}");
            assert!(s.q1 <= s.median, "{scores:?}");
            assert!(s.median <= s.q3, "{scores:?}");
            assert!(s.q3 <= s.max, "{scores:?}");
        }
    }

    #[test]
    fn zero_full_mark_keeps_shape_fields() {
        let stats = descriptive_stats(&[4.0, 8.0, 6.0, 2.0], 0.0, 10);
        assert_eq!(stats.mean, 5.0);
        assert_eq!(stats.pass_rate, 0.0);
        assert_eq!(stats.excellent_rate, 0.0);
        assert_eq!(stats.difficulty, 0.0);
        assert!(stats.frequency_distribution.is_empty());
        assert!(stats.std_dev > 0.0);
    }

    #[test]
    fn frequency_bins_are_numeric_order_and_cover_all_scores() {
        let scores = [0.0, 9.9, 10.0, 55.0, 99.0, 100.0, 100.0];
        let bins = frequency_distribution(&scores, 100.0, 10);
        let keys: Vec<&str> = bins.keys().map(String::as_str).collect();
        assert_eq!(keys.len(), 10);
        assert_eq!(keys[0], "0-10");
        assert_eq!(keys[1], "10-20");
        assert_eq!(keys[9], "90-100");
        assert_eq!(bins["0-10"], 2);
        assert_eq!(bins["10-20"], 1);
        assert_eq!(bins["90-100"], 3);
        assert_eq!(bins.values().sum::<usize>(), scores.len());
    }

    #[test]
    fn frequency_last_bin_is_truncated_at_full_mark() {
        let bins = frequency_distribution(&[95.0, 150.0], 150.0, 20);
        assert_eq!(bins.keys().last().map(String::as_str), Some("140-150"));
        assert_eq!(bins["140-150"], 1);
        assert_eq!(bins["80-100"], 1);
    }

    #[test]
    fn frequency_handles_degenerate_inputs() {
        assert!(frequency_distribution(&[], 100.0, 10).is_empty());
        assert!(frequency_distribution(&[50.0], 100.0, 0).is_empty());
        let clamped = frequency_distribution(&[-3.0, 120.0], 100.0, 10);
        assert_eq!(clamped["0-10"], 1);
        assert_eq!(clamped["90-100"], 1);
    }

    #[test]
    fn huge_full_mark_caps_bin_count() {
        let scores = [5.0, 5e14, 1e15];
        let bins = frequency_distribution(&scores, 1e15, 10);
        assert_eq!(bins.len(), MAX_HISTOGRAM_BINS);
        assert_eq!(bins["0-10"], 1);
        let (label, count) = bins.last().unwrap();
        assert_eq!(label, "9990-1000000000000000");
        assert_eq!(*count, 2);
        assert_eq!(bins.values().sum::<usize>(), scores.len());
    }

    #[test]
    fn skewness_needs_four_varied_points() {
        assert_eq!(skewness_kurtosis(&[1.0, 2.0, 3.0]), (0.0, 0.0));
        assert_eq!(skewness_kurtosis(&[5.0, 5.0, 5.0, 5.0]), (0.0, 0.0));
        let (skew, kurt) = skewness_kurtosis(&[1.0, 2.0, 3.0, 4.0]);
        assert!(close(skew, 0.0));
        assert!(close(kurt, -1.36));
        let (right_skew, _) = skewness_kurtosis(&[1.0, 1.0, 1.0, 10.0]);
        assert!(right_skew > 0.0);
    }

    #[test]
    fn correlation_properties() {
        let a = [1.0, 2.0, 3.0, 5.0];
        assert_eq!(pearson_correlation(&a, &a), 1.0);
        let inverted: Vec<f64> = a.iter().map(|v| -v).collect();
        assert_eq!(pearson_correlation(&a, &inverted), -1.0);
        assert_eq!(pearson_correlation(&[4.0, 4.0, 4.0, 4.0], &a), 0.0);
        assert_eq!(pearson_correlation(&a, &[1.0, 2.0]), 0.0);
        assert_eq!(pearson_correlation(&[1.0], &[1.0]), 0.0);
    }

    #[test]
    fn gini_matches_closed_form() {
        assert_eq!(gini_coefficient(&[10.0, 10.0, 10.0, 10.0]), 0.0);
        let g = gini_coefficient(&[0.0, 0.0, 0.0, 10.0]);
        // (2*4 - 4 - 1) * 10 / (4 * 10)
        assert!(close(g, 0.75));
        assert!(g > 0.0 && g < 1.0);
        assert_eq!(gini_coefficient(&[]), 0.0);
        assert_eq!(gini_coefficient(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn discrimination_requires_ten_scores() {
        let nine: Vec<f64> = (0..9).map(|i| i as f64 * 10.0).collect();
        assert_eq!(discrimination_index(&nine, 100.0), 0.0);

        let ten: Vec<f64> = (1..=10).map(|i| i as f64 * 10.0).collect();
        // k = 2: (95 - 15) / 100
        assert!(close(discrimination_index(&ten, 100.0), 0.8));
        assert_eq!(discrimination_index(&ten, 0.0), 0.0);
    }

    #[test]
    fn tail_size_never_drops_below_one() {
        assert_eq!(tail_size(1), 1);
        assert_eq!(tail_size(10), 2);
        assert_eq!(tail_size(100), 27);
    }

    #[test]
    fn trend_slope_skips_absent_points() {
        assert_eq!(linear_trend_slope(&[Some(10.0)]), 0.0);
        assert_eq!(linear_trend_slope(&[Some(10.0), None]), 0.0);
        assert!(close(
            linear_trend_slope(&[Some(10.0), Some(20.0), Some(30.0)]),
            10.0
        ));
        // points (1, 10) and (3, 30)
        assert!(close(
            linear_trend_slope(&[Some(10.0), None, Some(30.0)]),
            10.0
        ));
        assert!(close(
            linear_trend_slope(&[Some(90.0), Some(80.0), Some(70.0)]),
            -10.0
        ));
    }
}
