use indexmap::IndexMap;

use crate::models::{DescriptiveStats, GroupStructure, QuartileCompetitiveness, SubjectStats, TOTAL_SCORE};
use crate::stats::{mean, round_to, sorted_ascending, tail_size};

const MIN_STRUCTURE_POPULATION: usize = 10;

/// High-achiever penetration, struggler support and core density for one
/// population. Populations under ten score all zeros.
pub fn group_structural_indices(scores: &[f64], stats: &DescriptiveStats) -> GroupStructure {
    let n = scores.len();
    if n < MIN_STRUCTURE_POPULATION {
        return GroupStructure::default();
    }

    let sorted = sorted_ascending(scores);
    let k = tail_size(n);
    let academic_core_density = if stats.std_dev > 0.0 {
        let low = stats.mean - 0.5 * stats.std_dev;
        let high = stats.mean + 0.5 * stats.std_dev;
        let core = sorted.iter().filter(|&&s| s >= low && s <= high).count();
        round_to(core as f64 / n as f64, 3)
    } else {
        1.0
    };

    GroupStructure {
        high_achiever_penetration: round_to(mean(&sorted[n - k..]), 2),
        struggler_support_index: round_to(mean(&sorted[..k]), 2),
        academic_core_density,
    }
}

/// Share of `population` strictly below `value`, as a percentage.
pub fn percentile_rank_below(population: &[f64], value: f64) -> f64 {
    if population.is_empty() {
        return 0.0;
    }
    let below = population.iter().filter(|&&s| s < value).count();
    round_to(below as f64 / population.len() as f64 * 100.0, 2)
}

/// Fills homogeneity and quartile competitiveness on each class subject row,
/// comparing against the cohort rows and the cohort's raw score table.
pub fn class_vs_cohort_indices(
    class_stats: &mut IndexMap<String, SubjectStats>,
    cohort_stats: &IndexMap<String, SubjectStats>,
    cohort_scores: &IndexMap<String, Vec<f64>>,
) {
    for (subject, class_row) in class_stats.iter_mut() {
        if subject == TOTAL_SCORE {
            continue;
        }

        let homogeneity = match cohort_stats.get(subject) {
            Some(cohort_row) if cohort_row.descriptive.std_dev != 0.0 => round_to(
                class_row.descriptive.std_dev / cohort_row.descriptive.std_dev,
                3,
            ),
            _ => 1.0,
        };
        class_row.homogeneity_index = Some(homogeneity);

        class_row.quartile_competitiveness = cohort_scores
            .get(subject)
            .filter(|population| !population.is_empty())
            .map(|population| QuartileCompetitiveness {
                q1: percentile_rank_below(population, class_row.descriptive.q1),
                median: percentile_rank_below(population, class_row.descriptive.median),
                q3: percentile_rank_below(population, class_row.descriptive.q3),
            });
    }
}
