use indexmap::IndexMap;

use crate::models::{
    GroupStats, HistoricalExam, HistoryMetrics, HistoryStability, HistoryTrend, Profile,
    ScoreSheet, StudentMetrics, StudentRanks, StudentReport, SubjectTScore, TOTAL_SCORE,
};
use crate::ranking::{standardize, RosterEntry};
use crate::stats::{
    gini_coefficient, linear_trend_slope, population_std_dev, round_to, EXCELLENT_THRESHOLD,
    PASS_THRESHOLD,
};

/// Everything needed to diagnose one student of a class.
pub struct StudentContext<'a> {
    pub entry: &'a RosterEntry,
    pub ranks: &'a StudentRanks,
    pub subjects: &'a [String],
    pub full_marks: &'a IndexMap<String, f64>,
    pub cohort: &'a GroupStats,
    pub class_scores: &'a IndexMap<String, Vec<f64>>,
    pub total_full_mark: f64,
    pub history: Option<&'a [HistoricalExam]>,
}

pub struct StudentDiagnosis {
    pub report: StudentReport,
    /// Unrounded subject T-scores, pooled later for the class Gini.
    pub subject_t_scores: Vec<f64>,
}

pub fn diagnose_student(ctx: &StudentContext<'_>) -> StudentDiagnosis {
    let entry = ctx.entry;
    let mut sheet = ScoreSheet {
        raw_scores: entry.scores.clone(),
        ..ScoreSheet::default()
    };
    let mut subject_t: Vec<(String, f64)> = Vec::with_capacity(ctx.subjects.len());

    for subject in ctx.subjects {
        let raw = entry.score(subject);
        let (mean, std_dev) = ctx
            .cohort
            .get(subject)
            .map(|row| (row.descriptive.mean, row.descriptive.std_dev))
            .unwrap_or((0.0, 0.0));
        let standardized = standardize(raw, mean, std_dev);
        let full_mark = ctx.full_marks.get(subject).copied().unwrap_or(0.0);

        sheet.z_scores.insert(subject.clone(), round_to(standardized.z, 3));
        sheet.t_scores.insert(subject.clone(), round_to(standardized.t, 2));
        sheet.score_rates.insert(
            subject.clone(),
            if full_mark != 0.0 {
                round_to(raw / full_mark, 3)
            } else {
                0.0
            },
        );
        subject_t.push((subject.clone(), standardized.t));
    }

    let (total_mean, total_std) = ctx
        .cohort
        .total_score
        .as_ref()
        .map(|row| (row.descriptive.mean, row.descriptive.std_dev))
        .unwrap_or((0.0, 0.0));
    let total_t = standardize(entry.total_score, total_mean, total_std).t;
    sheet
        .t_scores
        .insert(TOTAL_SCORE.to_string(), round_to(total_t, 2));

    let t_values: Vec<f64> = subject_t.iter().map(|(_, t)| *t).collect();
    let imbalance = imbalance_index(&t_values);
    let (strength_subjects, weakness_subjects) = strength_and_weakness(&subject_t);
    let total_score = round_to(entry.total_score, 2);
    let (points_to_pass, points_to_excellent) = threshold_gaps(total_score, ctx.total_full_mark);

    let history = ctx
        .history
        .filter(|exams| !exams.is_empty())
        .map(|exams| {
            history_metrics(
                total_score,
                ctx.ranks.total_score.class_rank,
                ctx.ranks.total_score.grade_rank,
                exams,
            )
        });

    let metrics = StudentMetrics {
        imbalance_index: imbalance,
        strength_subjects,
        weakness_subjects,
        contribution_score: contribution_scores(entry, ctx.class_scores, ctx.subjects),
        specialization_index: specialization_index(&t_values),
        points_to_pass,
        points_to_excellent,
        history,
    };

    StudentDiagnosis {
        report: StudentReport {
            student_id: entry.student_id.clone(),
            student_name: entry.student_name.clone(),
            table_name: entry.class_name.clone(),
            total_score,
            class_rank: ctx.ranks.total_score.class_rank,
            grade_rank: ctx.ranks.total_score.grade_rank,
            ranks: ctx.ranks.clone(),
            scores: sheet,
            metrics,
            profile: classify_profile(total_t, imbalance),
        },
        subject_t_scores: t_values,
    }
}

/// Population spread of a student's subject T-scores.
pub fn imbalance_index(t_scores: &[f64]) -> f64 {
    if t_scores.len() < 2 {
        return 0.0;
    }
    round_to(population_std_dev(t_scores), 2)
}

pub fn specialization_index(t_scores: &[f64]) -> f64 {
    if t_scores.len() < 2 {
        return 0.0;
    }
    round_to(gini_coefficient(t_scores), 3)
}

/// Highest and lowest T-score subject. The first subject wins a tie for
/// strength and the last one wins a tie for weakness.
pub fn strength_and_weakness(
    subject_t: &[(String, f64)],
) -> (Vec<SubjectTScore>, Vec<SubjectTScore>) {
    let mut strongest: Option<&(String, f64)> = None;
    let mut weakest: Option<&(String, f64)> = None;
    for candidate in subject_t {
        if strongest.map_or(true, |best| candidate.1 > best.1) {
            strongest = Some(candidate);
        }
        if weakest.map_or(true, |worst| candidate.1 <= worst.1) {
            weakest = Some(candidate);
        }
    }
    let pick = |found: Option<&(String, f64)>| {
        found
            .map(|(subject, t)| SubjectTScore {
                subject: subject.clone(),
                t_score: round_to(*t, 2),
            })
            .into_iter()
            .collect::<Vec<_>>()
    };
    (pick(strongest), pick(weakest))
}

/// Own score minus the mean of the other class members, per subject.
pub fn contribution_scores(
    entry: &RosterEntry,
    class_scores: &IndexMap<String, Vec<f64>>,
    subjects: &[String],
) -> IndexMap<String, f64> {
    let mut contribution = IndexMap::new();
    for subject in subjects {
        let value = match (entry.scores.get(subject), class_scores.get(subject)) {
            (Some(&own), Some(scores)) if scores.len() >= 2 => {
                let others_mean = (scores.iter().sum::<f64>() - own) / (scores.len() - 1) as f64;
                round_to(own - others_mean, 2)
            }
            _ => 0.0,
        };
        contribution.insert(subject.clone(), value);
    }
    contribution
}

pub fn classify_profile(total_t: f64, imbalance: f64) -> Profile {
    if total_t >= 62.0 && imbalance >= 12.0 {
        Profile::EliteSpecialized
    } else if total_t >= 62.0 {
        Profile::EliteBalanced
    } else if total_t >= 55.0 && imbalance < 8.0 {
        Profile::SteadyDeveloper
    } else if (45.0..55.0).contains(&total_t) {
        Profile::CoreMainstay
    } else if total_t < 45.0 && imbalance >= 12.0 {
        Profile::WeaknessConstrained
    } else if total_t < 45.0 {
        Profile::FoundationWeak
    } else {
        Profile::PotentialImprover
    }
}

/// Points still needed to reach the pass and excellent total-score lines.
pub fn threshold_gaps(total_score: f64, total_full_mark: f64) -> (Option<f64>, Option<f64>) {
    let pass_line = total_full_mark * PASS_THRESHOLD;
    let excellent_line = total_full_mark * EXCELLENT_THRESHOLD;
    let gap = |line: f64| (total_score < line).then(|| round_to(line - total_score, 2));
    (gap(pass_line), gap(excellent_line))
}

/// Trend against the most recent past exam plus stability over all of them.
/// `history` is ordered oldest first and excludes the current exam.
pub fn history_metrics(
    total_score: f64,
    class_rank: usize,
    grade_rank: usize,
    history: &[HistoricalExam],
) -> HistoryMetrics {
    let mut metrics = HistoryMetrics::default();

    if let Some(last) = history.last() {
        metrics.trend = HistoryTrend {
            total_score: last.total_score.map(|prev| round_to(total_score - prev, 2)),
            class_rank: last.class_rank.map(|prev| prev as i64 - class_rank as i64),
            grade_rank: last.grade_rank.map(|prev| prev as i64 - grade_rank as i64),
        };
    }

    if history.len() >= 2 {
        let percentiles: Vec<Option<f64>> =
            history.iter().map(|exam| exam.grade_percentile_rank).collect();
        let present_percentiles: Vec<f64> = percentiles.iter().flatten().copied().collect();
        let t_scores: Vec<f64> = history.iter().filter_map(|exam| exam.total_t_score).collect();

        metrics.stability = HistoryStability {
            grade_percentile_rank_volatility: (present_percentiles.len() >= 2)
                .then(|| round_to(population_std_dev(&present_percentiles), 2)),
            total_t_score_volatility: (t_scores.len() >= 2)
                .then(|| round_to(population_std_dev(&t_scores), 2)),
        };
        metrics.grade_percentile_rank_slope = Some(linear_trend_slope(&percentiles));
    }

    metrics
}
