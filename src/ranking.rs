use std::cmp::Ordering;

use indexmap::IndexMap;

use crate::models::{RankEntry, StudentRanks};
use crate::stats::round_to;

/// One student of the flattened cohort with every subject score resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub student_id: String,
    pub student_name: String,
    pub class_name: String,
    pub class_index: usize,
    pub scores: IndexMap<String, f64>,
    pub total_score: f64,
}

impl RosterEntry {
    pub fn score(&self, subject: &str) -> f64 {
        self.scores.get(subject).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Standardized {
    pub z: f64,
    pub t: f64,
}

pub fn standardize(raw: f64, mean: f64, std_dev: f64) -> Standardized {
    if std_dev != 0.0 {
        let z = (raw - mean) / std_dev;
        Standardized { z, t: 50.0 + 10.0 * z }
    } else {
        Standardized { z: 0.0, t: 50.0 }
    }
}

pub fn percentile_rank(rank: usize, population: usize) -> f64 {
    if population == 0 {
        return 0.0;
    }
    round_to(
        (population - rank + 1) as f64 / population as f64 * 100.0,
        2,
    )
}

/// Sorts `members` by descending key. Equal keys keep their input order.
fn rank_by<F>(members: &[usize], key: F) -> Vec<(usize, usize, f64)>
where
    F: Fn(usize) -> f64,
{
    let mut order = members.to_vec();
    order.sort_by(|&a, &b| key(b).partial_cmp(&key(a)).unwrap_or(Ordering::Equal));
    let n = order.len();
    order
        .into_iter()
        .enumerate()
        .map(|(i, member)| (member, i + 1, percentile_rank(i + 1, n)))
        .collect()
}

fn class_members(roster: &[RosterEntry]) -> Vec<Vec<usize>> {
    let mut classes: Vec<Vec<usize>> = Vec::new();
    for (i, entry) in roster.iter().enumerate() {
        if entry.class_index >= classes.len() {
            classes.resize_with(entry.class_index + 1, Vec::new);
        }
        classes[entry.class_index].push(i);
    }
    classes
}

/// Cohort and class rankings on total score and on every subject.
/// The result is indexed like `roster`.
pub fn rank_population(roster: &[RosterEntry], subjects: &[String]) -> Vec<StudentRanks> {
    let mut ranks = vec![StudentRanks::default(); roster.len()];
    let everyone: Vec<usize> = (0..roster.len()).collect();
    let classes = class_members(roster);

    for (member, rank, pct) in rank_by(&everyone, |i| roster[i].total_score) {
        ranks[member].total_score.grade_rank = rank;
        ranks[member].total_score.grade_percentile_rank = pct;
    }
    for members in &classes {
        for (member, rank, pct) in rank_by(members, |i| roster[i].total_score) {
            ranks[member].total_score.class_rank = rank;
            ranks[member].total_score.class_percentile_rank = pct;
        }
    }

    for subject in subjects {
        for (member, rank, pct) in rank_by(&everyone, |i| roster[i].score(subject)) {
            let entry = subject_entry(&mut ranks[member], subject);
            entry.grade_rank = rank;
            entry.grade_percentile_rank = pct;
        }
        for members in &classes {
            for (member, rank, pct) in rank_by(members, |i| roster[i].score(subject)) {
                let entry = subject_entry(&mut ranks[member], subject);
                entry.class_rank = rank;
                entry.class_percentile_rank = pct;
            }
        }
    }

    ranks
}

fn subject_entry<'a>(ranks: &'a mut StudentRanks, subject: &str) -> &'a mut RankEntry {
    ranks.subjects.entry(subject.to_string()).or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, class_index: usize, math: f64, art: f64) -> RosterEntry {
        let mut scores = IndexMap::new();
        scores.insert("Math".to_string(), math);
        scores.insert("Art".to_string(), art);
        RosterEntry {
            student_id: id.to_string(),
            student_name: id.to_string(),
            class_name: format!("class-{class_index}"),
            class_index,
            scores,
            total_score: math + art,
        }
    }

    fn subjects() -> Vec<String> {
        vec!["Math".to_string(), "Art".to_string()]
    }

    #[test]
    fn cohort_ranks_follow_total_score() {
        let roster = vec![
            entry("a1", 0, 80.0, 0.0),
            entry("a2", 0, 90.0, 0.0),
            entry("b1", 1, 60.0, 0.0),
            entry("b2", 1, 70.0, 0.0),
        ];
        let ranks = rank_population(&roster, &subjects());

        let grade: Vec<usize> = ranks.iter().map(|r| r.total_score.grade_rank).collect();
        assert_eq!(grade, vec![2, 1, 4, 3]);
        assert_eq!(ranks[1].total_score.grade_percentile_rank, 100.0);
        assert_eq!(ranks[2].total_score.grade_percentile_rank, 25.0);

        let class: Vec<usize> = ranks.iter().map(|r| r.total_score.class_rank).collect();
        assert_eq!(class, vec![2, 1, 2, 1]);
        assert_eq!(ranks[3].total_score.class_percentile_rank, 100.0);
        assert_eq!(ranks[2].total_score.class_percentile_rank, 50.0);
    }

    #[test]
    fn cohort_ranks_are_a_permutation() {
        let roster: Vec<RosterEntry> = (0..7)
            .map(|i| entry(&format!("s{i}"), i % 3, (i * 13 % 7) as f64, i as f64 * 0.5))
            .collect();
        let ranks = rank_population(&roster, &subjects());
        let mut grade: Vec<usize> = ranks.iter().map(|r| r.total_score.grade_rank).collect();
        grade.sort_unstable();
        assert_eq!(grade, (1..=7).collect::<Vec<_>>());
    }

    #[test]
    fn ties_keep_input_order() {
        let roster = vec![
            entry("first", 0, 50.0, 10.0),
            entry("second", 0, 50.0, 10.0),
            entry("third", 1, 50.0, 10.0),
        ];
        let ranks = rank_population(&roster, &subjects());
        assert_eq!(ranks[0].total_score.grade_rank, 1);
        assert_eq!(ranks[1].total_score.grade_rank, 2);
        assert_eq!(ranks[2].total_score.grade_rank, 3);
        assert_eq!(ranks[0].subjects["Math"].grade_rank, 1);
        assert_eq!(ranks[2].subjects["Math"].class_rank, 1);
    }

    #[test]
    fn subject_ranks_are_independent_of_total() {
        // x leads on total (120 vs 110) and Math but trails on Art
        let roster = vec![entry("x", 0, 90.0, 30.0), entry("y", 0, 40.0, 70.0)];
        let ranks = rank_population(&roster, &subjects());
        assert_eq!(ranks[0].total_score.grade_rank, 1);
        assert_eq!(ranks[0].subjects["Math"].grade_rank, 1);
        assert_eq!(ranks[0].subjects["Art"].grade_rank, 2);
        assert_eq!(ranks[1].subjects["Art"].class_rank, 1);
        assert_eq!(ranks[1].subjects["Art"].grade_percentile_rank, 100.0);
    }

    #[test]
    fn percentile_of_last_rank() {
        assert_eq!(percentile_rank(1, 4), 100.0);
        assert_eq!(percentile_rank(4, 4), 25.0);
        assert_eq!(percentile_rank(3, 3), 33.33);
        assert_eq!(percentile_rank(1, 0), 0.0);
    }

    #[test]
    fn standardize_falls_back_on_flat_population() {
        assert_eq!(standardize(80.0, 80.0, 0.0), Standardized { z: 0.0, t: 50.0 });
        let s = standardize(90.0, 75.0, 15.0);
        assert!((s.z - 1.0).abs() < 1e-9);
        assert!((s.t - 60.0).abs() < 1e-9);
    }
}
