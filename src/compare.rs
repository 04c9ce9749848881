use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::models::CohortReport;
use crate::stats::round_to;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    pub metadata: ComparisonMetadata,
    pub students: IndexMap<String, StudentComparison>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonMetadata {
    pub compared_exams: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentComparison {
    pub student_name: String,
    pub table_name: String,
    pub timelines: Timelines,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timelines {
    pub total_score: Vec<TimelinePoint<f64>>,
    pub class_rank: Vec<TimelinePoint<usize>>,
    pub grade_rank: Vec<TimelinePoint<usize>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelinePoint<T> {
    pub exam: String,
    pub value: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// Last total minus first total.
    pub score_change: f64,
    /// First grade rank minus last; positive means the student moved up.
    pub rank_change: i64,
}

/// Lines up several exam reports per student. Reports are taken in the
/// given order, which should be chronological.
pub fn compare_reports(reports: &[(String, CohortReport)]) -> ComparisonReport {
    let mut comparison = ComparisonReport {
        metadata: ComparisonMetadata {
            compared_exams: reports.iter().map(|(name, _)| name.clone()).collect(),
        },
        students: IndexMap::new(),
    };

    for (exam, report) in reports {
        if report.error.is_some() {
            continue;
        }
        for student in report.students() {
            let entry = comparison
                .students
                .entry(student.student_id.clone())
                .or_insert_with(|| StudentComparison {
                    student_name: student.student_name.clone(),
                    table_name: student.table_name.clone(),
                    timelines: Timelines::default(),
                    progress: None,
                });
            let timelines = &mut entry.timelines;
            timelines.total_score.push(TimelinePoint {
                exam: exam.clone(),
                value: student.total_score,
            });
            timelines.class_rank.push(TimelinePoint {
                exam: exam.clone(),
                value: student.class_rank,
            });
            timelines.grade_rank.push(TimelinePoint {
                exam: exam.clone(),
                value: student.grade_rank,
            });
        }
    }

    for entry in comparison.students.values_mut() {
        entry.progress = progress(&entry.timelines);
    }
    comparison
}

fn progress(timelines: &Timelines) -> Option<Progress> {
    let scores = &timelines.total_score;
    let ranks = &timelines.grade_rank;
    if scores.len() < 2 {
        return None;
    }
    let (first_score, last_score) = (scores.first()?, scores.last()?);
    let (first_rank, last_rank) = (ranks.first()?, ranks.last()?);
    Some(Progress {
        score_change: round_to(last_score.value - first_score.value, 2),
        rank_change: first_rank.value as i64 - last_rank.value as i64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::assemble_report;
    use crate::config::AnalysisConfig;
    use crate::models::{ClassInput, ScopeInput, StudentInput};

    fn exam(name: &str, scores: &[(&str, f64)]) -> (String, CohortReport) {
        let input = ScopeInput {
            group_name: name.to_string(),
            full_marks: [("Math".to_string(), 100.0)].into_iter().collect(),
            tables: vec![ClassInput {
                table_name: "A".to_string(),
                students: scores
                    .iter()
                    .map(|(id, score)| StudentInput {
                        student_id: id.to_string(),
                        student_name: format!("Student {id}"),
                        scores: [("Math".to_string(), Some(*score))].into_iter().collect(),
                    })
                    .collect(),
            }],
        };
        let report = assemble_report(&input, None, &AnalysisConfig::default()).unwrap();
        (name.to_string(), report)
    }

    #[test]
    fn timelines_follow_report_order() {
        let reports = vec![
            exam("Midterm", &[("s1", 60.0), ("s2", 80.0)]),
            exam("Final", &[("s1", 90.0), ("s2", 70.0)]),
        ];
        let comparison = compare_reports(&reports);
        assert_eq!(comparison.metadata.compared_exams, vec!["Midterm", "Final"]);

        let s1 = &comparison.students["s1"];
        let totals: Vec<f64> = s1.timelines.total_score.iter().map(|p| p.value).collect();
        assert_eq!(totals, vec![60.0, 90.0]);
        assert_eq!(s1.timelines.grade_rank[0].exam, "Midterm");
        assert_eq!(
            s1.progress,
            Some(Progress {
                score_change: 30.0,
                rank_change: 1,
            })
        );
        assert_eq!(comparison.students["s2"].progress.unwrap().rank_change, -1);
    }

    #[test]
    fn single_appearance_has_no_progress() {
        let reports = vec![
            exam("Midterm", &[("s1", 60.0)]),
            exam("Final", &[("s1", 70.0), ("late", 50.0)]),
        ];
        let comparison = compare_reports(&reports);
        let keys: Vec<&str> = comparison.students.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["s1", "late"]);
        assert!(comparison.students["late"].progress.is_none());
        assert_eq!(comparison.students["late"].timelines.total_score.len(), 1);
    }

    #[test]
    fn errored_reports_are_skipped() {
        let empty = ScopeInput {
            group_name: "Quiz".to_string(),
            full_marks: [("Math".to_string(), 100.0)].into_iter().collect(),
            tables: Vec::new(),
        };
        let quiz = assemble_report(&empty, None, &AnalysisConfig::default()).unwrap();
        let reports = vec![
            exam("Midterm", &[("s1", 60.0)]),
            ("Quiz".to_string(), quiz),
        ];
        let comparison = compare_reports(&reports);
        assert_eq!(comparison.metadata.compared_exams.len(), 2);
        assert_eq!(comparison.students["s1"].timelines.total_score.len(), 1);
    }
}
