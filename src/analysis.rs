use std::collections::HashSet;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::config::{AnalysisConfig, MissingScorePolicy};
use crate::error::AnalysisError;
use crate::models::{
    ClassReport, ClassStats, CohortReport, GroupStats, HistoryMap, ScopeInput, StudentRanks,
    SubjectStats,
};
use crate::profile::{diagnose_student, StudentContext};
use crate::ranking::{rank_population, RosterEntry};
use crate::stats::{
    descriptive_stats, discrimination_index, gini_coefficient, pearson_correlation, round_to,
};
use crate::structure::{class_vs_cohort_indices, group_structural_indices};

pub const NO_DATA_MESSAGE: &str = "no valid student scores in the selected scope";

/// Raw scores of one population, column by subject. Lives only for the
/// duration of one assembly and never reaches the report.
struct ScoreTable {
    by_subject: IndexMap<String, Vec<f64>>,
    totals: Vec<f64>,
}

impl ScoreTable {
    fn collect(roster: &[RosterEntry], members: &[usize], subjects: &[String]) -> Self {
        let by_subject = subjects
            .iter()
            .map(|subject| {
                let column = members.iter().map(|&i| roster[i].score(subject)).collect();
                (subject.clone(), column)
            })
            .collect();
        let totals = members.iter().map(|&i| roster[i].total_score).collect();
        Self { by_subject, totals }
    }

    fn column(&self, subject: &str) -> &[f64] {
        self.by_subject.get(subject).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Shared read-only state for the per-class phase.
struct Cohort<'a> {
    input: &'a ScopeInput,
    subjects: &'a [String],
    total_full_mark: f64,
    roster: &'a [RosterEntry],
    ranks: &'a [StudentRanks],
    scores: &'a ScoreTable,
    stats: &'a GroupStats,
    history: Option<&'a HistoryMap>,
    bin_width: u32,
}

/// Turns one scope snapshot into the full cohort report.
///
/// Structural problems with the input are errors; an empty scope is not,
/// it yields a report whose `error` field explains why it is empty.
pub fn assemble_report(
    input: &ScopeInput,
    history: Option<&HistoryMap>,
    config: &AnalysisConfig,
) -> Result<CohortReport, AnalysisError> {
    validate(input)?;

    let subjects = input.subjects();
    let total_full_mark = input.total_full_mark();
    let roster = build_roster(input, &subjects, config.missing_scores)?;

    if roster.is_empty() {
        warn!(group = %input.group_name, "{NO_DATA_MESSAGE}");
        return Ok(empty_report(input));
    }

    info!(
        group = %input.group_name,
        classes = input.tables.len(),
        students = roster.len(),
        subjects = subjects.len(),
        "assembling cohort report"
    );

    let ranks = rank_population(&roster, &subjects);
    debug!("rankings computed");

    let everyone: Vec<usize> = (0..roster.len()).collect();
    let cohort_scores = ScoreTable::collect(&roster, &everyone, &subjects);
    let group_stats = cohort_stats(
        input,
        &subjects,
        total_full_mark,
        &cohort_scores,
        config.bin_width,
    );
    debug!("cohort statistics computed");

    let cohort = Cohort {
        input,
        subjects: &subjects,
        total_full_mark,
        roster: &roster,
        ranks: &ranks,
        scores: &cohort_scores,
        stats: &group_stats,
        history,
        bin_width: config.bin_width,
    };

    let mut tables = Vec::with_capacity(input.tables.len());
    for (class_index, class) in input.tables.iter().enumerate() {
        let members: Vec<usize> = roster
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.class_index == class_index)
            .map(|(i, _)| i)
            .collect();
        if members.is_empty() {
            debug!(class = %class.table_name, "skipping class without students");
            continue;
        }
        tables.push(class_report(&cohort, &class.table_name, &members));
    }

    Ok(CohortReport {
        group_name: input.group_name.clone(),
        full_marks: input.full_marks.clone(),
        group_stats,
        tables,
        error: None,
    })
}

fn validate(input: &ScopeInput) -> Result<(), AnalysisError> {
    if input.subjects().is_empty() {
        return Err(AnalysisError::EmptyFullMarks);
    }

    let mut class_names = HashSet::new();
    let mut student_ids = HashSet::new();
    for class in &input.tables {
        if !class_names.insert(class.table_name.as_str()) {
            return Err(AnalysisError::DuplicateClass(class.table_name.clone()));
        }
        for student in &class.students {
            if !student_ids.insert(student.student_id.as_str()) {
                return Err(AnalysisError::DuplicateStudent(student.student_id.clone()));
            }
            if let Some(subject) = student
                .scores
                .keys()
                .find(|subject| !input.full_marks.contains_key(subject.as_str()))
            {
                return Err(AnalysisError::UnknownSubject {
                    student: student.student_id.clone(),
                    subject: subject.clone(),
                });
            }
        }
    }
    Ok(())
}

fn build_roster(
    input: &ScopeInput,
    subjects: &[String],
    policy: MissingScorePolicy,
) -> Result<Vec<RosterEntry>, AnalysisError> {
    let mut roster = Vec::with_capacity(input.student_count());
    for (class_index, class) in input.tables.iter().enumerate() {
        for student in &class.students {
            let mut scores = IndexMap::with_capacity(subjects.len());
            for subject in subjects {
                let raw = student.scores.get(subject).copied().flatten();
                let value = match (raw, policy) {
                    (Some(value), _) => value,
                    (None, MissingScorePolicy::Zero) => 0.0,
                    (None, MissingScorePolicy::Reject) => {
                        return Err(AnalysisError::MissingScore {
                            student: student.student_id.clone(),
                            subject: subject.clone(),
                        })
                    }
                };
                scores.insert(subject.clone(), value);
            }
            let total_score = scores.values().sum();
            roster.push(RosterEntry {
                student_id: student.student_id.clone(),
                student_name: student.student_name.clone(),
                class_name: class.table_name.clone(),
                class_index,
                scores,
                total_score,
            });
        }
    }
    Ok(roster)
}

fn empty_report(input: &ScopeInput) -> CohortReport {
    CohortReport {
        group_name: input.group_name.clone(),
        full_marks: input.full_marks.clone(),
        group_stats: GroupStats::default(),
        tables: Vec::new(),
        error: Some(NO_DATA_MESSAGE.to_string()),
    }
}

fn subject_row(scores: &[f64], full_mark: f64, bin_width: u32) -> SubjectStats {
    let descriptive = descriptive_stats(scores, full_mark, bin_width);
    let structure = group_structural_indices(scores, &descriptive);
    SubjectStats {
        discrimination_index: discrimination_index(scores, full_mark),
        structure,
        descriptive,
        ..SubjectStats::default()
    }
}

fn cohort_stats(
    input: &ScopeInput,
    subjects: &[String],
    total_full_mark: f64,
    scores: &ScoreTable,
    bin_width: u32,
) -> GroupStats {
    let mut rows = IndexMap::with_capacity(subjects.len());
    for subject in subjects {
        let full_mark = input.full_marks.get(subject).copied().unwrap_or(0.0);
        rows.insert(
            subject.clone(),
            subject_row(scores.column(subject), full_mark, bin_width),
        );
    }

    GroupStats {
        subjects: rows,
        total_score: Some(subject_row(&scores.totals, total_full_mark, bin_width)),
        correlation_matrix: correlation_matrix(subjects, scores),
    }
}

fn correlation_matrix(
    subjects: &[String],
    scores: &ScoreTable,
) -> IndexMap<String, IndexMap<String, f64>> {
    subjects
        .iter()
        .map(|row| {
            let cells = subjects
                .iter()
                .map(|col| {
                    let value = if row == col {
                        1.0
                    } else {
                        pearson_correlation(scores.column(row), scores.column(col))
                    };
                    (col.clone(), value)
                })
                .collect();
            (row.clone(), cells)
        })
        .collect()
}

fn class_report(cohort: &Cohort<'_>, table_name: &str, members: &[usize]) -> ClassReport {
    let table = ScoreTable::collect(cohort.roster, members, cohort.subjects);

    let mut rows = IndexMap::with_capacity(cohort.subjects.len());
    for subject in cohort.subjects {
        let full_mark = cohort.input.full_marks.get(subject).copied().unwrap_or(0.0);
        rows.insert(
            subject.clone(),
            subject_row(table.column(subject), full_mark, cohort.bin_width),
        );
    }
    class_vs_cohort_indices(&mut rows, &cohort.stats.subjects, &cohort.scores.by_subject);
    let total_score = subject_row(&table.totals, cohort.total_full_mark, cohort.bin_width);

    let mut students = Vec::with_capacity(members.len());
    let mut pooled_t_scores = Vec::new();
    for &member in members {
        let entry = &cohort.roster[member];
        let history = cohort
            .history
            .and_then(|map| map.get(&entry.student_id))
            .map(Vec::as_slice);
        let diagnosis = diagnose_student(&StudentContext {
            entry,
            ranks: &cohort.ranks[member],
            subjects: cohort.subjects,
            full_marks: &cohort.input.full_marks,
            cohort: cohort.stats,
            class_scores: &table.by_subject,
            total_full_mark: cohort.total_full_mark,
            history,
        });
        pooled_t_scores.extend(diagnosis.subject_t_scores);
        students.push(diagnosis.report);
    }
    students.sort_by_key(|student| student.class_rank);

    debug!(class = %table_name, students = students.len(), "class report assembled");

    ClassReport {
        table_name: table_name.to_string(),
        table_stats: ClassStats {
            subjects: rows,
            total_score,
            t_score_gini_coefficient: round_to(gini_coefficient(&pooled_t_scores), 3),
        },
        students,
    }
}
