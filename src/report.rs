use std::fmt::Write;

use crate::models::{CohortReport, StudentReport, SubjectStats, TOTAL_SCORE};

const LIST_LIMIT: usize = 10;

fn percent(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

fn subject_line(output: &mut String, label: &str, row: &SubjectStats) {
    let d = &row.descriptive;
    let _ = writeln!(
        output,
        "- {}: mean {:.2}, std {:.2}, pass {}, excellent {}, difficulty {:.3}, discrimination {:.3}",
        label,
        d.mean,
        d.std_dev,
        percent(d.pass_rate),
        percent(d.excellent_rate),
        d.difficulty,
        row.discrimination_index
    );
}

fn student_line(output: &mut String, student: &StudentReport) {
    let _ = writeln!(
        output,
        "- #{} {} ({}) total {:.2}, {}",
        student.grade_rank,
        student.student_name,
        student.table_name,
        student.total_score,
        student.profile.label()
    );
}

/// Markdown digest of one cohort report.
pub fn build_report(report: &CohortReport) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Exam Analytics Report");
    let _ = writeln!(output, "Generated for {}", report.group_name);
    let _ = writeln!(output);

    if let Some(error) = &report.error {
        let _ = writeln!(output, "No analysis available: {error}.");
        return output;
    }

    let student_count = report.students().count();
    let _ = writeln!(output, "## Cohort Overview");
    let _ = writeln!(
        output,
        "{} students across {} classes.",
        student_count,
        report.tables.len()
    );
    for subject in report.subjects() {
        if let Some(row) = report.group_stats.get(&subject) {
            subject_line(&mut output, &subject, row);
        }
    }
    if let Some(row) = report.group_stats.get(TOTAL_SCORE) {
        subject_line(&mut output, "Total", row);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Class Comparison");
    for table in &report.tables {
        let total = &table.table_stats.total_score.descriptive;
        let _ = writeln!(
            output,
            "- {}: {} students, mean total {:.2}, pass {}, T-score Gini {:.3}",
            table.table_name,
            table.students.len(),
            total.mean,
            percent(total.pass_rate),
            table.table_stats.t_score_gini_coefficient
        );
    }

    let mut ranked: Vec<&StudentReport> = report.students().collect();
    ranked.sort_by_key(|student| student.grade_rank);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Top Students");
    for student in ranked.iter().take(LIST_LIMIT) {
        student_line(&mut output, student);
    }

    let watch: Vec<&&StudentReport> = ranked
        .iter()
        .rev()
        .filter(|student| student.profile.needs_attention())
        .take(LIST_LIMIT)
        .collect();

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students To Watch");
    if watch.is_empty() {
        let _ = writeln!(output, "No students flagged in this exam.");
    } else {
        for student in watch {
            student_line(&mut output, student);
            if let Some(weak) = student.metrics.weakness_subjects.first() {
                let _ = writeln!(
                    output,
                    "  weakest subject {} (T {:.2})",
                    weak.subject, weak.t_score
                );
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::assemble_report;
    use crate::config::AnalysisConfig;
    use crate::models::{ClassInput, ScopeInput, StudentInput};

    fn scope(scores: &[(&str, &str, f64, f64)]) -> ScopeInput {
        let mut tables: Vec<ClassInput> = Vec::new();
        for (class, id, math, art) in scores {
            let student = StudentInput {
                student_id: id.to_string(),
                student_name: format!("Student {id}"),
                scores: [("Math", *math), ("Art", *art)]
                    .into_iter()
                    .map(|(subject, score)| (subject.to_string(), Some(score)))
                    .collect(),
            };
            match tables.iter_mut().find(|t| t.table_name == *class) {
                Some(table) => table.students.push(student),
                None => tables.push(ClassInput {
                    table_name: class.to_string(),
                    students: vec![student],
                }),
            }
        }
        ScopeInput {
            group_name: "Spring Midterm".to_string(),
            full_marks: [("Math".to_string(), 100.0), ("Art".to_string(), 100.0)]
                .into_iter()
                .collect(),
            tables,
        }
    }

    #[test]
    fn report_includes_sections() {
        let input = scope(&[
            ("A", "a1", 95.0, 90.0),
            ("A", "a2", 70.0, 75.0),
            ("B", "b1", 60.0, 65.0),
            ("B", "b2", 20.0, 25.0),
        ]);
        let report = assemble_report(&input, None, &AnalysisConfig::default()).unwrap();
        let markdown = build_report(&report);

        assert!(markdown.contains("# Exam Analytics Report"));
        assert!(markdown.contains("Generated for Spring Midterm"));
        assert!(markdown.contains("4 students across 2 classes."));
        assert!(markdown.contains("- Math: mean 61.25"));
        assert!(markdown.contains("- Total:"));
        assert!(markdown.contains("## Class Comparison"));
        assert!(markdown.contains("- #1 Student a1 (A)"));
        assert!(markdown.contains("## Students To Watch"));
        assert!(markdown.contains("Student b2 (B) total 45.00, foundation-weak"));
    }

    #[test]
    fn empty_scope_renders_error() {
        let input = scope(&[]);
        let report = assemble_report(&input, None, &AnalysisConfig::default()).unwrap();
        let markdown = build_report(&report);
        assert!(markdown.contains("No analysis available"));
        assert!(!markdown.contains("## Top Students"));
    }

    #[test]
    fn quiet_cohort_has_no_flags() {
        let input = scope(&[("A", "a1", 70.0, 70.0), ("A", "a2", 70.0, 70.0)]);
        let report = assemble_report(&input, None, &AnalysisConfig::default()).unwrap();
        let markdown = build_report(&report);
        assert!(markdown.contains("No students flagged in this exam."));
    }
}
