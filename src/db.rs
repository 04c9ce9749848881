use std::collections::{HashMap, HashSet};

use anyhow::Context;
use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::Deserialize;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{
    ClassInput, CohortReport, HistoricalExam, HistoryMap, ScopeInput, StudentInput, TOTAL_SCORE,
};

/// Which part of an exam to analyse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    FullExam,
    Grades(Vec<String>),
    Classes(Vec<String>),
}

impl Scope {
    pub fn describe(&self) -> String {
        match self {
            Scope::FullExam => "full exam".to_string(),
            Scope::Grades(names) => format!("grades: {}", names.join(", ")),
            Scope::Classes(names) => format!("classes: {}", names.join(", ")),
        }
    }
}

/// One line of an import file: one student's score on one exam subject.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScoreCsvRow {
    pub exam_name: String,
    pub exam_date: NaiveDate,
    pub grade: String,
    pub class_name: String,
    pub student_no: String,
    pub full_name: String,
    pub subject: String,
    pub full_mark: f64,
    pub score: Option<f64>,
}

/// A score row as read back for one exam scope.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeRow {
    pub class_id: Uuid,
    pub grade_name: String,
    pub class_name: String,
    pub student_no: String,
    pub full_name: String,
    pub subject: String,
    pub score: Option<f64>,
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let rows = seed_rows()?;
    let stored = store_rows(pool, &rows).await?;
    info!(rows = stored, "seed data stored");
    Ok(())
}

/// Two exams for one grade of six students across two classes.
pub fn seed_rows() -> anyhow::Result<Vec<ScoreCsvRow>> {
    let exams = [
        (
            "Autumn Midterm",
            NaiveDate::from_ymd_opt(2025, 11, 5).context("invalid date")?,
        ),
        (
            "Winter Final",
            NaiveDate::from_ymd_opt(2026, 1, 15).context("invalid date")?,
        ),
    ];
    let subjects: [(&str, f64); 3] = [
        ("Mathematics", 150.0),
        ("English", 150.0),
        ("Physics", 100.0),
    ];
    let students: [(&str, &str, &str, [f64; 3]); 6] = [
        ("10-1", "S1001", "Avery Lee", [128.0, 121.0, 88.0]),
        ("10-1", "S1002", "Jules Moreno", [96.0, 112.0, 61.0]),
        ("10-1", "S1003", "Kiara Patel", [141.0, 99.0, 93.0]),
        ("10-2", "S2001", "Noah Brooks", [72.0, 85.0, 47.0]),
        ("10-2", "S2002", "Mina Okafor", [115.0, 131.0, 76.0]),
        ("10-2", "S2003", "Theo Lindqvist", [58.0, 64.0, 35.0]),
    ];

    let mut rows = Vec::with_capacity(exams.len() * students.len() * subjects.len());
    for (exam_index, (exam_name, exam_date)) in exams.iter().enumerate() {
        for (class_name, student_no, full_name, scores) in &students {
            for (&(subject, full_mark), &base) in subjects.iter().zip(scores) {
                // second exam drifts by a few points per subject
                let shift: f64 = if exam_index == 0 { 0.0 } else { (base % 7.0) - 3.0 };
                rows.push(ScoreCsvRow {
                    exam_name: exam_name.to_string(),
                    exam_date: *exam_date,
                    grade: "Grade 10".to_string(),
                    class_name: class_name.to_string(),
                    student_no: student_no.to_string(),
                    full_name: full_name.to_string(),
                    subject: subject.to_string(),
                    full_mark,
                    score: Some((base + shift).clamp(0.0, full_mark)),
                });
            }
        }
    }
    Ok(rows)
}

pub fn read_csv_rows<R: std::io::Read>(reader: R) -> anyhow::Result<Vec<ScoreCsvRow>> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut rows = Vec::new();
    for (line, result) in reader.deserialize::<ScoreCsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid score row {}", line + 1))?;
        rows.push(row);
    }
    Ok(rows)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let rows = read_csv_rows(file)?;
    debug!(rows = rows.len(), "parsed import file");
    store_rows(pool, &rows).await
}

/// Upserts every entity the rows reference inside one transaction and
/// returns the number of score rows written.
async fn store_rows(pool: &PgPool, rows: &[ScoreCsvRow]) -> anyhow::Result<usize> {
    let mut tx = pool.begin().await?;
    let mut written = 0usize;

    for row in rows {
        let grade_id = upsert_named(&mut tx, "grades", &row.grade).await?;
        let class_id: Uuid = sqlx::query(
            r#"
            INSERT INTO exam_analytics.classes (id, grade_id, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (grade_id, name) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(grade_id)
        .bind(&row.class_name)
        .fetch_one(&mut *tx)
        .await?
        .get("id");

        let student_id: Uuid = sqlx::query(
            r#"
            INSERT INTO exam_analytics.students (id, class_id, student_no, full_name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (student_no) DO UPDATE
            SET class_id = EXCLUDED.class_id, full_name = EXCLUDED.full_name
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(class_id)
        .bind(&row.student_no)
        .bind(&row.full_name)
        .fetch_one(&mut *tx)
        .await?
        .get("id");

        let subject_id = upsert_named(&mut tx, "subjects", &row.subject).await?;
        let exam_id: Uuid = sqlx::query(
            r#"
            INSERT INTO exam_analytics.exams (id, name, exam_date)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO UPDATE SET exam_date = EXCLUDED.exam_date
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.exam_name)
        .bind(row.exam_date)
        .fetch_one(&mut *tx)
        .await?
        .get("id");

        sqlx::query(
            r#"
            INSERT INTO exam_analytics.exam_subjects (exam_id, subject_id, full_mark)
            VALUES ($1, $2, $3)
            ON CONFLICT (exam_id, subject_id) DO UPDATE SET full_mark = EXCLUDED.full_mark
            "#,
        )
        .bind(exam_id)
        .bind(subject_id)
        .bind(row.full_mark)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            r#"
            INSERT INTO exam_analytics.scores (id, student_id, exam_id, subject_id, score)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (student_id, exam_id, subject_id) DO UPDATE SET score = EXCLUDED.score
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(exam_id)
        .bind(subject_id)
        .bind(row.score)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() > 0 {
            written += 1;
        }
    }

    tx.commit().await?;
    Ok(written)
}

/// Upsert into one of the single-name lookup tables (`grades`, `subjects`).
async fn upsert_named(conn: &mut PgConnection, table: &str, name: &str) -> anyhow::Result<Uuid> {
    let query = format!(
        "INSERT INTO exam_analytics.{table} (id, name) VALUES ($1, $2) \
         ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name RETURNING id"
    );
    let id = sqlx::query(&query)
        .bind(Uuid::new_v4())
        .bind(name)
        .fetch_one(conn)
        .await?
        .get("id");
    Ok(id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamRecord {
    pub id: Uuid,
    pub name: String,
    pub exam_date: NaiveDate,
}

pub async fn find_exam(pool: &PgPool, exam_name: &str) -> anyhow::Result<ExamRecord> {
    let row = sqlx::query("SELECT id, name, exam_date FROM exam_analytics.exams WHERE name = $1")
        .bind(exam_name)
        .fetch_optional(pool)
        .await?
        .with_context(|| format!("exam {exam_name} not found"))?;
    Ok(ExamRecord {
        id: row.get("id"),
        name: row.get("name"),
        exam_date: row.get("exam_date"),
    })
}

pub async fn fetch_scope(
    pool: &PgPool,
    exam: &ExamRecord,
    scope: &Scope,
) -> anyhow::Result<ScopeInput> {
    let exam_id = exam.id;
    let exam_name = exam.name.as_str();

    let mark_rows = sqlx::query(
        "SELECT s.name, es.full_mark \
         FROM exam_analytics.exam_subjects es \
         JOIN exam_analytics.subjects s ON s.id = es.subject_id \
         WHERE es.exam_id = $1 \
         ORDER BY s.name",
    )
    .bind(exam_id)
    .fetch_all(pool)
    .await?;
    if mark_rows.is_empty() {
        anyhow::bail!("exam {exam_name} has no subjects");
    }
    let full_marks: IndexMap<String, f64> = mark_rows
        .iter()
        .map(|row| (row.get("name"), row.get("full_mark")))
        .collect();

    let mut query = String::from(
        "SELECT c.id AS class_id, g.name AS grade_name, c.name AS class_name, st.student_no, st.full_name, \
         s.name AS subject, sc.score \
         FROM exam_analytics.scores sc \
         JOIN exam_analytics.students st ON st.id = sc.student_id \
         JOIN exam_analytics.classes c ON c.id = st.class_id \
         JOIN exam_analytics.grades g ON g.id = c.grade_id \
         JOIN exam_analytics.subjects s ON s.id = sc.subject_id \
         WHERE sc.exam_id = $1",
    );

    match scope {
        Scope::FullExam => {}
        Scope::Grades(_) => query.push_str(" AND g.name = ANY($2)"),
        Scope::Classes(_) => query.push_str(" AND c.name = ANY($2)"),
    }
    query.push_str(" ORDER BY g.name, c.name, st.student_no, s.name");

    let mut rows = sqlx::query(&query).bind(exam_id);
    if let Scope::Grades(names) | Scope::Classes(names) = scope {
        rows = rows.bind(names);
    }

    let records = rows.fetch_all(pool).await?;
    debug!(rows = records.len(), scope = %scope.describe(), "loaded score rows");

    let scope_rows = records
        .into_iter()
        .map(|row| ScopeRow {
            class_id: row.get("class_id"),
            grade_name: row.get("grade_name"),
            class_name: row.get("class_name"),
            student_no: row.get("student_no"),
            full_name: row.get("full_name"),
            subject: row.get("subject"),
            score: row.get("score"),
        })
        .collect();

    Ok(scope_from_rows(exam_name, full_marks, scope_rows))
}

struct ClassRows {
    grade_name: String,
    class_name: String,
    students: IndexMap<String, StudentInput>,
}

/// Groups ordered score rows into classes and students. A null score stays
/// an absent observation. A class name shared by several grades is
/// qualified as `grade / class`.
pub fn scope_from_rows(
    group_name: &str,
    full_marks: IndexMap<String, f64>,
    rows: Vec<ScopeRow>,
) -> ScopeInput {
    let mut classes: IndexMap<Uuid, ClassRows> = IndexMap::new();
    for row in rows {
        let ClassRows { students, .. } =
            classes.entry(row.class_id).or_insert_with(|| ClassRows {
                grade_name: row.grade_name.clone(),
                class_name: row.class_name.clone(),
                students: IndexMap::new(),
            });
        let student = students
            .entry(row.student_no.clone())
            .or_insert_with(|| StudentInput {
                student_id: row.student_no.clone(),
                student_name: row.full_name.clone(),
                scores: IndexMap::new(),
            });
        student.scores.insert(row.subject, row.score);
    }

    let mut name_counts: HashMap<String, usize> = HashMap::new();
    for class in classes.values() {
        *name_counts.entry(class.class_name.clone()).or_default() += 1;
    }

    ScopeInput {
        group_name: group_name.to_string(),
        full_marks,
        tables: classes
            .into_values()
            .map(|class| {
                let table_name = if name_counts.get(&class.class_name).copied().unwrap_or(0) > 1 {
                    format!("{} / {}", class.grade_name, class.class_name)
                } else {
                    class.class_name
                };
                ClassInput {
                    table_name,
                    students: class.students.into_values().collect(),
                }
            })
            .collect(),
    }
}

/// Past results for `student_ids`, taken from the latest completed report of
/// every exam dated strictly before `before`. Ordered oldest first.
pub async fn fetch_history(
    pool: &PgPool,
    before: NaiveDate,
    student_ids: &[String],
) -> anyhow::Result<HistoryMap> {
    let records = sqlx::query(
        "SELECT DISTINCT ON (e.id) e.name, e.exam_date, r.report \
         FROM exam_analytics.report_runs r \
         JOIN exam_analytics.exams e ON e.id = r.exam_id \
         WHERE r.status = 'completed' AND r.report IS NOT NULL AND e.exam_date < $1 \
         ORDER BY e.id, r.created_at DESC",
    )
    .bind(before)
    .fetch_all(pool)
    .await?;

    let mut past: Vec<(String, NaiveDate, CohortReport)> = Vec::with_capacity(records.len());
    for row in records {
        let Json(report): Json<CohortReport> = row
            .try_get("report")
            .context("stored report does not match the current layout")?;
        past.push((row.get("name"), row.get("exam_date"), report));
    }
    past.sort_by_key(|(_, date, _)| *date);

    let wanted: HashSet<&str> = student_ids.iter().map(String::as_str).collect();
    let mut history = HistoryMap::new();
    for (name, date, report) in &past {
        extend_history(&mut history, name, Some(*date), report, &wanted);
    }
    info!(exams = past.len(), students = history.len(), "history loaded");
    Ok(history)
}

/// Appends one past exam's entries for the wanted students.
pub fn extend_history(
    history: &mut HistoryMap,
    exam_name: &str,
    exam_date: Option<NaiveDate>,
    report: &CohortReport,
    wanted: &HashSet<&str>,
) {
    for student in report.students() {
        if !wanted.contains(student.student_id.as_str()) {
            continue;
        }
        history
            .entry(student.student_id.clone())
            .or_default()
            .push(HistoricalExam {
                exam_name: exam_name.to_string(),
                exam_date,
                total_score: Some(student.total_score),
                class_rank: Some(student.class_rank),
                grade_rank: Some(student.grade_rank),
                grade_percentile_rank: Some(student.ranks.total_score.grade_percentile_rank),
                total_t_score: student.scores.t_scores.get(TOTAL_SCORE).copied(),
            });
    }
}

pub async fn create_run(
    pool: &PgPool,
    exam: &ExamRecord,
    scope: &Scope,
) -> anyhow::Result<Uuid> {
    let run_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO exam_analytics.report_runs (id, exam_id, scope, status)
        VALUES ($1, $2, $3, 'processing')
        "#,
    )
    .bind(run_id)
    .bind(exam.id)
    .bind(scope.describe())
    .execute(pool)
    .await?;

    debug!(%run_id, exam = %exam.name, "report run created");
    Ok(run_id)
}

pub async fn complete_run(
    pool: &PgPool,
    run_id: Uuid,
    report: &CohortReport,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE exam_analytics.report_runs
        SET status = 'completed', report = $2, error_message = NULL, updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(run_id)
    .bind(Json(report))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fail_run(pool: &PgPool, run_id: Uuid, message: &str) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE exam_analytics.report_runs
        SET status = 'failed', error_message = $2, updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(run_id)
    .bind(message)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch_latest_report(
    pool: &PgPool,
    exam_name: &str,
) -> anyhow::Result<Option<CohortReport>> {
    let row = sqlx::query(
        "SELECT r.report \
         FROM exam_analytics.report_runs r \
         JOIN exam_analytics.exams e ON e.id = r.exam_id \
         WHERE e.name = $1 AND r.status = 'completed' AND r.report IS NOT NULL \
         ORDER BY r.created_at DESC \
         LIMIT 1",
    )
    .bind(exam_name)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let Json(report): Json<CohortReport> = row
                .try_get("report")
                .with_context(|| format!("stored report for {exam_name} is unreadable"))?;
            Ok(Some(report))
        }
        None => Ok(None),
    }
}

/// Latest completed report of each named exam, in the given order.
pub async fn fetch_reports(
    pool: &PgPool,
    exam_names: &[String],
) -> anyhow::Result<Vec<(String, CohortReport)>> {
    let mut reports = Vec::with_capacity(exam_names.len());
    for name in exam_names {
        let report = fetch_latest_report(pool, name)
            .await?
            .with_context(|| format!("no completed report for exam {name}; run analyze first"))?;
        reports.push((name.clone(), report));
    }
    Ok(reports)
}
