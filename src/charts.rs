use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::models::{BoxPlot, CohortReport, SubjectStats, TOTAL_SCORE};

pub const COHORT_LABEL: &str = "Cohort";

/// Chart-ready projection of an assembled report. Every value is copied
/// from the report; nothing is recomputed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChartData {
    pub grade_level_charts: GradeLevelCharts,
    pub class_comparison_charts: ClassComparisonCharts,
    pub student_level_charts: StudentLevelCharts,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GradeLevelCharts {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub score_distribution_histogram: IndexMap<String, SeriesChart<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_correlation_heatmap: Option<Heatmap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_difficulty_discrimination_scatter: Option<ScatterChart<DifficultyPoint>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassComparisonCharts {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub metrics_bar_chart: IndexMap<String, IndexMap<String, SeriesChart<f64>>>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub score_distribution_boxplot: IndexMap<String, BoxplotChart>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub class_profile_radar: IndexMap<String, RadarChart>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StudentLevelCharts {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub subject_vs_subject_scatter: IndexMap<String, ScatterChart<StudentPoint>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesChart<T> {
    pub categories: Vec<String>,
    pub series_data: Vec<T>,
    pub series_name: String,
}

/// Cells are `[column, row, correlation]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heatmap {
    pub x_axis_labels: Vec<String>,
    pub y_axis_labels: Vec<String>,
    pub data: Vec<(usize, usize, f64)>,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScatterChart<P> {
    pub data: Vec<P>,
    pub x_axis_name: String,
    pub y_axis_name: String,
    pub title: String,
}

/// `[difficulty, discrimination, subject]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifficultyPoint(pub f64, pub f64, pub String);

/// `[x score, y score, student name, class name]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentPoint(pub f64, pub f64, pub String, pub String);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxplotChart {
    pub categories: Vec<String>,
    /// One `[min, q1, median, q3, max]` row per category.
    pub data: Vec<[f64; 5]>,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadarChart {
    pub indicator: Vec<RadarIndicator>,
    pub series: Vec<RadarSeries>,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadarIndicator {
    pub name: String,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadarSeries {
    pub name: String,
    pub value: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarMetric {
    Mean,
    PassRate,
    ExcellentRate,
    HighAchieverPenetration,
    AcademicCoreDensity,
}

impl BarMetric {
    pub const ALL: [BarMetric; 5] = [
        BarMetric::Mean,
        BarMetric::PassRate,
        BarMetric::ExcellentRate,
        BarMetric::HighAchieverPenetration,
        BarMetric::AcademicCoreDensity,
    ];

    pub fn key(self) -> &'static str {
        match self {
            BarMetric::Mean => "mean",
            BarMetric::PassRate => "passRate",
            BarMetric::ExcellentRate => "excellentRate",
            BarMetric::HighAchieverPenetration => "highAchieverPenetration",
            BarMetric::AcademicCoreDensity => "academicCoreDensity",
        }
    }

    fn read(self, row: &SubjectStats) -> f64 {
        match self {
            BarMetric::Mean => row.descriptive.mean,
            BarMetric::PassRate => row.descriptive.pass_rate,
            BarMetric::ExcellentRate => row.descriptive.excellent_rate,
            BarMetric::HighAchieverPenetration => row.structure.high_achiever_penetration,
            BarMetric::AcademicCoreDensity => row.structure.academic_core_density,
        }
    }
}

fn box_row(plot: &BoxPlot) -> [f64; 5] {
    [plot.min, plot.q1, plot.median, plot.q3, plot.max]
}

pub fn project_charts(report: &CohortReport) -> ChartData {
    let mut charts = ChartData::default();
    if report.group_stats.is_empty() || report.tables.is_empty() {
        return charts;
    }

    let subjects: Vec<String> = report
        .group_stats
        .correlation_matrix
        .keys()
        .cloned()
        .collect();
    let with_total: Vec<String> = subjects
        .iter()
        .cloned()
        .chain(std::iter::once(TOTAL_SCORE.to_string()))
        .collect();

    charts.grade_level_charts = grade_level(report, &subjects, &with_total);
    charts.class_comparison_charts = class_comparison(report, &subjects, &with_total);
    charts.student_level_charts = student_level(report, &subjects);
    charts
}

fn grade_level(
    report: &CohortReport,
    subjects: &[String],
    with_total: &[String],
) -> GradeLevelCharts {
    let cohort = &report.group_stats;
    let mut charts = GradeLevelCharts::default();

    for subject in with_total {
        if let Some(row) = cohort.get(subject) {
            let distribution = &row.descriptive.frequency_distribution;
            charts.score_distribution_histogram.insert(
                subject.clone(),
                SeriesChart {
                    categories: distribution.keys().cloned().collect(),
                    series_data: distribution.values().copied().collect(),
                    series_name: format!("{COHORT_LABEL} {subject} distribution"),
                },
            );
        }
    }

    let matrix = &cohort.correlation_matrix;
    let mut cells = Vec::with_capacity(subjects.len() * subjects.len());
    for (i, row_subject) in subjects.iter().enumerate() {
        for (j, col_subject) in subjects.iter().enumerate() {
            if let Some(value) = matrix.get(row_subject).and_then(|row| row.get(col_subject)) {
                cells.push((j, i, *value));
            }
        }
    }
    charts.subject_correlation_heatmap = Some(Heatmap {
        x_axis_labels: subjects.to_vec(),
        y_axis_labels: subjects.to_vec(),
        data: cells,
        title: "Subject score correlation".to_string(),
    });

    let points = subjects
        .iter()
        .filter_map(|subject| {
            cohort.subjects.get(subject).map(|row| {
                DifficultyPoint(
                    row.descriptive.difficulty,
                    row.discrimination_index,
                    subject.clone(),
                )
            })
        })
        .collect();
    charts.subject_difficulty_discrimination_scatter = Some(ScatterChart {
        data: points,
        x_axis_name: "difficulty".to_string(),
        y_axis_name: "discrimination".to_string(),
        title: "Subject difficulty vs discrimination".to_string(),
    });

    charts
}

fn class_comparison(
    report: &CohortReport,
    subjects: &[String],
    with_total: &[String],
) -> ClassComparisonCharts {
    let cohort = &report.group_stats;
    let mut charts = ClassComparisonCharts::default();
    let categories: Vec<String> = report
        .tables
        .iter()
        .map(|table| table.table_name.clone())
        .chain(std::iter::once(COHORT_LABEL.to_string()))
        .collect();

    for metric in BarMetric::ALL {
        let mut per_subject = IndexMap::new();
        for subject in with_total {
            let Some(cohort_row) = cohort.get(subject) else {
                continue;
            };
            let class_values: Option<Vec<f64>> = report
                .tables
                .iter()
                .map(|table| table.table_stats.get(subject).map(|row| metric.read(row)))
                .collect();
            let Some(mut series_data) = class_values else {
                continue;
            };
            series_data.push(metric.read(cohort_row));
            per_subject.insert(
                subject.clone(),
                SeriesChart {
                    categories: categories.clone(),
                    series_data,
                    series_name: format!("{subject} - {}", metric.key()),
                },
            );
        }
        charts
            .metrics_bar_chart
            .insert(metric.key().to_string(), per_subject);
    }

    for subject in with_total {
        let Some(cohort_row) = cohort.get(subject) else {
            continue;
        };
        let class_rows: Option<Vec<[f64; 5]>> = report
            .tables
            .iter()
            .map(|table| {
                table
                    .table_stats
                    .get(subject)
                    .map(|row| box_row(&row.descriptive.box_plot_data))
            })
            .collect();
        let Some(mut data) = class_rows else {
            continue;
        };
        data.push(box_row(&cohort_row.descriptive.box_plot_data));
        charts.score_distribution_boxplot.insert(
            subject.clone(),
            BoxplotChart {
                categories: categories.clone(),
                data,
                title: format!("{subject} score distribution"),
            },
        );
    }

    let radar_subjects: Vec<&String> = subjects
        .iter()
        .filter(|subject| {
            report.full_marks.contains_key(subject.as_str())
                && cohort.subjects.contains_key(subject.as_str())
        })
        .collect();
    let indicator: Vec<RadarIndicator> = radar_subjects
        .iter()
        .filter_map(|subject| {
            report.full_marks.get(subject.as_str()).map(|max| RadarIndicator {
                name: subject.to_string(),
                max: *max,
            })
        })
        .collect();
    let cohort_series = RadarSeries {
        name: COHORT_LABEL.to_string(),
        value: radar_subjects
            .iter()
            .filter_map(|subject| cohort.subjects.get(subject.as_str()))
            .map(|row| row.descriptive.mean)
            .collect(),
    };
    for table in &report.tables {
        let class_means: Option<Vec<f64>> = radar_subjects
            .iter()
            .map(|subject| {
                table
                    .table_stats
                    .subjects
                    .get(subject.as_str())
                    .map(|row| row.descriptive.mean)
            })
            .collect();
        let Some(value) = class_means else {
            continue;
        };
        charts.class_profile_radar.insert(
            table.table_name.clone(),
            RadarChart {
                indicator: indicator.clone(),
                series: vec![
                    RadarSeries {
                        name: table.table_name.clone(),
                        value,
                    },
                    cohort_series.clone(),
                ],
                title: format!("{} subject profile", table.table_name),
            },
        );
    }

    charts
}

fn student_level(report: &CohortReport, subjects: &[String]) -> StudentLevelCharts {
    let mut charts = StudentLevelCharts::default();
    for (i, x_subject) in subjects.iter().enumerate() {
        for y_subject in &subjects[i + 1..] {
            let data = report
                .students()
                .filter_map(|student| {
                    let raw = &student.scores.raw_scores;
                    Some(StudentPoint(
                        *raw.get(x_subject)?,
                        *raw.get(y_subject)?,
                        student.student_name.clone(),
                        student.table_name.clone(),
                    ))
                })
                .collect();
            charts.subject_vs_subject_scatter.insert(
                format!("{x_subject}_vs_{y_subject}"),
                ScatterChart {
                    data,
                    x_axis_name: x_subject.clone(),
                    y_axis_name: y_subject.clone(),
                    title: format!("{x_subject} vs {y_subject}"),
                },
            );
        }
    }
    charts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::assemble_report;
    use crate::config::AnalysisConfig;
    use crate::models::{ClassInput, ScopeInput, StudentInput};

    fn student(id: &str, math: f64, art: f64, music: f64) -> StudentInput {
        StudentInput {
            student_id: id.to_string(),
            student_name: format!("Student {id}"),
            scores: [("Math", math), ("Art", art), ("Music", music)]
                .into_iter()
                .map(|(subject, score)| (subject.to_string(), Some(score)))
                .collect(),
        }
    }

    fn report() -> CohortReport {
        let input = ScopeInput {
            group_name: "Final".to_string(),
            full_marks: [("Math", 150.0), ("Art", 100.0), ("Music", 100.0)]
                .into_iter()
                .map(|(subject, mark)| (subject.to_string(), mark))
                .collect(),
            tables: vec![
                ClassInput {
                    table_name: "A".to_string(),
                    students: vec![
                        student("a1", 120.0, 80.0, 70.0),
                        student("a2", 90.0, 60.0, 75.0),
                    ],
                },
                ClassInput {
                    table_name: "B".to_string(),
                    students: vec![
                        student("b1", 100.0, 90.0, 65.0),
                        student("b2", 140.0, 70.0, 85.0),
                        student("b3", 60.0, 50.0, 55.0),
                    ],
                },
            ],
        };
        assemble_report(&input, None, &AnalysisConfig::default()).unwrap()
    }

    #[test]
    fn empty_report_projects_empty_blocks() {
        let mut empty = report();
        empty.tables.clear();
        let charts = project_charts(&empty);
        assert_eq!(charts, ChartData::default());
        let json = serde_json::to_value(&charts).unwrap();
        assert_eq!(json["grade_level_charts"], serde_json::json!({}));
        assert_eq!(json["student_level_charts"], serde_json::json!({}));
    }

    #[test]
    fn grade_level_blocks_copy_cohort_values() {
        let report = report();
        let charts = project_charts(&report).grade_level_charts;

        let histogram = &charts.score_distribution_histogram;
        assert_eq!(histogram.len(), 4);
        let math = &histogram["Math"];
        let cohort_math = &report.group_stats.subjects["Math"].descriptive;
        assert_eq!(math.categories.len(), cohort_math.frequency_distribution.len());
        assert_eq!(math.series_data.iter().sum::<usize>(), 5);
        assert!(histogram.contains_key(TOTAL_SCORE));

        let heatmap = charts.subject_correlation_heatmap.unwrap();
        assert_eq!(heatmap.data.len(), 9);
        assert_eq!(heatmap.data[0], (0, 0, 1.0));
        // second cell is column 1 (Art) of row 0 (Math)
        assert_eq!(
            heatmap.data[1],
            (1, 0, report.group_stats.correlation_matrix["Math"]["Art"])
        );

        let scatter = charts.subject_difficulty_discrimination_scatter.unwrap();
        assert_eq!(scatter.data.len(), 3);
        assert_eq!(scatter.data[0].0, cohort_math.difficulty);
        assert_eq!(scatter.data[0].2, "Math");
    }

    #[test]
    fn class_blocks_append_cohort_value() {
        let report = report();
        let charts = project_charts(&report).class_comparison_charts;

        assert_eq!(charts.metrics_bar_chart.len(), 5);
        let mean_math = &charts.metrics_bar_chart["mean"]["Math"];
        assert_eq!(mean_math.categories, vec!["A", "B", COHORT_LABEL]);
        assert_eq!(
            mean_math.series_data,
            vec![
                report.tables[0].table_stats.subjects["Math"].descriptive.mean,
                report.tables[1].table_stats.subjects["Math"].descriptive.mean,
                report.group_stats.subjects["Math"].descriptive.mean,
            ]
        );
        assert!(charts.metrics_bar_chart["passRate"].contains_key(TOTAL_SCORE));

        let boxplot = &charts.score_distribution_boxplot["Art"];
        assert_eq!(boxplot.data.len(), 3);
        let cohort_box = report.group_stats.subjects["Art"].descriptive.box_plot_data;
        assert_eq!(boxplot.data[2], box_row(&cohort_box));

        let radar = &charts.class_profile_radar["B"];
        assert_eq!(radar.indicator[0], RadarIndicator { name: "Math".to_string(), max: 150.0 });
        assert_eq!(radar.series.len(), 2);
        assert_eq!(radar.series[1].name, COHORT_LABEL);
        assert_eq!(radar.series[0].value.len(), 3);
    }

    #[test]
    fn student_scatter_covers_every_pair() {
        let report = report();
        let charts = project_charts(&report).student_level_charts;
        let keys: Vec<&str> = charts
            .subject_vs_subject_scatter
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(keys, vec!["Math_vs_Art", "Math_vs_Music", "Art_vs_Music"]);

        let pair = &charts.subject_vs_subject_scatter["Math_vs_Art"];
        assert_eq!(pair.data.len(), 5);
        let point = pair
            .data
            .iter()
            .find(|p| p.2 == "Student b2")
            .expect("b2 plotted");
        assert_eq!((point.0, point.1, point.3.as_str()), (140.0, 70.0, "B"));
    }

    #[test]
    fn serialized_shape_uses_array_points() {
        let json = serde_json::to_value(project_charts(&report())).unwrap();
        let cell = &json["grade_level_charts"]["subject_correlation_heatmap"]["data"][0];
        assert!(cell.is_array());
        assert_eq!(cell.as_array().unwrap().len(), 3);
        let point = &json["student_level_charts"]["subject_vs_subject_scatter"]["Math_vs_Art"]
            ["data"][0];
        assert_eq!(point.as_array().unwrap().len(), 4);
        assert!(json["class_comparison_charts"]["class_profile_radar"]["A"]["indicator"].is_array());
    }
}
