use std::collections::HashMap;

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Pseudo-subject key for the summed score.
pub const TOTAL_SCORE: &str = "totalScore";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeInput {
    pub group_name: String,
    pub full_marks: IndexMap<String, f64>,
    #[serde(default)]
    pub tables: Vec<ClassInput>,
}

impl ScopeInput {
    /// Real subjects in full-marks order, without the total pseudo-subject.
    pub fn subjects(&self) -> Vec<String> {
        self.full_marks
            .keys()
            .filter(|name| name.as_str() != TOTAL_SCORE)
            .cloned()
            .collect()
    }

    pub fn total_full_mark(&self) -> f64 {
        self.full_marks
            .iter()
            .filter(|(name, _)| name.as_str() != TOTAL_SCORE)
            .map(|(_, mark)| *mark)
            .sum()
    }

    pub fn student_count(&self) -> usize {
        self.tables.iter().map(|table| table.students.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInput {
    pub table_name: String,
    #[serde(default)]
    pub students: Vec<StudentInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInput {
    pub student_id: String,
    pub student_name: String,
    /// `None` (or a missing key) is an absent observation.
    #[serde(default)]
    pub scores: IndexMap<String, Option<f64>>,
}

/// One past exam for one student, as read back from an earlier report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalExam {
    pub exam_name: String,
    #[serde(default)]
    pub exam_date: Option<NaiveDate>,
    #[serde(default)]
    pub total_score: Option<f64>,
    #[serde(default)]
    pub class_rank: Option<usize>,
    #[serde(default)]
    pub grade_rank: Option<usize>,
    #[serde(default)]
    pub grade_percentile_rank: Option<f64>,
    #[serde(default)]
    pub total_t_score: Option<f64>,
}

/// Student id -> past exams, oldest first.
pub type HistoryMap = HashMap<String, Vec<HistoricalExam>>;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoxPlot {
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptiveStats {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub variance: f64,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
    pub range: f64,
    pub excellent_rate: f64,
    pub good_rate: f64,
    pub pass_rate: f64,
    pub low_score_rate: f64,
    pub difficulty: f64,
    pub skewness: f64,
    pub kurtosis: f64,
    pub full_mark_count: usize,
    pub zero_mark_count: usize,
    pub box_plot_data: BoxPlot,
    pub frequency_distribution: IndexMap<String, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStructure {
    pub high_achiever_penetration: f64,
    pub struggler_support_index: f64,
    pub academic_core_density: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QuartileCompetitiveness {
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
}

/// Statistics for one subject (or the total) over one population.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStats {
    #[serde(flatten)]
    pub descriptive: DescriptiveStats,
    pub discrimination_index: f64,
    #[serde(flatten)]
    pub structure: GroupStructure,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homogeneity_index: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quartile_competitiveness: Option<QuartileCompetitiveness>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats {
    #[serde(flatten)]
    pub subjects: IndexMap<String, SubjectStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_score: Option<SubjectStats>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub correlation_matrix: IndexMap<String, IndexMap<String, f64>>,
}

impl GroupStats {
    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty() && self.total_score.is_none()
    }

    /// Looks up a subject, treating `totalScore` as the total row.
    pub fn get(&self, subject: &str) -> Option<&SubjectStats> {
        if subject == TOTAL_SCORE {
            self.total_score.as_ref()
        } else {
            self.subjects.get(subject)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStats {
    #[serde(flatten)]
    pub subjects: IndexMap<String, SubjectStats>,
    pub total_score: SubjectStats,
    pub t_score_gini_coefficient: f64,
}

impl ClassStats {
    pub fn get(&self, subject: &str) -> Option<&SubjectStats> {
        if subject == TOTAL_SCORE {
            Some(&self.total_score)
        } else {
            self.subjects.get(subject)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankEntry {
    pub grade_rank: usize,
    pub grade_percentile_rank: f64,
    pub class_rank: usize,
    pub class_percentile_rank: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRanks {
    pub total_score: RankEntry,
    pub subjects: IndexMap<String, RankEntry>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSheet {
    pub raw_scores: IndexMap<String, f64>,
    pub z_scores: IndexMap<String, f64>,
    pub t_scores: IndexMap<String, f64>,
    pub score_rates: IndexMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectTScore {
    pub subject: String,
    pub t_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryTrend {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_rank: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade_rank: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStability {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade_percentile_rank_volatility: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_t_score_volatility: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMetrics {
    pub trend: HistoryTrend,
    pub stability: HistoryStability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade_percentile_rank_slope: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentMetrics {
    pub imbalance_index: f64,
    pub strength_subjects: Vec<SubjectTScore>,
    pub weakness_subjects: Vec<SubjectTScore>,
    pub contribution_score: IndexMap<String, f64>,
    pub specialization_index: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points_to_pass: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points_to_excellent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<HistoryMetrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Profile {
    EliteSpecialized,
    EliteBalanced,
    SteadyDeveloper,
    CoreMainstay,
    WeaknessConstrained,
    FoundationWeak,
    PotentialImprover,
}

impl Profile {
    pub fn label(self) -> &'static str {
        match self {
            Profile::EliteSpecialized => "elite-specialized",
            Profile::EliteBalanced => "elite-balanced",
            Profile::SteadyDeveloper => "steady-developer",
            Profile::CoreMainstay => "core-mainstay",
            Profile::WeaknessConstrained => "weakness-constrained",
            Profile::FoundationWeak => "foundation-weak",
            Profile::PotentialImprover => "potential-improver",
        }
    }

    pub fn needs_attention(self) -> bool {
        matches!(self, Profile::WeaknessConstrained | Profile::FoundationWeak)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReport {
    pub student_id: String,
    pub student_name: String,
    pub table_name: String,
    pub total_score: f64,
    pub class_rank: usize,
    pub grade_rank: usize,
    pub ranks: StudentRanks,
    pub scores: ScoreSheet,
    pub metrics: StudentMetrics,
    pub profile: Profile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassReport {
    pub table_name: String,
    pub table_stats: ClassStats,
    pub students: Vec<StudentReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortReport {
    pub group_name: String,
    pub full_marks: IndexMap<String, f64>,
    pub group_stats: GroupStats,
    pub tables: Vec<ClassReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CohortReport {
    pub fn subjects(&self) -> Vec<String> {
        self.full_marks
            .keys()
            .filter(|name| name.as_str() != TOTAL_SCORE)
            .cloned()
            .collect()
    }

    pub fn students(&self) -> impl Iterator<Item = &StudentReport> {
        self.tables.iter().flat_map(|table| table.students.iter())
    }
}
