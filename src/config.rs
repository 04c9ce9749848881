use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BIN_WIDTH: u32 = 10;

/// How an absent subject score is treated.
///
/// `Zero` counts the subject as scored 0, which folds "absent" into the
/// same bucket as a genuine zero for totals, rankings and statistics.
/// `Reject` refuses to analyse a scope that has gaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum MissingScorePolicy {
    #[default]
    Zero,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisConfig {
    pub missing_scores: MissingScorePolicy,
    pub bin_width: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            missing_scores: MissingScorePolicy::default(),
            bin_width: DEFAULT_BIN_WIDTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_count_missing_as_zero() {
        let config = AnalysisConfig::default();
        assert_eq!(config.missing_scores, MissingScorePolicy::Zero);
        assert_eq!(config.bin_width, 10);
    }

    #[test]
    fn policy_serializes_kebab_case() {
        let value = serde_json::to_string(&MissingScorePolicy::Reject).unwrap();
        assert_eq!(value, "\"reject\"");
    }
}
