use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("full marks must define at least one subject")]
    EmptyFullMarks,

    #[error("student {student} has a score for unknown subject {subject}")]
    UnknownSubject { student: String, subject: String },

    #[error("class {0} appears more than once in the scope")]
    DuplicateClass(String),

    #[error("student id {0} appears more than once in the scope")]
    DuplicateStudent(String),

    #[error("student {student} has no score for {subject}")]
    MissingScore { student: String, subject: String },
}
