use thiserror::Error;

pub type ReportResult<T> = Result<T, ReportError>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReportError {
    /// The filter descriptor handed to a list/count call is unusable.
    ///
    /// This is a caller bug (missing report condition, negative paging values),
    /// so it is never replaced by a default.
    #[error("invalid report filter: {0}")]
    InvalidFilter(String),

    #[error("unknown attendance status: {0}")]
    UnknownStatus(String),

    #[error("unknown teacher type: {0}")]
    UnknownTeacherType(String),

    #[error("unknown report condition: {0}")]
    UnknownCondition(String),
}
