use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{ReportError, ReportResult};
use crate::models::{AttendanceStatus, ReservationRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportCondition {
    /// Every non-cancelled reservation.
    All,
    /// Only reservations the student attended.
    Attendance,
    /// Session blocks still missing at least one lesson report.
    Report,
}

impl fmt::Display for ReportCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReportCondition::All => "ALL",
            ReportCondition::Attendance => "ATTENDANCE",
            ReportCondition::Report => "REPORT",
        };
        f.write_str(label)
    }
}

impl FromStr for ReportCondition {
    type Err = ReportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ALL" => Ok(ReportCondition::All),
            "ATTENDANCE" => Ok(ReportCondition::Attendance),
            "REPORT" => Ok(ReportCondition::Report),
            _ => Err(ReportError::UnknownCondition(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    ByDate,
    ByTeacher,
}

/// Optional predicates shared by the list and count operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportFilter {
    pub teacher_id: Option<i64>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub keyword: Option<String>,
    pub report_condition: Option<ReportCondition>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    #[serde(default)]
    pub sort_order: SortOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Pagination {
    pub fn apply<T>(&self, rows: Vec<T>) -> Vec<T> {
        let rows = rows.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => rows.take(limit).collect(),
            None => rows.collect(),
        }
    }
}

impl ReportFilter {
    pub fn new(report_condition: ReportCondition) -> Self {
        Self {
            report_condition: Some(report_condition),
            ..Self::default()
        }
    }

    pub fn with_teacher(mut self, teacher_id: i64) -> Self {
        self.teacher_id = Some(teacher_id);
        self
    }

    pub fn with_dates(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    pub fn with_page(mut self, page: Option<i64>, page_size: Option<i64>) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    pub fn with_sort(mut self, sort_order: SortOrder) -> Self {
        self.sort_order = sort_order;
        self
    }

    /// The same predicate set with paging stripped, as used by `count`.
    pub fn without_pagination(&self) -> Self {
        Self {
            page: None,
            page_size: None,
            ..self.clone()
        }
    }

    pub fn condition(&self) -> ReportResult<ReportCondition> {
        self.report_condition
            .ok_or_else(|| ReportError::InvalidFilter("report condition is required".to_string()))
    }

    /// Blank keywords are treated as absent.
    pub fn keyword(&self) -> Option<&str> {
        self.keyword
            .as_deref()
            .map(str::trim)
            .filter(|keyword| !keyword.is_empty())
    }

    pub fn validate(&self) -> ReportResult<ReportCondition> {
        let condition = self.condition()?;
        self.pagination()?;
        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                return Err(ReportError::InvalidFilter(format!(
                    "date range starts after it ends ({from} > {to})"
                )));
            }
        }
        Ok(condition)
    }

    pub fn pagination(&self) -> ReportResult<Pagination> {
        let page = non_negative("page", self.page)?;
        let page_size = non_negative("page_size", self.page_size)?;

        let limit = page_size.filter(|size| *size > 0);
        let offset = match (page, limit) {
            (Some(page), Some(size)) if page > 0 => (page - 1).saturating_mul(size),
            _ => 0,
        };

        Ok(Pagination { offset, limit })
    }

    /// Applies every present predicate. Cancelled reservations never match.
    pub fn matches(&self, record: &ReservationRecord, condition: ReportCondition) -> bool {
        if record.attendance_status == AttendanceStatus::Cancelled {
            return false;
        }
        if condition == ReportCondition::Attendance
            && record.attendance_status != AttendanceStatus::Attended
        {
            return false;
        }
        if self.teacher_id.is_some_and(|id| id != record.teacher_id) {
            return false;
        }
        if self.date_from.is_some_and(|from| record.date < from) {
            return false;
        }
        if self.date_to.is_some_and(|to| record.date > to) {
            return false;
        }
        match self.keyword() {
            Some(keyword) => record
                .student_name
                .to_lowercase()
                .contains(&keyword.to_lowercase()),
            None => true,
        }
    }
}

fn non_negative(field: &str, value: Option<i64>) -> ReportResult<Option<usize>> {
    match value {
        Some(value) if value < 0 => Err(ReportError::InvalidFilter(format!(
            "{field} must not be negative (got {value})"
        ))),
        Some(value) => Ok(Some(usize::try_from(value).map_err(|_| {
            ReportError::InvalidFilter(format!("{field} is out of range (got {value})"))
        })?)),
        None => Ok(None),
    }
}
