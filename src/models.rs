use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::ReportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    Reserved,
    Attended,
    Cancelled,
}

impl AttendanceStatus {
    pub fn code(&self) -> &'static str {
        match self {
            AttendanceStatus::Reserved => "RESERVED",
            AttendanceStatus::Attended => "ATTENDED",
            AttendanceStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for AttendanceStatus {
    type Err = ReportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "RESERVED" => Ok(AttendanceStatus::Reserved),
            "ATTENDED" => Ok(AttendanceStatus::Attended),
            "CANCELLED" | "CANCELED" => Ok(AttendanceStatus::Cancelled),
            _ => Err(ReportError::UnknownStatus(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TeacherType {
    #[serde(rename = "HT")]
    Ht,
    #[serde(rename = "LT")]
    Lt,
}

impl TeacherType {
    pub fn code(&self) -> &'static str {
        match self {
            TeacherType::Ht => "HT",
            TeacherType::Lt => "LT",
        }
    }

    /// Label used for the synthetic average row of this type.
    pub fn average_label(&self) -> &'static str {
        match self {
            TeacherType::Ht => "HT Avg.",
            TeacherType::Lt => "LT Avg.",
        }
    }
}

impl fmt::Display for TeacherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for TeacherType {
    type Err = ReportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "HT" => Ok(TeacherType::Ht),
            "LT" => Ok(TeacherType::Lt),
            _ => Err(ReportError::UnknownTeacherType(value.to_string())),
        }
    }
}

/// One reserved lesson slot, already joined with student, teacher and course
/// attributes by the data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub id: i64,
    pub student_id: i64,
    pub student_name: String,
    pub teacher_id: i64,
    pub teacher_name: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub attendance_status: AttendanceStatus,
    pub has_report: bool,
    pub course_name: String,
    pub lesson_count: i32,
    pub remaining_count: i32,
    pub assignment_count: i32,
    pub today_lesson: Option<String>,
    pub next_lesson: Option<String>,
}

impl ReservationRecord {
    pub fn start_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    pub fn end_at(&self) -> NaiveDateTime {
        self.date.and_time(self.end_time)
    }
}

/// Back-to-back reservations of one student with one teacher.
#[derive(Debug, Clone, Serialize)]
pub struct SessionGroup<'a> {
    pub student_id: i64,
    pub teacher_id: i64,
    pub group_id: u32,
    pub members: Vec<&'a ReservationRecord>,
    pub aggregate_has_report: bool,
}

impl SessionGroup<'_> {
    pub fn is_pending(&self) -> bool {
        !self.aggregate_has_report
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Teacher {
    pub id: i64,
    pub display_name: String,
    pub teacher_type: TeacherType,
    pub sort_order: i32,
}

/// A reservation reduced to what the attendance tally needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationSlot {
    pub teacher_id: i64,
    pub date: NaiveDate,
    pub attendance_status: AttendanceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSlot {
    pub teacher_id: i64,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeacherDayCount {
    pub teacher_id: i64,
    pub teacher_name: String,
    pub teacher_type: TeacherType,
    pub sort_order: i32,
    pub date: NaiveDate,
    pub reservation_count: i64,
    pub schedule_count: i64,
    pub attendance_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceRowKind {
    Teacher,
    HtAverage,
    LtAverage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRow {
    pub kind: AttendanceRowKind,
    pub teacher_id: Option<i64>,
    pub label: String,
    pub teacher_type: TeacherType,
    pub reservation_count: i64,
    pub schedule_count: i64,
    pub attendance_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaySection {
    pub date: NaiveDate,
    pub attendances: Vec<AttendanceRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceMatrix {
    pub month: NaiveDate,
    pub days: Vec<DaySection>,
    pub totals: Vec<AttendanceRow>,
}
