use chrono::{NaiveDateTime, NaiveTime, Timelike};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{AttendanceStatus, ReservationRecord, SessionGroup};

const BLOCK_MINUTES: u32 = 30;

/// Decides whether a slot continues the session opened by the slot before it.
///
/// Both rules compare half-hour rounded instants. `Tolerant` is the default:
/// it keeps duplicate and overlapping slots in one session, which `Strict`
/// splits apart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum GapRule {
    /// Continues only when the previous rounded end equals the rounded start.
    Strict,
    /// Continues whenever the rounded start is not after the previous rounded end.
    #[default]
    Tolerant,
}

impl GapRule {
    pub fn continues(&self, previous_end: NaiveDateTime, start: NaiveDateTime) -> bool {
        match self {
            GapRule::Strict => previous_end == start,
            GapRule::Tolerant => start <= previous_end,
        }
    }
}

pub fn round_down_half_hour(at: NaiveDateTime) -> NaiveDateTime {
    let minute = at.minute() - at.minute() % BLOCK_MINUTES;
    NaiveTime::from_hms_opt(at.hour(), minute, 0)
        .map(|time| at.date().and_time(time))
        .unwrap_or(at)
}

/// Assigns a session number to each record of an already sorted slice.
///
/// The slice must be ordered by (student, teacher, date, start time). Numbers
/// restart at 1 for every (student, teacher) pair and grow by one at each gap.
pub fn assign_group_ids(records: &[&ReservationRecord], rule: GapRule) -> Vec<u32> {
    let mut ids = Vec::with_capacity(records.len());
    let mut partition: Option<(i64, i64)> = None;
    let mut previous_end: Option<NaiveDateTime> = None;
    let mut counter = 0u32;

    for record in records {
        let key = (record.student_id, record.teacher_id);
        if partition != Some(key) {
            partition = Some(key);
            previous_end = None;
            counter = 0;
        }

        let start = round_down_half_hour(record.start_at());
        let continues = previous_end.is_some_and(|end| rule.continues(end, start));
        if !continues {
            counter += 1;
        }
        ids.push(counter);
        previous_end = Some(round_down_half_hour(record.end_at()));
    }

    ids
}

/// Splits reservations into per-pair sessions of back-to-back slots.
///
/// Cancelled reservations are dropped; the rest are sorted here, so adapter rows
/// may arrive in any order.
pub fn group_sessions<'a>(
    records: impl IntoIterator<Item = &'a ReservationRecord>,
    rule: GapRule,
) -> Vec<SessionGroup<'a>> {
    let mut ordered: Vec<&ReservationRecord> = records
        .into_iter()
        .filter(|record| record.attendance_status != AttendanceStatus::Cancelled)
        .collect();
    ordered.sort_by_key(|record| {
        (
            record.student_id,
            record.teacher_id,
            record.date,
            record.start_time,
            record.end_time,
            record.id,
        )
    });

    let ids = assign_group_ids(&ordered, rule);
    let record_count = ordered.len();
    let mut groups: Vec<SessionGroup<'a>> = Vec::new();

    for (record, group_id) in ordered.into_iter().zip(ids) {
        let same_group = groups.last().is_some_and(|group| {
            group.student_id == record.student_id
                && group.teacher_id == record.teacher_id
                && group.group_id == group_id
        });

        if same_group {
            if let Some(group) = groups.last_mut() {
                group.aggregate_has_report &= record.has_report;
                group.members.push(record);
            }
        } else {
            groups.push(SessionGroup {
                student_id: record.student_id,
                teacher_id: record.teacher_id,
                group_id,
                members: vec![record],
                aggregate_has_report: record.has_report,
            });
        }
    }

    debug!(
        records = record_count,
        groups = groups.len(),
        ?rule,
        "grouped reservations into sessions"
    );
    groups
}
