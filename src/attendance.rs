use std::collections::HashMap;

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{
    AttendanceMatrix, AttendanceRow, AttendanceRowKind, AttendanceStatus, DaySection,
    ReservationSlot, ScheduleSlot, Teacher, TeacherDayCount, TeacherType,
};

/// How month totals are keyed.
///
/// `DisplayName` merges teachers that share a name into one total row; it is
/// the historical behaviour of the report and stays the default until the
/// business confirms otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TotalKey {
    #[default]
    DisplayName,
    TeacherId,
}

/// Percentage of scheduled slots that were attended, two decimals, capped at 100.
pub fn attendance_rate(reservation_count: i64, schedule_count: i64) -> f64 {
    if schedule_count <= 0 || reservation_count <= 0 {
        return 0.0;
    }
    let rate = (reservation_count as f64 / schedule_count as f64 * 100.0).min(100.0);
    (rate * 100.0).round() / 100.0
}

/// Only slots starting on the hour or half hour count as scheduled.
pub fn is_on_grid(start_time: NaiveTime) -> bool {
    matches!(start_time.minute(), 0 | 30)
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
}

pub fn month_days(month: NaiveDate) -> Vec<NaiveDate> {
    let first = first_of_month(month);
    first
        .iter_days()
        .take_while(|day| day.month() == first.month())
        .collect()
}

/// Per (day, teacher) counts for the whole month.
///
/// Every roster teacher gets a cell for every day of the month, so idle
/// teachers show up with zero counts. Slots outside the month or belonging to
/// teachers missing from the roster are ignored.
pub fn tally_cells(
    month: NaiveDate,
    status: AttendanceStatus,
    roster: &[Teacher],
    reservations: &[ReservationSlot],
    schedules: &[ScheduleSlot],
) -> Vec<TeacherDayCount> {
    let days = month_days(month);
    let in_month = |date: NaiveDate| first_of_month(date) == first_of_month(month);

    let mut reserved: HashMap<(i64, NaiveDate), i64> = HashMap::new();
    for slot in reservations
        .iter()
        .filter(|slot| slot.attendance_status == status && in_month(slot.date))
    {
        *reserved.entry((slot.teacher_id, slot.date)).or_insert(0) += 1;
    }

    let mut scheduled: HashMap<(i64, NaiveDate), i64> = HashMap::new();
    for slot in schedules
        .iter()
        .filter(|slot| is_on_grid(slot.start_time) && in_month(slot.date))
    {
        *scheduled.entry((slot.teacher_id, slot.date)).or_insert(0) += 1;
    }

    let mut teachers: Vec<&Teacher> = roster.iter().collect();
    teachers.sort_by_key(|teacher| (teacher.sort_order, teacher.id));

    let mut cells = Vec::with_capacity(days.len() * teachers.len());
    for date in days {
        for teacher in &teachers {
            let key = (teacher.id, date);
            let reservation_count = reserved.get(&key).copied().unwrap_or(0);
            let schedule_count = scheduled.get(&key).copied().unwrap_or(0);
            cells.push(TeacherDayCount {
                teacher_id: teacher.id,
                teacher_name: teacher.display_name.clone(),
                teacher_type: teacher.teacher_type,
                sort_order: teacher.sort_order,
                date,
                reservation_count,
                schedule_count,
                attendance_rate: attendance_rate(reservation_count, schedule_count),
            });
        }
    }

    cells
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Tally {
    reservation_count: i64,
    schedule_count: i64,
}

impl Tally {
    fn add(&mut self, reservation_count: i64, schedule_count: i64) {
        self.reservation_count += reservation_count;
        self.schedule_count += schedule_count;
    }

    fn average_row(&self, teacher_type: TeacherType) -> AttendanceRow {
        let kind = match teacher_type {
            TeacherType::Ht => AttendanceRowKind::HtAverage,
            TeacherType::Lt => AttendanceRowKind::LtAverage,
        };
        AttendanceRow {
            kind,
            teacher_id: None,
            label: teacher_type.average_label().to_string(),
            teacher_type,
            reservation_count: self.reservation_count,
            schedule_count: self.schedule_count,
            attendance_rate: attendance_rate(self.reservation_count, self.schedule_count),
        }
    }
}

fn teacher_row(cell: &TeacherDayCount) -> AttendanceRow {
    AttendanceRow {
        kind: AttendanceRowKind::Teacher,
        teacher_id: Some(cell.teacher_id),
        label: cell.teacher_name.clone(),
        teacher_type: cell.teacher_type,
        reservation_count: cell.reservation_count,
        schedule_count: cell.schedule_count,
        attendance_rate: attendance_rate(cell.reservation_count, cell.schedule_count),
    }
}

#[derive(Default)]
struct DayBuffers {
    ht: Vec<AttendanceRow>,
    lt: Vec<AttendanceRow>,
    ht_sum: Tally,
    lt_sum: Tally,
}

impl DayBuffers {
    fn push(&mut self, cell: &TeacherDayCount) {
        let row = teacher_row(cell);
        match cell.teacher_type {
            TeacherType::Ht => {
                self.ht_sum.add(row.reservation_count, row.schedule_count);
                self.ht.push(row);
            }
            TeacherType::Lt => {
                self.lt_sum.add(row.reservation_count, row.schedule_count);
                self.lt.push(row);
            }
        }
    }

    fn flush(self, month_ht: &mut Tally, month_lt: &mut Tally) -> Vec<AttendanceRow> {
        let mut rows = Vec::with_capacity(self.ht.len() + self.lt.len() + 2);
        if !self.ht.is_empty() {
            month_ht.add(self.ht_sum.reservation_count, self.ht_sum.schedule_count);
            rows.extend(self.ht);
            rows.push(self.ht_sum.average_row(TeacherType::Ht));
        }
        if !self.lt.is_empty() {
            month_lt.add(self.lt_sum.reservation_count, self.lt_sum.schedule_count);
            rows.extend(self.lt);
            rows.push(self.lt_sum.average_row(TeacherType::Lt));
        }
        rows
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum EntryKey {
    Name(String),
    Id(i64),
}

struct TotalEntry {
    teacher_id: i64,
    label: String,
    teacher_type: TeacherType,
    tally: Tally,
}

/// Month totals per teacher, kept in first-seen order.
struct TotalAccumulator {
    key: TotalKey,
    index: HashMap<EntryKey, usize>,
    entries: Vec<TotalEntry>,
}

impl TotalAccumulator {
    fn new(key: TotalKey) -> Self {
        Self {
            key,
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }

    fn add(&mut self, cell: &TeacherDayCount) {
        let key = match self.key {
            TotalKey::DisplayName => EntryKey::Name(cell.teacher_name.clone()),
            TotalKey::TeacherId => EntryKey::Id(cell.teacher_id),
        };
        let position = match self.index.get(&key) {
            Some(position) => *position,
            None => {
                self.entries.push(TotalEntry {
                    teacher_id: cell.teacher_id,
                    label: cell.teacher_name.clone(),
                    teacher_type: cell.teacher_type,
                    tally: Tally::default(),
                });
                self.index.insert(key, self.entries.len() - 1);
                self.entries.len() - 1
            }
        };
        self.entries[position]
            .tally
            .add(cell.reservation_count, cell.schedule_count);
    }

    /// Teacher totals with the HT average placed right after the last HT
    /// entry and the LT average at the end.
    fn into_rows(self, month_ht: Tally, month_lt: Tally) -> Vec<AttendanceRow> {
        let mut rows = Vec::with_capacity(self.entries.len() + 2);
        let mut last_ht: Option<usize> = None;
        let mut has_lt = false;

        for entry in self.entries {
            match entry.teacher_type {
                TeacherType::Ht => last_ht = Some(rows.len()),
                TeacherType::Lt => has_lt = true,
            }
            rows.push(AttendanceRow {
                kind: AttendanceRowKind::Teacher,
                teacher_id: Some(entry.teacher_id),
                label: entry.label,
                teacher_type: entry.teacher_type,
                reservation_count: entry.tally.reservation_count,
                schedule_count: entry.tally.schedule_count,
                attendance_rate: attendance_rate(
                    entry.tally.reservation_count,
                    entry.tally.schedule_count,
                ),
            });
        }

        if let Some(position) = last_ht {
            rows.insert(position + 1, month_ht.average_row(TeacherType::Ht));
        }
        if has_lt {
            rows.push(month_lt.average_row(TeacherType::Lt));
        }
        rows
    }
}

/// Lays out already tallied cells as one section per day of the month plus
/// the month totals.
pub fn build_rows(month: NaiveDate, cells: &[TeacherDayCount], key: TotalKey) -> AttendanceMatrix {
    let month = first_of_month(month);
    let mut ordered: Vec<&TeacherDayCount> = cells.iter().collect();
    ordered.sort_by_key(|cell| (cell.date, cell.sort_order, cell.teacher_id));

    let mut cursor = ordered.into_iter().peekable();
    let mut totals = TotalAccumulator::new(key);
    let mut month_ht = Tally::default();
    let mut month_lt = Tally::default();
    let mut days = Vec::new();
    let mut skipped = 0usize;

    for date in month_days(month) {
        let mut buffers = DayBuffers::default();
        while let Some(cell) = cursor.next_if(|cell| cell.date <= date) {
            if cell.date < date {
                skipped += 1;
                continue;
            }
            buffers.push(cell);
            totals.add(cell);
        }
        days.push(DaySection {
            date,
            attendances: buffers.flush(&mut month_ht, &mut month_lt),
        });
    }
    skipped += cursor.count();

    if skipped > 0 {
        warn!(skipped, %month, "ignored attendance cells outside the requested month");
    }

    AttendanceMatrix {
        month,
        days,
        totals: totals.into_rows(month_ht, month_lt),
    }
}

pub fn build_attendance_matrix(
    month: NaiveDate,
    status: AttendanceStatus,
    roster: &[Teacher],
    reservations: &[ReservationSlot],
    schedules: &[ScheduleSlot],
    key: TotalKey,
) -> AttendanceMatrix {
    let cells = tally_cells(month, status, roster, reservations, schedules);
    let matrix = build_rows(month, &cells, key);
    debug!(
        month = %matrix.month,
        teachers = roster.len(),
        cells = cells.len(),
        "built attendance matrix"
    );
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn time(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    fn teacher(id: i64, name: &str, teacher_type: TeacherType, sort_order: i32) -> Teacher {
        Teacher {
            id,
            display_name: name.to_string(),
            teacher_type,
            sort_order,
        }
    }

    fn attended(teacher_id: i64, day: u32, count: usize) -> Vec<ReservationSlot> {
        vec![
            ReservationSlot {
                teacher_id,
                date: date(day),
                attendance_status: AttendanceStatus::Attended,
            };
            count
        ]
    }

    fn scheduled(teacher_id: i64, day: u32, count: u32) -> Vec<ScheduleSlot> {
        (0..count)
            .map(|slot| ScheduleSlot {
                teacher_id,
                date: date(day),
                start_time: time(9 + slot / 2, (slot % 2) * 30),
            })
            .collect()
    }

    fn labels(rows: &[AttendanceRow]) -> Vec<&str> {
        rows.iter().map(|row| row.label.as_str()).collect()
    }

    #[test]
    fn rate_is_rounded_capped_and_zero_safe() {
        assert_eq!(attendance_rate(0, 0), 0.0);
        assert_eq!(attendance_rate(3, 0), 0.0);
        assert_eq!(attendance_rate(4, 4), 100.0);
        assert_eq!(attendance_rate(1, 3), 33.33);
        assert_eq!(attendance_rate(2, 3), 66.67);
        assert_eq!(attendance_rate(5, 4), 100.0);
    }

    #[test]
    fn off_grid_schedules_are_not_counted() {
        assert!(is_on_grid(time(9, 0)));
        assert!(is_on_grid(time(9, 30)));
        assert!(!is_on_grid(time(9, 15)));

        let roster = vec![teacher(1, "Mina Park", TeacherType::Ht, 1)];
        let mut schedules = scheduled(1, 2, 2);
        schedules.push(ScheduleSlot {
            teacher_id: 1,
            date: date(2),
            start_time: time(10, 45),
        });
        let cells = tally_cells(date(1), AttendanceStatus::Attended, &roster, &[], &schedules);
        let cell = cells.iter().find(|cell| cell.date == date(2)).unwrap();
        assert_eq!(cell.schedule_count, 2);
    }

    #[test]
    fn single_teacher_full_day_matches_its_average() {
        let roster = vec![teacher(1, "Mina Park", TeacherType::Ht, 1)];
        let matrix = build_attendance_matrix(
            date(1),
            AttendanceStatus::Attended,
            &roster,
            &attended(1, 1, 4),
            &scheduled(1, 1, 4),
            TotalKey::default(),
        );

        let first = &matrix.days[0];
        assert_eq!(first.date, date(1));
        assert_eq!(labels(&first.attendances), vec!["Mina Park", "HT Avg."]);
        let (own, average) = (&first.attendances[0], &first.attendances[1]);
        assert_eq!(own.attendance_rate, 100.0);
        assert_eq!(average.kind, AttendanceRowKind::HtAverage);
        assert_eq!(average.reservation_count, own.reservation_count);
        assert_eq!(average.schedule_count, own.schedule_count);
        assert_eq!(average.attendance_rate, own.attendance_rate);
    }

    #[test]
    fn idle_day_has_zero_rate() {
        let roster = vec![teacher(1, "Mina Park", TeacherType::Ht, 1)];
        let matrix = build_attendance_matrix(
            date(1),
            AttendanceStatus::Attended,
            &roster,
            &[],
            &[],
            TotalKey::default(),
        );
        let row = &matrix.days[14].attendances[0];
        assert_eq!(row.reservation_count, 0);
        assert_eq!(row.schedule_count, 0);
        assert_eq!(row.attendance_rate, 0.0);
    }

    #[test]
    fn only_matching_status_counts() {
        let roster = vec![teacher(1, "Mina Park", TeacherType::Ht, 1)];
        let mut reservations = attended(1, 3, 2);
        reservations.push(ReservationSlot {
            teacher_id: 1,
            date: date(3),
            attendance_status: AttendanceStatus::Reserved,
        });
        let cells = tally_cells(date(1), AttendanceStatus::Attended, &roster, &reservations, &[]);
        assert_eq!(cells[2].reservation_count, 2);

        let cells = tally_cells(date(1), AttendanceStatus::Reserved, &roster, &reservations, &[]);
        assert_eq!(cells[2].reservation_count, 1);
    }

    #[test]
    fn every_day_of_the_month_appears_once() {
        let february = NaiveDate::from_ymd_opt(2024, 2, 17).unwrap();
        let matrix = build_attendance_matrix(
            february,
            AttendanceStatus::Attended,
            &[],
            &[],
            &[],
            TotalKey::default(),
        );
        assert_eq!(matrix.month, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(matrix.days.len(), 29);
        assert!(matrix.days.iter().all(|day| day.attendances.is_empty()));
        assert!(matrix.totals.is_empty());
        for (offset, day) in matrix.days.iter().enumerate() {
            assert_eq!(day.date.day() as usize, offset + 1);
        }
    }

    #[test]
    fn day_rows_group_types_with_their_averages() {
        let roster = vec![
            teacher(1, "Lee", TeacherType::Lt, 1),
            teacher(2, "Park", TeacherType::Ht, 2),
            teacher(3, "Cho", TeacherType::Lt, 3),
            teacher(4, "Han", TeacherType::Ht, 4),
        ];
        let mut reservations = attended(2, 1, 3);
        reservations.extend(attended(4, 1, 1));
        let mut schedules = scheduled(2, 1, 4);
        schedules.extend(scheduled(4, 1, 4));

        let matrix = build_attendance_matrix(
            date(1),
            AttendanceStatus::Attended,
            &roster,
            &reservations,
            &schedules,
            TotalKey::default(),
        );
        let rows = &matrix.days[0].attendances;
        assert_eq!(
            labels(rows),
            vec!["Park", "Han", "HT Avg.", "Lee", "Cho", "LT Avg."]
        );
        // 4 of 8 slots, not the mean of 75% and 25% recomputed per teacher.
        assert_eq!(rows[2].reservation_count, 4);
        assert_eq!(rows[2].schedule_count, 8);
        assert_eq!(rows[2].attendance_rate, 50.0);
        assert_eq!(rows[5].attendance_rate, 0.0);
    }

    #[test]
    fn totals_place_ht_average_after_last_ht_entry() {
        let roster = vec![
            teacher(1, "Park", TeacherType::Ht, 1),
            teacher(2, "Lee", TeacherType::Lt, 2),
            teacher(3, "Han", TeacherType::Ht, 3),
            teacher(4, "Cho", TeacherType::Lt, 4),
        ];
        let matrix = build_attendance_matrix(
            date(1),
            AttendanceStatus::Attended,
            &roster,
            &attended(1, 5, 2),
            &scheduled(1, 5, 2),
            TotalKey::default(),
        );
        assert_eq!(
            labels(&matrix.totals),
            vec!["Park", "Lee", "Han", "HT Avg.", "Cho", "LT Avg."]
        );
        assert_eq!(matrix.totals[0].attendance_rate, 100.0);
        assert_eq!(matrix.totals[3].reservation_count, 2);
    }

    #[test]
    fn monthly_ht_average_sums_daily_averages() {
        let roster = vec![
            teacher(1, "Park", TeacherType::Ht, 1),
            teacher(2, "Han", TeacherType::Ht, 2),
            teacher(3, "Lee", TeacherType::Lt, 3),
        ];
        let mut reservations = attended(1, 2, 3);
        reservations.extend(attended(2, 9, 2));
        reservations.extend(attended(1, 20, 1));
        reservations.extend(attended(3, 20, 4));
        let mut schedules = scheduled(1, 2, 4);
        schedules.extend(scheduled(2, 9, 2));
        schedules.extend(scheduled(1, 20, 3));

        let matrix = build_attendance_matrix(
            date(1),
            AttendanceStatus::Attended,
            &roster,
            &reservations,
            &schedules,
            TotalKey::default(),
        );

        let daily: i64 = matrix
            .days
            .iter()
            .flat_map(|day| day.attendances.iter())
            .filter(|row| row.kind == AttendanceRowKind::HtAverage)
            .map(|row| row.reservation_count)
            .sum();
        let total = matrix
            .totals
            .iter()
            .find(|row| row.kind == AttendanceRowKind::HtAverage)
            .unwrap();
        assert_eq!(daily, 6);
        assert_eq!(total.reservation_count, daily);
        assert_eq!(total.schedule_count, 9);
        assert_eq!(total.attendance_rate, 66.67);

        for row in matrix.days.iter().flat_map(|day| day.attendances.iter()) {
            assert!((0.0..=100.0).contains(&row.attendance_rate));
        }
    }

    #[test]
    fn totals_key_by_name_merges_namesakes() {
        let roster = vec![
            teacher(1, "Kim", TeacherType::Ht, 1),
            teacher(2, "Kim", TeacherType::Ht, 2),
        ];
        let mut reservations = attended(1, 1, 1);
        reservations.extend(attended(2, 1, 2));

        let by_name = build_attendance_matrix(
            date(1),
            AttendanceStatus::Attended,
            &roster,
            &reservations,
            &[],
            TotalKey::DisplayName,
        );
        assert_eq!(labels(&by_name.totals), vec!["Kim", "HT Avg."]);
        assert_eq!(by_name.totals[0].reservation_count, 3);

        let by_id = build_attendance_matrix(
            date(1),
            AttendanceStatus::Attended,
            &roster,
            &reservations,
            &[],
            TotalKey::TeacherId,
        );
        assert_eq!(labels(&by_id.totals), vec!["Kim", "Kim", "HT Avg."]);
    }

    #[test]
    fn building_twice_is_identical() {
        let roster = vec![
            teacher(1, "Park", TeacherType::Ht, 1),
            teacher(2, "Lee", TeacherType::Lt, 2),
        ];
        let mut reservations = attended(1, 4, 2);
        reservations.extend(attended(2, 4, 1));
        let schedules = scheduled(1, 4, 3);

        let build = || {
            build_attendance_matrix(
                date(1),
                AttendanceStatus::Attended,
                &roster,
                &reservations,
                &schedules,
                TotalKey::default(),
            )
        };
        let first = build();
        let second = build();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn cells_outside_month_are_dropped() {
        let roster = vec![teacher(1, "Park", TeacherType::Ht, 1)];
        let mut cells = tally_cells(date(1), AttendanceStatus::Attended, &roster, &[], &[]);
        let mut stray = cells[0].clone();
        stray.date = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
        stray.reservation_count = 9;
        cells.push(stray);

        let matrix = build_rows(date(1), &cells, TotalKey::default());
        assert_eq!(matrix.days.len(), 31);
        assert_eq!(matrix.totals[0].reservation_count, 0);
    }
}
