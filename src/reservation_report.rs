use std::cmp::Ordering;

use serde::Serialize;
use tracing::debug;

use crate::error::ReportResult;
use crate::filter::{ReportCondition, ReportFilter, SortOrder};
use crate::grouping::{self, GapRule};
use crate::models::ReservationRecord;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportPage {
    pub records: Vec<ReservationRecord>,
    pub total_count: usize,
}

/// Every record the filter selects, in output order, before paging.
fn select<'a>(
    records: &'a [ReservationRecord],
    filter: &ReportFilter,
    rule: GapRule,
) -> ReportResult<Vec<&'a ReservationRecord>> {
    let condition = filter.validate()?;
    let matching = records
        .iter()
        .filter(|record| filter.matches(record, condition));

    let mut selected: Vec<&ReservationRecord> = match condition {
        ReportCondition::All | ReportCondition::Attendance => matching.collect(),
        ReportCondition::Report => grouping::group_sessions(matching, rule)
            .into_iter()
            .filter(|group| group.is_pending())
            .flat_map(|group| group.members)
            .collect(),
    };

    let newest_first = condition != ReportCondition::Report;
    selected.sort_by(|a, b| compare(a, b, filter.sort_order, newest_first));
    Ok(selected)
}

fn compare(
    a: &ReservationRecord,
    b: &ReservationRecord,
    sort_order: SortOrder,
    newest_first: bool,
) -> Ordering {
    let chronological = a
        .date
        .cmp(&b.date)
        .then(a.start_time.cmp(&b.start_time))
        .then(a.student_id.cmp(&b.student_id))
        .then(a.teacher_id.cmp(&b.teacher_id))
        .then(a.id.cmp(&b.id));
    let chronological = if newest_first {
        chronological.reverse()
    } else {
        chronological
    };

    match sort_order {
        SortOrder::ByDate => chronological,
        SortOrder::ByTeacher => a.teacher_id.cmp(&b.teacher_id).then(chronological),
    }
}

/// One page of the report for `filter`.
pub fn list(
    records: &[ReservationRecord],
    filter: &ReportFilter,
    rule: GapRule,
) -> ReportResult<Vec<ReservationRecord>> {
    let pagination = filter.pagination()?;
    let selected = select(records, filter, rule)?;
    Ok(pagination
        .apply(selected)
        .into_iter()
        .cloned()
        .collect())
}

/// Number of rows the filter selects; paging fields are ignored.
pub fn count(
    records: &[ReservationRecord],
    filter: &ReportFilter,
    rule: GapRule,
) -> ReportResult<usize> {
    Ok(select(records, &filter.without_pagination(), rule)?.len())
}

pub fn list_reservation_report(
    records: &[ReservationRecord],
    filter: &ReportFilter,
    rule: GapRule,
) -> ReportResult<ReportPage> {
    let total_count = count(records, filter, rule)?;
    let page = list(records, filter, rule)?;
    debug!(
        condition = ?filter.report_condition,
        total_count,
        page_len = page.len(),
        "assembled reservation report"
    );
    Ok(ReportPage {
        records: page,
        total_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReportError;
    use crate::models::AttendanceStatus;
    use chrono::{NaiveDate, NaiveTime};

    fn reservation(
        id: i64,
        teacher_id: i64,
        start: (u32, u32),
        end: (u32, u32),
        has_report: bool,
    ) -> ReservationRecord {
        ReservationRecord {
            id,
            student_id: 100,
            student_name: "Jisoo Kim".to_string(),
            teacher_id,
            teacher_name: "Mina Park".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            start_time: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
            attendance_status: AttendanceStatus::Attended,
            has_report,
            course_name: "Reading".to_string(),
            lesson_count: 24,
            remaining_count: 10,
            assignment_count: 2,
            today_lesson: Some("Unit 3".to_string()),
            next_lesson: Some("Unit 4".to_string()),
        }
    }

    fn day_of_lessons() -> Vec<ReservationRecord> {
        vec![
            reservation(1, 1, (6, 0), (6, 30), true),
            reservation(2, 1, (6, 30), (7, 0), true),
            reservation(3, 1, (7, 0), (7, 30), true),
            reservation(4, 1, (11, 0), (11, 30), false),
            reservation(5, 1, (11, 30), (12, 0), false),
        ]
    }

    fn ids(records: &[ReservationRecord]) -> Vec<i64> {
        records.iter().map(|record| record.id).collect()
    }

    #[test]
    fn report_mode_returns_only_the_pending_block() {
        let records = day_of_lessons();
        let filter = ReportFilter::new(ReportCondition::Report);
        let page = list_reservation_report(&records, &filter, GapRule::default()).unwrap();
        assert_eq!(ids(&page.records), vec![4, 5]);
        assert_eq!(page.total_count, 2);
    }

    #[test]
    fn one_unreported_member_keeps_whole_block_pending() {
        let mut records = day_of_lessons();
        records[3].has_report = true;
        let filter = ReportFilter::new(ReportCondition::Report);
        let page = list_reservation_report(&records, &filter, GapRule::Strict).unwrap();
        assert_eq!(ids(&page.records), vec![4, 5]);
    }

    #[test]
    fn fully_reported_day_has_nothing_pending() {
        let mut records = day_of_lessons();
        for record in records.iter_mut() {
            record.has_report = true;
        }
        let filter = ReportFilter::new(ReportCondition::Report);
        assert_eq!(count(&records, &filter, GapRule::Tolerant).unwrap(), 0);
    }

    #[test]
    fn all_mode_lists_newest_first_without_grouping() {
        let records = day_of_lessons();
        let filter = ReportFilter::new(ReportCondition::All);
        let rows = list(&records, &filter, GapRule::Tolerant).unwrap();
        assert_eq!(ids(&rows), vec![5, 4, 3, 2, 1]);
    }

    #[test]
    fn attendance_mode_drops_unattended() {
        let mut records = day_of_lessons();
        records[0].attendance_status = AttendanceStatus::Reserved;
        records[1].attendance_status = AttendanceStatus::Cancelled;
        let filter = ReportFilter::new(ReportCondition::Attendance);
        let rows = list(&records, &filter, GapRule::Tolerant).unwrap();
        assert_eq!(ids(&rows), vec![5, 4, 3]);

        let filter = ReportFilter::new(ReportCondition::All);
        assert_eq!(count(&records, &filter, GapRule::Tolerant).unwrap(), 4);
    }

    #[test]
    fn by_teacher_sorts_teacher_first() {
        let mut records = day_of_lessons();
        records[0].teacher_id = 2;
        records[4].teacher_id = 2;
        let filter = ReportFilter::new(ReportCondition::All).with_sort(SortOrder::ByTeacher);
        let rows = list(&records, &filter, GapRule::Tolerant).unwrap();
        assert_eq!(ids(&rows), vec![4, 3, 2, 5, 1]);
    }

    #[test]
    fn count_matches_unpaged_list_for_any_paging() {
        let records = day_of_lessons();
        for condition in [
            ReportCondition::All,
            ReportCondition::Attendance,
            ReportCondition::Report,
        ] {
            let unpaged = ReportFilter::new(condition);
            let expected = list(&records, &unpaged, GapRule::Tolerant).unwrap().len();
            for (page, size) in [(None, None), (Some(1), Some(2)), (Some(3), Some(2)), (None, Some(1))] {
                let filter = ReportFilter::new(condition).with_page(page, size);
                assert_eq!(count(&records, &filter, GapRule::Tolerant).unwrap(), expected);
            }
        }
    }

    #[test]
    fn pages_walk_the_ordered_rows() {
        let records = day_of_lessons();
        let filter = ReportFilter::new(ReportCondition::All).with_page(Some(2), Some(2));
        let page = list_reservation_report(&records, &filter, GapRule::Tolerant).unwrap();
        assert_eq!(ids(&page.records), vec![3, 2]);
        assert_eq!(page.total_count, 5);

        let filter = ReportFilter::new(ReportCondition::All).with_page(Some(9), Some(2));
        assert!(list(&records, &filter, GapRule::Tolerant).unwrap().is_empty());
    }

    #[test]
    fn missing_condition_is_an_error_for_both_operations() {
        let records = day_of_lessons();
        let filter = ReportFilter::default();
        assert!(matches!(
            list(&records, &filter, GapRule::Tolerant),
            Err(ReportError::InvalidFilter(_))
        ));
        assert!(matches!(
            count(&records, &filter, GapRule::Tolerant),
            Err(ReportError::InvalidFilter(_))
        ));
    }

    #[test]
    fn empty_input_is_an_empty_report() {
        let filter = ReportFilter::new(ReportCondition::Report);
        let page = list_reservation_report(&[], &filter, GapRule::Tolerant).unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.total_count, 0);
    }
}
