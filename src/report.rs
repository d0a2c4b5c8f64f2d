use std::fmt::Write;

use crate::filter::ReportFilter;
use crate::models::{AttendanceMatrix, AttendanceRow, AttendanceRowKind, ReservationRecord};
use crate::reservation_report::ReportPage;

fn filter_label(filter: &ReportFilter) -> String {
    let mut parts = Vec::new();
    if let Some(condition) = filter.report_condition {
        parts.push(format!("condition {condition}"));
    }
    if let Some(teacher_id) = filter.teacher_id {
        parts.push(format!("teacher #{teacher_id}"));
    }
    match (filter.date_from, filter.date_to) {
        (Some(from), Some(to)) => parts.push(format!("{from} to {to}")),
        (Some(from), None) => parts.push(format!("from {from}")),
        (None, Some(to)) => parts.push(format!("until {to}")),
        (None, None) => {}
    }
    if let Some(keyword) = filter.keyword() {
        parts.push(format!("student matching \"{keyword}\""));
    }
    if parts.is_empty() {
        "all reservations".to_string()
    } else {
        parts.join(", ")
    }
}

pub fn reservation_line(record: &ReservationRecord) -> String {
    let report = if record.has_report {
        "reported"
    } else {
        "report missing"
    };
    format!(
        "{} {}-{} {} with {} ({}, {}) {}",
        record.date,
        record.start_time.format("%H:%M"),
        record.end_time.format("%H:%M"),
        record.student_name,
        record.teacher_name,
        record.course_name,
        record.attendance_status,
        report
    )
}

pub fn build_reservation_report(filter: &ReportFilter, page: &ReportPage) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Reservation Report");
    let _ = writeln!(output, "Generated for {}", filter_label(filter));
    let _ = writeln!(
        output,
        "Showing {} of {} matching reservations",
        page.records.len(),
        page.total_count
    );
    let _ = writeln!(output);

    if page.records.is_empty() {
        let _ = writeln!(output, "No reservations match this filter.");
    } else {
        for record in &page.records {
            let _ = writeln!(output, "- {}", reservation_line(record));
        }
    }

    output
}

fn attendance_table(output: &mut String, rows: &[AttendanceRow]) {
    let _ = writeln!(output, "| Teacher | Type | Reservations | Schedules | Rate |");
    let _ = writeln!(output, "|---|---|---:|---:|---:|");
    for row in rows {
        let label = match row.kind {
            AttendanceRowKind::Teacher => row.label.clone(),
            AttendanceRowKind::HtAverage | AttendanceRowKind::LtAverage => {
                format!("**{}**", row.label)
            }
        };
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {:.2}% |",
            label, row.teacher_type, row.reservation_count, row.schedule_count, row.attendance_rate
        );
    }
}

pub fn build_attendance_report(matrix: &AttendanceMatrix) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Attendance Report");
    let _ = writeln!(output, "Month of {}", matrix.month.format("%Y-%m"));

    for day in &matrix.days {
        let _ = writeln!(output);
        let _ = writeln!(output, "## {}", day.date.format("%Y-%m-%d (%a)"));
        if day.attendances.is_empty() {
            let _ = writeln!(output, "No teacher activity.");
        } else {
            attendance_table(&mut output, &day.attendances);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Month Total");
    if matrix.totals.is_empty() {
        let _ = writeln!(output, "No teacher activity this month.");
    } else {
        attendance_table(&mut output, &matrix.totals);
    }

    output
}

/// Writes report rows as CSV for the export batch.
pub fn write_reservations_csv<W: std::io::Write>(
    writer: W,
    records: &[ReservationRecord],
) -> anyhow::Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for record in records {
        csv.serialize(record)?;
    }
    csv.flush()?;
    Ok(())
}
