use anyhow::Context;
use chrono::{Months, NaiveDate, NaiveTime};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::attendance::first_of_month;
use crate::filter::{ReportCondition, ReportFilter};
use crate::models::{
    AttendanceStatus, ReservationRecord, ReservationSlot, ScheduleSlot, Teacher, TeacherType,
};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let teachers = vec![
        (1_i64, "Mina Park", TeacherType::Ht, 1),
        (2, "Daniel Cho", TeacherType::Ht, 2),
        (3, "Sofia Reyes", TeacherType::Lt, 3),
    ];

    for (id, name, teacher_type, sort_order) in teachers {
        sqlx::query(
            r#"
            INSERT INTO tutoring.teachers (id, display_name, teacher_type, sort_order)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET display_name = EXCLUDED.display_name,
                teacher_type = EXCLUDED.teacher_type,
                sort_order = EXCLUDED.sort_order
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(teacher_type.code())
        .bind(sort_order)
        .execute(pool)
        .await?;
    }

    let students = vec![
        ("Jisoo Kim", "jisoo.kim@example.com"),
        ("Leo Martin", "leo.martin@example.com"),
    ];
    for (name, email) in &students {
        upsert_student(pool, name, email).await?;
    }

    let day = NaiveDate::from_ymd_opt(2024, 1, 1).context("invalid date")?;
    let reservations = vec![
        ("seed-001", "jisoo.kim@example.com", 1_i64, (6, 0), (6, 30), true),
        ("seed-002", "jisoo.kim@example.com", 1, (6, 30), (7, 0), true),
        ("seed-003", "jisoo.kim@example.com", 1, (7, 0), (7, 30), true),
        ("seed-004", "jisoo.kim@example.com", 1, (11, 0), (11, 30), false),
        ("seed-005", "jisoo.kim@example.com", 1, (11, 30), (12, 0), false),
        ("seed-006", "leo.martin@example.com", 3, (15, 0), (15, 30), true),
    ];

    for (source_key, email, teacher_id, start, end, has_report) in reservations {
        let student_id: i64 = sqlx::query("SELECT id FROM tutoring.students WHERE email = $1")
            .bind(email)
            .fetch_one(pool)
            .await?
            .get("id");

        sqlx::query(
            r#"
            INSERT INTO tutoring.reservations
            (student_id, teacher_id, lesson_date, start_time, end_time, status,
             has_report, course_name, lesson_count, remaining_count, assignment_count,
             today_lesson, next_lesson, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(student_id)
        .bind(teacher_id)
        .bind(day)
        .bind(hm(start)?)
        .bind(hm(end)?)
        .bind(AttendanceStatus::Attended.code())
        .bind(has_report)
        .bind("Conversation 1:1")
        .bind(24)
        .bind(12)
        .bind(1)
        .bind(None::<String>)
        .bind(None::<String>)
        .bind(source_key)
        .execute(pool)
        .await?;
    }

    let schedules = vec![
        (1_i64, (6, 0)),
        (1, (6, 30)),
        (1, (7, 0)),
        (1, (11, 0)),
        (1, (11, 30)),
        (1, (13, 10)),
        (3, (15, 0)),
        (3, (15, 30)),
    ];
    for (teacher_id, start) in schedules {
        sqlx::query(
            r#"
            INSERT INTO tutoring.schedules (teacher_id, slot_date, start_time)
            VALUES ($1, $2, $3)
            ON CONFLICT (teacher_id, slot_date, start_time) DO NOTHING
            "#,
        )
        .bind(teacher_id)
        .bind(day)
        .bind(hm(start)?)
        .execute(pool)
        .await?;
    }

    info!("seed data written");
    Ok(())
}

fn hm((hour, minute): (u32, u32)) -> anyhow::Result<NaiveTime> {
    NaiveTime::from_hms_opt(hour, minute, 0).context("invalid time")
}

async fn upsert_student(pool: &PgPool, name: &str, email: &str) -> anyhow::Result<i64> {
    let id = sqlx::query(
        r#"
        INSERT INTO tutoring.students (display_name, email)
        VALUES ($1, $2)
        ON CONFLICT (email) DO UPDATE
        SET display_name = EXCLUDED.display_name
        RETURNING id
        "#,
    )
    .bind(name)
    .bind(email)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

#[derive(Debug, Clone, PartialEq)]
enum BindValue {
    Int(i64),
    Date(NaiveDate),
    Text(String),
}

/// SQL for the reservation fetch with every present predicate pushed down.
///
/// Paging is left to the engine: pending-report grouping needs every slot of
/// a session, not just the requested page.
fn reservation_query(filter: &ReportFilter, condition: ReportCondition) -> (String, Vec<BindValue>) {
    let mut sql = String::from(
        "SELECT r.id, r.student_id, s.display_name AS student_name, r.teacher_id, \
         t.display_name AS teacher_name, r.lesson_date, r.start_time, r.end_time, \
         r.status, r.has_report, r.course_name, r.lesson_count, r.remaining_count, \
         r.assignment_count, r.today_lesson, r.next_lesson \
         FROM tutoring.reservations r \
         JOIN tutoring.students s ON s.id = r.student_id \
         JOIN tutoring.teachers t ON t.id = r.teacher_id \
         WHERE r.status <> 'CANCELLED'",
    );
    let mut binds = Vec::new();

    if let Some(teacher_id) = filter.teacher_id {
        binds.push(BindValue::Int(teacher_id));
        sql.push_str(&format!(" AND r.teacher_id = ${}", binds.len()));
    }
    if let Some(from) = filter.date_from {
        binds.push(BindValue::Date(from));
        sql.push_str(&format!(" AND r.lesson_date >= ${}", binds.len()));
    }
    if let Some(to) = filter.date_to {
        binds.push(BindValue::Date(to));
        sql.push_str(&format!(" AND r.lesson_date <= ${}", binds.len()));
    }
    if let Some(keyword) = filter.keyword() {
        binds.push(BindValue::Text(keyword.to_string()));
        sql.push_str(&format!(
            " AND s.display_name ILIKE '%' || ${} || '%'",
            binds.len()
        ));
    }
    if condition == ReportCondition::Attendance {
        sql.push_str(" AND r.status = 'ATTENDED'");
    }

    sql.push_str(" ORDER BY r.student_id, r.teacher_id, r.lesson_date, r.start_time");
    (sql, binds)
}

pub async fn fetch_reservations(
    pool: &PgPool,
    filter: &ReportFilter,
) -> anyhow::Result<Vec<ReservationRecord>> {
    let condition = filter.condition()?;
    let (sql, binds) = reservation_query(filter, condition);
    debug!(%sql, binds = binds.len(), "fetching reservations");

    let mut rows = sqlx::query(&sql);
    for value in binds {
        rows = match value {
            BindValue::Int(value) => rows.bind(value),
            BindValue::Date(value) => rows.bind(value),
            BindValue::Text(value) => rows.bind(value),
        };
    }

    let records = rows.fetch_all(pool).await?;
    let mut reservations = Vec::with_capacity(records.len());

    for row in records {
        let status: String = row.get("status");
        reservations.push(ReservationRecord {
            id: row.get("id"),
            student_id: row.get("student_id"),
            student_name: row.get("student_name"),
            teacher_id: row.get("teacher_id"),
            teacher_name: row.get("teacher_name"),
            date: row.get("lesson_date"),
            start_time: row.get("start_time"),
            end_time: row.get("end_time"),
            attendance_status: status.parse()?,
            has_report: row.get("has_report"),
            course_name: row.get("course_name"),
            lesson_count: row.get("lesson_count"),
            remaining_count: row.get("remaining_count"),
            assignment_count: row.get("assignment_count"),
            today_lesson: row.get("today_lesson"),
            next_lesson: row.get("next_lesson"),
        });
    }

    Ok(reservations)
}

pub async fn fetch_roster(pool: &PgPool) -> anyhow::Result<Vec<Teacher>> {
    let rows = sqlx::query(
        "SELECT id, display_name, teacher_type, sort_order \
         FROM tutoring.teachers WHERE active ORDER BY sort_order, id",
    )
    .fetch_all(pool)
    .await?;

    let mut teachers = Vec::with_capacity(rows.len());
    for row in rows {
        let teacher_type: String = row.get("teacher_type");
        teachers.push(Teacher {
            id: row.get("id"),
            display_name: row.get("display_name"),
            teacher_type: teacher_type.parse()?,
            sort_order: row.get("sort_order"),
        });
    }
    Ok(teachers)
}

fn month_bounds(month: NaiveDate) -> anyhow::Result<(NaiveDate, NaiveDate)> {
    let start = first_of_month(month);
    let end = start
        .checked_add_months(Months::new(1))
        .context("month is out of range")?;
    Ok((start, end))
}

pub async fn fetch_month_reservation_slots(
    pool: &PgPool,
    month: NaiveDate,
) -> anyhow::Result<Vec<ReservationSlot>> {
    let (start, end) = month_bounds(month)?;
    let rows = sqlx::query(
        "SELECT r.teacher_id, r.lesson_date, r.status \
         FROM tutoring.reservations r \
         JOIN tutoring.teachers t ON t.id = r.teacher_id \
         WHERE t.active AND r.lesson_date >= $1 AND r.lesson_date < $2",
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    let mut slots = Vec::with_capacity(rows.len());
    for row in rows {
        let status: String = row.get("status");
        slots.push(ReservationSlot {
            teacher_id: row.get("teacher_id"),
            date: row.get("lesson_date"),
            attendance_status: status.parse()?,
        });
    }
    Ok(slots)
}

pub async fn fetch_month_schedule_slots(
    pool: &PgPool,
    month: NaiveDate,
) -> anyhow::Result<Vec<ScheduleSlot>> {
    let (start, end) = month_bounds(month)?;
    let rows = sqlx::query(
        "SELECT sc.teacher_id, sc.slot_date, sc.start_time \
         FROM tutoring.schedules sc \
         JOIN tutoring.teachers t ON t.id = sc.teacher_id \
         WHERE t.active AND sc.slot_date >= $1 AND sc.slot_date < $2",
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| ScheduleSlot {
            teacher_id: row.get("teacher_id"),
            date: row.get("slot_date"),
            start_time: row.get("start_time"),
        })
        .collect())
}

#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    student_name: String,
    student_email: String,
    teacher_id: i64,
    lesson_date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    status: String,
    has_report: bool,
    course_name: String,
    lesson_count: i32,
    remaining_count: i32,
    assignment_count: i32,
    today_lesson: Option<String>,
    next_lesson: Option<String>,
    source_key: Option<String>,
}

fn source_key_for(row: &CsvRow) -> String {
    row.source_key.clone().unwrap_or_else(|| {
        format!(
            "import-{}-{}-{}-{}",
            row.student_email, row.teacher_id, row.lesson_date, row.start_time
        )
    })
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let status: AttendanceStatus = row.status.parse()?;
        let student_id = upsert_student(pool, &row.student_name, &row.student_email).await?;
        let source_key = source_key_for(&row);

        let result = sqlx::query(
            r#"
            INSERT INTO tutoring.reservations
            (student_id, teacher_id, lesson_date, start_time, end_time, status,
             has_report, course_name, lesson_count, remaining_count, assignment_count,
             today_lesson, next_lesson, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(student_id)
        .bind(row.teacher_id)
        .bind(row.lesson_date)
        .bind(row.start_time)
        .bind(row.end_time)
        .bind(status.code())
        .bind(row.has_report)
        .bind(&row.course_name)
        .bind(row.lesson_count)
        .bind(row.remaining_count)
        .bind(row.assignment_count)
        .bind(&row.today_lesson)
        .bind(&row.next_lesson)
        .bind(source_key)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    info!(inserted, path = %csv_path.display(), "imported reservations");
    Ok(inserted)
}
