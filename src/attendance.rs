//! Bulk attendance reconciliation. A batch of per-subject events for one
//! date is applied as a single transaction of keyed upserts — re-submitting
//! the same batch is a no-op, and overlapping batches resolve to whichever
//! event for a subject landed last. Payroll tallies are always recounted
//! from the raw event rows, never maintained incrementally.

use crate::ledger::{AttendanceStatus, LedgerError};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone)]
pub struct EventInput {
    pub subject_ref: String,
    pub status: AttendanceStatus,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub subject_ref: String,
    pub date: String,
    pub status: String,
    pub remarks: Option<String>,
    pub marked_by: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthEventCounts {
    pub present_days: i64,
    pub absent_days: i64,
    pub leave_days: i64,
    pub half_days: i64,
    pub event_count: i64,
}

pub fn parse_month(raw: &str) -> Result<(i32, u32), LedgerError> {
    let t = raw.trim();
    let Some((y, m)) = t.split_once('-') else {
        return Err(LedgerError::invalid("month must be YYYY-MM"));
    };
    let year = y
        .parse::<i32>()
        .map_err(|_| LedgerError::invalid("month year must be numeric"))?;
    let month = m
        .parse::<u32>()
        .map_err(|_| LedgerError::invalid("month must be YYYY-MM"))?;
    if !(1..=12).contains(&month) {
        return Err(LedgerError::invalid("month must be between 01 and 12"));
    }
    Ok((year, month))
}

fn month_bounds(year: i32, month: u32) -> (String, String) {
    let start = format!("{:04}-{:02}-01", year, month);
    let end = if month == 12 {
        format!("{:04}-01-01", year + 1)
    } else {
        format!("{:04}-{:02}-01", year, month + 1)
    };
    (start, end)
}

fn upsert_event(
    conn: &Connection,
    subject_ref: &str,
    date: &str,
    status: AttendanceStatus,
    remarks: Option<&str>,
    class_id: Option<&str>,
    marked_by: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO attendance_events(subject_ref, date, status, remarks, class_id, marked_by)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(subject_ref, date) DO UPDATE SET
           status = excluded.status,
           remarks = excluded.remarks,
           class_id = excluded.class_id,
           marked_by = excluded.marked_by",
        (subject_ref, date, status.as_str(), remarks, class_id, marked_by),
    )?;
    Ok(())
}

/// Applies a class day-batch atomically. The whole batch is validated
/// before the first write; a storage failure mid-batch rolls everything
/// back and surfaces as a retryable partial failure.
pub fn reconcile_batch(
    conn: &Connection,
    class_id: &str,
    date: NaiveDate,
    marked_by: Option<&str>,
    events: &[EventInput],
) -> Result<usize, LedgerError> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| r.get(0))
        .optional()?;
    if found.is_none() {
        return Err(LedgerError::NotFound {
            entity: "class",
            id: class_id.to_string(),
        });
    }

    for event in events {
        if event.subject_ref.trim().is_empty() {
            return Err(LedgerError::invalid("event subjectRef must not be empty"));
        }
        let enrolled: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM students WHERE id = ? AND class_id = ?",
                (&event.subject_ref, class_id),
                |r| r.get(0),
            )
            .optional()?;
        if enrolled.is_none() {
            return Err(LedgerError::invalid(format!(
                "subject {} is not a student of class {}",
                event.subject_ref, class_id
            )));
        }
    }

    let date = date.format("%Y-%m-%d").to_string();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| LedgerError::PartialFailure(e.to_string()))?;
    for event in events {
        upsert_event(
            &tx,
            &event.subject_ref,
            &date,
            event.status,
            event.remarks.as_deref(),
            Some(class_id),
            marked_by,
        )
        .map_err(|e| LedgerError::PartialFailure(e.to_string()))?;
    }
    tx.commit()
        .map_err(|e| LedgerError::PartialFailure(e.to_string()))?;

    info!(class_id = %class_id, date = %date, count = events.len(), "attendance batch reconciled");
    Ok(events.len())
}

/// Single-record staff case of reconciliation, same key and overwrite
/// semantics as the batch path.
pub fn staff_check_in(
    conn: &Connection,
    staff_id: &str,
    date: NaiveDate,
    status: AttendanceStatus,
    remarks: Option<&str>,
    marked_by: Option<&str>,
) -> Result<(), LedgerError> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM staff WHERE id = ?", [staff_id], |r| r.get(0))
        .optional()?;
    if found.is_none() {
        return Err(LedgerError::NotFound {
            entity: "staff",
            id: staff_id.to_string(),
        });
    }

    let date = date.format("%Y-%m-%d").to_string();
    upsert_event(conn, staff_id, &date, status, remarks, None, marked_by)?;
    info!(staff_id = %staff_id, date = %date, status = status.as_str(), "staff attendance recorded");
    Ok(())
}

/// Recounts a subject's month from the raw event rows. Late arrivals count
/// as present days; only absences and half days reduce pay downstream.
pub fn month_event_counts(
    conn: &Connection,
    subject_ref: &str,
    month: &str,
) -> Result<MonthEventCounts, LedgerError> {
    let (year, month_num) = parse_month(month)?;
    let (start, end) = month_bounds(year, month_num);

    let mut stmt = conn.prepare(
        "SELECT status, COUNT(*) FROM attendance_events
         WHERE subject_ref = ? AND date >= ? AND date < ?
         GROUP BY status",
    )?;
    let rows = stmt
        .query_map((subject_ref, &start, &end), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut counts = MonthEventCounts {
        present_days: 0,
        absent_days: 0,
        leave_days: 0,
        half_days: 0,
        event_count: 0,
    };
    for (status, n) in rows {
        counts.event_count += n;
        match AttendanceStatus::parse(&status)? {
            AttendanceStatus::Present | AttendanceStatus::Late => counts.present_days += n,
            AttendanceStatus::Absent => counts.absent_days += n,
            AttendanceStatus::OnLeave => counts.leave_days += n,
            AttendanceStatus::HalfDay => counts.half_days += n,
        }
    }
    Ok(counts)
}

pub fn events_for_day(
    conn: &Connection,
    class_id: &str,
    date: NaiveDate,
) -> Result<Vec<EventRecord>, LedgerError> {
    let date = date.format("%Y-%m-%d").to_string();
    let mut stmt = conn.prepare(
        "SELECT subject_ref, date, status, remarks, marked_by
         FROM attendance_events
         WHERE class_id = ? AND date = ?
         ORDER BY subject_ref",
    )?;
    let rows = stmt
        .query_map((class_id, &date), |r| {
            Ok(EventRecord {
                subject_ref: r.get(0)?,
                date: r.get(1)?,
                status: r.get(2)?,
                remarks: r.get(3)?,
                marked_by: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_workspace(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    fn seeded_conn() -> Connection {
        let conn = crate::db::open_db(&temp_workspace("schoold-attendance")).expect("open db");
        conn.execute("INSERT INTO classes(id, name) VALUES('c1', 'Grade 8')", [])
            .expect("class");
        for sid in ["s1", "s2", "s3"] {
            conn.execute(
                "INSERT INTO students(id, class_id, last_name, first_name, active)
                 VALUES(?, 'c1', 'Doe', ?, 1)",
                (sid, sid),
            )
            .expect("student");
        }
        conn.execute(
            "INSERT INTO staff(id, last_name, first_name, designation, active)
             VALUES('t1', 'Rahman', 'Ayesha', 'Teacher', 1)",
            [],
        )
        .expect("staff");
        conn
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, d).expect("date")
    }

    fn batch(entries: &[(&str, AttendanceStatus)]) -> Vec<EventInput> {
        entries
            .iter()
            .map(|(id, status)| EventInput {
                subject_ref: id.to_string(),
                status: *status,
                remarks: None,
            })
            .collect()
    }

    fn event_rows(conn: &Connection) -> Vec<(String, String)> {
        let mut stmt = conn
            .prepare("SELECT subject_ref, status FROM attendance_events ORDER BY subject_ref, date")
            .expect("prepare");
        stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .expect("query")
            .collect::<Result<Vec<_>, _>>()
            .expect("rows")
    }

    #[test]
    fn resubmitting_a_batch_changes_nothing() {
        let conn = seeded_conn();
        let b = batch(&[
            ("s1", AttendanceStatus::Present),
            ("s2", AttendanceStatus::Absent),
            ("s3", AttendanceStatus::HalfDay),
        ]);
        let n = reconcile_batch(&conn, "c1", day(7), Some("t1"), &b).expect("first apply");
        assert_eq!(n, 3);
        let first = event_rows(&conn);

        let n = reconcile_batch(&conn, "c1", day(7), Some("t1"), &b).expect("second apply");
        assert_eq!(n, 3);
        assert_eq!(event_rows(&conn), first);
    }

    #[test]
    fn overlapping_batches_last_write_wins_per_subject() {
        let conn = seeded_conn();
        reconcile_batch(
            &conn,
            "c1",
            day(8),
            None,
            &batch(&[
                ("s1", AttendanceStatus::Absent),
                ("s2", AttendanceStatus::Absent),
            ]),
        )
        .expect("first batch");
        reconcile_batch(
            &conn,
            "c1",
            day(8),
            None,
            &batch(&[
                ("s2", AttendanceStatus::Present),
                ("s3", AttendanceStatus::OnLeave),
            ]),
        )
        .expect("second batch");

        let rows = event_rows(&conn);
        assert_eq!(
            rows,
            vec![
                ("s1".to_string(), "absent".to_string()),
                ("s2".to_string(), "present".to_string()),
                ("s3".to_string(), "on_leave".to_string()),
            ]
        );
    }

    #[test]
    fn unknown_subject_rejects_whole_batch() {
        let conn = seeded_conn();
        let result = reconcile_batch(
            &conn,
            "c1",
            day(9),
            None,
            &batch(&[
                ("s1", AttendanceStatus::Present),
                ("ghost", AttendanceStatus::Present),
            ]),
        );
        assert!(matches!(result, Err(LedgerError::InvalidInput(_))));
        assert!(event_rows(&conn).is_empty());
    }

    #[test]
    fn month_counts_group_late_with_present() {
        let conn = seeded_conn();
        let entries = [
            (1, AttendanceStatus::Present),
            (2, AttendanceStatus::Late),
            (3, AttendanceStatus::Absent),
            (4, AttendanceStatus::HalfDay),
            (5, AttendanceStatus::OnLeave),
            (6, AttendanceStatus::Present),
        ];
        for (d, status) in entries {
            staff_check_in(&conn, "t1", day(d), status, None, None).expect("check in");
        }
        // A different month must not bleed in.
        staff_check_in(
            &conn,
            "t1",
            NaiveDate::from_ymd_opt(2025, 5, 1).expect("date"),
            AttendanceStatus::Absent,
            None,
            None,
        )
        .expect("check in");

        let counts = month_event_counts(&conn, "t1", "2025-04").expect("counts");
        assert_eq!(counts.present_days, 3);
        assert_eq!(counts.absent_days, 1);
        assert_eq!(counts.half_days, 1);
        assert_eq!(counts.leave_days, 1);
        assert_eq!(counts.event_count, 6);
    }

    #[test]
    fn check_in_overwrites_same_day() {
        let conn = seeded_conn();
        staff_check_in(&conn, "t1", day(10), AttendanceStatus::Absent, None, None)
            .expect("check in");
        staff_check_in(
            &conn,
            "t1",
            day(10),
            AttendanceStatus::Present,
            Some("arrived after roll call"),
            None,
        )
        .expect("overwrite");
        let rows = event_rows(&conn);
        assert_eq!(rows, vec![("t1".to_string(), "present".to_string())]);
    }

    #[test]
    fn month_key_is_validated() {
        assert!(parse_month("2025-04").is_ok());
        assert!(parse_month("2025-13").is_err());
        assert!(parse_month("April").is_err());
        assert!(parse_month("2025").is_err());
    }
}
