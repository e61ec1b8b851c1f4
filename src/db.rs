use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "school.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            active INTEGER NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS staff(
            id TEXT PRIMARY KEY,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            designation TEXT,
            active INTEGER NOT NULL
        )",
        [],
    )?;

    // Summary columns (amount_paid, amount_pending, status) are cached
    // derivations; the gate module is the only writer.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_ledgers(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            fee_type TEXT NOT NULL,
            total_amount REAL NOT NULL,
            due_date TEXT NOT NULL,
            discount_amount REAL NOT NULL DEFAULT 0,
            discount_reason TEXT,
            late_fee_amount REAL NOT NULL DEFAULT 0,
            late_fee_applied_date TEXT,
            amount_paid REAL NOT NULL DEFAULT 0,
            amount_pending REAL NOT NULL,
            status TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, academic_year, fee_type)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_ledgers_student ON fee_ledgers(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_payments(
            id TEXT PRIMARY KEY,
            fee_id TEXT NOT NULL,
            amount REAL NOT NULL,
            method TEXT NOT NULL,
            receipt_no TEXT,
            paid_at TEXT NOT NULL,
            FOREIGN KEY(fee_id) REFERENCES fee_ledgers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_payments_fee ON fee_payments(fee_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS salary_ledgers(
            id TEXT PRIMARY KEY,
            staff_id TEXT NOT NULL,
            month TEXT NOT NULL,
            basic_salary REAL NOT NULL,
            allow_house_rent REAL NOT NULL DEFAULT 0,
            allow_transport REAL NOT NULL DEFAULT 0,
            allow_medical REAL NOT NULL DEFAULT 0,
            allow_other REAL NOT NULL DEFAULT 0,
            deduct_tax REAL NOT NULL DEFAULT 0,
            deduct_provident_fund REAL NOT NULL DEFAULT 0,
            deduct_professional_tax REAL NOT NULL DEFAULT 0,
            deduct_other REAL NOT NULL DEFAULT 0,
            total_working_days INTEGER NOT NULL,
            present_days INTEGER NOT NULL DEFAULT 0,
            absent_days INTEGER NOT NULL DEFAULT 0,
            leave_days INTEGER NOT NULL DEFAULT 0,
            half_days INTEGER NOT NULL DEFAULT 0,
            attendance_deduction REAL NOT NULL,
            gross_salary REAL NOT NULL,
            net_salary REAL NOT NULL,
            payment_status TEXT NOT NULL DEFAULT 'pending',
            FOREIGN KEY(staff_id) REFERENCES staff(id),
            UNIQUE(staff_id, month)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_salary_ledgers_staff ON salary_ledgers(staff_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            exam_type TEXT NOT NULL,
            total_marks REAL NOT NULL,
            marks_obtained REAL NOT NULL,
            passing_marks REAL NOT NULL,
            percentage REAL NOT NULL,
            grade TEXT NOT NULL,
            is_passed INTEGER NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(student_id, class_id, subject, academic_year, exam_type)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_records_student ON grade_records(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_records_class ON grade_records(class_id)",
        [],
    )?;

    // One event per subject per day; reconciliation overwrites in place.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_events(
            subject_ref TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            remarks TEXT,
            class_id TEXT,
            PRIMARY KEY(subject_ref, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_events_class ON attendance_events(class_id)",
        [],
    )?;

    // Early workspaces predate the marked_by audit column.
    ensure_attendance_events_marked_by(&conn)?;

    Ok(conn)
}

fn ensure_attendance_events_marked_by(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "attendance_events", "marked_by")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE attendance_events ADD COLUMN marked_by TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
