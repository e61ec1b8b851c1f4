//! The single write path for ledger records. Every mutation loads the
//! record, re-derives its summary from the underlying transactional data,
//! and persists both inside one SQLite transaction — a summary column is
//! never written outside this module, and derivation is never skipped or
//! deferred. Reads return the stored summary as-is.

use crate::attendance;
use crate::ledger::{
    derive_fee, derive_grade, derive_salary, Allowances, AttendanceTally, Deductions, FeeInputs,
    FeeSummary, FeeType, GradeInputs, GradeSummary, LedgerError, PaymentStatus, SalaryInputs,
    SalarySummary,
};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

pub fn parse_date(field: &'static str, raw: &str) -> Result<NaiveDate, LedgerError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| LedgerError::invalid(format!("{} must be YYYY-MM-DD", field)))
}

fn student_exists(conn: &Connection, student_id: &str) -> Result<bool, LedgerError> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| r.get(0))
        .optional()?;
    Ok(found.is_some())
}

fn staff_exists(conn: &Connection, staff_id: &str) -> Result<bool, LedgerError> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM staff WHERE id = ?", [staff_id], |r| r.get(0))
        .optional()?;
    Ok(found.is_some())
}

fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, LedgerError> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| r.get(0))
        .optional()?;
    Ok(found.is_some())
}

// ---------------------------------------------------------------------------
// Fees
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewFee {
    pub student_id: String,
    pub academic_year: String,
    pub fee_type: FeeType,
    pub total_amount: f64,
    pub due_date: NaiveDate,
    pub discount_amount: f64,
    pub discount_reason: Option<String>,
    pub late_fee_amount: f64,
}

#[derive(Debug, Clone, Default)]
pub struct FeeAdjust {
    pub total_amount: Option<f64>,
    pub discount_amount: Option<f64>,
    pub discount_reason: Option<String>,
    pub late_fee_amount: Option<f64>,
    pub late_fee_applied_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeRecord {
    pub id: String,
    pub student_id: String,
    pub academic_year: String,
    pub fee_type: String,
    pub total_amount: f64,
    pub due_date: String,
    pub discount_amount: f64,
    pub discount_reason: Option<String>,
    pub late_fee_amount: f64,
    pub late_fee_applied_date: Option<String>,
    pub amount_paid: f64,
    pub amount_pending: f64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeePaymentRecord {
    pub id: String,
    pub amount: f64,
    pub method: String,
    pub receipt_no: Option<String>,
    pub paid_at: String,
}

struct FeeRow {
    total_amount: f64,
    due_date: NaiveDate,
    discount_amount: f64,
    late_fee_amount: f64,
}

fn load_fee_row(conn: &Connection, fee_id: &str) -> Result<FeeRow, LedgerError> {
    let row: Option<(f64, String, f64, f64)> = conn
        .query_row(
            "SELECT total_amount, due_date, discount_amount, late_fee_amount
             FROM fee_ledgers WHERE id = ?",
            [fee_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;
    let Some((total_amount, due_date, discount_amount, late_fee_amount)) = row else {
        return Err(LedgerError::NotFound {
            entity: "fee ledger",
            id: fee_id.to_string(),
        });
    };
    Ok(FeeRow {
        total_amount,
        due_date: parse_date("stored due date", &due_date)?,
        discount_amount,
        late_fee_amount,
    })
}

fn sum_payments(conn: &Connection, fee_id: &str) -> Result<f64, LedgerError> {
    let sum: f64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM fee_payments WHERE fee_id = ?",
        [fee_id],
        |r| r.get(0),
    )?;
    Ok(sum)
}

fn persist_fee_summary(
    conn: &Connection,
    fee_id: &str,
    summary: &FeeSummary,
) -> Result<(), LedgerError> {
    conn.execute(
        "UPDATE fee_ledgers SET amount_paid = ?, amount_pending = ?, status = ? WHERE id = ?",
        (
            summary.amount_paid,
            summary.amount_pending,
            summary.status.as_str(),
            fee_id,
        ),
    )?;
    Ok(())
}

pub fn create_fee(
    conn: &Connection,
    fee: &NewFee,
    today: NaiveDate,
) -> Result<(String, FeeSummary), LedgerError> {
    if !student_exists(conn, &fee.student_id)? {
        return Err(LedgerError::NotFound {
            entity: "student",
            id: fee.student_id.clone(),
        });
    }
    if fee.academic_year.trim().is_empty() {
        return Err(LedgerError::invalid("academic year must not be empty"));
    }

    let duplicate: Option<String> = conn
        .query_row(
            "SELECT id FROM fee_ledgers
             WHERE student_id = ? AND academic_year = ? AND fee_type = ?",
            (&fee.student_id, &fee.academic_year, fee.fee_type.as_str()),
            |r| r.get(0),
        )
        .optional()?;
    if duplicate.is_some() {
        return Err(LedgerError::Conflict(format!(
            "a {} fee for this student and academic year already exists",
            fee.fee_type.as_str()
        )));
    }

    let summary = derive_fee(
        &FeeInputs {
            total_amount: fee.total_amount,
            discount: fee.discount_amount,
            late_fee: fee.late_fee_amount,
            amount_paid: 0.0,
            due_date: fee.due_date,
        },
        today,
    )?;

    let fee_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO fee_ledgers(
            id, student_id, academic_year, fee_type, total_amount, due_date,
            discount_amount, discount_reason, late_fee_amount,
            amount_paid, amount_pending, status
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &fee_id,
            &fee.student_id,
            &fee.academic_year,
            fee.fee_type.as_str(),
            fee.total_amount,
            fee.due_date.format("%Y-%m-%d").to_string(),
            fee.discount_amount,
            &fee.discount_reason,
            fee.late_fee_amount,
            summary.amount_paid,
            summary.amount_pending,
            summary.status.as_str(),
        ),
    )?;

    info!(fee_id = %fee_id, student_id = %fee.student_id, "fee ledger created");
    Ok((fee_id, summary))
}

pub fn apply_payment(
    conn: &Connection,
    fee_id: &str,
    amount: f64,
    method: &str,
    receipt_no: Option<&str>,
    paid_at: Option<&str>,
    today: NaiveDate,
) -> Result<FeeSummary, LedgerError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(LedgerError::invalid(
            "payment amount must be greater than zero",
        ));
    }
    if method.trim().is_empty() {
        return Err(LedgerError::invalid("payment method must not be empty"));
    }

    let tx = conn.unchecked_transaction()?;
    let row = load_fee_row(&tx, fee_id)?;

    let paid_at = match paid_at {
        Some(raw) if !raw.trim().is_empty() => raw.trim().to_string(),
        _ => Utc::now().to_rfc3339(),
    };
    tx.execute(
        "INSERT INTO fee_payments(id, fee_id, amount, method, receipt_no, paid_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            fee_id,
            amount,
            method.trim(),
            receipt_no.map(str::trim),
            &paid_at,
        ),
    )?;

    // amount_paid is re-summed from the payment history inside the
    // transaction, never maintained incrementally.
    let amount_paid = sum_payments(&tx, fee_id)?;
    let summary = derive_fee(
        &FeeInputs {
            total_amount: row.total_amount,
            discount: row.discount_amount,
            late_fee: row.late_fee_amount,
            amount_paid,
            due_date: row.due_date,
        },
        today,
    )?;
    persist_fee_summary(&tx, fee_id, &summary)?;
    tx.commit()?;

    info!(fee_id = %fee_id, amount, status = summary.status.as_str(), "fee payment applied");
    Ok(summary)
}

pub fn adjust_fee(
    conn: &Connection,
    fee_id: &str,
    adjust: &FeeAdjust,
    today: NaiveDate,
) -> Result<FeeSummary, LedgerError> {
    let tx = conn.unchecked_transaction()?;
    let row = load_fee_row(&tx, fee_id)?;

    let total_amount = adjust.total_amount.unwrap_or(row.total_amount);
    let discount_amount = adjust.discount_amount.unwrap_or(row.discount_amount);
    let late_fee_amount = adjust.late_fee_amount.unwrap_or(row.late_fee_amount);
    let due_date = adjust.due_date.unwrap_or(row.due_date);

    let amount_paid = sum_payments(&tx, fee_id)?;
    let summary = derive_fee(
        &FeeInputs {
            total_amount,
            discount: discount_amount,
            late_fee: late_fee_amount,
            amount_paid,
            due_date,
        },
        today,
    )?;

    tx.execute(
        "UPDATE fee_ledgers SET total_amount = ?, discount_amount = ?, late_fee_amount = ?, due_date = ?
         WHERE id = ?",
        (
            total_amount,
            discount_amount,
            late_fee_amount,
            due_date.format("%Y-%m-%d").to_string(),
            fee_id,
        ),
    )?;
    if let Some(reason) = &adjust.discount_reason {
        tx.execute(
            "UPDATE fee_ledgers SET discount_reason = ? WHERE id = ?",
            (reason, fee_id),
        )?;
    }
    if let Some(applied) = adjust.late_fee_applied_date {
        tx.execute(
            "UPDATE fee_ledgers SET late_fee_applied_date = ? WHERE id = ?",
            (applied.format("%Y-%m-%d").to_string(), fee_id),
        )?;
    }
    persist_fee_summary(&tx, fee_id, &summary)?;
    tx.commit()?;

    info!(fee_id = %fee_id, status = summary.status.as_str(), "fee ledger adjusted");
    Ok(summary)
}

/// A ledger with payment history is never deleted without the explicit
/// admin override.
pub fn delete_fee(conn: &Connection, fee_id: &str, force: bool) -> Result<(), LedgerError> {
    let tx = conn.unchecked_transaction()?;
    load_fee_row(&tx, fee_id)?;

    let payment_count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM fee_payments WHERE fee_id = ?",
        [fee_id],
        |r| r.get(0),
    )?;
    if payment_count > 0 && !force {
        return Err(LedgerError::Conflict(format!(
            "fee ledger has {} recorded payments; deletion requires force",
            payment_count
        )));
    }

    tx.execute("DELETE FROM fee_payments WHERE fee_id = ?", [fee_id])?;
    tx.execute("DELETE FROM fee_ledgers WHERE id = ?", [fee_id])?;
    tx.commit()?;

    info!(fee_id = %fee_id, payment_count, "fee ledger deleted");
    Ok(())
}

pub fn fee_record(conn: &Connection, fee_id: &str) -> Result<FeeRecord, LedgerError> {
    let record = conn
        .query_row(
            "SELECT id, student_id, academic_year, fee_type, total_amount, due_date,
                    discount_amount, discount_reason, late_fee_amount, late_fee_applied_date,
                    amount_paid, amount_pending, status
             FROM fee_ledgers WHERE id = ?",
            [fee_id],
            |r| {
                Ok(FeeRecord {
                    id: r.get(0)?,
                    student_id: r.get(1)?,
                    academic_year: r.get(2)?,
                    fee_type: r.get(3)?,
                    total_amount: r.get(4)?,
                    due_date: r.get(5)?,
                    discount_amount: r.get(6)?,
                    discount_reason: r.get(7)?,
                    late_fee_amount: r.get(8)?,
                    late_fee_applied_date: r.get(9)?,
                    amount_paid: r.get(10)?,
                    amount_pending: r.get(11)?,
                    status: r.get(12)?,
                })
            },
        )
        .optional()?;
    record.ok_or_else(|| LedgerError::NotFound {
        entity: "fee ledger",
        id: fee_id.to_string(),
    })
}

pub fn fee_payments(conn: &Connection, fee_id: &str) -> Result<Vec<FeePaymentRecord>, LedgerError> {
    let mut stmt = conn.prepare(
        "SELECT id, amount, method, receipt_no, paid_at
         FROM fee_payments WHERE fee_id = ? ORDER BY paid_at, id",
    )?;
    let rows = stmt
        .query_map([fee_id], |r| {
            Ok(FeePaymentRecord {
                id: r.get(0)?,
                amount: r.get(1)?,
                method: r.get(2)?,
                receipt_no: r.get(3)?,
                paid_at: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn fees_by_student(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<FeeRecord>, LedgerError> {
    if !student_exists(conn, student_id)? {
        return Err(LedgerError::NotFound {
            entity: "student",
            id: student_id.to_string(),
        });
    }
    let mut stmt = conn.prepare(
        "SELECT id, student_id, academic_year, fee_type, total_amount, due_date,
                discount_amount, discount_reason, late_fee_amount, late_fee_applied_date,
                amount_paid, amount_pending, status
         FROM fee_ledgers WHERE student_id = ? ORDER BY academic_year, fee_type",
    )?;
    let rows = stmt
        .query_map([student_id], |r| {
            Ok(FeeRecord {
                id: r.get(0)?,
                student_id: r.get(1)?,
                academic_year: r.get(2)?,
                fee_type: r.get(3)?,
                total_amount: r.get(4)?,
                due_date: r.get(5)?,
                discount_amount: r.get(6)?,
                discount_reason: r.get(7)?,
                late_fee_amount: r.get(8)?,
                late_fee_applied_date: r.get(9)?,
                amount_paid: r.get(10)?,
                amount_pending: r.get(11)?,
                status: r.get(12)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Salaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewSalary {
    pub staff_id: String,
    pub month: String,
    pub basic_salary: f64,
    pub allowances: Allowances,
    pub deductions: Deductions,
    pub total_working_days: i64,
    pub present_days: i64,
    pub absent_days: i64,
    pub leave_days: i64,
    pub half_days: i64,
}

#[derive(Debug, Clone, Default)]
pub struct SalaryUpdate {
    pub basic_salary: Option<f64>,
    pub allowances: Option<Allowances>,
    pub deductions: Option<Deductions>,
    pub total_working_days: Option<i64>,
    pub present_days: Option<i64>,
    pub absent_days: Option<i64>,
    pub leave_days: Option<i64>,
    pub half_days: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalaryRecord {
    pub id: String,
    pub staff_id: String,
    pub month: String,
    pub basic_salary: f64,
    pub allowances: Allowances,
    pub deductions: Deductions,
    pub tally: AttendanceTally,
    pub attendance_deduction: f64,
    pub gross_salary: f64,
    pub net_salary: f64,
    pub payment_status: String,
}

struct SalaryRow {
    id: String,
    basic_salary: f64,
    allowances: Allowances,
    deductions: Deductions,
    tally: AttendanceTally,
}

fn load_salary_row(conn: &Connection, salary_id: &str) -> Result<SalaryRow, LedgerError> {
    let row = conn
        .query_row(
            "SELECT id, basic_salary,
                    allow_house_rent, allow_transport, allow_medical, allow_other,
                    deduct_tax, deduct_provident_fund, deduct_professional_tax, deduct_other,
                    total_working_days, present_days, absent_days, leave_days, half_days
             FROM salary_ledgers WHERE id = ?",
            [salary_id],
            |r| {
                Ok(SalaryRow {
                    id: r.get(0)?,
                    basic_salary: r.get(1)?,
                    allowances: Allowances {
                        house_rent: r.get(2)?,
                        transport: r.get(3)?,
                        medical: r.get(4)?,
                        other: r.get(5)?,
                    },
                    deductions: Deductions {
                        tax: r.get(6)?,
                        provident_fund: r.get(7)?,
                        professional_tax: r.get(8)?,
                        other: r.get(9)?,
                    },
                    tally: AttendanceTally {
                        total_working_days: r.get(10)?,
                        present_days: r.get(11)?,
                        absent_days: r.get(12)?,
                        leave_days: r.get(13)?,
                        half_days: r.get(14)?,
                    },
                })
            },
        )
        .optional()?;
    row.ok_or_else(|| LedgerError::NotFound {
        entity: "salary ledger",
        id: salary_id.to_string(),
    })
}

fn persist_salary(
    conn: &Connection,
    row: &SalaryRow,
    summary: &SalarySummary,
) -> Result<(), LedgerError> {
    conn.execute(
        "UPDATE salary_ledgers SET
            basic_salary = ?,
            allow_house_rent = ?, allow_transport = ?, allow_medical = ?, allow_other = ?,
            deduct_tax = ?, deduct_provident_fund = ?, deduct_professional_tax = ?, deduct_other = ?,
            total_working_days = ?, present_days = ?, absent_days = ?, leave_days = ?, half_days = ?,
            attendance_deduction = ?, gross_salary = ?, net_salary = ?
         WHERE id = ?",
        rusqlite::params![
            row.basic_salary,
            row.allowances.house_rent,
            row.allowances.transport,
            row.allowances.medical,
            row.allowances.other,
            row.deductions.tax,
            row.deductions.provident_fund,
            row.deductions.professional_tax,
            row.deductions.other,
            row.tally.total_working_days,
            row.tally.present_days,
            row.tally.absent_days,
            row.tally.leave_days,
            row.tally.half_days,
            summary.attendance_deduction,
            summary.gross_salary,
            summary.net_salary,
            row.id,
        ],
    )?;
    Ok(())
}

pub fn create_salary(
    conn: &Connection,
    salary: &NewSalary,
) -> Result<(String, SalarySummary), LedgerError> {
    if !staff_exists(conn, &salary.staff_id)? {
        return Err(LedgerError::NotFound {
            entity: "staff",
            id: salary.staff_id.clone(),
        });
    }
    attendance::parse_month(&salary.month)?;

    // One salary ledger per staff member per month; a second creation
    // attempt is a conflict, not an overwrite.
    let duplicate: Option<String> = conn
        .query_row(
            "SELECT id FROM salary_ledgers WHERE staff_id = ? AND month = ?",
            (&salary.staff_id, &salary.month),
            |r| r.get(0),
        )
        .optional()?;
    if duplicate.is_some() {
        return Err(LedgerError::Conflict(
            "one salary per staff per month".to_string(),
        ));
    }

    let summary = derive_salary(&SalaryInputs {
        basic_salary: salary.basic_salary,
        allowances: salary.allowances,
        deductions: salary.deductions,
        tally: AttendanceTally {
            total_working_days: salary.total_working_days,
            present_days: salary.present_days,
            absent_days: salary.absent_days,
            leave_days: salary.leave_days,
            half_days: salary.half_days,
        },
    })?;

    let salary_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO salary_ledgers(
            id, staff_id, month, basic_salary,
            allow_house_rent, allow_transport, allow_medical, allow_other,
            deduct_tax, deduct_provident_fund, deduct_professional_tax, deduct_other,
            total_working_days, present_days, absent_days, leave_days, half_days,
            attendance_deduction, gross_salary, net_salary, payment_status
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending')",
        rusqlite::params![
            &salary_id,
            &salary.staff_id,
            &salary.month,
            salary.basic_salary,
            salary.allowances.house_rent,
            salary.allowances.transport,
            salary.allowances.medical,
            salary.allowances.other,
            salary.deductions.tax,
            salary.deductions.provident_fund,
            salary.deductions.professional_tax,
            salary.deductions.other,
            salary.total_working_days,
            salary.present_days,
            salary.absent_days,
            salary.leave_days,
            salary.half_days,
            summary.attendance_deduction,
            summary.gross_salary,
            summary.net_salary,
        ],
    )?;

    info!(salary_id = %salary_id, staff_id = %salary.staff_id, month = %salary.month, "salary ledger created");
    Ok((salary_id, summary))
}

pub fn update_salary(
    conn: &Connection,
    salary_id: &str,
    update: &SalaryUpdate,
) -> Result<SalarySummary, LedgerError> {
    let tx = conn.unchecked_transaction()?;
    let mut row = load_salary_row(&tx, salary_id)?;

    if let Some(v) = update.basic_salary {
        row.basic_salary = v;
    }
    if let Some(v) = update.allowances {
        row.allowances = v;
    }
    if let Some(v) = update.deductions {
        row.deductions = v;
    }
    if let Some(v) = update.total_working_days {
        row.tally.total_working_days = v;
    }
    if let Some(v) = update.present_days {
        row.tally.present_days = v;
    }
    if let Some(v) = update.absent_days {
        row.tally.absent_days = v;
    }
    if let Some(v) = update.leave_days {
        row.tally.leave_days = v;
    }
    if let Some(v) = update.half_days {
        row.tally.half_days = v;
    }

    let summary = derive_salary(&SalaryInputs {
        basic_salary: row.basic_salary,
        allowances: row.allowances,
        deductions: row.deductions,
        tally: row.tally,
    })?;
    persist_salary(&tx, &row, &summary)?;
    tx.commit()?;

    info!(salary_id = %salary_id, net = summary.net_salary, "salary ledger updated");
    Ok(summary)
}

/// Status moves forward only; the numeric summary is untouched.
pub fn set_salary_payment_status(
    conn: &Connection,
    salary_id: &str,
    next: PaymentStatus,
) -> Result<(), LedgerError> {
    let current: Option<String> = conn
        .query_row(
            "SELECT payment_status FROM salary_ledgers WHERE id = ?",
            [salary_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(current) = current else {
        return Err(LedgerError::NotFound {
            entity: "salary ledger",
            id: salary_id.to_string(),
        });
    };
    let current = PaymentStatus::parse(&current)?;
    if !current.can_advance_to(next) {
        return Err(LedgerError::invalid(format!(
            "payment status cannot move from {} to {}",
            current.as_str(),
            next.as_str()
        )));
    }
    conn.execute(
        "UPDATE salary_ledgers SET payment_status = ? WHERE id = ?",
        (next.as_str(), salary_id),
    )?;
    info!(salary_id = %salary_id, status = next.as_str(), "salary payment status advanced");
    Ok(())
}

/// Replaces the event-derived counters with a fresh count over the raw
/// attendance events for the month, then re-derives pay. Working days stay
/// as configured on the ledger.
pub fn finalize_salary_attendance(
    conn: &Connection,
    staff_id: &str,
    month: &str,
) -> Result<(AttendanceTally, SalarySummary), LedgerError> {
    let tx = conn.unchecked_transaction()?;

    let salary_id: Option<String> = tx
        .query_row(
            "SELECT id FROM salary_ledgers WHERE staff_id = ? AND month = ?",
            (staff_id, month),
            |r| r.get(0),
        )
        .optional()?;
    let Some(salary_id) = salary_id else {
        return Err(LedgerError::NotFound {
            entity: "salary ledger",
            id: format!("{}/{}", staff_id, month),
        });
    };

    let mut row = load_salary_row(&tx, &salary_id)?;
    let counts = attendance::month_event_counts(&tx, staff_id, month)?;
    row.tally.present_days = counts.present_days;
    row.tally.absent_days = counts.absent_days;
    row.tally.leave_days = counts.leave_days;
    row.tally.half_days = counts.half_days;

    let summary = derive_salary(&SalaryInputs {
        basic_salary: row.basic_salary,
        allowances: row.allowances,
        deductions: row.deductions,
        tally: row.tally,
    })?;
    persist_salary(&tx, &row, &summary)?;
    let tally = row.tally;
    tx.commit()?;

    info!(
        staff_id = %staff_id,
        month = %month,
        absent = tally.absent_days,
        half = tally.half_days,
        "salary attendance finalized"
    );
    Ok((tally, summary))
}

pub fn salary_record(
    conn: &Connection,
    staff_id: &str,
    month: &str,
) -> Result<SalaryRecord, LedgerError> {
    let record = conn
        .query_row(
            "SELECT id, staff_id, month, basic_salary,
                    allow_house_rent, allow_transport, allow_medical, allow_other,
                    deduct_tax, deduct_provident_fund, deduct_professional_tax, deduct_other,
                    total_working_days, present_days, absent_days, leave_days, half_days,
                    attendance_deduction, gross_salary, net_salary, payment_status
             FROM salary_ledgers WHERE staff_id = ? AND month = ?",
            (staff_id, month),
            |r| {
                Ok(SalaryRecord {
                    id: r.get(0)?,
                    staff_id: r.get(1)?,
                    month: r.get(2)?,
                    basic_salary: r.get(3)?,
                    allowances: Allowances {
                        house_rent: r.get(4)?,
                        transport: r.get(5)?,
                        medical: r.get(6)?,
                        other: r.get(7)?,
                    },
                    deductions: Deductions {
                        tax: r.get(8)?,
                        provident_fund: r.get(9)?,
                        professional_tax: r.get(10)?,
                        other: r.get(11)?,
                    },
                    tally: AttendanceTally {
                        total_working_days: r.get(12)?,
                        present_days: r.get(13)?,
                        absent_days: r.get(14)?,
                        leave_days: r.get(15)?,
                        half_days: r.get(16)?,
                    },
                    attendance_deduction: r.get(17)?,
                    gross_salary: r.get(18)?,
                    net_salary: r.get(19)?,
                    payment_status: r.get(20)?,
                })
            },
        )
        .optional()?;
    record.ok_or_else(|| LedgerError::NotFound {
        entity: "salary ledger",
        id: format!("{}/{}", staff_id, month),
    })
}

// ---------------------------------------------------------------------------
// Grades
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewGrade {
    pub student_id: String,
    pub class_id: String,
    pub subject: String,
    pub academic_year: String,
    pub exam_type: String,
    pub total_marks: f64,
    pub marks_obtained: f64,
    pub passing_marks: f64,
}

#[derive(Debug, Clone, Default)]
pub struct GradeCorrection {
    pub total_marks: Option<f64>,
    pub marks_obtained: Option<f64>,
    pub passing_marks: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRecord {
    pub id: String,
    pub student_id: String,
    pub class_id: String,
    pub subject: String,
    pub academic_year: String,
    pub exam_type: String,
    pub total_marks: f64,
    pub marks_obtained: f64,
    pub passing_marks: f64,
    pub percentage: f64,
    pub grade: String,
    pub is_passed: bool,
}

pub fn record_grade(
    conn: &Connection,
    grade: &NewGrade,
) -> Result<(String, GradeSummary), LedgerError> {
    if !student_exists(conn, &grade.student_id)? {
        return Err(LedgerError::NotFound {
            entity: "student",
            id: grade.student_id.clone(),
        });
    }
    if !class_exists(conn, &grade.class_id)? {
        return Err(LedgerError::NotFound {
            entity: "class",
            id: grade.class_id.clone(),
        });
    }
    for (field, value) in [
        ("subject", &grade.subject),
        ("academic year", &grade.academic_year),
        ("exam type", &grade.exam_type),
    ] {
        if value.trim().is_empty() {
            return Err(LedgerError::invalid(format!("{} must not be empty", field)));
        }
    }

    let duplicate: Option<String> = conn
        .query_row(
            "SELECT id FROM grade_records
             WHERE student_id = ? AND class_id = ? AND subject = ?
               AND academic_year = ? AND exam_type = ?",
            (
                &grade.student_id,
                &grade.class_id,
                &grade.subject,
                &grade.academic_year,
                &grade.exam_type,
            ),
            |r| r.get(0),
        )
        .optional()?;
    if duplicate.is_some() {
        return Err(LedgerError::Conflict(
            "a grade for this exam entry already exists; use the correction path".to_string(),
        ));
    }

    let summary = derive_grade(&GradeInputs {
        total_marks: grade.total_marks,
        marks_obtained: grade.marks_obtained,
        passing_marks: grade.passing_marks,
    })?;

    let grade_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO grade_records(
            id, student_id, class_id, subject, academic_year, exam_type,
            total_marks, marks_obtained, passing_marks,
            percentage, grade, is_passed
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &grade_id,
            &grade.student_id,
            &grade.class_id,
            &grade.subject,
            &grade.academic_year,
            &grade.exam_type,
            grade.total_marks,
            grade.marks_obtained,
            grade.passing_marks,
            summary.percentage,
            summary.grade,
            summary.is_passed as i64,
        ],
    )?;

    info!(grade_id = %grade_id, student_id = %grade.student_id, grade = summary.grade, "grade recorded");
    Ok((grade_id, summary))
}

pub fn correct_grade(
    conn: &Connection,
    grade_id: &str,
    correction: &GradeCorrection,
) -> Result<GradeSummary, LedgerError> {
    let tx = conn.unchecked_transaction()?;
    let row: Option<(f64, f64, f64)> = tx
        .query_row(
            "SELECT total_marks, marks_obtained, passing_marks FROM grade_records WHERE id = ?",
            [grade_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((total_marks, marks_obtained, passing_marks)) = row else {
        return Err(LedgerError::NotFound {
            entity: "grade record",
            id: grade_id.to_string(),
        });
    };

    let inputs = GradeInputs {
        total_marks: correction.total_marks.unwrap_or(total_marks),
        marks_obtained: correction.marks_obtained.unwrap_or(marks_obtained),
        passing_marks: correction.passing_marks.unwrap_or(passing_marks),
    };
    let summary = derive_grade(&inputs)?;

    tx.execute(
        "UPDATE grade_records SET
            total_marks = ?, marks_obtained = ?, passing_marks = ?,
            percentage = ?, grade = ?, is_passed = ?
         WHERE id = ?",
        rusqlite::params![
            inputs.total_marks,
            inputs.marks_obtained,
            inputs.passing_marks,
            summary.percentage,
            summary.grade,
            summary.is_passed as i64,
            grade_id,
        ],
    )?;
    tx.commit()?;

    info!(grade_id = %grade_id, grade = summary.grade, "grade corrected");
    Ok(summary)
}

pub fn grade_record(conn: &Connection, grade_id: &str) -> Result<GradeRecord, LedgerError> {
    let record = conn
        .query_row(
            "SELECT id, student_id, class_id, subject, academic_year, exam_type,
                    total_marks, marks_obtained, passing_marks, percentage, grade, is_passed
             FROM grade_records WHERE id = ?",
            [grade_id],
            map_grade_row,
        )
        .optional()?;
    record.ok_or_else(|| LedgerError::NotFound {
        entity: "grade record",
        id: grade_id.to_string(),
    })
}

pub fn grades_by_student(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<GradeRecord>, LedgerError> {
    if !student_exists(conn, student_id)? {
        return Err(LedgerError::NotFound {
            entity: "student",
            id: student_id.to_string(),
        });
    }
    let mut stmt = conn.prepare(
        "SELECT id, student_id, class_id, subject, academic_year, exam_type,
                total_marks, marks_obtained, passing_marks, percentage, grade, is_passed
         FROM grade_records WHERE student_id = ?
         ORDER BY academic_year, exam_type, subject",
    )?;
    let rows = stmt
        .query_map([student_id], map_grade_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_grade_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<GradeRecord> {
    Ok(GradeRecord {
        id: r.get(0)?,
        student_id: r.get(1)?,
        class_id: r.get(2)?,
        subject: r.get(3)?,
        academic_year: r.get(4)?,
        exam_type: r.get(5)?,
        total_marks: r.get(6)?,
        marks_obtained: r.get(7)?,
        passing_marks: r.get(8)?,
        percentage: r.get(9)?,
        grade: r.get(10)?,
        is_passed: r.get::<_, i64>(11)? != 0,
    })
}
