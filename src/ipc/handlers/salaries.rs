use crate::gate::{self, NewSalary, SalaryUpdate};
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_f64, get_i64, get_opt_f64, get_opt_i64, get_str};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{Allowances, AttendanceTally, Deductions, PaymentStatus, SalarySummary};
use rusqlite::Connection;
use serde_json::json;

fn salary_summary_json(summary: &SalarySummary) -> serde_json::Value {
    json!({
        "attendanceDeduction": summary.attendance_deduction,
        "grossSalary": summary.gross_salary,
        "netSalary": summary.net_salary,
    })
}

fn tally_json(tally: &AttendanceTally) -> serde_json::Value {
    json!({
        "totalWorkingDays": tally.total_working_days,
        "presentDays": tally.present_days,
        "absentDays": tally.absent_days,
        "leaveDays": tally.leave_days,
        "halfDays": tally.half_days,
    })
}

fn parse_allowances(params: &serde_json::Value) -> Result<Option<Allowances>, HandlerErr> {
    match params.get("allowances") {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| HandlerErr::bad_params(format!("allowances: {}", e))),
    }
}

fn parse_deductions(params: &serde_json::Value) -> Result<Option<Deductions>, HandlerErr> {
    match params.get("deductions") {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| HandlerErr::bad_params(format!("deductions: {}", e))),
    }
}

fn salaries_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let salary = NewSalary {
        staff_id: get_str(params, "staffId")?,
        month: get_str(params, "month")?,
        basic_salary: get_f64(params, "basicSalary")?,
        allowances: parse_allowances(params)?.unwrap_or_default(),
        deductions: parse_deductions(params)?.unwrap_or_default(),
        total_working_days: get_i64(params, "totalWorkingDays")?,
        present_days: get_opt_i64(params, "presentDays")?.unwrap_or(0),
        absent_days: get_opt_i64(params, "absentDays")?.unwrap_or(0),
        leave_days: get_opt_i64(params, "leaveDays")?.unwrap_or(0),
        half_days: get_opt_i64(params, "halfDays")?.unwrap_or(0),
    };
    let (salary_id, summary) = gate::create_salary(conn, &salary)?;
    Ok(json!({
        "salaryId": salary_id,
        "summary": salary_summary_json(&summary),
    }))
}

fn salaries_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let salary_id = get_str(params, "salaryId")?;
    let update = SalaryUpdate {
        basic_salary: get_opt_f64(params, "basicSalary")?,
        allowances: parse_allowances(params)?,
        deductions: parse_deductions(params)?,
        total_working_days: get_opt_i64(params, "totalWorkingDays")?,
        present_days: get_opt_i64(params, "presentDays")?,
        absent_days: get_opt_i64(params, "absentDays")?,
        leave_days: get_opt_i64(params, "leaveDays")?,
        half_days: get_opt_i64(params, "halfDays")?,
    };
    let summary = gate::update_salary(conn, &salary_id, &update)?;
    Ok(json!({
        "salaryId": salary_id,
        "summary": salary_summary_json(&summary),
    }))
}

fn salaries_set_payment_status(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let salary_id = get_str(params, "salaryId")?;
    let next = PaymentStatus::parse(&get_str(params, "status")?)?;
    gate::set_salary_payment_status(conn, &salary_id, next)?;
    Ok(json!({ "salaryId": salary_id, "paymentStatus": next.as_str() }))
}

fn salaries_finalize_attendance(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let staff_id = get_str(params, "staffId")?;
    let month = get_str(params, "month")?;
    let (tally, summary) = gate::finalize_salary_attendance(conn, &staff_id, &month)?;
    Ok(json!({
        "tally": tally_json(&tally),
        "summary": salary_summary_json(&summary),
    }))
}

fn salaries_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let staff_id = get_str(params, "staffId")?;
    let month = get_str(params, "month")?;
    let record = gate::salary_record(conn, &staff_id, &month)?;
    Ok(json!({
        "salary": serde_json::to_value(&record).unwrap_or_else(|_| json!({})),
    }))
}

fn handle(
    state: &mut AppState,
    req: &Request,
    inner: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match inner(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "salaries.create" => Some(handle(state, req, salaries_create)),
        "salaries.update" => Some(handle(state, req, salaries_update)),
        "salaries.setPaymentStatus" => Some(handle(state, req, salaries_set_payment_status)),
        "salaries.finalizeAttendance" => Some(handle(state, req, salaries_finalize_attendance)),
        "salaries.get" => Some(handle(state, req, salaries_get)),
        _ => None,
    }
}
