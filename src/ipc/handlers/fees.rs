use crate::gate::{self, FeeAdjust, NewFee};
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_bool_flag, get_f64, get_opt_f64, get_opt_str, get_str};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{FeeSummary, FeeType};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;

fn fee_summary_json(summary: &FeeSummary) -> serde_json::Value {
    json!({
        "amountPaid": summary.amount_paid,
        "amountPending": summary.amount_pending,
        "status": summary.status.as_str(),
    })
}

fn fees_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let fee = NewFee {
        student_id: get_str(params, "studentId")?,
        academic_year: get_str(params, "academicYear")?,
        fee_type: FeeType::parse(&get_str(params, "feeType")?)?,
        total_amount: get_f64(params, "totalAmount")?,
        due_date: gate::parse_date("dueDate", &get_str(params, "dueDate")?)?,
        discount_amount: get_opt_f64(params, "discountAmount")?.unwrap_or(0.0),
        discount_reason: get_opt_str(params, "discountReason")?,
        late_fee_amount: get_opt_f64(params, "lateFeeAmount")?.unwrap_or(0.0),
    };
    let today = Utc::now().date_naive();
    let (fee_id, summary) = gate::create_fee(conn, &fee, today)?;
    Ok(json!({
        "feeId": fee_id,
        "summary": fee_summary_json(&summary),
    }))
}

fn fees_apply_payment(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let fee_id = get_str(params, "feeId")?;
    let amount = get_f64(params, "amount")?;
    let method = get_str(params, "method")?;
    let receipt_no = get_opt_str(params, "receiptNo")?;
    let paid_at = get_opt_str(params, "paidAt")?;
    let today = Utc::now().date_naive();
    let summary = gate::apply_payment(
        conn,
        &fee_id,
        amount,
        &method,
        receipt_no.as_deref(),
        paid_at.as_deref(),
        today,
    )?;
    Ok(json!({
        "feeId": fee_id,
        "summary": fee_summary_json(&summary),
    }))
}

fn fees_adjust(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let fee_id = get_str(params, "feeId")?;
    let adjust = FeeAdjust {
        total_amount: get_opt_f64(params, "totalAmount")?,
        discount_amount: get_opt_f64(params, "discountAmount")?,
        discount_reason: get_opt_str(params, "discountReason")?,
        late_fee_amount: get_opt_f64(params, "lateFeeAmount")?,
        late_fee_applied_date: match get_opt_str(params, "lateFeeAppliedDate")? {
            Some(raw) => Some(gate::parse_date("lateFeeAppliedDate", &raw)?),
            None => None,
        },
        due_date: match get_opt_str(params, "dueDate")? {
            Some(raw) => Some(gate::parse_date("dueDate", &raw)?),
            None => None,
        },
    };
    let today = Utc::now().date_naive();
    let summary = gate::adjust_fee(conn, &fee_id, &adjust, today)?;
    Ok(json!({
        "feeId": fee_id,
        "summary": fee_summary_json(&summary),
    }))
}

fn fees_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let fee_id = get_str(params, "feeId")?;
    let force = get_bool_flag(params, "force")?;
    gate::delete_fee(conn, &fee_id, force)?;
    Ok(json!({ "ok": true }))
}

fn fees_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let fee_id = get_str(params, "feeId")?;
    let record = gate::fee_record(conn, &fee_id)?;
    let payments = gate::fee_payments(conn, &fee_id)?;
    Ok(json!({
        "fee": serde_json::to_value(&record).unwrap_or_else(|_| json!({})),
        "payments": serde_json::to_value(&payments).unwrap_or_else(|_| json!([])),
    }))
}

fn fees_list_by_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_str(params, "studentId")?;
    let records = gate::fees_by_student(conn, &student_id)?;
    Ok(json!({
        "fees": serde_json::to_value(&records).unwrap_or_else(|_| json!([])),
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
        "fees.create" => Some(handle(state, req, fees_create)),
        "fees.applyPayment" => Some(handle(state, req, fees_apply_payment)),
        "fees.adjust" => Some(handle(state, req, fees_adjust)),
        "fees.delete" => Some(handle(state, req, fees_delete)),
        "fees.get" => Some(handle(state, req, fees_get)),
        "fees.listByStudent" => Some(handle(state, req, fees_list_by_student)),
        _ => None,
    }
}
