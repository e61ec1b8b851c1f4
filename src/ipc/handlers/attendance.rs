use crate::attendance::{self, EventInput};
use crate::gate;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_opt_str, get_str};
use crate::ipc::types::{AppState, Request};
use crate::ledger::AttendanceStatus;
use rusqlite::Connection;
use serde_json::json;

fn parse_events(params: &serde_json::Value) -> Result<Vec<EventInput>, HandlerErr> {
    let Some(raw) = params.get("events").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing events array"));
    };
    let mut events = Vec::with_capacity(raw.len());
    for (i, entry) in raw.iter().enumerate() {
        let Some(obj) = entry.as_object() else {
            return Err(HandlerErr::bad_params(format!(
                "events[{}] must be an object",
                i
            )));
        };
        let subject_ref = obj
            .get("subjectRef")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr::bad_params(format!("events[{}] missing subjectRef", i)))?;
        let status = obj
            .get("status")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr::bad_params(format!("events[{}] missing status", i)))?;
        let remarks = match obj.get("remarks") {
            None => None,
            Some(v) if v.is_null() => None,
            Some(v) => Some(
                v.as_str()
                    .ok_or_else(|| {
                        HandlerErr::bad_params(format!("events[{}] remarks must be a string", i))
                    })?
                    .to_string(),
            ),
        };
        events.push(EventInput {
            subject_ref: subject_ref.to_string(),
            status: AttendanceStatus::parse(status)?,
            remarks,
        });
    }
    Ok(events)
}

fn attendance_reconcile_batch(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_str(params, "classId")?;
    let date = gate::parse_date("date", &get_str(params, "date")?)?;
    let marked_by = get_opt_str(params, "markedBy")?;
    let events = parse_events(params)?;
    let count = attendance::reconcile_batch(conn, &class_id, date, marked_by.as_deref(), &events)?;
    Ok(json!({ "count": count }))
}

fn attendance_check_in(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let staff_id = get_str(params, "staffId")?;
    let date = gate::parse_date("date", &get_str(params, "date")?)?;
    let status = AttendanceStatus::parse(&get_str(params, "status")?)?;
    let remarks = get_opt_str(params, "remarks")?;
    let marked_by = get_opt_str(params, "markedBy")?;
    attendance::staff_check_in(
        conn,
        &staff_id,
        date,
        status,
        remarks.as_deref(),
        marked_by.as_deref(),
    )?;
    Ok(json!({ "ok": true }))
}

fn attendance_month_tally(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_ref = get_str(params, "subjectRef")?;
    let month = get_str(params, "month")?;
    let counts = attendance::month_event_counts(conn, &subject_ref, &month)?;
    Ok(json!({
        "subjectRef": subject_ref,
        "month": month,
        "tally": serde_json::to_value(counts).unwrap_or_else(|_| json!({})),
    }))
}

fn attendance_day_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_str(params, "classId")?;
    let date = gate::parse_date("date", &get_str(params, "date")?)?;
    let events = attendance::events_for_day(conn, &class_id, date)?;
    Ok(json!({
        "events": serde_json::to_value(&events).unwrap_or_else(|_| json!([])),
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
        "attendance.reconcileBatch" => Some(handle(state, req, attendance_reconcile_batch)),
        "attendance.checkIn" => Some(handle(state, req, attendance_check_in)),
        "attendance.monthTally" => Some(handle(state, req, attendance_month_tally)),
        "attendance.dayList" => Some(handle(state, req, attendance_day_list)),
        _ => None,
    }
}
