use crate::gate::{self, GradeCorrection, NewGrade};
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_f64, get_opt_f64, get_str};
use crate::ipc::types::{AppState, Request};
use crate::ledger::GradeSummary;
use rusqlite::Connection;
use serde_json::json;

fn grade_summary_json(summary: &GradeSummary) -> serde_json::Value {
    json!({
        "percentage": summary.percentage,
        "grade": summary.grade,
        "isPassed": summary.is_passed,
    })
}

fn grades_record(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let grade = NewGrade {
        student_id: get_str(params, "studentId")?,
        class_id: get_str(params, "classId")?,
        subject: get_str(params, "subject")?,
        academic_year: get_str(params, "academicYear")?,
        exam_type: get_str(params, "examType")?,
        total_marks: get_f64(params, "totalMarks")?,
        marks_obtained: get_f64(params, "marksObtained")?,
        passing_marks: get_f64(params, "passingMarks")?,
    };
    let (grade_id, summary) = gate::record_grade(conn, &grade)?;
    Ok(json!({
        "gradeId": grade_id,
        "summary": grade_summary_json(&summary),
    }))
}

fn grades_correct(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let grade_id = get_str(params, "gradeId")?;
    let correction = GradeCorrection {
        total_marks: get_opt_f64(params, "totalMarks")?,
        marks_obtained: get_opt_f64(params, "marksObtained")?,
        passing_marks: get_opt_f64(params, "passingMarks")?,
    };
    let summary = gate::correct_grade(conn, &grade_id, &correction)?;
    Ok(json!({
        "gradeId": grade_id,
        "summary": grade_summary_json(&summary),
    }))
}

fn grades_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let grade_id = get_str(params, "gradeId")?;
    let record = gate::grade_record(conn, &grade_id)?;
    Ok(json!({
        "grade": serde_json::to_value(&record).unwrap_or_else(|_| json!({})),
    }))
}

fn grades_list_by_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_str(params, "studentId")?;
    let records = gate::grades_by_student(conn, &student_id)?;
    Ok(json!({
        "grades": serde_json::to_value(&records).unwrap_or_else(|_| json!([])),
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
        "grades.record" => Some(handle(state, req, grades_record)),
        "grades.correct" => Some(handle(state, req, grades_correct)),
        "grades.get" => Some(handle(state, req, grades_get)),
        "grades.listByStudent" => Some(handle(state, req, grades_list_by_student)),
        _ => None,
    }
}
