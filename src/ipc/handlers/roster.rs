use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_opt_str, get_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn classes_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name) VALUES(?, ?)",
        (&class_id, &name),
    )?;
    Ok(json!({ "classId": class_id, "name": name }))
}

fn classes_list(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT
           c.id,
           c.name,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count
         FROM classes c
         ORDER BY c.name",
    )?;
    let classes = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let student_count: i64 = row.get(2)?;
            Ok(json!({
                "id": id,
                "name": name,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "classes": classes }))
}

fn students_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_str(params, "classId")?;
    let first_name = get_str(params, "firstName")?;
    let last_name = get_str(params, "lastName")?;

    let class_found: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| r.get(0))
        .optional()?;
    if class_found.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "class not found".to_string(),
            details: None,
        });
    }

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, class_id, last_name, first_name, active)
         VALUES(?, ?, ?, ?, 1)",
        (&student_id, &class_id, &last_name, &first_name),
    )?;
    Ok(json!({ "studentId": student_id }))
}

fn students_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_str(params, "classId")?;
    let mut stmt = conn.prepare(
        "SELECT id, last_name, first_name, active
         FROM students
         WHERE class_id = ?
         ORDER BY last_name, first_name",
    )?;
    let students = stmt
        .query_map([&class_id], |row| {
            let id: String = row.get(0)?;
            let last: String = row.get(1)?;
            let first: String = row.get(2)?;
            let active: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "displayName": format!("{}, {}", last, first),
                "active": active != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "students": students }))
}

fn staff_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let first_name = get_str(params, "firstName")?;
    let last_name = get_str(params, "lastName")?;
    let designation = get_opt_str(params, "designation")?;

    let staff_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO staff(id, last_name, first_name, designation, active)
         VALUES(?, ?, ?, ?, 1)",
        (&staff_id, &last_name, &first_name, &designation),
    )?;
    Ok(json!({ "staffId": staff_id }))
}

fn staff_list(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, last_name, first_name, designation, active
         FROM staff
         ORDER BY last_name, first_name",
    )?;
    let staff = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let last: String = row.get(1)?;
            let first: String = row.get(2)?;
            let designation: Option<String> = row.get(3)?;
            let active: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "displayName": format!("{}, {}", last, first),
                "designation": designation,
                "active": active != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "staff": staff }))
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
        "classes.create" => Some(handle(state, req, classes_create)),
        "classes.list" => Some(handle(state, req, classes_list)),
        "students.create" => Some(handle(state, req, students_create)),
        "students.list" => Some(handle(state, req, students_list)),
        "staff.create" => Some(handle(state, req, staff_create)),
        "staff.list" => Some(handle(state, req, staff_list)),
        _ => None,
    }
}
