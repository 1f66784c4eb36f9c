use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::AttendanceStatus;
use chrono::NaiveDate;
use log::info;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    fn db(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

fn get_iso_date(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let raw = get_required_str(params, key)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|_| HandlerErr::new("bad_params", format!("{} must be YYYY-MM-DD", key)))?;
    Ok(raw)
}

fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db)
}

fn roster_for_class(conn: &Connection, class_id: &str) -> Result<Vec<(String, String)>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name FROM students WHERE class_id = ? ORDER BY rowid")
        .map_err(HandlerErr::db)?;
    stmt.query_map([class_id], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

fn attendance_day_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_iso_date(params, "date")?;
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::new("not_found", "class not found"));
    }

    let roster = roster_for_class(conn, &class_id)?;
    let mut existing: HashMap<String, String> = HashMap::new();
    let mut stmt = conn
        .prepare("SELECT student_id, status FROM attendance WHERE class_id = ? AND date = ?")
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map((&class_id, &date), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    for (student_id, status) in rows {
        existing.insert(student_id, status);
    }

    let students: Vec<serde_json::Value> = roster
        .iter()
        .map(|(id, name)| {
            json!({
                "id": id,
                "name": name,
                "status": existing.get(id)
            })
        })
        .collect();

    Ok(json!({
        "classId": class_id,
        "date": date,
        "students": students
    }))
}

/// Saving a day's roster is idempotent: the class's records for the date
/// (and any stale same-date records the enrolled students carry from a
/// previous class) are removed before one fresh record per student goes
/// in. Marking the same day twice can never duplicate.
fn attendance_mark_day(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_iso_date(params, "date")?;
    let Some(statuses) = params.get("statuses").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::new("bad_params", "missing statuses"));
    };
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::new("not_found", "class not found"));
    }

    let roster = roster_for_class(conn, &class_id)?;

    let unmarked = roster
        .iter()
        .filter(|(id, _)| {
            !statuses
                .get(id.as_str())
                .and_then(|v| v.as_str())
                .map(|s| !s.is_empty())
                .unwrap_or(false)
        })
        .count();
    if unmarked > 0 {
        return Err(HandlerErr {
            code: "incomplete_roster",
            message: format!("{} students have no status for {}", unmarked, date),
            details: Some(json!({ "unmarked": unmarked })),
        });
    }

    let mut parsed: Vec<(String, AttendanceStatus)> = Vec::with_capacity(roster.len());
    for (student_id, _) in &roster {
        let raw = statuses
            .get(student_id.as_str())
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let status = AttendanceStatus::parse(raw).ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("unknown status: {}", raw),
            details: Some(json!({ "studentId": student_id })),
        })?;
        parsed.push((student_id.clone(), status));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "DELETE FROM attendance WHERE class_id = ? AND date = ?",
        (&class_id, &date),
    )
    .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    for (student_id, status) in &parsed {
        tx.execute(
            "DELETE FROM attendance WHERE student_id = ? AND date = ?",
            (student_id, &date),
        )
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
        tx.execute(
            "INSERT INTO attendance(id, student_id, class_id, date, status)
             VALUES(?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                student_id,
                &class_id,
                &date,
                status.as_str(),
            ),
        )
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    info!(
        "event=day_marked class_id={} date={} students={}",
        class_id,
        date,
        parsed.len()
    );
    Ok(json!({ "saved": parsed.len(), "date": date }))
}

fn with_db<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.dayOpen" => Some(with_db(state, req, attendance_day_open)),
        "attendance.markDay" => Some(with_db(state, req, attendance_mark_day)),
        _ => None,
    }
}
