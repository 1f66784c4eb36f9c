use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use log::info;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    // Include the roster size so the UI can show a useful dashboard.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.school_name,
           c.teacher_name,
           c.start_time,
           c.end_time,
           c.days,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count
         FROM classes c
         ORDER BY rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let days_raw: String = row.get(6)?;
            let days: Vec<String> = serde_json::from_str(&days_raw).unwrap_or_default();
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "schoolName": row.get::<_, String>(2)?,
                "teacherName": row.get::<_, Option<String>>(3)?,
                "startTime": row.get::<_, String>(4)?,
                "endTime": row.get::<_, String>(5)?,
                "days": days,
                "studentCount": row.get::<_, i64>(7)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let school_name = match req.params.get("schoolName").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing schoolName", None),
    };
    if school_name.is_empty() {
        return err(&req.id, "bad_params", "schoolName must not be empty", None);
    }
    let teacher_name = req
        .params
        .get("teacherName")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let start_time = req
        .params
        .get("startTime")
        .and_then(|v| v.as_str())
        .unwrap_or("08:00")
        .to_string();
    let end_time = req
        .params
        .get("endTime")
        .and_then(|v| v.as_str())
        .unwrap_or("12:00")
        .to_string();
    let days: Vec<String> = req
        .params
        .get("days")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();
    let days_raw = match serde_json::to_string(&days) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };

    if let Some(class_id) = req.params.get("classId").and_then(|v| v.as_str()) {
        let updated = match conn.execute(
            "UPDATE classes
             SET name = ?, school_name = ?, teacher_name = ?, start_time = ?, end_time = ?, days = ?
             WHERE id = ?",
            (
                &name,
                &school_name,
                &teacher_name,
                &start_time,
                &end_time,
                &days_raw,
                class_id,
            ),
        ) {
            Ok(n) => n,
            Err(e) => {
                return err(
                    &req.id,
                    "db_update_failed",
                    e.to_string(),
                    Some(json!({ "table": "classes" })),
                )
            }
        };
        return ok(
            &req.id,
            json!({ "classId": class_id, "updated": updated > 0 }),
        );
    }

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, name, school_name, teacher_name, start_time, end_time, days)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &class_id,
            &name,
            &school_name,
            &teacher_name,
            &start_time,
            &end_time,
            &days_raw,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    ok(&req.id, json!({ "classId": class_id, "created": true }))
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    if !req
        .params
        .get("confirmed")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        return err(
            &req.id,
            "not_confirmed",
            "class deletion requires confirmed: true",
            None,
        );
    }

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return ok(&req.id, json!({ "deleted": false }));
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Dependency order: records, then roster, then the class itself.
    let records_removed = match tx.execute("DELETE FROM attendance WHERE class_id = ?", [&class_id])
    {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "attendance" })),
            );
        }
    };
    let students_removed = match tx.execute("DELETE FROM students WHERE class_id = ?", [&class_id])
    {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "students" })),
            );
        }
    };
    if let Err(e) = tx.execute("DELETE FROM classes WHERE id = ?", [&class_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    info!(
        "event=class_deleted class_id={} students_removed={} records_removed={}",
        class_id, students_removed, records_removed
    );
    ok(
        &req.id,
        json!({
            "deleted": true,
            "studentsRemoved": students_removed,
            "recordsRemoved": records_removed
        }),
    )
}

fn handle_classes_clear_roster(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    if !req
        .params
        .get("confirmed")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        return err(
            &req.id,
            "not_confirmed",
            "roster clearing requires confirmed: true",
            None,
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let records_removed = match tx.execute("DELETE FROM attendance WHERE class_id = ?", [&class_id])
    {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "attendance" })),
            );
        }
    };
    let students_removed = match tx.execute("DELETE FROM students WHERE class_id = ?", [&class_id])
    {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "students" })),
            );
        }
    };
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    info!(
        "event=roster_cleared class_id={} students_removed={} records_removed={}",
        class_id, students_removed, records_removed
    );
    ok(
        &req.id,
        json!({
            "studentsRemoved": students_removed,
            "recordsRemoved": records_removed
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.upsert" => Some(handle_classes_upsert(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        "classes.clearRoster" => Some(handle_classes_clear_roster(state, req)),
        _ => None,
    }
}
