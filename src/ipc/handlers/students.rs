use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use log::info;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

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

fn require_confirmed(params: &serde_json::Value, what: &str) -> Result<(), HandlerErr> {
    if params
        .get("confirmed")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        Ok(())
    } else {
        Err(HandlerErr::new(
            "not_confirmed",
            format!("{} requires confirmed: true", what),
        ))
    }
}

fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db)
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_filter = params
        .get("classId")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty() && *s != "all")
        .map(|s| s.to_string());
    let search = params
        .get("search")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.name, s.class_id, c.name
             FROM students s
             LEFT JOIN classes c ON c.id = s.class_id
             ORDER BY s.rowid",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<String>>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let students: Vec<serde_json::Value> = rows
        .into_iter()
        .filter(|(id, name, class_id, _)| {
            if let Some(cf) = &class_filter {
                if class_id != cf {
                    return false;
                }
            }
            if let Some(term) = &search {
                if !name.contains(term.as_str()) && !id.contains(term.as_str()) {
                    return false;
                }
            }
            true
        })
        .map(|(id, name, class_id, class_name)| {
            json!({
                "id": id,
                "name": name,
                "classId": class_id,
                "className": class_name
            })
        })
        .collect();

    Ok(json!({ "students": students }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?.trim().to_string();
    let name = get_required_str(params, "name")?.trim().to_string();
    let class_id = get_required_str(params, "classId")?;
    if id.is_empty() || name.is_empty() {
        return Err(HandlerErr::new("bad_params", "id and name must not be empty"));
    }
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::new("not_found", "class not found"));
    }

    // Registration numbers are globally unique, not per class.
    let taken = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::db)?
        .is_some();
    if taken {
        return Err(HandlerErr {
            code: "duplicate_id",
            message: "a student with this id already exists".to_string(),
            details: Some(json!({ "id": id })),
        });
    }

    conn.execute(
        "INSERT INTO students(id, name, class_id) VALUES(?, ?, ?)",
        (&id, &name, &class_id),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    Ok(json!({ "id": id, "created": true }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let name = params
        .get("name")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let class_id = params
        .get("classId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    if name.is_none() && class_id.is_none() {
        return Err(HandlerErr::new("bad_params", "nothing to update"));
    }
    if let Some(cid) = &class_id {
        if !class_exists(conn, cid)? {
            return Err(HandlerErr::new("not_found", "class not found"));
        }
    }

    let updated = conn
        .execute(
            "UPDATE students
             SET name = COALESCE(?, name), class_id = COALESCE(?, class_id)
             WHERE id = ?",
            (&name, &class_id, &id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    Ok(json!({ "id": id, "updated": updated > 0 }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    require_confirmed(params, "student deletion")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let records_removed = tx
        .execute("DELETE FROM attendance WHERE student_id = ?", [&student_id])
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    let deleted = tx
        .execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    if deleted > 0 {
        info!(
            "event=student_deleted student_id={} records_removed={}",
            student_id, records_removed
        );
    }
    Ok(json!({ "deleted": deleted > 0, "recordsRemoved": records_removed }))
}

/// Spreadsheet column fallback chains. Sheets exported from the national
/// registry carry Arabic headers; hand-made sheets usually carry the
/// English ones.
const ID_COLUMNS: [&str; 4] = ["رقم التعريف", "ID", "رقم التسجيل", "id"];
const FULL_NAME_COLUMNS: [&str; 4] = ["الاسم الكامل", "الاسم", "Name", "name"];
const SURNAME_COLUMN: &str = "اللقب";
const GIVEN_NAME_COLUMN: &str = "الاسم";

fn cell_text(row: &serde_json::Value, key: &str) -> Option<String> {
    match row.get(key)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_cell(row: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| cell_text(row, k))
}

/// Maps one raw sheet row to (id, name), or None when the row lacks a
/// usable identifier or name. The literal text "undefined" comes from
/// sheets exported by the old web UI and counts as missing.
fn map_import_row(row: &serde_json::Value) -> Option<(String, String)> {
    let id = first_cell(row, &ID_COLUMNS)?.trim().to_string();

    let surname = cell_text(row, SURNAME_COLUMN);
    let given = cell_text(row, GIVEN_NAME_COLUMN);
    let name = match (surname, given) {
        (Some(sur), Some(giv)) if !sur.trim().is_empty() && !giv.trim().is_empty() => {
            format!("{} {}", sur.trim(), giv.trim())
        }
        _ => first_cell(row, &FULL_NAME_COLUMNS)?.trim().to_string(),
    };

    if id.is_empty() || id == "undefined" || name.is_empty() || name == "undefined" {
        return None;
    }
    Some((id, name))
}

fn students_bulk_import(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::new("not_found", "class not found"));
    }
    let Some(rows) = params.get("rows").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing rows"));
    };

    // De-duplicate within the batch first: the later row wins, same as
    // the merge against the existing collection.
    let mut skipped = 0usize;
    let mut merged: Vec<(String, String)> = Vec::new();
    for row in rows {
        let Some((id, name)) = map_import_row(row) else {
            skipped += 1;
            continue;
        };
        merged.retain(|(existing, _)| existing != &id);
        merged.push((id, name));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (id, name) in &merged {
        tx.execute(
            "INSERT INTO students(id, name, class_id)
             VALUES(?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               class_id = excluded.class_id",
            (id, name, &class_id),
        )
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    info!(
        "event=students_imported class_id={} imported={} skipped={}",
        class_id,
        merged.len(),
        skipped
    );
    Ok(json!({ "imported": merged.len(), "skipped": skipped }))
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
        "students.list" => Some(with_db(state, req, students_list)),
        "students.create" => Some(with_db(state, req, students_create)),
        "students.update" => Some(with_db(state, req, students_update)),
        "students.delete" => Some(with_db(state, req, students_delete)),
        "students.bulkImport" => Some(with_db(state, req, students_bulk_import)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::map_import_row;
    use serde_json::json;

    #[test]
    fn import_row_prefers_registry_id_column() {
        let row = json!({ "رقم التعريف": "30012345", "id": "ignored", "Name": "Amine Cherif" });
        assert_eq!(
            map_import_row(&row),
            Some(("30012345".to_string(), "Amine Cherif".to_string()))
        );
    }

    #[test]
    fn import_row_joins_surname_and_given_name() {
        let row = json!({ "ID": 30012345, "اللقب": "Cherif", "الاسم": "Amine" });
        assert_eq!(
            map_import_row(&row),
            Some(("30012345".to_string(), "Cherif Amine".to_string()))
        );
    }

    #[test]
    fn import_row_falls_back_through_name_columns() {
        let row = json!({ "رقم التسجيل": " 30019999 ", "name": "  Yanis Saada " });
        assert_eq!(
            map_import_row(&row),
            Some(("30019999".to_string(), "Yanis Saada".to_string()))
        );
    }

    #[test]
    fn import_row_drops_missing_and_placeholder_values() {
        assert_eq!(map_import_row(&json!({ "Name": "No Id" })), None);
        assert_eq!(map_import_row(&json!({ "ID": "123" })), None);
        assert_eq!(
            map_import_row(&json!({ "ID": "undefined", "Name": "Ghost" })),
            None
        );
        assert_eq!(
            map_import_row(&json!({ "ID": "123", "Name": "undefined" })),
            None
        );
        assert_eq!(map_import_row(&json!({ "ID": "   ", "Name": "Blank" })), None);
    }
}
