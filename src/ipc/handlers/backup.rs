use crate::backup;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use log::info;
use serde_json::json;
use std::path::PathBuf;

fn required_path(req: &Request) -> Result<PathBuf, serde_json::Value> {
    req.params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .ok_or_else(|| err(&req.id, "bad_params", "missing params.path", None))
}

fn handle_backup_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let path = match required_path(req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match backup::export_backup(conn, &path) {
        Ok(counts) => {
            info!(
                "event=backup_exported path={} classes={} students={} attendance={}",
                path.to_string_lossy(),
                counts.classes,
                counts.students,
                counts.attendance
            );
            ok(&req.id, json!({ "counts": counts }))
        }
        Err(e) => err(&req.id, "db_query_failed", format!("{e:#}"), None),
    }
}

fn handle_backup_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
    if state.db.is_none() {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    }
    let path = match required_path(req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match backup::preview_backup(&path) {
        Ok(counts) => ok(&req.id, json!({ "counts": counts })),
        Err(e) => err(&req.id, "bad_backup", format!("{e:#}"), None),
    }
}

fn handle_backup_restore(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let path = match required_path(req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    // Parse and shape-check first; a bad file must leave the store as-is.
    let parsed = match backup::read_backup(&path) {
        Ok(b) => b,
        Err(e) => return err(&req.id, "bad_backup", format!("{e:#}"), None),
    };
    match backup::restore_from(conn, &parsed) {
        Ok(()) => {
            info!(
                "event=backup_restored path={} classes={} students={} attendance={}",
                path.to_string_lossy(),
                parsed.classes.len(),
                parsed.students.len(),
                parsed.attendance.len()
            );
            ok(
                &req.id,
                json!({
                    "counts": {
                        "classes": parsed.classes.len(),
                        "students": parsed.students.len(),
                        "attendance": parsed.attendance.len()
                    }
                }),
            )
        }
        Err(e) => err(&req.id, "db_update_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.export" => Some(handle_backup_export(state, req)),
        "backup.preview" => Some(handle_backup_preview(state, req)),
        "backup.restore" => Some(handle_backup_restore(state, req)),
        _ => None,
    }
}
