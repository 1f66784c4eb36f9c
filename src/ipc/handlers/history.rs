use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::query::{self, HistoryFilter};
use crate::store::{AttendanceRecord, ClassRecord, StudentRecord};
use chrono::{Local, NaiveDate};
use rusqlite::Connection;
use serde_json::json;

fn parse_filters(req: &Request) -> Result<HistoryFilter, serde_json::Value> {
    query::parse_history_filter(req.params.get("filters"))
        .map_err(|e| err(&req.id, &e.code, e.message, None))
}

type Snapshot = (Vec<ClassRecord>, Vec<StudentRecord>, Vec<AttendanceRecord>);

fn load_snapshot(conn: &Connection, req: &Request) -> Result<Snapshot, serde_json::Value> {
    let classes =
        db::load_classes(conn).map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let students =
        db::load_students(conn).map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let attendance = db::load_attendance(conn)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    Ok((classes, students, attendance))
}

fn handle_history_query(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let filter = match parse_filters(req) {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    let (classes, students, attendance) = match load_snapshot(conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let filtered = query::filter_records(&attendance, &students, &filter);
    let tally = query::status_tally(&filtered);
    let groups = query::group_by_student(&filtered, &students, &classes, &filter);

    ok(
        &req.id,
        json!({
            "students": groups,
            "tally": tally,
            "totalRecords": filtered.len()
        }),
    )
}

fn handle_history_matrix(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let filter = match parse_filters(req) {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    let (classes, students, attendance) = match load_snapshot(conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let filtered = query::filter_records(&attendance, &students, &filter);
    let matrix = query::date_matrix(&filtered, &students, &classes, &filter);

    // The printable header names the class when one is selected.
    let class_name = filter
        .class_id
        .as_deref()
        .and_then(|id| classes.iter().find(|c| c.id == id))
        .map(|c| json!({ "name": c.name, "schoolName": c.school_name }));

    ok(
        &req.id,
        json!({
            "dates": matrix.dates,
            "rows": matrix.rows,
            "class": class_name
        }),
    )
}

fn handle_dashboard_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let today = match req.params.get("today").and_then(|v| v.as_str()) {
        Some(raw) => match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(d) => d,
            Err(_) => return err(&req.id, "bad_params", "today must be YYYY-MM-DD", None),
        },
        None => Local::now().date_naive(),
    };

    let (classes, students, attendance) = match load_snapshot(conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let today_str = today.format("%Y-%m-%d").to_string();
    let today_tally = query::status_tally(attendance.iter().filter(|r| r.date == today_str));
    let last7 = query::trailing_week_tally(&attendance, today);

    ok(
        &req.id,
        json!({
            "totalStudents": students.len(),
            "totalClasses": classes.len(),
            "today": { "date": today_str, "tally": today_tally },
            "last7Days": last7
        }),
    )
}

fn handle_reports_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = req
        .params
        .get("classId")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty() && *s != "all")
        .map(|s| s.to_string());

    let (_, students, attendance) = match load_snapshot(conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let filter = HistoryFilter {
        class_id,
        ..Default::default()
    };
    let filtered = query::filter_records(&attendance, &students, &filter);
    let tally = query::status_tally(&filtered);
    let presence_rate = query::presence_rate(&filtered);

    ok(
        &req.id,
        json!({
            "tally": tally,
            "totalRecords": filtered.len(),
            "presenceRate": presence_rate
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "history.query" => Some(handle_history_query(state, req)),
        "history.matrix" => Some(handle_history_matrix(state, req)),
        "dashboard.summary" => Some(handle_dashboard_summary(state, req)),
        "reports.summary" => Some(handle_reports_summary(state, req)),
        _ => None,
    }
}
