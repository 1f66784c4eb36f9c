use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_daemon() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rollbookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rollbookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn create_class(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    name: &str,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        id,
        "classes.upsert",
        json!({ "name": name, "schoolName": "CEM Ibn Khaldoun" }),
    );
    created
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string()
}

#[test]
fn class_delete_cascades_to_students_and_records() {
    let workspace = temp_dir("rollbook-class-delete");
    let (_child, mut stdin, mut reader) = spawn_daemon();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let c1 = create_class(&mut stdin, &mut reader, "2", "2AM3");
    let c2 = create_class(&mut stdin, &mut reader, "3", "1AM1");

    for (i, (sid, cid)) in [("S1", &c1), ("S2", &c1), ("S3", &c2)].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "students.create",
            json!({ "id": sid, "name": format!("Student {}", sid), "classId": cid }),
        );
    }
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.markDay",
        json!({
            "classId": c1.clone(),
            "date": "2024-01-10",
            "statuses": { "S1": "present", "S2": "absent" }
        }),
    );

    // The confirmation gate comes first.
    let unconfirmed = request(
        &mut stdin,
        &mut reader,
        "5",
        "classes.delete",
        json!({ "classId": c1.clone() }),
    );
    assert_eq!(unconfirmed.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        unconfirmed
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("not_confirmed")
    );

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "classes.delete",
        json!({ "classId": c1.clone(), "confirmed": true }),
    );
    assert_eq!(deleted.get("deleted").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        deleted.get("studentsRemoved").and_then(|v| v.as_i64()),
        Some(2)
    );
    assert_eq!(
        deleted.get("recordsRemoved").and_then(|v| v.as_i64()),
        Some(2)
    );

    // Nothing left references the deleted class.
    let students = request_ok(&mut stdin, &mut reader, "7", "students.list", json!({}));
    let remaining: Vec<&str> = students
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students")
        .iter()
        .filter_map(|s| s.get("id").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(remaining, vec!["S3"]);

    let history = request_ok(&mut stdin, &mut reader, "8", "history.query", json!({}));
    assert_eq!(history.get("totalRecords").and_then(|v| v.as_i64()), Some(0));

    // Deleting a class that is already gone is a no-op, not an error.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "classes.delete",
        json!({ "classId": c1, "confirmed": true }),
    );
    assert_eq!(again.get("deleted").and_then(|v| v.as_bool()), Some(false));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn clear_roster_keeps_the_class() {
    let workspace = temp_dir("rollbook-clear-roster");
    let (_child, mut stdin, mut reader) = spawn_daemon();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class_id = create_class(&mut stdin, &mut reader, "2", "2AM3");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "id": "S1", "name": "Amine Cherif", "classId": class_id.clone() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.markDay",
        json!({
            "classId": class_id.clone(),
            "date": "2024-01-10",
            "statuses": { "S1": "present" }
        }),
    );

    let unconfirmed = request(
        &mut stdin,
        &mut reader,
        "5",
        "classes.clearRoster",
        json!({ "classId": class_id.clone() }),
    );
    assert_eq!(
        unconfirmed
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("not_confirmed")
    );

    let cleared = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "classes.clearRoster",
        json!({ "classId": class_id.clone(), "confirmed": true }),
    );
    assert_eq!(
        cleared.get("studentsRemoved").and_then(|v| v.as_i64()),
        Some(1)
    );
    assert_eq!(
        cleared.get("recordsRemoved").and_then(|v| v.as_i64()),
        Some(1)
    );

    let classes = request_ok(&mut stdin, &mut reader, "7", "classes.list", json!({}));
    let listed = classes.get("classes").and_then(|v| v.as_array()).expect("classes");
    assert_eq!(listed.len(), 1);
    assert_eq!(
        listed[0].get("studentCount").and_then(|v| v.as_i64()),
        Some(0)
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn class_upsert_edits_in_place() {
    let workspace = temp_dir("rollbook-class-upsert");
    let (_child, mut stdin, mut reader) = spawn_daemon();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class_id = create_class(&mut stdin, &mut reader, "2", "2AM3");

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.upsert",
        json!({
            "classId": class_id.clone(),
            "name": "2AM4",
            "schoolName": "CEM Emir Abdelkader",
            "teacherName": "A. Benali",
            "startTime": "09:00",
            "endTime": "11:00",
            "days": ["Sunday", "Tuesday", "Thursday"]
        }),
    );
    assert_eq!(updated.get("updated").and_then(|v| v.as_bool()), Some(true));

    let classes = request_ok(&mut stdin, &mut reader, "4", "classes.list", json!({}));
    let listed = classes.get("classes").and_then(|v| v.as_array()).expect("classes");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("name").and_then(|v| v.as_str()), Some("2AM4"));
    assert_eq!(
        listed[0].get("teacherName").and_then(|v| v.as_str()),
        Some("A. Benali")
    );
    assert_eq!(
        listed[0].get("days").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(3)
    );

    // Editing an id that never existed changes nothing.
    let phantom = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "classes.upsert",
        json!({ "classId": "ghost", "name": "X", "schoolName": "Y" }),
    );
    assert_eq!(phantom.get("updated").and_then(|v| v.as_bool()), Some(false));

    let missing_name = request(
        &mut stdin,
        &mut reader,
        "6",
        "classes.upsert",
        json!({ "schoolName": "CEM Ibn Khaldoun" }),
    );
    assert_eq!(
        missing_name
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("bad_params")
    );

    let _ = std::fs::remove_dir_all(workspace);
}
