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

fn seed_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> String {
    let _ = request_ok(
        stdin,
        reader,
        "seed-1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        stdin,
        reader,
        "seed-2",
        "classes.upsert",
        json!({ "name": "2AM3", "schoolName": "CEM Ibn Khaldoun", "days": ["Sunday", "Monday"] }),
    );
    let class_id = created
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let _ = request_ok(
        stdin,
        reader,
        "seed-3",
        "students.create",
        json!({ "id": "S1", "name": "Amine Cherif", "classId": class_id.clone() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "seed-4",
        "students.create",
        json!({ "id": "S2", "name": "Yanis Saada", "classId": class_id.clone() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "seed-5",
        "attendance.markDay",
        json!({
            "classId": class_id.clone(),
            "date": "2024-01-10",
            "statuses": { "S1": "present", "S2": "pe_kit" }
        }),
    );
    class_id
}

#[test]
fn export_then_restore_round_trips_all_collections() {
    let workspace = temp_dir("rollbook-backup-roundtrip");
    let out_dir = temp_dir("rollbook-backup-out");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _class_id = seed_workspace(&mut stdin, &mut reader, &workspace);

    let backup_path = out_dir.join("rollbook-backup.json");
    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "backup.export",
        json!({ "path": backup_path.to_string_lossy() }),
    );
    let counts = exported.get("counts").expect("counts");
    assert_eq!(counts.get("classes").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(counts.get("students").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(counts.get("attendance").and_then(|v| v.as_i64()), Some(2));

    // The document on disk is the three plain collections.
    let text = std::fs::read_to_string(&backup_path).expect("read backup file");
    let doc: serde_json::Value = serde_json::from_str(&text).expect("backup is json");
    assert!(doc.get("classes").and_then(|v| v.as_array()).is_some());
    assert!(doc.get("students").and_then(|v| v.as_array()).is_some());
    assert!(doc.get("attendance").and_then(|v| v.as_array()).is_some());

    // Damage the live store, then restore.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.delete",
        json!({ "studentId": "S1", "confirmed": true }),
    );
    let restored = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "backup.restore",
        json!({ "path": backup_path.to_string_lossy() }),
    );
    assert_eq!(
        restored
            .get("counts")
            .and_then(|c| c.get("students"))
            .and_then(|v| v.as_i64()),
        Some(2)
    );

    let students = request_ok(&mut stdin, &mut reader, "4", "students.list", json!({}));
    assert_eq!(
        students
            .get("students")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(2)
    );
    let history = request_ok(&mut stdin, &mut reader, "5", "history.query", json!({}));
    assert_eq!(history.get("totalRecords").and_then(|v| v.as_i64()), Some(2));

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn preview_reports_counts_without_mutating() {
    let workspace = temp_dir("rollbook-backup-preview");
    let out_dir = temp_dir("rollbook-backup-preview-out");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _ = seed_workspace(&mut stdin, &mut reader, &workspace);

    let candidate = out_dir.join("candidate.json");
    std::fs::write(
        &candidate,
        r#"{"classes": [], "students": [], "attendance": []}"#,
    )
    .expect("write candidate");

    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "backup.preview",
        json!({ "path": candidate.to_string_lossy() }),
    );
    let counts = preview.get("counts").expect("counts");
    assert_eq!(counts.get("classes").and_then(|v| v.as_i64()), Some(0));

    // Previewing must not have replaced anything.
    let students = request_ok(&mut stdin, &mut reader, "2", "students.list", json!({}));
    assert_eq!(
        students
            .get("students")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(2)
    );

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn malformed_backups_are_rejected_and_leave_the_store_unchanged() {
    let workspace = temp_dir("rollbook-backup-reject");
    let out_dir = temp_dir("rollbook-backup-reject-out");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _ = seed_workspace(&mut stdin, &mut reader, &workspace);

    let cases: Vec<(&str, String)> = vec![
        ("not-json.json", "definitely not json".to_string()),
        (
            "missing-key.json",
            r#"{"classes": [], "students": []}"#.to_string(),
        ),
        (
            "wrong-type.json",
            r#"{"classes": {}, "students": [], "attendance": []}"#.to_string(),
        ),
        (
            "bad-entity.json",
            r#"{"classes": [], "students": [], "attendance": [{"id": "r1"}]}"#.to_string(),
        ),
    ];

    for (i, (name, contents)) in cases.iter().enumerate() {
        let path = out_dir.join(name);
        std::fs::write(&path, contents).expect("write bad backup");
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("bad-{}", i),
            "backup.restore",
            json!({ "path": path.to_string_lossy() }),
        );
        assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
        assert_eq!(
            resp.get("error")
                .and_then(|e| e.get("code"))
                .and_then(|v| v.as_str()),
            Some("bad_backup"),
            "case {}",
            name
        );
    }

    // Every rejection left the seeded data alone.
    let students = request_ok(&mut stdin, &mut reader, "check", "students.list", json!({}));
    assert_eq!(
        students
            .get("students")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(2)
    );
    let history = request_ok(&mut stdin, &mut reader, "check-2", "history.query", json!({}));
    assert_eq!(history.get("totalRecords").and_then(|v| v.as_i64()), Some(2));

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(out_dir);
}
