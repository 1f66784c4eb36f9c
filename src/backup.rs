use crate::db;
use crate::store::{AttendanceRecord, ClassRecord, StudentRecord};
use anyhow::Context;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The on-disk backup document: three top-level collections, nothing
/// else required. All three keys must be present (possibly empty) for a
/// file to validate; unknown extra keys are ignored so newer backups
/// stay readable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullBackup {
    pub classes: Vec<ClassRecord>,
    pub students: Vec<StudentRecord>,
    pub attendance: Vec<AttendanceRecord>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupCounts {
    pub classes: usize,
    pub students: usize,
    pub attendance: usize,
}

impl BackupCounts {
    fn of(backup: &FullBackup) -> Self {
        Self {
            classes: backup.classes.len(),
            students: backup.students.len(),
            attendance: backup.attendance.len(),
        }
    }
}

pub fn snapshot(conn: &Connection) -> anyhow::Result<FullBackup> {
    Ok(FullBackup {
        classes: db::load_classes(conn)?,
        students: db::load_students(conn)?,
        attendance: db::load_attendance(conn)?,
    })
}

pub fn export_backup(conn: &Connection, out_path: &Path) -> anyhow::Result<BackupCounts> {
    let backup = snapshot(conn)?;
    if let Some(parent) = out_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create directory {}", parent.to_string_lossy())
            })?;
        }
    }
    let text = serde_json::to_string_pretty(&backup).context("failed to serialize backup")?;
    std::fs::write(out_path, text)
        .with_context(|| format!("failed to write backup {}", out_path.to_string_lossy()))?;
    Ok(BackupCounts::of(&backup))
}

/// Parses and shape-checks a candidate backup file without touching the
/// store. Any failure here means restore would refuse the same file.
pub fn read_backup(in_path: &Path) -> anyhow::Result<FullBackup> {
    let text = std::fs::read_to_string(in_path)
        .with_context(|| format!("failed to read backup {}", in_path.to_string_lossy()))?;
    parse_backup(&text)
}

pub fn parse_backup(text: &str) -> anyhow::Result<FullBackup> {
    let backup: FullBackup = serde_json::from_str(text).context("backup file is not valid")?;
    Ok(backup)
}

pub fn preview_backup(in_path: &Path) -> anyhow::Result<BackupCounts> {
    Ok(BackupCounts::of(&read_backup(in_path)?))
}

/// Replaces all three collections in one transaction. Callers validate
/// the backup fully before invoking this, so a rejected file leaves the
/// store byte-for-byte unchanged and no partial-restore state is ever
/// observable.
pub fn restore_from(conn: &Connection, backup: &FullBackup) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM attendance", [])?;
    tx.execute("DELETE FROM students", [])?;
    tx.execute("DELETE FROM classes", [])?;
    for class in &backup.classes {
        db::insert_class(&tx, class)?;
    }
    for student in &backup.students {
        db::insert_student(&tx, student)?;
    }
    for record in &backup.attendance {
        db::insert_attendance(&tx, record)?;
    }
    tx.commit()?;
    Ok(())
}
