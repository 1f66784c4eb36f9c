use crate::store::{AttendanceRecord, AttendanceStatus, ClassRecord, StudentRecord};
use anyhow::anyhow;
use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("rollbook.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            school_name TEXT NOT NULL,
            teacher_name TEXT,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            days TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            class_id TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            UNIQUE(student_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_class_date ON attendance(class_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date)",
        [],
    )?;

    // Workspaces created before teacher_name existed lack the column.
    ensure_classes_teacher_name(&conn)?;

    Ok(conn)
}

fn ensure_classes_teacher_name(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "classes", "teacher_name")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE classes ADD COLUMN teacher_name TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Collections load in insertion order (rowid), the order the caller
/// last saved them in.
pub fn load_classes(conn: &Connection) -> anyhow::Result<Vec<ClassRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, school_name, teacher_name, start_time, end_time, days
         FROM classes ORDER BY rowid",
    )?;
    let rows = stmt.query_map([], |r| {
        let days_raw: String = r.get(6)?;
        Ok(ClassRecord {
            id: r.get(0)?,
            name: r.get(1)?,
            school_name: r.get(2)?,
            teacher_name: r.get(3)?,
            start_time: r.get(4)?,
            end_time: r.get(5)?,
            days: serde_json::from_str(&days_raw).unwrap_or_default(),
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn load_students(conn: &Connection) -> anyhow::Result<Vec<StudentRecord>> {
    let mut stmt = conn.prepare("SELECT id, name, class_id FROM students ORDER BY rowid")?;
    let rows = stmt.query_map([], |r| {
        Ok(StudentRecord {
            id: r.get(0)?,
            name: r.get(1)?,
            class_id: r.get(2)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn load_attendance(conn: &Connection) -> anyhow::Result<Vec<AttendanceRecord>> {
    let mut stmt = conn
        .prepare("SELECT id, student_id, class_id, date, status FROM attendance ORDER BY rowid")?;
    let rows = stmt.query_map([], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
            r.get::<_, String>(3)?,
            r.get::<_, String>(4)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (id, student_id, class_id, date, status_raw) = row?;
        let status = AttendanceStatus::parse(&status_raw)
            .ok_or_else(|| anyhow!("unknown attendance status in store: {}", status_raw))?;
        out.push(AttendanceRecord {
            id,
            student_id,
            class_id,
            date,
            status,
        });
    }
    Ok(out)
}

pub fn insert_class(conn: &Connection, class: &ClassRecord) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO classes(id, name, school_name, teacher_name, start_time, end_time, days)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &class.id,
            &class.name,
            &class.school_name,
            &class.teacher_name,
            &class.start_time,
            &class.end_time,
            serde_json::to_string(&class.days)?,
        ),
    )?;
    Ok(())
}

pub fn insert_student(conn: &Connection, student: &StudentRecord) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO students(id, name, class_id) VALUES(?, ?, ?)",
        (&student.id, &student.name, &student.class_id),
    )?;
    Ok(())
}

pub fn insert_attendance(conn: &Connection, record: &AttendanceRecord) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO attendance(id, student_id, class_id, date, status)
         VALUES(?, ?, ?, ?, ?)",
        (
            &record.id,
            &record.student_id,
            &record.class_id,
            &record.date,
            record.status.as_str(),
        ),
    )?;
    Ok(())
}

#[cfg(test)]
pub fn open_memory_db() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "CREATE TABLE classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            school_name TEXT NOT NULL,
            teacher_name TEXT,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            days TEXT NOT NULL
         );
         CREATE TABLE students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            class_id TEXT NOT NULL
         );
         CREATE TABLE attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            UNIQUE(student_id, date)
         );",
    )
    .expect("create schema");
    conn
}
