use crate::store::{AttendanceRecord, AttendanceStatus, ClassRecord, StudentRecord};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// Everything in this module is a pure function of collection snapshots
// plus a filter value; no state is held between calls.

#[derive(Debug, Clone, Serialize)]
pub struct QueryError {
    pub code: String,
    pub message: String,
}

impl QueryError {
    fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryFilter {
    pub date_start: Option<String>,
    pub date_end: Option<String>,
    pub class_id: Option<String>,
    pub search: Option<String>,
}

/// Parses the optional `filters` request param. Empty strings and the
/// UI's `"all"` class sentinel normalize to no filter.
pub fn parse_history_filter(raw: Option<&serde_json::Value>) -> Result<HistoryFilter, QueryError> {
    let Some(raw) = raw else {
        return Ok(HistoryFilter::default());
    };
    if raw.is_null() {
        return Ok(HistoryFilter::default());
    }
    let mut filter: HistoryFilter = serde_json::from_value(raw.clone())
        .map_err(|e| QueryError::new("bad_params", format!("invalid filters: {}", e)))?;
    filter.date_start = filter.date_start.filter(|s| !s.trim().is_empty());
    filter.date_end = filter.date_end.filter(|s| !s.trim().is_empty());
    filter.class_id = filter
        .class_id
        .filter(|s| !s.trim().is_empty() && s.as_str() != "all");
    filter.search = filter.search.filter(|s| !s.is_empty());
    Ok(filter)
}

fn student_matches(student: &StudentRecord, filter: &HistoryFilter) -> bool {
    if let Some(class_id) = &filter.class_id {
        if &student.class_id != class_id {
            return false;
        }
    }
    if let Some(term) = &filter.search {
        if !student.name.contains(term.as_str()) && !student.id.contains(term.as_str()) {
            return false;
        }
    }
    true
}

/// Records whose student no longer exists are excluded, never surfaced
/// as errors.
pub fn filter_records(
    records: &[AttendanceRecord],
    students: &[StudentRecord],
    filter: &HistoryFilter,
) -> Vec<AttendanceRecord> {
    let by_id: HashMap<&str, &StudentRecord> =
        students.iter().map(|s| (s.id.as_str(), s)).collect();
    records
        .iter()
        .filter(|rec| {
            if let Some(start) = &filter.date_start {
                if rec.date.as_str() < start.as_str() {
                    return false;
                }
            }
            if let Some(end) = &filter.date_end {
                if rec.date.as_str() > end.as_str() {
                    return false;
                }
            }
            let Some(student) = by_id.get(rec.student_id.as_str()) else {
                return false;
            };
            student_matches(student, filter)
        })
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusTally {
    pub present: usize,
    pub pe_kit: usize,
    pub justified: usize,
    pub absent: usize,
}

impl StatusTally {
    pub fn total(&self) -> usize {
        self.present + self.pe_kit + self.justified + self.absent
    }
}

/// The single shared tally used by history, dashboard, and reports.
pub fn status_tally<'a, I>(records: I) -> StatusTally
where
    I: IntoIterator<Item = &'a AttendanceRecord>,
{
    let mut tally = StatusTally::default();
    for rec in records {
        match rec.status {
            AttendanceStatus::Present => tally.present += 1,
            AttendanceStatus::PeKit => tally.pe_kit += 1,
            AttendanceStatus::Justified => tally.justified += 1,
            AttendanceStatus::Absent => tally.absent += 1,
        }
    }
    tally
}

pub fn presence_rate(records: &[AttendanceRecord]) -> i64 {
    if records.is_empty() {
        return 0;
    }
    let present = records
        .iter()
        .filter(|r| r.status.counts_as_present())
        .count();
    (100.0 * present as f64 / records.len() as f64).round() as i64
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentHistory {
    pub id: String,
    pub name: String,
    pub class_id: String,
    pub class_name: String,
    pub school_name: String,
    pub records: Vec<AttendanceRecord>,
    pub presence_rate: i64,
}

/// Partitions the filtered set by student. Students with zero matching
/// records still appear while a search term is active, so a name lookup
/// can answer "never marked". Output follows the student collection
/// order; each student's records sort descending by date string.
pub fn group_by_student(
    filtered: &[AttendanceRecord],
    students: &[StudentRecord],
    classes: &[ClassRecord],
    filter: &HistoryFilter,
) -> Vec<StudentHistory> {
    let mut groups: HashMap<&str, Vec<AttendanceRecord>> = HashMap::new();
    for rec in filtered {
        groups
            .entry(rec.student_id.as_str())
            .or_default()
            .push(rec.clone());
    }
    let class_by_id: HashMap<&str, &ClassRecord> =
        classes.iter().map(|c| (c.id.as_str(), c)).collect();

    let mut out = Vec::new();
    for student in students {
        if !student_matches(student, filter) {
            continue;
        }
        if !groups.contains_key(student.id.as_str()) && filter.search.is_none() {
            continue;
        }
        let mut records = groups.remove(student.id.as_str()).unwrap_or_default();
        records.sort_by(|a, b| b.date.cmp(&a.date));
        let class = class_by_id.get(student.class_id.as_str());
        out.push(StudentHistory {
            id: student.id.clone(),
            name: student.name.clone(),
            class_id: student.class_id.clone(),
            class_name: class.map(|c| c.name.clone()).unwrap_or_default(),
            school_name: class.map(|c| c.school_name.clone()).unwrap_or_default(),
            presence_rate: presence_rate(&records),
            records,
        });
    }
    out
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixRow {
    pub student_id: String,
    pub name: String,
    pub cells: Vec<Option<AttendanceStatus>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateMatrix {
    pub dates: Vec<String>,
    pub rows: Vec<MatrixRow>,
}

/// The printable roster: sorted distinct dates across the filtered set,
/// one row per student, one cell per date. A student not marked on a
/// date gets a blank cell, never a synthesized absence.
pub fn date_matrix(
    filtered: &[AttendanceRecord],
    students: &[StudentRecord],
    classes: &[ClassRecord],
    filter: &HistoryFilter,
) -> DateMatrix {
    let mut dates: Vec<String> = filtered.iter().map(|r| r.date.clone()).collect();
    dates.sort();
    dates.dedup();

    let rows = group_by_student(filtered, students, classes, filter)
        .into_iter()
        .map(|history| {
            let by_date: HashMap<&str, AttendanceStatus> = history
                .records
                .iter()
                .map(|r| (r.date.as_str(), r.status))
                .collect();
            MatrixRow {
                student_id: history.id,
                name: history.name,
                cells: dates
                    .iter()
                    .map(|d| by_date.get(d.as_str()).copied())
                    .collect(),
            }
        })
        .collect();

    DateMatrix { dates, rows }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayTally {
    pub date: String,
    pub tally: StatusTally,
}

/// Per-status tallies for the last 7 calendar days including `today`,
/// oldest first.
pub fn trailing_week_tally(records: &[AttendanceRecord], today: NaiveDate) -> Vec<DayTally> {
    (0..7i64)
        .rev()
        .map(|offset| {
            let date = (today - Duration::days(offset)).format("%Y-%m-%d").to_string();
            let tally = status_tally(records.iter().filter(|r| r.date == date));
            DayTally { date, tally }
        })
        .collect()
}
