use serde::{Deserialize, Serialize};

/// The four status codes a day's roster entry can carry.
///
/// `PeKit` (attended without the required kit) still counts toward the
/// presence rate, same as `Present`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    PeKit,
    Justified,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::PeKit => "pe_kit",
            AttendanceStatus::Justified => "justified",
            AttendanceStatus::Absent => "absent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(AttendanceStatus::Present),
            "pe_kit" => Some(AttendanceStatus::PeKit),
            "justified" => Some(AttendanceStatus::Justified),
            "absent" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }

    pub fn counts_as_present(self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::PeKit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRecord {
    pub id: String,
    pub name: String,
    pub school_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_name: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub days: Vec<String>,
}

/// `id` is the institutional registration number supplied by the caller,
/// globally unique across the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: String,
    pub name: String,
    pub class_id: String,
}

/// `class_id` is a denormalized copy of the student's class at marking
/// time, so moving the student later does not rewrite history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub class_id: String,
    pub date: String,
    pub status: AttendanceStatus,
}
