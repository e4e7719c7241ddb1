use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{errors::Error, Result};

// ============== Identifiers ==============

/// Backend staff id (object-id string).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

/// Backend resident id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResidentId(pub String);

/// Backend task id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

// ============== Wire types ==============

/// A staff member as returned by the care backend's user lookup.
#[derive(Clone, Debug, Deserialize)]
pub struct StaffUser {
    #[serde(alias = "_id")]
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub telegram_handle: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Resident {
    #[serde(alias = "_id")]
    pub id: ResidentId,
    pub full_name: String,
    #[serde(default)]
    pub room_number: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub medical_conditions: Vec<String>,
    #[serde(default)]
    pub medications: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// One `{hour, minute}` administration slot of a medication plan.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct MedicationTime {
    pub hour: u32,
    pub minute: u32,
}

/// A medication schedule attached to a resident.
///
/// `start_date` / `end_date` are facility-local `YYYY-MM-DD` strings;
/// `schedule_type` is `day`, `week` or `custom`.
#[derive(Clone, Debug, Deserialize)]
pub struct MedicationPlan {
    #[serde(alias = "_id", default)]
    pub id: Option<String>,
    pub medication_name: String,
    #[serde(default)]
    pub dosage: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub schedule_type: Option<String>,
    #[serde(default = "default_repeat")]
    pub repeat: u32,
    #[serde(default)]
    pub days_of_week: Vec<String>,
    #[serde(default)]
    pub times_of_day: Vec<MedicationTime>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

fn default_repeat() -> u32 {
    1
}

#[derive(Clone, Debug, Deserialize)]
pub struct CareTask {
    #[serde(alias = "_id")]
    pub id: TaskId,
    #[serde(alias = "title", default)]
    pub task_title: Option<String>,
    #[serde(alias = "details", default)]
    pub task_details: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub resident_name: Option<String>,
    #[serde(default)]
    pub resident_room: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub assigned_to_name: Option<String>,
    #[serde(default)]
    pub assigned_for: Option<String>,
    #[serde(default)]
    pub assigned_for_name: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    /// Minutes before `start_date` to remind; backend may omit it.
    #[serde(default)]
    pub remind_prior: Option<i64>,
    #[serde(default)]
    pub reminder_sent: bool,
    #[serde(default)]
    pub recurring: bool,
    #[serde(default)]
    pub recurring_days: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Activity {
    #[serde(alias = "_id", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub created_by_name: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub reminder_minutes: Option<i64>,
    #[serde(default)]
    pub reminder_sent: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FallLog {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub resident_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub acceleration_magnitude: Option<f64>,
    #[serde(default)]
    pub alert_sent: bool,
}

// ============== Time helpers ==============

/// Facility-local offset: UTC+08:00 (Singapore, no DST).
pub fn facility_offset() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).expect("static offset")
}

pub fn facility_now() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&facility_offset())
}

/// Parse a backend timestamp. Accepts RFC3339 (`Z` or explicit offset) and
/// naive `YYYY-MM-DD[T ]HH:MM:SS[.frac]`; naive values are taken as UTC.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(Error::InvalidTimestamp(s.to_string()))
}

/// Parse a facility-local `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| Error::InvalidTimestamp(s.to_string()))
}
