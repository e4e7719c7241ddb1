//! Rule-based parsing of free-text assistant queries.
//!
//! No model involved: intent is decided by keyword and regex checks, time
//! ranges and filters are lifted out of the text with small patterns. The
//! parser never fails; anything it cannot classify falls back to
//! [`QueryIntent::General`].

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;

use crate::domain::{facility_now, facility_offset};

// ============== Parsed Query ==============

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryIntent {
    Tasks,
    Activities,
    Resident,
    General,
}

/// Half-open UTC window `[start, end]` resolved from relative phrases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedQuery {
    pub intent: QueryIntent,
    pub time_range: Option<TimeRange>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub location: Option<String>,
    pub category: Option<String>,
    pub resident_name: Option<String>,
}

impl ParsedQuery {
    fn new(intent: QueryIntent) -> Self {
        Self {
            intent,
            time_range: None,
            status: None,
            priority: None,
            location: None,
            category: None,
            resident_name: None,
        }
    }
}

// ============== Parsing ==============

/// Parse a free-text query against the current facility-local time.
pub fn parse_query(text: &str) -> ParsedQuery {
    parse_query_at(text, facility_now())
}

/// Same as [`parse_query`] but with an injected "now" for tests.
pub fn parse_query_at(text: &str, now: DateTime<FixedOffset>) -> ParsedQuery {
    let text = text.to_lowercase();
    let text = text.trim();

    // Fast path for the most common phrasing ("today's tasks" and friends).
    if text.contains("today") && text.contains("task") {
        let mut parsed = ParsedQuery::new(QueryIntent::Tasks);
        parsed.time_range = Some(today_range(now));
        return parsed;
    }

    if regex(r"\btasks?\b").is_match(text) {
        let mut parsed = ParsedQuery::new(QueryIntent::Tasks);
        parsed.time_range = extract_time_range(text, now);
        extract_task_filters(text, &mut parsed);
        return parsed;
    }

    if regex(r"\bactivit(y|ies)\b|\bupcoming\b|\bscheduled\b").is_match(text) {
        let mut parsed = ParsedQuery::new(QueryIntent::Activities);
        parsed.time_range = extract_time_range(text, now);
        extract_activity_filters(text, &mut parsed);
        return parsed;
    }

    if is_resident_query(text) {
        let mut parsed = ParsedQuery::new(QueryIntent::Resident);
        parsed.time_range = extract_time_range(text, now);
        parsed.resident_name = Some(extract_resident_name(text));
        return parsed;
    }

    ParsedQuery::new(QueryIntent::General)
}

fn extract_time_range(text: &str, now: DateTime<FixedOffset>) -> Option<TimeRange> {
    if regex(r"\btoday\b").is_match(text) {
        return Some(today_range(now));
    }
    if regex(r"\btomorrow\b").is_match(text) {
        return Some(day_range(now.date_naive() + Duration::days(1)));
    }
    if regex(r"\byesterday\b").is_match(text) {
        return Some(day_range(now.date_naive() - Duration::days(1)));
    }
    if regex(r"\bthis week\b").is_match(text) {
        return Some(this_week_range(now));
    }
    if let Some(caps) = regex(r"last (\d+) hours?").captures(text) {
        if let Ok(hours) = caps[1].parse::<i64>() {
            return Some(TimeRange {
                start: now.with_timezone(&Utc) - Duration::hours(hours),
                end: now.with_timezone(&Utc),
            });
        }
    }
    None
}

fn extract_task_filters(text: &str, parsed: &mut ParsedQuery) {
    for (keyword, value) in [
        ("overdue", "Overdue"),
        ("pending", "Pending"),
        ("completed", "Completed"),
    ] {
        if regex(&format!(r"\b{keyword}\b")).is_match(text) {
            parsed.status = Some(value.to_string());
            break;
        }
    }

    for (keyword, value) in [
        ("high priority", "High"),
        ("medium priority", "Medium"),
        ("low priority", "Low"),
    ] {
        if regex(&format!(r"\b{keyword}\b")).is_match(text) {
            parsed.priority = Some(value.to_string());
            break;
        }
    }
}

fn extract_activity_filters(text: &str, parsed: &mut ParsedQuery) {
    if let Some(caps) = regex(r"in\s+([a-z\s]+)").captures(text) {
        parsed.location = Some(caps[1].trim().to_string());
    }

    for category in ["Medication", "Exercise", "Social", "Entertainment", "Education"] {
        if regex(&format!(r"\b{}\b", category.to_lowercase())).is_match(text) {
            parsed.category = Some(category.to_string());
            break;
        }
    }
}

// ============== Resident Name Extraction ==============

const RESIDENT_INDICATORS: &[&str] = &[
    "resident",
    "patient",
    "how is",
    "tell me about",
    "profile",
    "details",
    "information",
    "status",
    "what happened to",
    "show resident",
];

fn is_resident_query(text: &str) -> bool {
    if RESIDENT_INDICATORS.iter().any(|ind| text.contains(ind)) {
        return true;
    }
    // A short message is likely just a name.
    let words = text.split_whitespace().count();
    (1..=3).contains(&words)
}

/// Pull a resident name out of the query. Tries direct phrasings first, then
/// falls back to treating a short message as a bare name. Returns an empty
/// string when nothing plausible is found.
fn extract_resident_name(text: &str) -> String {
    let direct_patterns = [
        r"how\s+is\s+([a-z\s]+?)(?:\s+doing)?(?:\s|$)",
        r"what\s+happened\s+to\s+([a-z\s]+?)(?:\s+today|\s+yesterday|\s+this\s+week)?(?:\s|$)",
        r"(?:resident|patient)?\s+([a-z\s]+?)(?:\s+info|information|details|profile|status)?(?:\s|$)",
        r"tell\s+me\s+about\s+([a-z\s]+?)(?:\s|$)",
        r"show\s+(?:me\s+)?(?:resident|patient)?\s+([a-z\s]+?)(?:\s|$)",
        r"(?:find|look\s+up|search\s+for)\s+(?:resident|patient)?\s+([a-z\s]+?)(?:\s|$)",
    ];

    for pattern in direct_patterns {
        if let Some(caps) = regex(pattern).captures(text) {
            return caps[1].trim().to_string();
        }
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    if (1..=3).contains(&words.len()) {
        return words.join(" ");
    }

    String::new()
}

// ============== Time Windows ==============

/// The facility-local calendar day containing `now`, as a UTC range.
pub fn today_range(now: DateTime<FixedOffset>) -> TimeRange {
    day_range(now.date_naive())
}

/// Facility-local `[00:00:00, 23:59:59.999999]` for `day`, in UTC.
fn day_range(day: NaiveDate) -> TimeRange {
    TimeRange {
        start: local_to_utc(day.and_hms_opt(0, 0, 0).expect("valid time")),
        end: local_to_utc(
            day.and_hms_micro_opt(23, 59, 59, 999_999)
                .expect("valid time"),
        ),
    }
}

/// Monday 00:00 facility-local through "now".
fn this_week_range(now: DateTime<FixedOffset>) -> TimeRange {
    let monday = now.date_naive() - Duration::days(now.weekday().num_days_from_monday() as i64);
    TimeRange {
        start: local_to_utc(monday.and_hms_opt(0, 0, 0).expect("valid time")),
        end: now.with_timezone(&Utc),
    }
}

fn local_to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    (naive - Duration::seconds(facility_offset().local_minus_utc() as i64)).and_utc()
}

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid regex")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<FixedOffset> {
        facility_offset()
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
    }

    #[test]
    fn todays_tasks_fast_path() {
        let now = local(2025, 6, 15, 10, 0);
        let parsed = parse_query_at("What are today's tasks?", now);
        assert_eq!(parsed.intent, QueryIntent::Tasks);
        let range = parsed.time_range.unwrap();
        assert_eq!(range.start, Utc.with_ymd_and_hms(2025, 6, 14, 16, 0, 0).unwrap());
        assert!(parsed.status.is_none());
    }

    #[test]
    fn task_status_and_priority_filters() {
        let now = local(2025, 6, 15, 10, 0);
        let parsed = parse_query_at("show high priority pending tasks tomorrow", now);
        assert_eq!(parsed.intent, QueryIntent::Tasks);
        assert_eq!(parsed.status.as_deref(), Some("Pending"));
        assert_eq!(parsed.priority.as_deref(), Some("High"));
        let range = parsed.time_range.unwrap();
        assert_eq!(range.start, Utc.with_ymd_and_hms(2025, 6, 15, 16, 0, 0).unwrap());
    }

    #[test]
    fn first_status_keyword_wins() {
        let now = local(2025, 6, 15, 10, 0);
        let parsed = parse_query_at("overdue and completed tasks", now);
        assert_eq!(parsed.status.as_deref(), Some("Overdue"));
    }

    #[test]
    fn activity_category_and_location() {
        let now = local(2025, 6, 15, 10, 0);
        let parsed = parse_query_at("upcoming exercise activities in the main hall", now);
        assert_eq!(parsed.intent, QueryIntent::Activities);
        assert_eq!(parsed.category.as_deref(), Some("Exercise"));
        assert_eq!(parsed.location.as_deref(), Some("the main hall"));
    }

    #[test]
    fn this_week_ends_at_now() {
        // 2025-06-15 is a Sunday; Monday of that week is 2025-06-09.
        let now = local(2025, 6, 15, 10, 30);
        let parsed = parse_query_at("activities this week", now);
        let range = parsed.time_range.unwrap();
        assert_eq!(range.start, Utc.with_ymd_and_hms(2025, 6, 8, 16, 0, 0).unwrap());
        assert_eq!(range.end, now.with_timezone(&Utc));
    }

    #[test]
    fn last_hours_window() {
        let now = local(2025, 6, 15, 10, 0);
        let parsed = parse_query_at("tasks from the last 3 hours", now);
        let range = parsed.time_range.unwrap();
        assert_eq!(range.end - range.start, Duration::hours(3));
        assert_eq!(range.end, now.with_timezone(&Utc));
    }

    #[test]
    fn how_is_extracts_name() {
        let now = local(2025, 6, 15, 10, 0);
        let parsed = parse_query_at("How is Alice doing?", now);
        assert_eq!(parsed.intent, QueryIntent::Resident);
        assert_eq!(parsed.resident_name.as_deref(), Some("alice"));
    }

    #[test]
    fn bare_name_is_resident_query() {
        let now = local(2025, 6, 15, 10, 0);
        let parsed = parse_query_at("margaret", now);
        assert_eq!(parsed.intent, QueryIntent::Resident);
        assert_eq!(parsed.resident_name.as_deref(), Some("margaret"));
    }

    #[test]
    fn long_unrelated_text_is_general() {
        let now = local(2025, 6, 15, 10, 0);
        let parsed = parse_query_at("please summarize what the weather will be like", now);
        assert_eq!(parsed.intent, QueryIntent::General);
        assert!(parsed.time_range.is_none());
    }

    #[test]
    fn task_word_boundary_required() {
        let now = local(2025, 6, 15, 10, 0);
        // "multitasking" must not trigger the task intent.
        let parsed = parse_query_at("we discussed multitasking at length yesterday", now);
        assert_ne!(parsed.intent, QueryIntent::Tasks);
    }
}
