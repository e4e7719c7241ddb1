//! Fixed-template rendering of query results into Telegram HTML.
//!
//! Every dynamic field is escaped before insertion; list renderings are
//! capped and truncated so replies stay under the Telegram message limit.

use crate::{
    domain::{facility_offset, parse_timestamp, Activity, CareTask, Resident},
    formatting::{escape_html, truncate_message},
};

/// Hard cap on rendered replies, below Telegram's 4096 limit.
pub const MAX_RESPONSE_LEN: usize = 4000;

pub const NO_RESULTS: &str = "No results found matching your criteria.";
pub const ERROR_REPLY: &str =
    "I'm sorry, I encountered an error while processing your request. Please try again.";
pub const UNKNOWN_COMMAND: &str =
    "I'm not sure how to help with that. You can ask me about tasks, residents, or activities.";
pub const RESIDENT_NOT_FOUND: &str = "Sorry, I couldn't find a resident with that name.";

// ============== Task Responses ==============

pub fn format_tasks(tasks: &[CareTask]) -> String {
    if tasks.is_empty() {
        return NO_RESULTS.to_string();
    }

    let mut out = format!("📋 <b>Found {} tasks:</b>\n\n", tasks.len());

    for (idx, task) in tasks.iter().take(10).enumerate() {
        let title = task.task_title.as_deref().unwrap_or("Untitled Task");
        let status = task.status.as_deref().unwrap_or("Unknown");
        let priority = task.priority.as_deref().unwrap_or("");
        let assigned_to = task.assigned_to_name.as_deref().unwrap_or("Unassigned");
        let assigned_for = task.assigned_for_name.as_deref().unwrap_or("Not specified");

        let mut date_str = String::new();
        if let Some(start) = &task.start_date {
            date_str = render_datetime(start);
        }
        if let Some(due) = &task.due_date {
            date_str.push_str(&format!(" to {}", render_datetime(due)));
        }

        out.push_str(&format!(
            "{}. <b>{}</b>\n   Status: {} | Priority: {}\n   For: {} | By: {}\n   Time: {}\n\n",
            idx + 1,
            escape_html(title),
            escape_html(status),
            escape_html(priority),
            escape_html(assigned_for),
            escape_html(assigned_to),
            date_str,
        ));
    }

    if tasks.len() > 10 {
        out.push_str(&format!(
            "...and {} more tasks (showing first 10 only).",
            tasks.len() - 10
        ));
    }

    truncate_message(&out, MAX_RESPONSE_LEN)
}

// ============== Activity Responses ==============

pub fn format_activities(activities: &[Activity]) -> String {
    if activities.is_empty() {
        return NO_RESULTS.to_string();
    }

    let mut out = format!("🗓️ <b>Found {} activities:</b>\n\n", activities.len());

    for (idx, activity) in activities.iter().take(10).enumerate() {
        let title = activity.title.as_deref().unwrap_or("Untitled Activity");
        let location = activity.location.as_deref().unwrap_or("No location");
        let category = activity.category.as_deref().unwrap_or("Uncategorized");
        let created_by = activity.created_by_name.as_deref().unwrap_or("Unknown");

        let mut time_str = String::new();
        if let Some(start) = &activity.start_time {
            time_str = render_datetime(start);
        }
        if let Some(end) = &activity.end_time {
            time_str.push_str(&format!(" to {}", render_datetime(end)));
        }

        out.push_str(&format!(
            "{}. <b>{}</b>\n   Category: {} | Location: {}\n   Created by: {}\n   Time: {}\n\n",
            idx + 1,
            escape_html(title),
            escape_html(category),
            escape_html(location),
            escape_html(created_by),
            time_str,
        ));
    }

    if activities.len() > 10 {
        out.push_str(&format!(
            "...and {} more activities (showing first 10 only).",
            activities.len() - 10
        ));
    }

    truncate_message(&out, MAX_RESPONSE_LEN)
}

// ============== Resident Responses ==============

pub fn format_resident_list(residents: &[Resident]) -> String {
    if residents.is_empty() {
        return RESIDENT_NOT_FOUND.to_string();
    }

    let mut out = format!("👥 <b>Found {} residents:</b>\n\n", residents.len());

    for (idx, resident) in residents.iter().take(10).enumerate() {
        let room = resident.room_number.as_deref().unwrap_or("Unknown");
        out.push_str(&format!(
            "{}. <b>{}</b> (Room: {})\n\n",
            idx + 1,
            escape_html(&resident.full_name),
            escape_html(room),
        ));
    }

    if residents.len() > 10 {
        out.push_str(&format!(
            "...and {} more residents (showing first 10 only).",
            residents.len() - 10
        ));
    }

    truncate_message(&out, MAX_RESPONSE_LEN)
}

/// Profile card for one resident plus their most recent tasks.
pub fn format_resident_profile(resident: &Resident, tasks: &[CareTask]) -> String {
    let room = resident.room_number.as_deref().unwrap_or("Unknown");

    let mut out = format!(
        "👤 <b>Resident Profile: {}</b>\n",
        escape_html(&resident.full_name)
    );
    out.push_str(&format!("Room: {}\n", escape_html(room)));

    if !resident.medical_conditions.is_empty() {
        out.push_str(&format!(
            "Medical Conditions: {}\n",
            escape_html(&resident.medical_conditions.join(", "))
        ));
    }
    if !resident.medications.is_empty() {
        out.push_str(&format!(
            "Medications: {}\n",
            escape_html(&resident.medications.join(", "))
        ));
    }
    if let Some(notes) = resident.notes.as_deref().filter(|s| !s.is_empty()) {
        out.push_str(&format!("Notes: {}\n", escape_html(notes)));
    }
    out.push('\n');

    if tasks.is_empty() {
        out.push_str("No recent tasks found for this resident.");
        return truncate_message(&out, MAX_RESPONSE_LEN);
    }

    out.push_str(&format!(
        "<b>Recent tasks for {}:</b>\n\n",
        escape_html(&resident.full_name)
    ));

    for (idx, task) in tasks.iter().take(5).enumerate() {
        let title = task.task_title.as_deref().unwrap_or("Untitled Task");
        let status = task.status.as_deref().unwrap_or("Unknown");
        let assigned_to = task.assigned_to_name.as_deref().unwrap_or("Unassigned");
        let date_str = match &task.start_date {
            Some(start) => render_datetime(start),
            None => "Unknown".to_string(),
        };

        out.push_str(&format!(
            "{}. <b>{}</b>\n   Status: {} | Assigned to: {}\n   Time: {}\n\n",
            idx + 1,
            escape_html(title),
            escape_html(status),
            escape_html(assigned_to),
            date_str,
        ));
    }

    if tasks.len() > 5 {
        out.push_str(&format!(
            "...and {} more tasks (showing first 5 only).",
            tasks.len() - 5
        ));
    }

    truncate_message(&out, MAX_RESPONSE_LEN)
}

/// Backend timestamp rendered facility-local as `YYYY-MM-DD HH:MM`.
fn render_datetime(raw: &str) -> String {
    match parse_timestamp(raw) {
        Ok(dt) => dt
            .with_timezone(&facility_offset())
            .format("%Y-%m-%d %H:%M")
            .to_string(),
        Err(_) => "Invalid time format".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ResidentId, TaskId};

    fn task(title: &str) -> CareTask {
        CareTask {
            id: TaskId("t1".to_string()),
            task_title: Some(title.to_string()),
            task_details: None,
            status: Some("Pending".to_string()),
            priority: Some("High".to_string()),
            resident_name: None,
            resident_room: None,
            assigned_to: None,
            assigned_to_name: Some("Nurse Joy".to_string()),
            assigned_for: None,
            assigned_for_name: None,
            start_date: Some("2025-06-15T00:00:00Z".to_string()),
            due_date: Some("2025-06-15T01:30:00Z".to_string()),
            remind_prior: None,
            reminder_sent: false,
            recurring: false,
            recurring_days: vec![],
        }
    }

    fn resident(name: &str) -> Resident {
        Resident {
            id: ResidentId("r1".to_string()),
            full_name: name.to_string(),
            room_number: Some("12A".to_string()),
            gender: None,
            medical_conditions: vec!["Diabetes".to_string(), "Hypertension".to_string()],
            medications: vec![],
            notes: Some("".to_string()),
        }
    }

    #[test]
    fn empty_task_list_uses_template() {
        assert_eq!(format_tasks(&[]), NO_RESULTS);
    }

    #[test]
    fn task_dates_render_facility_local() {
        let out = format_tasks(&[task("Morning bath")]);
        assert!(out.contains("📋 <b>Found 1 tasks:</b>"));
        assert!(out.contains("Time: 2025-06-15 08:00 to 2025-06-15 09:30"));
        assert!(out.contains("Status: Pending | Priority: High"));
        assert!(out.contains("For: Not specified | By: Nurse Joy"));
    }

    #[test]
    fn task_list_caps_at_ten_with_overflow_line() {
        let tasks: Vec<CareTask> = (0..12).map(|i| task(&format!("Task {i}"))).collect();
        let out = format_tasks(&tasks);
        assert!(out.contains("Found 12 tasks:"));
        assert!(out.contains("10. "));
        assert!(!out.contains("11. "));
        assert!(out.contains("...and 2 more tasks (showing first 10 only)."));
    }

    #[test]
    fn titles_are_html_escaped() {
        let out = format_tasks(&[task("<script> & co")]);
        assert!(out.contains("&lt;script&gt; &amp; co"));
        assert!(!out.contains("<script>"));
    }

    #[test]
    fn activity_defaults_fill_missing_fields() {
        let activity = Activity {
            id: None,
            title: None,
            description: None,
            location: None,
            category: None,
            created_by_name: None,
            start_time: None,
            end_time: None,
            reminder_minutes: None,
            reminder_sent: false,
        };
        let out = format_activities(&[activity]);
        assert!(out.contains("Untitled Activity"));
        assert!(out.contains("Category: Uncategorized | Location: No location"));
        assert!(out.contains("Created by: Unknown"));
        assert!(out.contains("Time: \n"));
    }

    #[test]
    fn profile_skips_empty_sections() {
        let out = format_resident_profile(&resident("Mary Tan"), &[]);
        assert!(out.contains("👤 <b>Resident Profile: Mary Tan</b>"));
        assert!(out.contains("Room: 12A"));
        assert!(out.contains("Medical Conditions: Diabetes, Hypertension"));
        assert!(!out.contains("Medications:"));
        assert!(!out.contains("Notes:"));
        assert!(out.contains("No recent tasks found for this resident."));
    }

    #[test]
    fn profile_tasks_cap_at_five() {
        let tasks: Vec<CareTask> = (0..7).map(|i| task(&format!("Task {i}"))).collect();
        let out = format_resident_profile(&resident("Mary Tan"), &tasks);
        assert!(out.contains("<b>Recent tasks for Mary Tan:</b>"));
        assert!(out.contains("5. "));
        assert!(!out.contains("6. "));
        assert!(out.contains("...and 2 more tasks (showing first 5 only)."));
    }

    #[test]
    fn resident_list_renders_rooms() {
        let out = format_resident_list(&[resident("Mary Tan")]);
        assert!(out.contains("👥 <b>Found 1 residents:</b>"));
        assert!(out.contains("1. <b>Mary Tan</b> (Room: 12A)"));
        assert_eq!(format_resident_list(&[]), RESIDENT_NOT_FOUND);
    }

    #[test]
    fn oversized_response_is_truncated() {
        let tasks: Vec<CareTask> = (0..10)
            .map(|_| task(&"very long title ".repeat(40)))
            .collect();
        let out = format_tasks(&tasks);
        assert!(out.len() <= MAX_RESPONSE_LEN);
        assert!(out.ends_with("...(message truncated due to length)"));
    }

    #[test]
    fn invalid_timestamp_is_flagged() {
        let mut t = task("Check vitals");
        t.start_date = Some("soonish".to_string());
        t.due_date = None;
        let out = format_tasks(&[t]);
        assert!(out.contains("Time: Invalid time format"));
    }
}
