//! Polling pass for upcoming care-task reminders.
//!
//! Each pass looks two days ahead per registered caregiver and fires a
//! reminder once the task enters its `remind_prior` window. Sent reminders
//! are flagged on the backend so the next pass skips them.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::{
    domain::{parse_timestamp, CareTask, ChatId},
    formatting::escape_html,
    messaging::port::MessagingPort,
    ports::CareStore,
    registry::ChatRegistry,
    services::{audit_reminder, local_hm},
    utils::AuditLogger,
    Result,
};

const DEFAULT_REMIND_PRIOR_MIN: i64 = 5;
const LOOKAHEAD_DAYS: i64 = 2;

pub struct TaskReminderService {
    store: Arc<dyn CareStore>,
    messenger: Arc<dyn MessagingPort>,
    registry: ChatRegistry,
    audit: Option<AuditLogger>,
}

impl TaskReminderService {
    pub fn new(
        store: Arc<dyn CareStore>,
        messenger: Arc<dyn MessagingPort>,
        registry: ChatRegistry,
        audit: Option<AuditLogger>,
    ) -> Self {
        Self {
            store,
            messenger,
            registry,
            audit,
        }
    }

    pub async fn run_pass(&self) -> Result<()> {
        self.run_pass_at(Utc::now()).await
    }

    pub async fn run_pass_at(&self, now: DateTime<Utc>) -> Result<()> {
        let start = now.date_naive();
        let end = (now + Duration::days(LOOKAHEAD_DAYS)).date_naive();
        let mut sent = 0usize;

        for (user_id, reg) in self.registry.entries().await {
            let tasks = match self
                .store
                .tasks_window(start, end, Some(&user_id.0))
                .await
            {
                Ok(tasks) => tasks,
                Err(err) => {
                    warn!(caregiver = %reg.name, error = %err, "task window fetch failed");
                    continue;
                }
            };
            for task in &tasks {
                match self.process_task(task, reg.chat_id, now).await {
                    Ok(true) => sent += 1,
                    Ok(false) => {}
                    Err(err) => {
                        warn!(task = %task.id.0, error = %err, "task reminder failed");
                    }
                }
            }
        }

        if sent > 0 {
            info!(sent, "task reminders sent");
        }
        Ok(())
    }

    async fn process_task(
        &self,
        task: &CareTask,
        chat_id: ChatId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if task.reminder_sent {
            return Ok(false);
        }
        let Some(raw_start) = task.start_date.as_deref() else {
            return Ok(false);
        };
        let start = parse_timestamp(raw_start)?;
        let prior = task.remind_prior.unwrap_or(DEFAULT_REMIND_PRIOR_MIN);
        let reminder_time = start - Duration::minutes(prior);
        if now < reminder_time || now >= start {
            return Ok(false);
        }

        let message = reminder_message(task, start);
        self.messenger.send_html(chat_id, &message).await?;
        audit_reminder(self.audit.as_ref(), "task", chat_id, &message);

        if let Err(err) = self.store.mark_task_reminder_sent(&task.id).await {
            warn!(task = %task.id.0, error = %err, "could not flag reminder as sent");
        }
        Ok(true)
    }
}

fn reminder_message(task: &CareTask, start: DateTime<Utc>) -> String {
    let title = task.task_title.as_deref().unwrap_or("Unnamed task");

    let mut out = String::from("📋 TASK REMINDER");
    if let Some(priority) = task.priority.as_deref().filter(|s| !s.is_empty()) {
        out.push_str(&format!(" [{}]", escape_html(priority)));
    }
    out.push_str(&format!(": {}", escape_html(title)));

    let due = task
        .due_date
        .as_deref()
        .and_then(|s| parse_timestamp(s).ok());
    match due {
        Some(due) => out.push_str(&format!(" from {} to {}", local_hm(start), local_hm(due))),
        None => out.push_str(&format!(" at {}", local_hm(start))),
    }

    if let Some(resident) = task.resident_name.as_deref().filter(|s| !s.is_empty()) {
        out.push_str(&format!(" for {}", escape_html(resident)));
    }
    if let Some(room) = task.resident_room.as_deref().filter(|s| !s.is_empty()) {
        out.push_str(&format!(" (Room: {})", escape_html(room)));
    }
    if let Some(details) = task.task_details.as_deref().filter(|s| !s.is_empty()) {
        out.push_str(&format!("\n\n{}", escape_html(details)));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{TaskId, UserId},
        testutil::{task, FakeStore, RecordingMessenger},
    };
    use chrono::TimeZone;

    fn assigned_task(id: &str, start: &str) -> CareTask {
        let mut t = task(id, "Check vitals", start);
        t.assigned_to = Some("u1".to_string());
        t
    }

    async fn service_with(
        tasks: Vec<CareTask>,
    ) -> (TaskReminderService, Arc<RecordingMessenger>, Arc<FakeStore>) {
        let store = Arc::new(FakeStore {
            tasks,
            ..Default::default()
        });
        let messenger = Arc::new(RecordingMessenger::default());
        let registry = ChatRegistry::new();
        registry
            .register(UserId("u1".to_string()), ChatId(7), "Nurse Joy")
            .await;
        let service =
            TaskReminderService::new(store.clone(), messenger.clone(), registry, None);
        (service, messenger, store)
    }

    #[tokio::test]
    async fn fires_inside_reminder_window() {
        let (service, messenger, store) =
            service_with(vec![assigned_task("t1", "2025-06-15T08:03:00Z")]).await;
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 8, 0, 0).unwrap();
        service.run_pass_at(now).await.unwrap();

        let sent = messenger.sent_to(7);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("📋 TASK REMINDER: Check vitals at 2025-06-15 16:03"));
        assert_eq!(
            store.marked_tasks.lock().unwrap().as_slice(),
            &[TaskId("t1".to_string())]
        );
    }

    #[tokio::test]
    async fn too_early_and_already_started_are_skipped() {
        let (service, messenger, _) = service_with(vec![
            assigned_task("t1", "2025-06-15T08:30:00Z"),
            assigned_task("t2", "2025-06-15T07:59:00Z"),
        ])
        .await;
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 8, 0, 0).unwrap();
        service.run_pass_at(now).await.unwrap();
        assert!(messenger.all().is_empty());
    }

    #[tokio::test]
    async fn sent_flag_suppresses_resend() {
        let mut t = assigned_task("t1", "2025-06-15T08:03:00Z");
        t.reminder_sent = true;
        let (service, messenger, _) = service_with(vec![t]).await;
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 8, 0, 0).unwrap();
        service.run_pass_at(now).await.unwrap();
        assert!(messenger.all().is_empty());
    }

    #[tokio::test]
    async fn custom_remind_prior_widens_the_window() {
        let mut t = assigned_task("t1", "2025-06-15T09:00:00Z");
        t.remind_prior = Some(90);
        let (service, messenger, _) = service_with(vec![t]).await;
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 8, 0, 0).unwrap();
        service.run_pass_at(now).await.unwrap();
        assert_eq!(messenger.sent_to(7).len(), 1);
    }

    #[test]
    fn message_includes_optional_fields() {
        let mut t = task("t1", "Morning bath", "2025-06-15T00:00:00Z");
        t.priority = Some("High".to_string());
        t.due_date = Some("2025-06-15T01:00:00Z".to_string());
        t.resident_name = Some("Mary Tan".to_string());
        t.resident_room = Some("12A".to_string());
        t.task_details = Some("Use the new soap".to_string());
        let start = parse_timestamp("2025-06-15T00:00:00Z").unwrap();
        let msg = reminder_message(&t, start);
        assert_eq!(
            msg,
            "📋 TASK REMINDER [High]: Morning bath from 2025-06-15 08:00 to 2025-06-15 09:00 \
             for Mary Tan (Room: 12A)\n\nUse the new soap"
        );
    }

    #[test]
    fn message_minimal_shape() {
        let mut t = task("t1", "Morning bath", "2025-06-15T00:00:00Z");
        t.task_title = None;
        let start = parse_timestamp("2025-06-15T00:00:00Z").unwrap();
        let msg = reminder_message(&t, start);
        assert_eq!(msg, "📋 TASK REMINDER: Unnamed task at 2025-06-15 08:00");
    }
}
