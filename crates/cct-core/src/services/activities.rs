//! Polling pass for facility activity reminders.
//!
//! Activities are facility-wide, so reminders broadcast to every registered
//! chat. The backend has no "reminder sent" write-back for activities, so
//! sent activities are tracked in-process; a restart may re-send at most
//! once.

use std::{collections::HashSet, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    domain::{parse_timestamp, Activity},
    formatting::escape_html,
    messaging::port::MessagingPort,
    ports::CareStore,
    registry::ChatRegistry,
    services::{audit_reminder, local_hm},
    utils::AuditLogger,
    Result,
};

const DEFAULT_REMINDER_MIN: i64 = 5;
const LOOKAHEAD_DAYS: i64 = 2;

pub struct ActivityReminderService {
    store: Arc<dyn CareStore>,
    messenger: Arc<dyn MessagingPort>,
    registry: ChatRegistry,
    audit: Option<AuditLogger>,
    sent_keys: Mutex<HashSet<String>>,
}

impl ActivityReminderService {
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
            sent_keys: Mutex::new(HashSet::new()),
        }
    }

    pub async fn run_pass(&self) -> Result<()> {
        self.run_pass_at(Utc::now()).await
    }

    pub async fn run_pass_at(&self, now: DateTime<Utc>) -> Result<()> {
        let targets = self.registry.broadcast_targets().await;
        if targets.is_empty() {
            return Ok(());
        }

        let activities = self.store.activities_from(now).await?;
        self.prune_sent(&activities).await;

        let horizon = now + Duration::days(LOOKAHEAD_DAYS);
        let mut sent = 0usize;

        for activity in &activities {
            let Some(raw_start) = activity.start_time.as_deref() else {
                continue;
            };
            let start = match parse_timestamp(raw_start) {
                Ok(start) => start,
                Err(err) => {
                    warn!(activity = ?activity.id, error = %err, "bad activity start time");
                    continue;
                }
            };
            if start > horizon || activity.reminder_sent {
                continue;
            }
            let key = activity_key(activity);
            if self.sent_keys.lock().await.contains(&key) {
                continue;
            }
            let prior = activity.reminder_minutes.unwrap_or(DEFAULT_REMINDER_MIN);
            let reminder_time = start - Duration::minutes(prior);
            if now < reminder_time || now >= start {
                continue;
            }

            let message = activity_message(activity, start);
            let mut delivered = false;
            for chat_id in &targets {
                if let Err(err) = self.messenger.send_html(*chat_id, &message).await {
                    warn!(chat_id = chat_id.0, error = %err, "activity reminder send failed");
                    continue;
                }
                audit_reminder(self.audit.as_ref(), "activity", *chat_id, &message);
                delivered = true;
                sent += 1;
            }
            if delivered {
                self.sent_keys.lock().await.insert(key);
            }
        }

        if sent > 0 {
            info!(sent, "activity reminders sent");
        }
        Ok(())
    }

    /// Drop keys for activities no longer in the upcoming window, keeping the
    /// set bounded.
    async fn prune_sent(&self, upcoming: &[Activity]) {
        let current: HashSet<String> = upcoming.iter().map(activity_key).collect();
        self.sent_keys
            .lock()
            .await
            .retain(|k| current.contains(k));
    }
}

fn activity_key(activity: &Activity) -> String {
    match activity.id.as_deref() {
        Some(id) => id.to_string(),
        None => format!(
            "{}@{}",
            activity.title.as_deref().unwrap_or(""),
            activity.start_time.as_deref().unwrap_or(""),
        ),
    }
}

fn activity_message(activity: &Activity, start: DateTime<Utc>) -> String {
    let title = activity.title.as_deref().unwrap_or("Unnamed activity");

    let mut out = format!(
        "📅 REMINDER: {} starts at {}",
        escape_html(title),
        local_hm(start)
    );
    if let Some(location) = activity.location.as_deref().filter(|s| !s.is_empty()) {
        out.push_str(&format!(" at {}", escape_html(location)));
    }
    if let Some(description) = activity.description.as_deref().filter(|s| !s.is_empty()) {
        out.push_str(&format!("\n\n{}", escape_html(description)));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{ChatId, UserId},
        testutil::{activity, FakeStore, RecordingMessenger},
    };
    use chrono::TimeZone;

    async fn service_with(
        activities: Vec<Activity>,
        chats: &[(&str, i64)],
    ) -> (ActivityReminderService, Arc<RecordingMessenger>) {
        let store = Arc::new(FakeStore {
            activities,
            ..Default::default()
        });
        let messenger = Arc::new(RecordingMessenger::default());
        let registry = ChatRegistry::new();
        for (user, chat) in chats {
            registry
                .register(UserId(user.to_string()), ChatId(*chat), user)
                .await;
        }
        let service =
            ActivityReminderService::new(store, messenger.clone(), registry, None);
        (service, messenger)
    }

    #[tokio::test]
    async fn broadcasts_to_every_registered_chat() {
        let (service, messenger) = service_with(
            vec![activity("a1", "Morning Tai Chi", "2025-06-15T08:04:00Z")],
            &[("u1", 7), ("u2", 8)],
        )
        .await;
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 8, 0, 0).unwrap();
        service.run_pass_at(now).await.unwrap();

        assert_eq!(messenger.sent_to(7).len(), 1);
        assert_eq!(messenger.sent_to(8).len(), 1);
        assert!(messenger.sent_to(7)[0]
            .starts_with("📅 REMINDER: Morning Tai Chi starts at 2025-06-15 16:04"));
    }

    #[tokio::test]
    async fn outside_window_is_skipped() {
        let (service, messenger) = service_with(
            vec![
                activity("a1", "Too far ahead", "2025-06-15T09:00:00Z"),
                activity("a2", "Beyond horizon", "2025-06-18T08:00:00Z"),
            ],
            &[("u1", 7)],
        )
        .await;
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 8, 0, 0).unwrap();
        service.run_pass_at(now).await.unwrap();
        assert!(messenger.all().is_empty());
    }

    #[tokio::test]
    async fn no_registrations_means_no_fetch() {
        let (service, messenger) = service_with(
            vec![activity("a1", "Morning Tai Chi", "2025-06-15T08:04:00Z")],
            &[],
        )
        .await;
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 8, 0, 0).unwrap();
        service.run_pass_at(now).await.unwrap();
        assert!(messenger.all().is_empty());
    }

    #[tokio::test]
    async fn second_pass_does_not_resend() {
        let (service, messenger) = service_with(
            vec![activity("a1", "Morning Tai Chi", "2025-06-15T08:04:00Z")],
            &[("u1", 7)],
        )
        .await;
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 8, 0, 0).unwrap();
        service.run_pass_at(now).await.unwrap();
        service.run_pass_at(now).await.unwrap();
        assert_eq!(messenger.sent_to(7).len(), 1);
    }

    #[test]
    fn message_includes_location_and_description() {
        let mut a = activity("a1", "Bingo Night", "2025-06-15T12:00:00Z");
        a.location = Some("Main Hall".to_string());
        a.description = Some("Prizes for everyone".to_string());
        let start = parse_timestamp("2025-06-15T12:00:00Z").unwrap();
        assert_eq!(
            activity_message(&a, start),
            "📅 REMINDER: Bingo Night starts at 2025-06-15 20:00 at Main Hall\n\n\
             Prizes for everyone"
        );
    }
}
