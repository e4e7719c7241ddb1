//! Fall detection alert broadcasting.
//!
//! Each pass fetches recent fall logs, broadcasts an alert for every
//! pending or confirmed fall not yet alerted, and flags the log on the
//! backend so restarts and overlapping passes cannot double-alert.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::{
    domain::{parse_timestamp, FallLog},
    formatting::escape_html,
    messaging::port::MessagingPort,
    ports::CareStore,
    registry::ChatRegistry,
    services::{audit_reminder, local_hm},
    utils::AuditLogger,
    Result,
};

/// How far back each pass looks for new fall logs.
const LOOKBACK_MIN: i64 = 5;

pub struct FallAlertService {
    store: Arc<dyn CareStore>,
    messenger: Arc<dyn MessagingPort>,
    registry: ChatRegistry,
    audit: Option<AuditLogger>,
}

impl FallAlertService {
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
        let targets = self.registry.broadcast_targets().await;
        if targets.is_empty() {
            return Ok(());
        }

        let logs = self
            .store
            .fall_logs_after(now - Duration::minutes(LOOKBACK_MIN))
            .await?;
        let mut alerted = 0usize;

        for log in &logs {
            if log.alert_sent {
                continue;
            }
            let status = log.status.as_deref().unwrap_or("");
            if status != "pending" && status != "confirmed" {
                continue;
            }
            let Some(at) = log.timestamp.as_deref().and_then(|s| parse_timestamp(s).ok())
            else {
                warn!(log = %log.id, "fall log has no usable timestamp, skipping");
                continue;
            };

            let message = alert_message(log, at);
            for chat_id in &targets {
                if let Err(err) = self.messenger.send_html(*chat_id, &message).await {
                    warn!(chat_id = chat_id.0, error = %err, "fall alert send failed");
                    continue;
                }
                audit_reminder(self.audit.as_ref(), "fall", *chat_id, &message);
            }
            alerted += 1;

            if let Err(err) = self.store.mark_fall_alerted(&log.id).await {
                warn!(log = %log.id, error = %err, "could not flag fall alert as sent");
            }
        }

        if alerted > 0 {
            info!(alerted, "fall alerts broadcast");
        }
        Ok(())
    }
}

fn alert_message(log: &FallLog, at: DateTime<Utc>) -> String {
    let (header, status_line) = if log.status.as_deref() == Some("confirmed") {
        ("✅ <b>Fall Confirmed</b>", "<b>Confirmed Fall</b>")
    } else {
        ("⚠️ <b>Fall Detected</b>", "<b>Pending Review</b>")
    };
    let resident = log.resident_id.as_deref().unwrap_or("unknown");
    let acceleration = log.acceleration_magnitude.unwrap_or(0.0);

    format!(
        "{header}\n\
         Resident: <code>{}</code>\n\
         Time: <code>{}</code>\n\
         Acceleration: <code>{acceleration:.2}</code>\n\
         Status: {status_line}",
        escape_html(resident),
        local_hm(at),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{ChatId, UserId},
        testutil::{fall, FakeStore, RecordingMessenger},
    };
    use chrono::TimeZone;

    async fn service_with(
        falls: Vec<FallLog>,
    ) -> (FallAlertService, Arc<RecordingMessenger>, Arc<FakeStore>) {
        let store = Arc::new(FakeStore {
            falls,
            ..Default::default()
        });
        let messenger = Arc::new(RecordingMessenger::default());
        let registry = ChatRegistry::new();
        registry
            .register(UserId("u1".to_string()), ChatId(7), "Nurse Joy")
            .await;
        let service = FallAlertService::new(store.clone(), messenger.clone(), registry, None);
        (service, messenger, store)
    }

    #[tokio::test]
    async fn pending_fall_is_broadcast_and_flagged() {
        let (service, messenger, store) =
            service_with(vec![fall("f1", "pending", "2025-06-15T07:58:00Z")]).await;
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 8, 0, 0).unwrap();
        service.run_pass_at(now).await.unwrap();

        let sent = messenger.sent_to(7);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("⚠️ <b>Fall Detected</b>"));
        assert!(sent[0].contains("Resident: <code>r1</code>"));
        assert!(sent[0].contains("Acceleration: <code>3.20</code>"));
        assert!(sent[0].contains("Status: <b>Pending Review</b>"));
        assert_eq!(store.marked_falls.lock().unwrap().as_slice(), &["f1"]);
    }

    #[tokio::test]
    async fn confirmed_fall_uses_confirmed_template() {
        let (service, messenger, _) =
            service_with(vec![fall("f1", "confirmed", "2025-06-15T07:58:00Z")]).await;
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 8, 0, 0).unwrap();
        service.run_pass_at(now).await.unwrap();

        let sent = messenger.sent_to(7);
        assert!(sent[0].starts_with("✅ <b>Fall Confirmed</b>"));
        assert!(sent[0].contains("Status: <b>Confirmed Fall</b>"));
    }

    #[tokio::test]
    async fn resolved_and_already_alerted_are_skipped() {
        let mut alerted = fall("f2", "pending", "2025-06-15T07:58:00Z");
        alerted.alert_sent = true;
        let (service, messenger, store) = service_with(vec![
            fall("f1", "resolved", "2025-06-15T07:58:00Z"),
            alerted,
        ])
        .await;
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 8, 0, 0).unwrap();
        service.run_pass_at(now).await.unwrap();

        assert!(messenger.all().is_empty());
        assert!(store.marked_falls.lock().unwrap().is_empty());
    }

    #[test]
    fn alert_defaults_for_sparse_logs() {
        let mut log = fall("f1", "pending", "2025-06-15T07:58:00Z");
        log.resident_id = None;
        log.acceleration_magnitude = None;
        let at = parse_timestamp("2025-06-15T07:58:00Z").unwrap();
        let msg = alert_message(&log, at);
        assert!(msg.contains("Resident: <code>unknown</code>"));
        assert!(msg.contains("Acceleration: <code>0.00</code>"));
        assert!(msg.contains("Time: <code>2025-06-15 15:58</code>"));
    }
}
