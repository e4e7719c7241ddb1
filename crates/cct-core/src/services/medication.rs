//! Daily medication reminder scheduling.
//!
//! Once a day (and on `/refresh`) the service walks every registered
//! caregiver, pulls the medication plans of their residents, and queues a
//! one-shot reminder for each administration slot still ahead of "now".

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Utc};
use tracing::{info, warn};

use crate::{
    domain::{
        facility_now, facility_offset, parse_date, ChatId, MedicationPlan, MedicationTime,
        Resident,
    },
    formatting::escape_html,
    messaging::port::MessagingPort,
    ports::CareStore,
    registry::ChatRegistry,
    scheduler::ReminderScheduler,
    services::audit_reminder,
    utils::AuditLogger,
    Result,
};

pub struct MedicationReminderService {
    store: Arc<dyn CareStore>,
    messenger: Arc<dyn MessagingPort>,
    registry: ChatRegistry,
    scheduler: ReminderScheduler,
    audit: Option<AuditLogger>,
}

impl MedicationReminderService {
    pub fn new(
        store: Arc<dyn CareStore>,
        messenger: Arc<dyn MessagingPort>,
        registry: ChatRegistry,
        scheduler: ReminderScheduler,
        audit: Option<AuditLogger>,
    ) -> Self {
        Self {
            store,
            messenger,
            registry,
            scheduler,
            audit,
        }
    }

    /// Queue today's remaining medication reminders for every registered chat.
    pub async fn schedule_today(&self) -> Result<()> {
        self.schedule_today_at(facility_now()).await
    }

    pub async fn schedule_today_at(&self, now: DateTime<FixedOffset>) -> Result<()> {
        let mut queued = 0usize;
        for (_user_id, reg) in self.registry.entries().await {
            let residents = match self.store.residents_for_caregiver(&reg.name).await {
                Ok(residents) => residents,
                Err(err) => {
                    warn!(caregiver = %reg.name, error = %err, "resident lookup failed");
                    continue;
                }
            };
            for resident in &residents {
                match self.schedule_for_resident(resident, reg.chat_id, now).await {
                    Ok(n) => queued += n,
                    Err(err) => {
                        warn!(resident = %resident.full_name, error = %err,
                              "medication scheduling failed");
                    }
                }
            }
        }
        info!(queued, "medication reminders queued");
        Ok(())
    }

    async fn schedule_for_resident(
        &self,
        resident: &Resident,
        chat_id: ChatId,
        now: DateTime<FixedOffset>,
    ) -> Result<usize> {
        let plans = self.store.medications_for_resident(&resident.id).await?;
        let today = now.date_naive();
        let mut queued = 0usize;

        for plan in &plans {
            if !is_current(plan, today) || !due_today(plan, today) {
                continue;
            }
            queued += self.queue_plan(resident, plan, chat_id, now).await;
        }
        Ok(queued)
    }

    async fn queue_plan(
        &self,
        resident: &Resident,
        plan: &MedicationPlan,
        chat_id: ChatId,
        now: DateTime<FixedOffset>,
    ) -> usize {
        let today = now.date_naive();
        let now_utc = now.with_timezone(&Utc);
        let mut queued = 0usize;

        for slot in &plan.times_of_day {
            let Some(naive) = today.and_hms_opt(slot.hour, slot.minute, 0) else {
                warn!(medication = %plan.medication_name, hour = slot.hour,
                      minute = slot.minute, "invalid administration time, skipping");
                continue;
            };
            let at = (naive - Duration::seconds(facility_offset().local_minus_utc() as i64))
                .and_utc();
            if at <= now_utc {
                continue;
            }

            let job_id = format!(
                "med-{}-{}-{:02}{:02}",
                resident.id.0,
                plan.id.as_deref().unwrap_or(&plan.medication_name),
                slot.hour,
                slot.minute,
            );
            let message = medication_message(resident, plan, *slot);
            let messenger = Arc::clone(&self.messenger);
            let audit = self.audit.clone();
            self.scheduler
                .schedule_at(&job_id, at, move || async move {
                    messenger.send_html(chat_id, &message).await?;
                    audit_reminder(audit.as_ref(), "medication", chat_id, &message);
                    Ok(())
                })
                .await;
            queued += 1;
        }
        queued
    }
}

/// Plan is active on `today`: started, not yet ended, and not a custom
/// schedule (those are administered ad hoc, never reminded).
fn is_current(plan: &MedicationPlan, today: NaiveDate) -> bool {
    if plan.schedule_type.as_deref() == Some("custom") {
        return false;
    }
    let (Some(start), Some(end)) = (plan.start_date.as_deref(), plan.end_date.as_deref()) else {
        return false;
    };
    let (Ok(start), Ok(end)) = (parse_date(start), parse_date(end)) else {
        return false;
    };
    start <= today && today < end
}

/// Repeat arithmetic: every N days from the start date, or every N ISO weeks
/// on the listed weekdays.
fn due_today(plan: &MedicationPlan, today: NaiveDate) -> bool {
    let Some(start) = plan.start_date.as_deref().and_then(|s| parse_date(s).ok()) else {
        return false;
    };
    let repeat = i64::from(plan.repeat.max(1));

    match plan.schedule_type.as_deref() {
        Some("day") => (today - start).num_days().rem_euclid(repeat) == 0,
        Some("week") => {
            let week_diff =
                i64::from(today.iso_week().week()) - i64::from(start.iso_week().week());
            week_diff.rem_euclid(repeat) == 0
                && plan
                    .days_of_week
                    .iter()
                    .any(|d| d == &today.format("%a").to_string())
        }
        _ => false,
    }
}

fn medication_message(resident: &Resident, plan: &MedicationPlan, slot: MedicationTime) -> String {
    let icon = if resident.gender.as_deref() == Some("Male") {
        "👴"
    } else {
        "👵"
    };

    let mut out = format!(
        "🔔 [{:02}:{:02}] {} for {}\n\n\
         Please administer the following medication:\n\n\
         {} Resident: {}\n\
         💊 Medication: {}\n\
         🩺 Dosage: {}",
        slot.hour,
        slot.minute,
        escape_html(&plan.medication_name),
        escape_html(&resident.full_name),
        icon,
        escape_html(&resident.full_name),
        escape_html(&plan.medication_name),
        escape_html(plan.dosage.as_deref().unwrap_or("")),
    );
    if let Some(instructions) = plan.instructions.as_deref().filter(|s| !s.is_empty()) {
        out.push_str(&format!("\n📝 Instructions: {}", escape_html(instructions)));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::UserId,
        testutil::{medication_plan, resident, FakeStore, RecordingMessenger},
    };
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn current_requires_open_date_window() {
        let plan = medication_plan("Aspirin", "day", "2025-06-01", "2025-06-20");
        assert!(is_current(&plan, date(2025, 6, 1)));
        assert!(is_current(&plan, date(2025, 6, 19)));
        assert!(!is_current(&plan, date(2025, 6, 20)));
        assert!(!is_current(&plan, date(2025, 5, 31)));
    }

    #[test]
    fn custom_schedules_are_never_reminded() {
        let plan = medication_plan("Aspirin", "custom", "2025-06-01", "2025-06-20");
        assert!(!is_current(&plan, date(2025, 6, 10)));
    }

    #[test]
    fn daily_repeat_counts_from_start() {
        let mut plan = medication_plan("Aspirin", "day", "2025-06-01", "2025-07-01");
        plan.repeat = 2;
        assert!(due_today(&plan, date(2025, 6, 1)));
        assert!(!due_today(&plan, date(2025, 6, 2)));
        assert!(due_today(&plan, date(2025, 6, 3)));
    }

    #[test]
    fn zero_repeat_behaves_as_every_day() {
        let mut plan = medication_plan("Aspirin", "day", "2025-06-01", "2025-07-01");
        plan.repeat = 0;
        assert!(due_today(&plan, date(2025, 6, 1)));
        assert!(due_today(&plan, date(2025, 6, 2)));
    }

    #[test]
    fn weekly_repeat_requires_listed_weekday() {
        let mut plan = medication_plan("Insulin", "week", "2025-06-02", "2025-07-01");
        plan.days_of_week = vec!["Mon".to_string(), "Wed".to_string()];
        // 2025-06-09 is a Monday, 2025-06-10 a Tuesday.
        assert!(due_today(&plan, date(2025, 6, 9)));
        assert!(!due_today(&plan, date(2025, 6, 10)));
    }

    #[test]
    fn message_includes_dosage_and_instructions() {
        let mut res = resident("r1", "Mary Tan");
        res.gender = Some("Male".to_string());
        let mut plan = medication_plan("Aspirin", "day", "2025-06-01", "2025-07-01");
        plan.instructions = Some("After food".to_string());
        let msg = medication_message(&res, &plan, MedicationTime { hour: 9, minute: 5 });
        assert!(msg.starts_with("🔔 [09:05] Aspirin for Mary Tan"));
        assert!(msg.contains("👴 Resident: Mary Tan"));
        assert!(msg.contains("💊 Medication: Aspirin"));
        assert!(msg.contains("🩺 Dosage: 1 tablet"));
        assert!(msg.contains("📝 Instructions: After food"));
    }

    #[tokio::test]
    async fn queues_only_future_slots() {
        let mut plan = medication_plan("Aspirin", "day", "2025-06-01", "2025-07-01");
        plan.times_of_day = vec![
            MedicationTime { hour: 6, minute: 0 },
            MedicationTime { hour: 20, minute: 0 },
        ];

        let store = FakeStore {
            residents: vec![resident("r1", "Mary Tan")],
            medications: [("r1".to_string(), vec![plan])].into_iter().collect(),
            ..Default::default()
        };
        let messenger = Arc::new(RecordingMessenger::default());
        let registry = ChatRegistry::new();
        registry
            .register(UserId("u1".to_string()), ChatId(42), "Nurse Joy")
            .await;

        let service = MedicationReminderService::new(
            Arc::new(store),
            messenger.clone(),
            registry,
            ReminderScheduler::new(),
            None,
        );

        // 08:00 facility-local: the 06:00 slot is past, 20:00 is queued. The
        // queued instant is in the past on the real clock, so it fires
        // immediately.
        let now = facility_offset()
            .with_ymd_and_hms(2025, 6, 15, 8, 0, 0)
            .unwrap();
        service.schedule_today_at(now).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let sent = messenger.sent_to(42);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("🔔 [20:00] Aspirin for Mary Tan"));
    }
}
