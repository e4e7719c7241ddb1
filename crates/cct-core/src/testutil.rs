//! In-memory fakes and fixture builders shared by service tests.

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::{
    domain::{
        parse_timestamp, Activity, CareTask, ChatId, FallLog, MedicationPlan, MessageId,
        MessageRef, Resident, ResidentId, StaffUser, TaskId, UserId,
    },
    messaging::{
        port::MessagingPort,
        types::{ChatAction, InlineKeyboard, MessagingCapabilities},
    },
    ports::{ActivityQuery, CareStore, TaskQuery},
    security::normalize_handle,
    Result,
};

// ============== Fake Store ==============

#[derive(Default)]
pub struct FakeStore {
    pub users: Vec<StaffUser>,
    pub residents: Vec<Resident>,
    pub medications: HashMap<String, Vec<MedicationPlan>>,
    pub tasks: Vec<CareTask>,
    pub activities: Vec<Activity>,
    pub falls: Vec<FallLog>,
    pub marked_tasks: Mutex<Vec<TaskId>>,
    pub marked_falls: Mutex<Vec<String>>,
    pub notes: Mutex<Vec<(ResidentId, String)>>,
}

fn starts_in_range(
    raw: Option<&str>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> bool {
    if start.is_none() && end.is_none() {
        return true;
    }
    let Some(at) = raw.and_then(|s| parse_timestamp(s).ok()) else {
        return false;
    };
    start.map_or(true, |s| at >= s) && end.map_or(true, |e| at <= e)
}

#[async_trait]
impl CareStore for FakeStore {
    async fn find_user_by_handle(&self, handle: &str) -> Result<Option<StaffUser>> {
        Ok(self
            .users
            .iter()
            .find(|u| {
                u.telegram_handle
                    .as_deref()
                    .map(normalize_handle)
                    .as_deref()
                    == Some(handle)
            })
            .cloned())
    }

    async fn residents_for_caregiver(&self, _caregiver_name: &str) -> Result<Vec<Resident>> {
        Ok(self.residents.clone())
    }

    async fn all_residents(&self, limit: usize) -> Result<Vec<Resident>> {
        Ok(self.residents.iter().take(limit).cloned().collect())
    }

    async fn medications_for_resident(
        &self,
        resident_id: &ResidentId,
    ) -> Result<Vec<MedicationPlan>> {
        Ok(self
            .medications
            .get(&resident_id.0)
            .cloned()
            .unwrap_or_default())
    }

    async fn tasks_window(
        &self,
        _start_date: NaiveDate,
        _end_date: NaiveDate,
        assigned_to: Option<&str>,
    ) -> Result<Vec<CareTask>> {
        Ok(self
            .tasks
            .iter()
            .filter(|t| assigned_to.map_or(true, |a| t.assigned_to.as_deref() == Some(a)))
            .cloned()
            .collect())
    }

    async fn query_tasks(&self, query: &TaskQuery) -> Result<Vec<CareTask>> {
        Ok(self
            .tasks
            .iter()
            .filter(|t| {
                query
                    .status
                    .as_deref()
                    .map_or(true, |s| t.status.as_deref() == Some(s))
                    && query
                        .priority
                        .as_deref()
                        .map_or(true, |p| t.priority.as_deref() == Some(p))
                    && query
                        .assigned_for
                        .as_deref()
                        .map_or(true, |r| t.assigned_for.as_deref() == Some(r))
                    && starts_in_range(t.start_date.as_deref(), query.start, query.end)
            })
            .cloned()
            .collect())
    }

    async fn mark_task_reminder_sent(&self, task_id: &TaskId) -> Result<()> {
        self.marked_tasks.lock().unwrap().push(task_id.clone());
        Ok(())
    }

    async fn activities_from(&self, start: DateTime<Utc>) -> Result<Vec<Activity>> {
        let mut out: Vec<Activity> = self
            .activities
            .iter()
            .filter(|a| {
                a.start_time
                    .as_deref()
                    .and_then(|s| parse_timestamp(s).ok())
                    .is_some_and(|at| at >= start)
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        Ok(out)
    }

    async fn query_activities(&self, query: &ActivityQuery) -> Result<Vec<Activity>> {
        Ok(self
            .activities
            .iter()
            .filter(|a| {
                query
                    .category
                    .as_deref()
                    .map_or(true, |c| a.category.as_deref() == Some(c))
                    && query.location.as_deref().map_or(true, |l| {
                        a.location
                            .as_deref()
                            .is_some_and(|al| al.to_lowercase().contains(&l.to_lowercase()))
                    })
                    && starts_in_range(a.start_time.as_deref(), query.start, query.end)
            })
            .cloned()
            .collect())
    }

    async fn fall_logs_after(&self, after: DateTime<Utc>) -> Result<Vec<FallLog>> {
        Ok(self
            .falls
            .iter()
            .filter(|l| {
                l.timestamp
                    .as_deref()
                    .and_then(|s| parse_timestamp(s).ok())
                    .is_some_and(|at| at >= after)
            })
            .cloned()
            .collect())
    }

    async fn mark_fall_alerted(&self, log_id: &str) -> Result<()> {
        self.marked_falls.lock().unwrap().push(log_id.to_string());
        Ok(())
    }

    async fn add_resident_note(
        &self,
        resident_id: &ResidentId,
        note: &str,
        _author: Option<&UserId>,
    ) -> Result<bool> {
        self.notes
            .lock()
            .unwrap()
            .push((resident_id.clone(), note.to_string()));
        Ok(true)
    }
}

// ============== Recording Messenger ==============

#[derive(Default)]
pub struct RecordingMessenger {
    pub sent: Mutex<Vec<(i64, String)>>,
}

impl RecordingMessenger {
    pub fn sent_to(&self, chat_id: i64) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == chat_id)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn all(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagingPort for RecordingMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_html: true,
            supports_edit: true,
            supports_chat_actions: true,
            supports_inline_keyboards: true,
            max_message_len: 4096,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.sent.lock().unwrap().push((chat_id.0, html.to_string()));
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(self.sent.lock().unwrap().len() as i32),
        })
    }

    async fn edit_html(&self, _msg: MessageRef, _html: &str) -> Result<()> {
        Ok(())
    }

    async fn delete_message(&self, _msg: MessageRef) -> Result<()> {
        Ok(())
    }

    async fn send_chat_action(&self, _chat_id: ChatId, _action: ChatAction) -> Result<()> {
        Ok(())
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        _keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.send_html(chat_id, text).await
    }

    async fn answer_callback_query(&self, _callback_id: &str, _text: Option<&str>) -> Result<()> {
        Ok(())
    }
}

// ============== Fixture Builders ==============

pub fn resident(id: &str, full_name: &str) -> Resident {
    Resident {
        id: ResidentId(id.to_string()),
        full_name: full_name.to_string(),
        room_number: Some("1".to_string()),
        gender: None,
        medical_conditions: vec![],
        medications: vec![],
        notes: None,
    }
}

pub fn task(id: &str, title: &str, start: &str) -> CareTask {
    CareTask {
        id: TaskId(id.to_string()),
        task_title: Some(title.to_string()),
        task_details: None,
        status: Some("Pending".to_string()),
        priority: None,
        resident_name: None,
        resident_room: None,
        assigned_to: None,
        assigned_to_name: None,
        assigned_for: None,
        assigned_for_name: None,
        start_date: Some(start.to_string()),
        due_date: None,
        remind_prior: None,
        reminder_sent: false,
        recurring: false,
        recurring_days: vec![],
    }
}

pub fn activity(id: &str, title: &str, start: &str) -> Activity {
    Activity {
        id: Some(id.to_string()),
        title: Some(title.to_string()),
        description: None,
        location: None,
        category: None,
        created_by_name: None,
        start_time: Some(start.to_string()),
        end_time: None,
        reminder_minutes: None,
        reminder_sent: false,
    }
}

pub fn fall(id: &str, status: &str, timestamp: &str) -> FallLog {
    FallLog {
        id: id.to_string(),
        resident_id: Some("r1".to_string()),
        status: Some(status.to_string()),
        timestamp: Some(timestamp.to_string()),
        acceleration_magnitude: Some(3.2),
        alert_sent: false,
    }
}

pub fn medication_plan(name: &str, schedule_type: &str, start: &str, end: &str) -> MedicationPlan {
    MedicationPlan {
        id: Some(format!("plan-{name}")),
        medication_name: name.to_string(),
        dosage: Some("1 tablet".to_string()),
        instructions: None,
        schedule_type: Some(schedule_type.to_string()),
        repeat: 1,
        days_of_week: vec![],
        times_of_day: vec![],
        start_date: Some(start.to_string()),
        end_date: Some(end.to_string()),
    }
}
