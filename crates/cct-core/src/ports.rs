//! Port to the care backend. Implemented by `cct-api` over HTTP; services
//! are tested against in-memory fakes.

use chrono::{DateTime, NaiveDate, Utc};

use crate::{
    domain::{Activity, CareTask, FallLog, MedicationPlan, Resident, ResidentId, StaffUser, TaskId, UserId},
    Result,
};

/// Filtered task query, assembled from parsed assistant filters.
#[derive(Clone, Debug, Default)]
pub struct TaskQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub assigned_for: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Filtered activity query.
#[derive(Clone, Debug, Default)]
pub struct ActivityQuery {
    pub category: Option<String>,
    pub location: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[async_trait::async_trait]
pub trait CareStore: Send + Sync {
    /// Staff lookup by normalized Telegram handle; `None` when unknown.
    async fn find_user_by_handle(&self, handle: &str) -> Result<Option<StaffUser>>;

    async fn residents_for_caregiver(&self, caregiver_name: &str) -> Result<Vec<Resident>>;

    async fn all_residents(&self, limit: usize) -> Result<Vec<Resident>>;

    async fn medications_for_resident(&self, resident_id: &ResidentId)
        -> Result<Vec<MedicationPlan>>;

    /// Tasks in `[start_date, end_date]` (facility-local dates), optionally
    /// restricted to one assignee.
    async fn tasks_window(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        assigned_to: Option<&str>,
    ) -> Result<Vec<CareTask>>;

    async fn query_tasks(&self, query: &TaskQuery) -> Result<Vec<CareTask>>;

    async fn mark_task_reminder_sent(&self, task_id: &TaskId) -> Result<()>;

    /// Activities starting at or after `start`, ascending by start time.
    async fn activities_from(&self, start: DateTime<Utc>) -> Result<Vec<Activity>>;

    async fn query_activities(&self, query: &ActivityQuery) -> Result<Vec<Activity>>;

    async fn fall_logs_after(&self, after: DateTime<Utc>) -> Result<Vec<FallLog>>;

    async fn mark_fall_alerted(&self, log_id: &str) -> Result<()>;

    async fn add_resident_note(
        &self,
        resident_id: &ResidentId,
        note: &str,
        author: Option<&UserId>,
    ) -> Result<bool>;
}
