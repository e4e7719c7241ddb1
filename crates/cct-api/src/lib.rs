//! HTTP adapter for the care backend.
//!
//! `CareApi` is a thin typed client over `API_BASE_URL`: one pooled
//! `reqwest::Client`, every endpoint decoding straight into `cct-core`
//! domain structs. It implements [`CareStore`] so the bot cores never see
//! HTTP.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use cct_core::{
    domain::{
        Activity, CareTask, FallLog, MedicationPlan, Resident, ResidentId, StaffUser, TaskId,
        UserId,
    },
    ports::{ActivityQuery, CareStore, TaskQuery},
    Error, Result,
};

/// How much of an error body is kept in the error message.
const BODY_SNIPPET_LEN: usize = 200;

#[derive(Clone, Debug)]
pub struct CareApi {
    base_url: String,
    http: reqwest::Client,
}

impl CareApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client build");
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let resp = self
            .http
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(request_error)?;
        decode(resp).await
    }

    /// Like [`Self::get_json`] but treats 404 as "not there".
    async fn get_json_opt<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        let resp = self
            .http
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(request_error)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(decode(resp).await?))
    }

    async fn patch_empty(&self, path: &str) -> Result<()> {
        let resp = self
            .http
            .patch(self.url(path))
            .send()
            .await
            .map_err(request_error)?;
        check_status(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl CareStore for CareApi {
    async fn find_user_by_handle(&self, handle: &str) -> Result<Option<StaffUser>> {
        self.get_json_opt(
            "/users/by-telegram-handle",
            &[("handle", handle.to_string())],
        )
        .await
    }

    async fn residents_for_caregiver(&self, caregiver_name: &str) -> Result<Vec<Resident>> {
        self.get_json(
            "/residents/getAllResidents",
            &[("caregiver_name", caregiver_name.to_string())],
        )
        .await
    }

    async fn all_residents(&self, limit: usize) -> Result<Vec<Resident>> {
        self.get_json("/residents", &[("limit", limit.to_string())])
            .await
    }

    async fn medications_for_resident(
        &self,
        resident_id: &ResidentId,
    ) -> Result<Vec<MedicationPlan>> {
        self.get_json(&format!("/residents/{}/medications", resident_id.0), &[])
            .await
    }

    async fn tasks_window(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        assigned_to: Option<&str>,
    ) -> Result<Vec<CareTask>> {
        let mut query = vec![
            ("start_date", start_date.format("%Y-%m-%d").to_string()),
            ("end_date", end_date.format("%Y-%m-%d").to_string()),
        ];
        if let Some(assignee) = assigned_to {
            query.push(("assigned_to", assignee.to_string()));
        }
        self.get_json("/tasks/telegram", &query).await
    }

    async fn query_tasks(&self, query: &TaskQuery) -> Result<Vec<CareTask>> {
        self.get_json("/tasks", &task_query_params(query)).await
    }

    async fn mark_task_reminder_sent(&self, task_id: &TaskId) -> Result<()> {
        self.patch_empty(&format!("/tasks/{}/mark_reminder_sent", task_id.0))
            .await
    }

    async fn activities_from(&self, start: DateTime<Utc>) -> Result<Vec<Activity>> {
        self.get_json(
            "/activities",
            &[
                ("start_date", rfc3339(start)),
                ("sort_by", "start_time".to_string()),
                ("sort_order", "asc".to_string()),
            ],
        )
        .await
    }

    async fn query_activities(&self, query: &ActivityQuery) -> Result<Vec<Activity>> {
        self.get_json("/activities", &activity_query_params(query))
            .await
    }

    async fn fall_logs_after(&self, after: DateTime<Utc>) -> Result<Vec<FallLog>> {
        self.get_json("/fall-detection/logs", &[("start_after", rfc3339(after))])
            .await
    }

    async fn mark_fall_alerted(&self, log_id: &str) -> Result<()> {
        self.patch_empty(&format!("/fall-detection/logs/{log_id}/mark_alerted"))
            .await
    }

    async fn add_resident_note(
        &self,
        resident_id: &ResidentId,
        note: &str,
        author: Option<&UserId>,
    ) -> Result<bool> {
        let body = serde_json::json!({
            "note": note,
            "author_id": author.map(|u| u.0.clone()),
        });
        let resp = self
            .http
            .post(self.url(&format!("/residents/{}/notes", resident_id.0)))
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;
        // Unknown resident is a caller-visible miss, not a hard failure.
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_status(resp).await?;
        Ok(true)
    }
}

// ============== Query assembly ==============

fn task_query_params(query: &TaskQuery) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    if let Some(status) = &query.status {
        params.push(("status", status.clone()));
    }
    if let Some(priority) = &query.priority {
        params.push(("priority", priority.clone()));
    }
    if let Some(assigned_for) = &query.assigned_for {
        params.push(("assigned_for", assigned_for.clone()));
    }
    if let Some(start) = query.start {
        params.push(("start_date", rfc3339(start)));
    }
    if let Some(end) = query.end {
        params.push(("end_date", rfc3339(end)));
    }
    params
}

fn activity_query_params(query: &ActivityQuery) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    if let Some(category) = &query.category {
        params.push(("category", category.clone()));
    }
    if let Some(location) = &query.location {
        params.push(("location", location.clone()));
    }
    if let Some(start) = query.start {
        params.push(("start_date", rfc3339(start)));
    }
    if let Some(end) = query.end {
        params.push(("end_date", rfc3339(end)));
    }
    params
}

// ============== Response handling ==============

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let resp = check_status(resp).await?;
    resp.json::<T>()
        .await
        .map_err(|e| Error::External(format!("api decode error: {e}")))
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(Error::Api {
        status: status.as_u16(),
        message: snippet(&body),
    })
}

fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_LEN).collect()
}

fn request_error(e: reqwest::Error) -> Error {
    Error::External(format!("api request error: {e}"))
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn base_url_join_strips_trailing_slash() {
        let api = CareApi::new("http://api.local/", Duration::from_secs(5));
        assert_eq!(api.url("/tasks"), "http://api.local/tasks");
    }

    #[test]
    fn task_params_skip_unset_filters() {
        let query = TaskQuery {
            status: Some("Pending".to_string()),
            start: Some(Utc.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        let params = task_query_params(&query);
        assert_eq!(
            params,
            vec![
                ("status", "Pending".to_string()),
                ("start_date", "2025-06-15T00:00:00Z".to_string()),
            ]
        );
    }

    #[test]
    fn activity_params_cover_all_filters() {
        let query = ActivityQuery {
            category: Some("Exercise".to_string()),
            location: Some("Main Hall".to_string()),
            start: Some(Utc.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap()),
            end: Some(Utc.with_ymd_and_hms(2025, 6, 15, 23, 59, 59).unwrap()),
        };
        let params = activity_query_params(&query);
        assert_eq!(params.len(), 4);
        assert_eq!(params[3].1, "2025-06-15T23:59:59Z");
    }

    #[test]
    fn error_snippet_is_bounded() {
        let body = "x".repeat(BODY_SNIPPET_LEN * 2);
        assert_eq!(snippet(&body).len(), BODY_SNIPPET_LEN);
    }
}
