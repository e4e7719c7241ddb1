//! Assistant query handling: parsed free text in, rendered reply out.

use std::sync::Arc;

use chrono::{DateTime, Datelike, FixedOffset, Utc, Weekday};
use tracing::error;

use crate::{
    domain::{facility_now, parse_timestamp, Activity, CareTask},
    messaging::types::{InlineButton, InlineKeyboard},
    ports::{ActivityQuery, CareStore, TaskQuery},
    query::{parse_query_at, today_range, ParsedQuery, QueryIntent, TimeRange},
    respond::{
        format_activities, format_resident_list, format_resident_profile, format_tasks,
        ERROR_REPLY, UNKNOWN_COMMAND,
    },
    services::residents::{suggestion_text, ResidentDirectory},
    Result,
};

/// Upper bound on tasks pulled per assistant query.
const MAX_QUERY_RESULTS: usize = 100;

// ============== Task Lookup ==============

pub struct TaskLookup {
    store: Arc<dyn CareStore>,
}

impl TaskLookup {
    pub fn new(store: Arc<dyn CareStore>) -> Self {
        Self { store }
    }

    /// Filtered fetch, newest first, capped at [`MAX_QUERY_RESULTS`].
    pub async fn query(&self, query: &TaskQuery) -> Result<Vec<CareTask>> {
        let mut tasks = self.store.query_tasks(query).await?;
        tasks.sort_by(|a, b| b.start_date.cmp(&a.start_date));
        tasks.truncate(MAX_QUERY_RESULTS);
        Ok(tasks)
    }

    pub async fn by_time_range(&self, range: TimeRange) -> Result<Vec<CareTask>> {
        self.query(&TaskQuery {
            start: Some(range.start),
            end: Some(range.end),
            ..Default::default()
        })
        .await
    }

    pub async fn by_status(&self, status: &str) -> Result<Vec<CareTask>> {
        self.query(&TaskQuery {
            status: Some(status.to_string()),
            ..Default::default()
        })
        .await
    }

    pub async fn overdue(&self) -> Result<Vec<CareTask>> {
        self.overdue_at(Utc::now()).await
    }

    /// Pending tasks whose due date has already passed.
    pub async fn overdue_at(&self, now: DateTime<Utc>) -> Result<Vec<CareTask>> {
        let pending = self.by_status("Pending").await?;
        Ok(pending
            .into_iter()
            .filter(|t| {
                t.due_date
                    .as_deref()
                    .and_then(|s| parse_timestamp(s).ok())
                    .is_some_and(|due| due < now)
            })
            .collect())
    }

    pub async fn today(&self) -> Result<Vec<CareTask>> {
        self.today_at(facility_now()).await
    }

    /// Tasks starting today plus recurring tasks that repeat on today's
    /// weekday. The backend cannot express this disjunction, so it is
    /// filtered client side.
    pub async fn today_at(&self, now: DateTime<FixedOffset>) -> Result<Vec<CareTask>> {
        let range = today_range(now);
        let weekday = now.weekday();
        let all = self.query(&TaskQuery::default()).await?;
        Ok(all
            .into_iter()
            .filter(|t| {
                let starts_today = t
                    .start_date
                    .as_deref()
                    .and_then(|s| parse_timestamp(s).ok())
                    .is_some_and(|at| at >= range.start && at <= range.end);
                starts_today || (t.recurring && recurs_on(&t.recurring_days, weekday))
            })
            .collect())
    }
}

/// Recurring-day entries come in several backend spellings: full weekday
/// name, three-letter abbreviation, or Monday-based index.
fn recurs_on(days: &[String], weekday: Weekday) -> bool {
    let (full, abbr) = match weekday {
        Weekday::Mon => ("Monday", "Mon"),
        Weekday::Tue => ("Tuesday", "Tue"),
        Weekday::Wed => ("Wednesday", "Wed"),
        Weekday::Thu => ("Thursday", "Thu"),
        Weekday::Fri => ("Friday", "Fri"),
        Weekday::Sat => ("Saturday", "Sat"),
        Weekday::Sun => ("Sunday", "Sun"),
    };
    let index = weekday.num_days_from_monday().to_string();
    days.iter().any(|d| d == full || d == abbr || d == &index)
}

// ============== Activity Lookup ==============

pub struct ActivityLookup {
    store: Arc<dyn CareStore>,
}

impl ActivityLookup {
    pub fn new(store: Arc<dyn CareStore>) -> Self {
        Self { store }
    }

    pub async fn query(&self, query: &ActivityQuery) -> Result<Vec<Activity>> {
        self.store.query_activities(query).await
    }

    pub async fn today(&self) -> Result<Vec<Activity>> {
        self.today_at(facility_now()).await
    }

    pub async fn today_at(&self, now: DateTime<FixedOffset>) -> Result<Vec<Activity>> {
        let range = today_range(now);
        self.query(&ActivityQuery {
            start: Some(range.start),
            end: Some(range.end),
            ..Default::default()
        })
        .await
    }
}

// ============== Assistant Service ==============

/// A reply ready for the messenger: plain text, or text with follow-up
/// buttons attached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssistantReply {
    Text(String),
    Keyboard {
        text: String,
        keyboard: InlineKeyboard,
    },
}

impl AssistantReply {
    pub fn text(&self) -> &str {
        match self {
            Self::Text(t) => t,
            Self::Keyboard { text, .. } => text,
        }
    }
}

pub struct AssistantService {
    directory: ResidentDirectory,
    tasks: TaskLookup,
    activities: ActivityLookup,
}

impl AssistantService {
    pub fn new(store: Arc<dyn CareStore>) -> Self {
        Self {
            directory: ResidentDirectory::new(Arc::clone(&store)),
            tasks: TaskLookup::new(Arc::clone(&store)),
            activities: ActivityLookup::new(store),
        }
    }

    pub fn directory(&self) -> &ResidentDirectory {
        &self.directory
    }

    /// Answer one free-text query. Never fails; backend errors collapse to
    /// the generic error reply.
    pub async fn respond(&self, text: &str) -> AssistantReply {
        self.respond_at(text, facility_now()).await
    }

    pub async fn respond_at(&self, text: &str, now: DateTime<FixedOffset>) -> AssistantReply {
        let parsed = parse_query_at(text, now);
        match self.dispatch(&parsed).await {
            Ok(reply) => reply,
            Err(err) => {
                error!(error = %err, "assistant query failed");
                AssistantReply::Text(ERROR_REPLY.to_string())
            }
        }
    }

    async fn dispatch(&self, parsed: &ParsedQuery) -> Result<AssistantReply> {
        match parsed.intent {
            QueryIntent::Tasks => {
                let tasks = self
                    .tasks
                    .query(&TaskQuery {
                        status: parsed.status.clone(),
                        priority: parsed.priority.clone(),
                        start: parsed.time_range.map(|r| r.start),
                        end: parsed.time_range.map(|r| r.end),
                        ..Default::default()
                    })
                    .await?;
                Ok(AssistantReply::Text(format_tasks(&tasks)))
            }
            QueryIntent::Activities => {
                let activities = self
                    .activities
                    .query(&ActivityQuery {
                        category: parsed.category.clone(),
                        location: parsed.location.clone(),
                        start: parsed.time_range.map(|r| r.start),
                        end: parsed.time_range.map(|r| r.end),
                    })
                    .await?;
                Ok(AssistantReply::Text(format_activities(&activities)))
            }
            QueryIntent::Resident => {
                self.resident_reply(
                    parsed.resident_name.as_deref().unwrap_or(""),
                    parsed.time_range,
                )
                .await
            }
            QueryIntent::General => Ok(AssistantReply::Text(UNKNOWN_COMMAND.to_string())),
        }
    }

    async fn resident_reply(
        &self,
        name: &str,
        range: Option<TimeRange>,
    ) -> Result<AssistantReply> {
        if name.trim().is_empty() {
            let residents = self.directory.all().await?;
            return Ok(AssistantReply::Text(format_resident_list(&residents)));
        }

        let Some(resident) = self.directory.find_by_name(name).await? else {
            let suggestions = self.directory.suggestions_for(name).await?;
            return Ok(AssistantReply::Text(format!(
                "I couldn't find a resident named '{}'. {}",
                name,
                suggestion_text(&suggestions)
            )));
        };

        let tasks = self.directory.tasks_for(&resident.id, range).await?;
        Ok(AssistantReply::Keyboard {
            text: format_resident_profile(&resident, &tasks),
            keyboard: follow_up_keyboard(),
        })
    }

    /// Callback handler: the "Show Today's Tasks" button.
    pub async fn today_tasks(&self) -> Result<String> {
        let tasks = self.tasks.today().await?;
        Ok(format_tasks(&tasks))
    }

    /// Callback handler: the "Show All Residents" button.
    pub async fn list_residents(&self) -> Result<String> {
        let residents = self.directory.all().await?;
        Ok(format_resident_list(&residents))
    }
}

fn follow_up_keyboard() -> InlineKeyboard {
    InlineKeyboard::single_row(vec![
        InlineButton::new("Show Today's Tasks", "today_tasks"),
        InlineButton::new("Show All Residents", "list_residents"),
    ])
}
