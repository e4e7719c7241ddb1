//! Reminders bot: caregiver registration plus the proactive reminder loops.
//!
//! `/start` registers the caregiver's chat; the scheduler then drives the
//! activity/task/fall polling jobs and the daily medication cron against
//! every registered chat. `/refresh` re-runs everything on demand.

use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tracing::{error, info, warn};

use cct_api::CareApi;
use cct_core::{
    config::{BotKind, Config},
    domain::{facility_offset, ChatId, StaffUser},
    formatting::escape_html,
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    ports::CareStore,
    registry::ChatRegistry,
    respond::ERROR_REPLY,
    scheduler::{CronExpr, ReminderScheduler},
    security::verify_user,
    services::{
        activities::ActivityReminderService, falls::FallAlertService,
        medication::MedicationReminderService, tasks::TaskReminderService,
    },
    utils::{AuditEvent, AuditLogger},
    Result,
};

use crate::{audit_write, command_token, TelegramMessenger, UNAUTHORIZED_REPLY};

const REFRESH_NOTICE: &str =
    "🔃 Fetching the latest activities, tasks and medication reminders for you 🔃";

pub struct ReminderState {
    pub store: Arc<dyn CareStore>,
    pub messenger: Arc<dyn MessagingPort>,
    pub registry: ChatRegistry,
    pub scheduler: ReminderScheduler,
    pub medication: Arc<MedicationReminderService>,
    pub tasks: Arc<TaskReminderService>,
    pub activities: Arc<ActivityReminderService>,
    pub audit: AuditLogger,
}

/// Run the reminders bot until the process is stopped.
pub async fn run_polling(cfg: Arc<Config>) -> Result<()> {
    let token = cfg.bot_token(BotKind::Reminders)?.to_string();
    let bot = Bot::new(token);

    if let Ok(me) = bot.get_me().await {
        info!(bot = %me.username(), "reminders bot started");
    }

    let raw: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> =
        Arc::new(ThrottledMessenger::new(raw, ThrottleConfig::default()));
    let store: Arc<dyn CareStore> =
        Arc::new(CareApi::new(cfg.api_base_url.clone(), cfg.http_timeout));
    let registry = ChatRegistry::new();
    let scheduler = ReminderScheduler::new();
    let audit = AuditLogger::new(cfg.audit_log_path.clone(), cfg.audit_log_json);

    let medication = Arc::new(MedicationReminderService::new(
        store.clone(),
        messenger.clone(),
        registry.clone(),
        scheduler.clone(),
        Some(audit.clone()),
    ));
    let tasks = Arc::new(TaskReminderService::new(
        store.clone(),
        messenger.clone(),
        registry.clone(),
        Some(audit.clone()),
    ));
    let activities = Arc::new(ActivityReminderService::new(
        store.clone(),
        messenger.clone(),
        registry.clone(),
        Some(audit.clone()),
    ));
    let falls = Arc::new(FallAlertService::new(
        store.clone(),
        messenger.clone(),
        registry.clone(),
        Some(audit.clone()),
    ));

    spawn_jobs(
        &cfg,
        &scheduler,
        medication.clone(),
        tasks.clone(),
        activities.clone(),
        falls,
    )
    .await?;

    // One immediate pass so a restart catches up before the first interval.
    if let Err(err) = activities.run_pass().await {
        warn!(error = %err, "initial activity pass failed");
    }
    if let Err(err) = tasks.run_pass().await {
        warn!(error = %err, "initial task pass failed");
    }

    let state = Arc::new(ReminderState {
        store,
        messenger,
        registry,
        scheduler,
        medication,
        tasks,
        activities,
        audit,
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn spawn_jobs(
    cfg: &Config,
    scheduler: &ReminderScheduler,
    medication: Arc<MedicationReminderService>,
    tasks: Arc<TaskReminderService>,
    activities: Arc<ActivityReminderService>,
    falls: Arc<FallAlertService>,
) -> Result<()> {
    scheduler
        .add_interval_job("activity-poll", cfg.activity_poll, move || {
            let service = activities.clone();
            async move { service.run_pass().await }
        })
        .await;

    scheduler
        .add_interval_job("task-poll", cfg.task_poll, move || {
            let service = tasks.clone();
            async move { service.run_pass().await }
        })
        .await;

    scheduler
        .add_interval_job("fall-poll", cfg.fall_poll, move || {
            let service = falls.clone();
            async move { service.run_pass().await }
        })
        .await;

    let expr = CronExpr::parse(&cfg.medication_cron)?;
    scheduler
        .add_cron_job("medication-daily", expr, facility_offset(), move || {
            let service = medication.clone();
            async move { service.schedule_today().await }
        })
        .await;

    Ok(())
}

async fn handle_message(
    _bot: Bot,
    msg: Message,
    state: Arc<ReminderState>,
) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let command = command_token(text);
    if command != "/start" && command != "/refresh" {
        return Ok(());
    }

    let chat_id = ChatId(msg.chat.id.0);
    let handle = msg.from().and_then(|u| u.username.clone());
    let handle_str = handle.as_deref().unwrap_or("unknown");

    let user = match verify_user(state.store.as_ref(), handle.as_deref()).await {
        Ok(user) => user,
        Err(err) => {
            error!(error = %err, "user verification failed");
            send(&state, chat_id, ERROR_REPLY).await;
            return Ok(());
        }
    };
    let Some(user) = user else {
        audit_write(&state.audit, AuditEvent::auth(handle_str, false, None));
        send(&state, chat_id, UNAUTHORIZED_REPLY).await;
        return Ok(());
    };
    audit_write(
        &state.audit,
        AuditEvent::auth(handle_str, true, Some(&user.id)),
    );

    if command == "/start" {
        handle_start(&state, &user, chat_id).await;
    } else {
        handle_refresh(&state, &user, chat_id).await;
    }
    audit_write(
        &state.audit,
        AuditEvent::message(&user.id, handle_str, "command", text, None),
    );

    Ok(())
}

async fn handle_start(state: &ReminderState, user: &StaffUser, chat_id: ChatId) {
    state
        .registry
        .register(user.id.clone(), chat_id, &user.name)
        .await;
    info!(caregiver = %user.name, chat_id = chat_id.0, "caregiver registered");

    let greeting = format!(
        "Hello {} 👋  I'm your personal reminders bot, here to help you stay on top of \
         your activities, tasks, and medications!",
        escape_html(&user.name)
    );
    send(state, chat_id, &greeting).await;
}

async fn handle_refresh(state: &ReminderState, user: &StaffUser, chat_id: ChatId) {
    // Refresh also (re-)registers, so it works as a first contact too.
    state
        .registry
        .register(user.id.clone(), chat_id, &user.name)
        .await;
    send(state, chat_id, REFRESH_NOTICE).await;

    state.scheduler.clear_oneshots().await;
    if let Err(err) = state.activities.run_pass().await {
        warn!(error = %err, "refresh activity pass failed");
    }
    if let Err(err) = state.tasks.run_pass().await {
        warn!(error = %err, "refresh task pass failed");
    }
    if let Err(err) = state.medication.schedule_today().await {
        warn!(error = %err, "refresh medication scheduling failed");
    }
}

async fn send(state: &ReminderState, chat_id: ChatId, text: &str) {
    if let Err(err) = state.messenger.send_html(chat_id, text).await {
        warn!(error = %err, chat_id = chat_id.0, "send failed");
    }
}
