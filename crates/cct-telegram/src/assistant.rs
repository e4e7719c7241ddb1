//! Assistant bot: free-text care queries over Telegram.
//!
//! Every message is rate-limited and verified against the staff directory,
//! then parsed and dispatched to the lookup services. Resident replies carry
//! a follow-up inline keyboard whose callbacks re-run the common lookups.

use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*, types::CallbackQuery};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use cct_api::CareApi;
use cct_core::{
    config::{BotKind, Config},
    domain::{ChatId, StaffUser},
    formatting::{escape_html, split_html_chunks},
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
        types::ChatAction,
    },
    ports::CareStore,
    respond::{ERROR_REPLY, RESIDENT_NOT_FOUND},
    security::{verify_user, RateLimiter},
    services::{
        assistant::{AssistantReply, AssistantService},
        residents::suggestion_text,
    },
    utils::{AuditEvent, AuditLogger},
    Result,
};
use cct_openai::OpenAiClient;

use crate::{audit_write, command_token, TelegramMessenger, UNAUTHORIZED_REPLY};

const WELCOME: &str = "Welcome! How can I help you today? 🤖";
const NOTE_USAGE: &str = "Usage: /note &lt;resident name&gt;: &lt;note text&gt;";

pub struct AssistantState {
    pub cfg: Arc<Config>,
    pub store: Arc<dyn CareStore>,
    pub messenger: Arc<dyn MessagingPort>,
    pub assistant: AssistantService,
    pub openai: Option<OpenAiClient>,
    pub rate_limiter: Mutex<RateLimiter>,
    pub audit: AuditLogger,
}

/// Run the assistant bot until the process is stopped.
pub async fn run_polling(cfg: Arc<Config>) -> Result<()> {
    let token = cfg.bot_token(BotKind::Assistant)?.to_string();
    let bot = Bot::new(token);

    if let Ok(me) = bot.get_me().await {
        info!(bot = %me.username(), "assistant bot started");
    }

    let raw: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> =
        Arc::new(ThrottledMessenger::new(raw, ThrottleConfig::default()));
    let store: Arc<dyn CareStore> =
        Arc::new(CareApi::new(cfg.api_base_url.clone(), cfg.http_timeout));
    let assistant = AssistantService::new(store.clone());

    let openai = cfg.openai_api_key.clone().map(OpenAiClient::new);
    if openai.is_none() {
        info!("OPENAI_API_KEY not set, notes are stored verbatim");
    }

    let state = Arc::new(AssistantState {
        rate_limiter: Mutex::new(RateLimiter::new(
            cfg.rate_limit_enabled,
            cfg.rate_limit_requests,
            cfg.rate_limit_window,
        )),
        audit: AuditLogger::new(cfg.audit_log_path.clone(), cfg.audit_log_json),
        cfg,
        store,
        messenger,
        assistant,
        openai,
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handle_callback))
        .branch(Update::filter_message().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(
    _bot: Bot,
    msg: Message,
    state: Arc<AssistantState>,
) -> ResponseResult<()> {
    let Some(text) = msg.text().map(|s| s.trim().to_string()) else {
        return Ok(());
    };
    if text.is_empty() {
        return Ok(());
    }
    let chat_id = ChatId(msg.chat.id.0);

    if command_token(&text) == "/start" {
        send_text(&state, chat_id, WELCOME).await;
        return Ok(());
    }

    let handle = msg.from().and_then(|u| u.username.clone());
    let Some(user) = authorize(&state, handle.as_deref(), chat_id).await else {
        return Ok(());
    };
    let username = handle.as_deref().unwrap_or("unknown");

    match command_token(&text) {
        "/residents" => {
            match state.assistant.list_residents().await {
                Ok(reply) => {
                    audit_write(
                        &state.audit,
                        AuditEvent::message(&user.id, username, "command", &text, Some(&reply)),
                    );
                    send_text(&state, chat_id, &reply).await;
                }
                Err(err) => {
                    error!(error = %err, "resident list failed");
                    send_text(&state, chat_id, ERROR_REPLY).await;
                }
            }
            return Ok(());
        }
        "/note" => {
            let args = text.splitn(2, char::is_whitespace).nth(1).unwrap_or("");
            handle_note(&state, &user, username, args, chat_id).await;
            return Ok(());
        }
        _ => {}
    }

    let (allowed, retry_after) = state.rate_limiter.lock().await.check(&user.id);
    if !allowed {
        let secs = retry_after.map(|d| d.as_secs_f64()).unwrap_or(0.0);
        audit_write(
            &state.audit,
            AuditEvent::rate_limit(&user.id, username, secs),
        );
        let notice = format!(
            "⏳ You're sending messages too quickly. Please wait {} seconds and try again.",
            secs.ceil() as u64
        );
        send_text(&state, chat_id, &notice).await;
        return Ok(());
    }

    if let Err(err) = state
        .messenger
        .send_chat_action(chat_id, ChatAction::Typing)
        .await
    {
        warn!(error = %err, "chat action failed");
    }

    let reply = state.assistant.respond(&text).await;
    audit_write(
        &state.audit,
        AuditEvent::message(&user.id, username, "text", &text, Some(reply.text())),
    );

    match reply {
        AssistantReply::Text(body) => send_text(&state, chat_id, &body).await,
        AssistantReply::Keyboard { text: body, keyboard } => {
            if let Err(err) = state
                .messenger
                .send_inline_keyboard(chat_id, &body, keyboard)
                .await
            {
                warn!(error = %err, chat_id = chat_id.0, "keyboard send failed");
            }
        }
    }

    Ok(())
}

async fn handle_callback(
    _bot: Bot,
    q: CallbackQuery,
    state: Arc<AssistantState>,
) -> ResponseResult<()> {
    let cb_id = q.id.clone();
    let data = q.data.clone().unwrap_or_default();
    let chat_id = q.message.as_ref().map(|m| ChatId(m.chat.id.0));

    let handle = q.from.username.clone();
    let user = match verify_user(state.store.as_ref(), handle.as_deref()).await {
        Ok(user) => user,
        Err(err) => {
            error!(error = %err, "callback verification failed");
            None
        }
    };
    if user.is_none() {
        answer(&state, &cb_id, Some("Unauthorized")).await;
        return Ok(());
    }

    let reply = match data.as_str() {
        "today_tasks" => state.assistant.today_tasks().await,
        "list_residents" => state.assistant.list_residents().await,
        _ => {
            answer(&state, &cb_id, None).await;
            return Ok(());
        }
    };
    answer(&state, &cb_id, None).await;

    let Some(chat_id) = chat_id else {
        return Ok(());
    };
    match reply {
        Ok(body) => send_text(&state, chat_id, &body).await,
        Err(err) => {
            error!(error = %err, callback = %data, "callback lookup failed");
            send_text(&state, chat_id, ERROR_REPLY).await;
        }
    }

    Ok(())
}

// ============== Note taking ==============

async fn handle_note(
    state: &AssistantState,
    user: &StaffUser,
    username: &str,
    args: &str,
    chat_id: ChatId,
) {
    let Some((name, note)) = parse_note(args) else {
        send_text(state, chat_id, NOTE_USAGE).await;
        return;
    };

    match add_note(state, user, &name, &note).await {
        Ok(reply) => {
            audit_write(
                &state.audit,
                AuditEvent::message(&user.id, username, "command", args, Some(&reply)),
            );
            send_text(state, chat_id, &reply).await;
        }
        Err(err) => {
            error!(error = %err, "note command failed");
            audit_write(
                &state.audit,
                AuditEvent::error(username, &err.to_string(), Some("/note")),
            );
            send_text(state, chat_id, ERROR_REPLY).await;
        }
    }
}

fn parse_note(args: &str) -> Option<(String, String)> {
    let (name, note) = args.split_once(':')?;
    let name = name.trim();
    let note = note.trim();
    if name.is_empty() || note.is_empty() {
        return None;
    }
    Some((name.to_string(), note.to_string()))
}

async fn add_note(
    state: &AssistantState,
    user: &StaffUser,
    name: &str,
    raw_note: &str,
) -> Result<String> {
    let directory = state.assistant.directory();
    let Some(resident) = directory.find_by_name(name).await? else {
        let suggestions = directory.suggestions_for(name).await?;
        return Ok(format!(
            "I couldn't find a resident named '{name}'. {}",
            suggestion_text(&suggestions)
        ));
    };

    // Tidy dictated text when a summarizer is configured; otherwise store
    // the caregiver's words as given.
    let note = match &state.openai {
        Some(client) => match client.summarize_text(raw_note).await {
            Ok(summary) => summary,
            Err(err) => {
                warn!(error = %err, "summarization failed, storing raw note");
                raw_note.to_string()
            }
        },
        None => raw_note.to_string(),
    };

    if !directory.add_note(&resident.id, &note, Some(&user.id)).await? {
        return Ok(RESIDENT_NOT_FOUND.to_string());
    }
    Ok(format!(
        "📝 Note added for {}.",
        escape_html(&resident.full_name)
    ))
}

// ============== Shared send/auth helpers ==============

async fn authorize(
    state: &AssistantState,
    handle: Option<&str>,
    chat_id: ChatId,
) -> Option<StaffUser> {
    let handle_str = handle.unwrap_or("unknown");
    match verify_user(state.store.as_ref(), handle).await {
        Ok(Some(user)) => {
            audit_write(
                &state.audit,
                AuditEvent::auth(handle_str, true, Some(&user.id)),
            );
            Some(user)
        }
        Ok(None) => {
            audit_write(&state.audit, AuditEvent::auth(handle_str, false, None));
            send_text(state, chat_id, UNAUTHORIZED_REPLY).await;
            None
        }
        Err(err) => {
            error!(error = %err, "user verification failed");
            send_text(state, chat_id, ERROR_REPLY).await;
            None
        }
    }
}

/// Send a reply, splitting over-length HTML across several messages.
async fn send_text(state: &AssistantState, chat_id: ChatId, text: &str) {
    for chunk in split_html_chunks(text, state.cfg.telegram_safe_limit) {
        if let Err(err) = state.messenger.send_html(chat_id, &chunk).await {
            warn!(error = %err, chat_id = chat_id.0, "send failed");
            break;
        }
    }
}

async fn answer(state: &AssistantState, cb_id: &str, text: Option<&str>) {
    if let Err(err) = state.messenger.answer_callback_query(cb_id, text).await {
        warn!(error = %err, "callback answer failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_args_split_on_first_colon() {
        let (name, note) = parse_note("Mary Tan: ate well today: no issues").unwrap();
        assert_eq!(name, "Mary Tan");
        assert_eq!(note, "ate well today: no issues");
    }

    #[test]
    fn note_args_require_both_parts() {
        assert!(parse_note("Mary Tan").is_none());
        assert!(parse_note(": note only").is_none());
        assert!(parse_note("Mary Tan:   ").is_none());
    }
}
