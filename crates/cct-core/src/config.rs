use std::{env, fs, path::Path, path::PathBuf, time::Duration};

use crate::{errors::Error, Result};

/// Which bot a binary is about to run. Controls which token is required.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BotKind {
    Reminders,
    Assistant,
}

/// Typed configuration for both bots.
#[derive(Clone, Debug)]
pub struct Config {
    // Care backend
    pub api_base_url: String,
    pub http_timeout: Duration,

    // Bot tokens
    pub reminders_bot_token: Option<String>,
    pub assistant_bot_token: Option<String>,

    // Optional providers
    pub openai_api_key: Option<String>,

    // Telegram limits
    pub telegram_message_limit: usize,
    pub telegram_safe_limit: usize,

    // Scheduler cadence
    pub activity_poll: Duration,
    pub task_poll: Duration,
    pub fall_poll: Duration,
    pub medication_cron: String,

    // Rate limiting
    pub rate_limit_enabled: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,

    // Audit
    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,
}

impl Config {
    /// Load configuration for the combined binary (both tokens required).
    pub fn load() -> Result<Self> {
        let cfg = Self::load_unchecked()?;
        cfg.bot_token(BotKind::Reminders)?;
        cfg.bot_token(BotKind::Assistant)?;
        Ok(cfg)
    }

    /// Load configuration for a single bot (only its token is required).
    pub fn load_for(kind: BotKind) -> Result<Self> {
        let cfg = Self::load_unchecked()?;
        cfg.bot_token(kind)?;
        Ok(cfg)
    }

    pub fn bot_token(&self, kind: BotKind) -> Result<&str> {
        let (token, var) = match kind {
            BotKind::Reminders => (&self.reminders_bot_token, "REMINDERS_BOT_TOKEN"),
            BotKind::Assistant => (&self.assistant_bot_token, "ASSISTANT_BOT_TOKEN"),
        };
        token
            .as_deref()
            .ok_or_else(|| Error::Config(format!("{var} environment variable is required")))
    }

    fn load_unchecked() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let api_base_url = env_str("API_BASE_URL")
            .and_then(non_empty)
            .map(|s| normalize_base_url(&s))
            .ok_or_else(|| {
                Error::Config("API_BASE_URL environment variable is required".to_string())
            })?;
        let http_timeout = Duration::from_secs(env_u64("HTTP_TIMEOUT_SECS").unwrap_or(15));

        let reminders_bot_token = env_str("REMINDERS_BOT_TOKEN").and_then(non_empty);
        let assistant_bot_token = env_str("ASSISTANT_BOT_TOKEN").and_then(non_empty);
        let openai_api_key = env_str("OPENAI_API_KEY").and_then(non_empty);

        let telegram_message_limit = env_usize("TELEGRAM_MESSAGE_LIMIT").unwrap_or(4096);
        let telegram_safe_limit = env_usize("TELEGRAM_SAFE_LIMIT").unwrap_or(4000);

        let activity_poll = Duration::from_secs(env_u64("ACTIVITY_POLL_SECS").unwrap_or(10));
        let task_poll = Duration::from_secs(env_u64("TASK_POLL_SECS").unwrap_or(15));
        let fall_poll = Duration::from_secs(env_u64("FALL_POLL_SECS").unwrap_or(60));
        // Facility-local 00:01 by default.
        let medication_cron = env_str("MEDICATION_CRON")
            .and_then(non_empty)
            .unwrap_or_else(|| "1 0 * * *".to_string());

        let rate_limit_enabled = env_bool("RATE_LIMIT_ENABLED").unwrap_or(true);
        let rate_limit_requests = env_u32("RATE_LIMIT_REQUESTS").unwrap_or(20);
        let rate_limit_window = Duration::from_secs(env_u64("RATE_LIMIT_WINDOW").unwrap_or(60));

        let audit_log_path = PathBuf::from(
            env_str("AUDIT_LOG_PATH").unwrap_or("/tmp/careconnect-audit.log".to_string()),
        );
        let audit_log_json = env_bool("AUDIT_LOG_JSON").unwrap_or(false);

        Ok(Self {
            api_base_url,
            http_timeout,
            reminders_bot_token,
            assistant_bot_token,
            openai_api_key,
            telegram_message_limit,
            telegram_safe_limit,
            activity_poll,
            task_poll,
            fall_poll,
            medication_cron,
            rate_limit_enabled,
            rate_limit_requests,
            rate_limit_window,
            audit_log_path,
            audit_log_json,
        })
    }
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_stripped() {
        assert_eq!(normalize_base_url("http://api.local/"), "http://api.local");
        assert_eq!(
            normalize_base_url("  http://api.local//  "),
            "http://api.local"
        );
        assert_eq!(normalize_base_url("http://api.local"), "http://api.local");
    }

    #[test]
    fn env_bool_accepts_common_truthy_values() {
        env::set_var("CCT_TEST_BOOL_TRUTHY", "YES");
        env::set_var("CCT_TEST_BOOL_FALSY", "0");
        assert_eq!(env_bool("CCT_TEST_BOOL_TRUTHY"), Some(true));
        assert_eq!(env_bool("CCT_TEST_BOOL_FALSY"), Some(false));
        assert_eq!(env_bool("CCT_TEST_BOOL_MISSING"), None);
    }

    #[test]
    fn non_empty_rejects_whitespace() {
        assert_eq!(non_empty("  ".to_string()), None);
        assert_eq!(non_empty("x".to_string()), Some("x".to_string()));
    }
}
