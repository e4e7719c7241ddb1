use std::{collections::HashMap, sync::Arc};

use crate::domain::{ChatId, UserId};

/// A registered caregiver chat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    pub chat_id: ChatId,
    pub name: String,
}

/// Shared map from staff user id to the caregiver's Telegram chat.
///
/// Populated by `/start` on the reminders bot; every proactive send targets
/// registered chats. In-memory only, caregivers re-register after a restart.
#[derive(Clone, Default)]
pub struct ChatRegistry {
    inner: Arc<tokio::sync::Mutex<HashMap<UserId, Registration>>>,
}

impl ChatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, user_id: UserId, chat_id: ChatId, name: &str) {
        let mut map = self.inner.lock().await;
        map.insert(
            user_id,
            Registration {
                chat_id,
                name: name.to_string(),
            },
        );
    }

    pub async fn registration(&self, user_id: &UserId) -> Option<Registration> {
        self.inner.lock().await.get(user_id).cloned()
    }

    /// Snapshot of all registered caregivers, for per-caregiver passes.
    pub async fn entries(&self) -> Vec<(UserId, Registration)> {
        self.inner
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Deduplicated chat ids for broadcasts (fall alerts, activity reminders).
    pub async fn broadcast_targets(&self) -> Vec<ChatId> {
        let map = self.inner.lock().await;
        let mut out: Vec<ChatId> = Vec::with_capacity(map.len());
        for reg in map.values() {
            if !out.contains(&reg.chat_id) {
                out.push(reg.chat_id);
            }
        }
        out
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}
