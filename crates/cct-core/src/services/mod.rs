//! Application services for both bots.
//!
//! Reminder services (medication, tasks, activities, falls) are driven by the
//! scheduler and push messages out through [`MessagingPort`]. Assistant
//! services answer free-text queries against the care backend.
//!
//! [`MessagingPort`]: crate::messaging::port::MessagingPort

pub mod activities;
pub mod assistant;
pub mod falls;
pub mod medication;
pub mod residents;
pub mod tasks;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::{
    domain::{facility_offset, ChatId},
    utils::{AuditEvent, AuditLogger},
};

/// Best-effort audit write; reminder delivery never fails on audit errors.
pub(crate) fn audit_reminder(
    audit: Option<&AuditLogger>,
    kind: &str,
    chat_id: ChatId,
    content: &str,
) {
    if let Some(logger) = audit {
        if let Err(err) = logger.write(AuditEvent::reminder(kind, chat_id, content)) {
            warn!(error = %err, "audit write failed");
        }
    }
}

/// Facility-local `YYYY-MM-DD HH:MM` used in reminder messages.
pub(crate) fn local_hm(at: DateTime<Utc>) -> String {
    at.with_timezone(&facility_offset())
        .format("%Y-%m-%d %H:%M")
        .to_string()
}
