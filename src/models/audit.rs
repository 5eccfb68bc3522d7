use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

use super::AuditAction;

/// Immutable record of one action against one entity.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AuditLog {
    pub audit_id: Uuid,
    pub user_id: Option<Uuid>,
    pub entity_name: String,
    pub entity_id: String,
    #[sqlx(try_from = "String")]
    pub action: AuditAction,
    pub old_values: Option<JsonValue>,
    pub new_values: Option<JsonValue>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub const AUDIT_COLUMNS: &str =
    "audit_id, user_id, entity_name, entity_id, action, old_values, new_values, ip_address, created_at";

#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub user_id: Option<Uuid>,
    pub entity_name: &'static str,
    pub entity_id: String,
    pub action: AuditAction,
    pub old_values: Option<JsonValue>,
    pub new_values: Option<JsonValue>,
    pub ip_address: Option<String>,
}

impl NewAuditEntry {
    pub fn new(entity_name: &'static str, entity_id: impl ToString, action: AuditAction) -> Self {
        Self {
            user_id: None,
            entity_name,
            entity_id: entity_id.to_string(),
            action,
            old_values: None,
            new_values: None,
            ip_address: None,
        }
    }

    pub fn by(mut self, user_id: Option<Uuid>) -> Self {
        self.user_id = user_id;
        self
    }

    /// Snapshots are best-effort; a value that fails to serialize is recorded as null.
    pub fn before<T: Serialize>(mut self, value: &T) -> Self {
        self.old_values = serde_json::to_value(value).ok();
        self
    }

    pub fn after<T: Serialize>(mut self, value: &T) -> Self {
        self.new_values = serde_json::to_value(value).ok();
        self
    }
}
