use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::NewAuditEntry;

#[async_trait]
pub trait AuditTrail: Send + Sync {
    async fn record(&self, entry: NewAuditEntry) -> Result<(), sqlx::Error>;
}

#[derive(Clone)]
pub struct PgAuditTrail {
    db: PgPool,
}

impl PgAuditTrail {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditTrail for PgAuditTrail {
    async fn record(&self, entry: NewAuditEntry) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO audit_log
              (audit_id, user_id, entity_name, entity_id, action, old_values, new_values, ip_address)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.user_id)
        .bind(entry.entity_name)
        .bind(&entry.entity_id)
        .bind(entry.action.as_str())
        .bind(&entry.old_values)
        .bind(&entry.new_values)
        .bind(entry.ip_address.as_deref())
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

/// Audit writes never fail the operation they describe.
pub async fn record_best_effort(trail: &dyn AuditTrail, entry: NewAuditEntry) {
    let (entity, id, action) = (entry.entity_name, entry.entity_id.clone(), entry.action);
    if let Err(e) = trail.record(entry).await {
        tracing::error!(entity, entity_id = %id, action = %action, "audit write failed: {e}");
    }
}
