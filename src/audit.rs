use serde_json::Value;
use uuid::Uuid;

use crate::{db::DbPool, error::AppResult};

/// Append one audit-trail row. Callers treat this as best-effort: a failed
/// write is logged with `tracing::warn!` and never fails the request.
pub async fn record(
    pool: &DbPool,
    actor_id: Option<Uuid>,
    action: &str,
    detail: Value,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_log (id, actor_id, action, detail)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(actor_id)
    .bind(action)
    .bind(detail)
    .execute(pool)
    .await?;

    Ok(())
}
