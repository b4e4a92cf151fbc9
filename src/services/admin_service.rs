use std::collections::HashMap;

use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit,
    dto::orders::{AdminOrder, AdminOrderList, OrderItemDetail, UpdateOrderStatusRequest},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Order, OrderStatus},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::order_service,
    state::AppState,
};

#[derive(Debug, FromRow)]
struct AdminOrderRow {
    id: Uuid,
    buyer_id: Uuid,
    delivery_address: String,
    status: String,
    placed_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
    buyer_name: String,
}

/// Every order in the system with buyer display name and items, no
/// ownership filter.
pub async fn list_all_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<AdminOrderList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination.normalize();
    let status_filter = query.status.as_ref().filter(|s| !s.is_empty());
    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut where_clause = String::new();
    if status_filter.is_some() {
        where_clause.push_str("WHERE o.status = $3");
    }

    let sql = format!(
        r#"
        SELECT o.*, u.name AS buyer_name
        FROM orders o
        JOIN users u ON u.id = o.buyer_id
        {where_clause}
        ORDER BY o.placed_at {sort}
        LIMIT $1 OFFSET $2
        "#,
        sort = sort_order.as_sql(),
    );

    let mut rows_query = sqlx::query_as::<_, AdminOrderRow>(&sql).bind(limit).bind(offset);
    if let Some(status) = status_filter {
        rows_query = rows_query.bind(status.clone());
    }
    let rows = rows_query.fetch_all(&state.pool).await?;

    let count_sql = if status_filter.is_some() {
        "SELECT count(*) FROM orders o WHERE o.status = $1"
    } else {
        "SELECT count(*) FROM orders o"
    };
    let mut count_query = sqlx::query_as::<_, (i64,)>(count_sql);
    if let Some(status) = status_filter {
        count_query = count_query.bind(status.clone());
    }
    let (total,) = count_query.fetch_one(&state.pool).await?;

    let order_ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let mut by_order: HashMap<Uuid, Vec<OrderItemDetail>> = HashMap::new();
    for (order_id, item) in order_service::load_items(state, order_ids).await? {
        by_order.entry(order_id).or_default().push(item);
    }

    let orders = rows
        .into_iter()
        .map(|row| {
            let order = Order {
                id: row.id,
                buyer_id: row.buyer_id,
                delivery_address: row.delivery_address,
                status: row.status,
                placed_at: row.placed_at,
                updated_at: row.updated_at,
            };
            let items = by_order.remove(&order.id).unwrap_or_default();
            AdminOrder {
                order,
                buyer_name: row.buyer_name,
                items,
            }
        })
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Orders",
        AdminOrderList { items: orders },
        Some(meta),
    ))
}

/// Admin-driven status transition. `cancelled` is not settable here: the
/// buyer cancel path owns that transition because it also restores stock.
pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;

    let new_status = OrderStatus::parse(&payload.status)
        .filter(|s| s.admin_settable())
        .ok_or_else(|| AppError::Validation("Invalid order status".into()))?;

    let mut tx = state.pool.begin().await?;

    let existing: Option<Order> = sqlx::query_as("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    let existing = match existing {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let current = OrderStatus::parse(&existing.status)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Unknown order status")))?;
    if current.is_terminal() && current != new_status {
        return Err(AppError::InvalidState(format!(
            "Order in status '{}' cannot transition to '{}'",
            existing.status, new_status
        )));
    }

    let order: Order = sqlx::query_as(
        r#"
        UPDATE orders
        SET status = $1, updated_at = NOW()
        WHERE id = $2
        RETURNING *
        "#,
    )
    .bind(new_status.as_str())
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    if let Err(err) = audit::record(
        &state.pool,
        Some(user.user_id),
        "order_status_updated",
        serde_json::json!({ "order_id": order.id, "status": order.status }),
    )
    .await
    {
        tracing::warn!(error = %err, "audit write failed");
    }

    Ok(ApiResponse::success(
        "Order updated",
        order,
        Some(Meta::empty()),
    ))
}
