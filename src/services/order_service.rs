use uuid::Uuid;

use crate::{
    audit,
    dto::orders::{
        OrderItemDetail, OrderList, OrderWithItems, PlaceOrderRequest, PlacedOrder,
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_buyer},
    models::{Order, OrderItem, OrderStatus},
    response::{ApiResponse, Meta},
    state::AppState,
};

/// Place an order as one all-or-nothing transaction. Each product row is
/// read with `FOR UPDATE`, so the stock check and the decrement are
/// serialized against concurrent placements touching the same product;
/// placements over disjoint products proceed in parallel.
pub async fn place_order(
    state: &AppState,
    user: &AuthUser,
    payload: PlaceOrderRequest,
) -> AppResult<ApiResponse<PlacedOrder>> {
    ensure_buyer(user)?;
    if payload.delivery_address.trim().is_empty() || payload.items.is_empty() {
        return Err(AppError::Validation(
            "Delivery address and items are required".into(),
        ));
    }
    if payload.items.iter().any(|item| item.quantity < 1) {
        return Err(AppError::Validation(
            "Item quantity must be at least 1".into(),
        ));
    }

    let mut tx = state.pool.begin().await?;

    let order_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO orders (id, buyer_id, delivery_address, status)
        VALUES ($1, $2, $3, 'pending')
        "#,
    )
    .bind(order_id)
    .bind(user.user_id)
    .bind(payload.delivery_address.as_str())
    .execute(&mut *tx)
    .await?;

    // Items are processed in input order; any failure below drops the
    // transaction and rolls back the order row and every stock decrement.
    for item in &payload.items {
        let product: Option<(i64, i32)> = sqlx::query_as(
            "SELECT unit_price, stock_quantity FROM products WHERE id = $1 FOR UPDATE",
        )
        .bind(item.product_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (unit_price, stock_quantity) = match product {
            Some(row) => row,
            None => return Err(AppError::NotFound),
        };
        if stock_quantity < item.quantity {
            return Err(AppError::InsufficientStock(item.product_id));
        }

        sqlx::query(
            r#"
            INSERT INTO order_items (id, order_id, product_id, quantity, unit_price)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order_id)
        .bind(item.product_id)
        .bind(item.quantity)
        .bind(unit_price)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity - $1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(item.quantity)
        .bind(item.product_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    if let Err(err) = audit::record(
        &state.pool,
        Some(user.user_id),
        "order_placed",
        serde_json::json!({ "order_id": order_id }),
    )
    .await
    {
        tracing::warn!(error = %err, "audit write failed");
    }

    Ok(ApiResponse::success(
        "Order placed",
        PlacedOrder { order_id },
        Some(Meta::empty()),
    ))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<OrderList>> {
    // Admins have their own listing; this endpoint is buyer-scoped.
    ensure_buyer(user)?;

    let orders: Vec<Order> = sqlx::query_as(
        "SELECT * FROM orders WHERE buyer_id = $1 ORDER BY placed_at DESC",
    )
    .bind(user.user_id)
    .fetch_all(&state.pool)
    .await?;

    let items = load_items(state, orders.iter().map(|o| o.id).collect()).await?;
    let orders = attach_items(orders, items);

    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(Meta::empty()),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    ensure_buyer(user)?;

    let order: Option<Order> =
        sqlx::query_as("SELECT * FROM orders WHERE id = $1 AND buyer_id = $2")
            .bind(id)
            .bind(user.user_id)
            .fetch_optional(&state.pool)
            .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let items = fetch_order_items(state, order.id).await?;

    Ok(ApiResponse::success(
        "Ok",
        OrderWithItems { order, items },
        Some(Meta::empty()),
    ))
}

/// Cancel an own order: restore stock for every item, then mark the order
/// cancelled, all inside one transaction. Item rows stay behind as the
/// audit trail.
pub async fn cancel_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Order>> {
    ensure_buyer(user)?;
    let mut tx = state.pool.begin().await?;

    let order: Option<Order> = sqlx::query_as(
        "SELECT * FROM orders WHERE id = $1 AND buyer_id = $2 FOR UPDATE",
    )
    .bind(id)
    .bind(user.user_id)
    .fetch_optional(&mut *tx)
    .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let status = OrderStatus::parse(&order.status)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Unknown order status")))?;
    if !status.is_cancellable() {
        return Err(AppError::InvalidState(format!(
            "Order in status '{}' cannot be cancelled",
            order.status
        )));
    }

    let items: Vec<OrderItem> =
        sqlx::query_as("SELECT * FROM order_items WHERE order_id = $1")
            .bind(order.id)
            .fetch_all(&mut *tx)
            .await?;

    for item in &items {
        sqlx::query(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity + $1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(item.quantity)
        .bind(item.product_id)
        .execute(&mut *tx)
        .await?;
    }

    let order: Order = sqlx::query_as(
        r#"
        UPDATE orders
        SET status = 'cancelled', updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(order.id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    if let Err(err) = audit::record(
        &state.pool,
        Some(user.user_id),
        "order_cancelled",
        serde_json::json!({ "order_id": order.id }),
    )
    .await
    {
        tracing::warn!(error = %err, "audit write failed");
    }

    Ok(ApiResponse::success(
        "Order cancelled",
        order,
        Some(Meta::empty()),
    ))
}

pub async fn fetch_order_items(state: &AppState, order_id: Uuid) -> AppResult<Vec<OrderItemDetail>> {
    let items = sqlx::query_as::<_, OrderItemDetail>(
        r#"
        SELECT oi.id, oi.product_id, oi.quantity, oi.unit_price,
               p.name AS product_name, p.image_url
        FROM order_items oi
        JOIN products p ON p.id = oi.product_id
        WHERE oi.order_id = $1
        ORDER BY oi.created_at
        "#,
    )
    .bind(order_id)
    .fetch_all(&state.pool)
    .await?;
    Ok(items)
}

pub(crate) async fn load_items(
    state: &AppState,
    order_ids: Vec<Uuid>,
) -> AppResult<Vec<(Uuid, OrderItemDetail)>> {
    if order_ids.is_empty() {
        return Ok(Vec::new());
    }

    #[derive(sqlx::FromRow)]
    struct ItemRow {
        order_id: Uuid,
        id: Uuid,
        product_id: Uuid,
        quantity: i32,
        unit_price: i64,
        product_name: String,
        image_url: Option<String>,
    }

    let rows = sqlx::query_as::<_, ItemRow>(
        r#"
        SELECT oi.order_id, oi.id, oi.product_id, oi.quantity, oi.unit_price,
               p.name AS product_name, p.image_url
        FROM order_items oi
        JOIN products p ON p.id = oi.product_id
        WHERE oi.order_id = ANY($1)
        ORDER BY oi.created_at
        "#,
    )
    .bind(order_ids)
    .fetch_all(&state.pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            (
                row.order_id,
                OrderItemDetail {
                    id: row.id,
                    product_id: row.product_id,
                    quantity: row.quantity,
                    unit_price: row.unit_price,
                    product_name: row.product_name,
                    image_url: row.image_url,
                },
            )
        })
        .collect())
}

pub(crate) fn attach_items(
    orders: Vec<Order>,
    items: Vec<(Uuid, OrderItemDetail)>,
) -> Vec<OrderWithItems> {
    let mut grouped: Vec<OrderWithItems> = orders
        .into_iter()
        .map(|order| OrderWithItems {
            order,
            items: Vec::new(),
        })
        .collect();

    for (order_id, item) in items {
        if let Some(entry) = grouped.iter_mut().find(|o| o.order.id == order_id) {
            entry.items.push(item);
        }
    }

    grouped
}
