use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    audit,
    dto::products::{CreateProductRequest, ProductList, UpdateProductRequest},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Product,
    response::{ApiResponse, Meta},
    routes::params::{ProductQuery, ProductSortBy, SortOrder},
    state::AppState,
};

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &ProductQuery) {
    if let Some(search) = query.q.as_ref().filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search);
        builder
            .push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR description ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(min_price) = query.min_price {
        builder.push(" AND unit_price >= ").push_bind(min_price);
    }
    if let Some(max_price) = query.max_price {
        builder.push(" AND unit_price <= ").push_bind(max_price);
    }
}

/// Public catalog read.
pub async fn list_products(
    state: &AppState,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let sort_by = query.sort_by.unwrap_or(ProductSortBy::CreatedAt);
    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT * FROM products WHERE TRUE");
    push_filters(&mut builder, &query);
    builder.push(format!(
        " ORDER BY {} {}",
        sort_by.as_sql(),
        sort_order.as_sql()
    ));
    builder.push(" LIMIT ").push_bind(limit);
    builder.push(" OFFSET ").push_bind(offset);

    let items: Vec<Product> = builder.build_query_as().fetch_all(&state.pool).await?;

    let mut count_builder: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT count(*) FROM products WHERE TRUE");
    push_filters(&mut count_builder, &query);
    let (total,): (i64,) = count_builder
        .build_query_as()
        .fetch_one(&state.pool)
        .await?;

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Products",
        ProductList { items },
        Some(meta),
    ))
}

/// Single-item read is admin-gated while the list is public; the public
/// storefront consumes the list endpoint only.
pub async fn get_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    let product: Option<Product> = sqlx::query_as("SELECT * FROM products WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?;
    let product = match product {
        Some(p) => p,
        None => return Err(AppError::NotFound),
    };
    Ok(ApiResponse::success("Product", product, None))
}

pub async fn create_product(
    state: &AppState,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    if payload.name.trim().is_empty() {
        return Err(AppError::Validation("Name and unit price are required".into()));
    }
    let stock_quantity = payload.stock_quantity.unwrap_or(0);
    validate_price_and_stock(payload.unit_price, stock_quantity)?;

    let product: Product = sqlx::query_as(
        r#"
        INSERT INTO products (id, name, description, unit_price, stock_quantity, image_url)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(payload.name.as_str())
    .bind(payload.description.as_deref())
    .bind(payload.unit_price)
    .bind(stock_quantity)
    .bind(payload.image_url.as_deref())
    .fetch_one(&state.pool)
    .await?;

    if let Err(err) = audit::record(
        &state.pool,
        Some(user.user_id),
        "product_created",
        serde_json::json!({ "product_id": product.id }),
    )
    .await
    {
        tracing::warn!(error = %err, "audit write failed");
    }

    Ok(ApiResponse::success(
        "Product created",
        product,
        Some(Meta::empty()),
    ))
}

pub async fn update_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;

    let existing: Option<Product> = sqlx::query_as("SELECT * FROM products WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?;
    let existing = match existing {
        Some(p) => p,
        None => return Err(AppError::NotFound),
    };

    let name = payload.name.unwrap_or(existing.name);
    let description = payload.description.or(existing.description);
    let unit_price = payload.unit_price.unwrap_or(existing.unit_price);
    let stock_quantity = payload.stock_quantity.unwrap_or(existing.stock_quantity);
    let image_url = payload.image_url.or(existing.image_url);

    if name.trim().is_empty() {
        return Err(AppError::Validation("Name must not be empty".into()));
    }
    validate_price_and_stock(unit_price, stock_quantity)?;

    let product: Product = sqlx::query_as(
        r#"
        UPDATE products
        SET name = $2, description = $3, unit_price = $4, stock_quantity = $5,
            image_url = $6, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(description)
    .bind(unit_price)
    .bind(stock_quantity)
    .bind(image_url)
    .fetch_one(&state.pool)
    .await?;

    if let Err(err) = audit::record(
        &state.pool,
        Some(user.user_id),
        "product_updated",
        serde_json::json!({ "product_id": product.id }),
    )
    .await
    {
        tracing::warn!(error = %err, "audit write failed");
    }

    Ok(ApiResponse::success(
        "Updated",
        product,
        Some(Meta::empty()),
    ))
}

pub async fn delete_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let result = sqlx::query("DELETE FROM products WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    if let Err(err) = audit::record(
        &state.pool,
        Some(user.user_id),
        "product_deleted",
        serde_json::json!({ "product_id": id }),
    )
    .await
    {
        tracing::warn!(error = %err, "audit write failed");
    }

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

fn validate_price_and_stock(unit_price: i64, stock_quantity: i32) -> AppResult<()> {
    if unit_price < 0 {
        return Err(AppError::Validation("Unit price must not be negative".into()));
    }
    if stock_quantity < 0 {
        return Err(AppError::Validation(
            "Stock quantity must not be negative".into(),
        ));
    }
    Ok(())
}
