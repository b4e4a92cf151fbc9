use anyhow::Result;
use futures::future::join_all;
use storefront_api::{
    db::create_pool,
    dto::{
        auth::SignupRequest,
        orders::{OrderItemInput, PlaceOrderRequest, UpdateOrderStatusRequest},
        products::CreateProductRequest,
    },
    error::AppError,
    mailer::LogMailer,
    middleware::auth::AuthUser,
    services::{admin_service, auth_service, order_service, product_service},
    state::AppState,
};
use std::sync::Arc;
use storefront_api::routes::params::{OrderListQuery, Pagination};
use uuid::Uuid;

async fn setup_state() -> Result<Option<AppState>> {
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(None);
        }
    };

    let pool = create_pool(&database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(Some(AppState {
        pool,
        mailer: Arc::new(LogMailer),
    }))
}

async fn create_account(state: &AppState, role: &str) -> Result<AuthUser> {
    let email = format!("{}-{}@example.com", role, Uuid::new_v4());
    let payload = SignupRequest {
        name: format!("Test {role}"),
        email,
        password: "integration-pw".into(),
        contact: None,
    };
    let created = if role == "admin" {
        auth_service::signup_admin(state, payload).await?
    } else {
        auth_service::signup_buyer(state, payload).await?
    }
    .data
    .expect("created user");

    Ok(AuthUser {
        user_id: created.id,
        role: created.role,
    })
}

async fn create_product(
    state: &AppState,
    admin: &AuthUser,
    unit_price: i64,
    stock_quantity: i32,
) -> Result<Uuid> {
    let product = product_service::create_product(
        state,
        admin,
        CreateProductRequest {
            name: format!("Widget {}", Uuid::new_v4()),
            description: Some("Integration test widget".into()),
            unit_price,
            stock_quantity: Some(stock_quantity),
            image_url: None,
        },
    )
    .await?
    .data
    .expect("created product");
    Ok(product.id)
}

async fn stock_of(state: &AppState, product_id: Uuid) -> Result<i32> {
    let (stock,): (i32,) = sqlx::query_as("SELECT stock_quantity FROM products WHERE id = $1")
        .bind(product_id)
        .fetch_one(&state.pool)
        .await?;
    Ok(stock)
}

fn order_of(items: Vec<(Uuid, i32)>) -> PlaceOrderRequest {
    PlaceOrderRequest {
        delivery_address: "1 Test Lane".into(),
        items: items
            .into_iter()
            .map(|(product_id, quantity)| OrderItemInput {
                product_id,
                quantity,
            })
            .collect(),
    }
}

#[tokio::test]
async fn placing_an_order_reserves_stock_and_snapshots_prices() -> Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let admin = create_account(&state, "admin").await?;
    let buyer = create_account(&state, "buyer").await?;
    let product_id = create_product(&state, &admin, 1_000, 10).await?;

    let placed = order_service::place_order(&state, &buyer, order_of(vec![(product_id, 2)]))
        .await?
        .data
        .expect("placed order");
    assert_eq!(stock_of(&state, product_id).await?, 8);

    // A later catalog price change must not rewrite the snapshot.
    product_service::update_product(
        &state,
        &admin,
        product_id,
        storefront_api::dto::products::UpdateProductRequest {
            name: None,
            description: None,
            unit_price: Some(2_000),
            stock_quantity: None,
            image_url: None,
        },
    )
    .await?;

    let order = order_service::get_order(&state, &buyer, placed.order_id)
        .await?
        .data
        .expect("order with items");
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.items[0].unit_price, 1_000);
    assert_eq!(order.items[0].quantity, 2);
    assert_eq!(order.order.status, "pending");

    // Buyers see their own orders; admins are pointed at the admin listing.
    let list = order_service::list_orders(&state, &buyer)
        .await?
        .data
        .expect("order list");
    assert!(list.items.iter().any(|o| o.order.id == placed.order_id));

    let err = order_service::list_orders(&state, &admin)
        .await
        .expect_err("admin must not use the buyer listing");
    assert!(matches!(err, AppError::Forbidden));

    Ok(())
}

#[tokio::test]
async fn failed_placement_rolls_back_every_effect() -> Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let admin = create_account(&state, "admin").await?;
    let buyer = create_account(&state, "buyer").await?;
    let plentiful = create_product(&state, &admin, 500, 5).await?;
    let scarce = create_product(&state, &admin, 900, 1).await?;

    let err = order_service::place_order(
        &state,
        &buyer,
        order_of(vec![(plentiful, 2), (scarce, 2)]),
    )
    .await
    .expect_err("second item exceeds stock");
    assert!(matches!(err, AppError::InsufficientStock(id) if id == scarce));

    // No partial state: the first item's decrement was rolled back too.
    assert_eq!(stock_of(&state, plentiful).await?, 5);
    assert_eq!(stock_of(&state, scarce).await?, 1);
    let list = order_service::list_orders(&state, &buyer)
        .await?
        .data
        .expect("order list");
    assert!(list.items.is_empty());

    let err = order_service::place_order(
        &state,
        &buyer,
        order_of(vec![(plentiful, 1), (Uuid::new_v4(), 1)]),
    )
    .await
    .expect_err("unknown product fails the whole order");
    assert!(matches!(err, AppError::NotFound));
    assert_eq!(stock_of(&state, plentiful).await?, 5);

    let err = order_service::place_order(&state, &buyer, order_of(vec![]))
        .await
        .expect_err("empty item list is invalid");
    assert!(matches!(err, AppError::Validation(_)));

    let err = order_service::place_order(&state, &buyer, order_of(vec![(plentiful, 0)]))
        .await
        .expect_err("zero quantity is invalid");
    assert!(matches!(err, AppError::Validation(_)));

    Ok(())
}

#[tokio::test]
async fn cancellation_restores_stock_exactly_once() -> Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let admin = create_account(&state, "admin").await?;
    let buyer = create_account(&state, "buyer").await?;
    let other_buyer = create_account(&state, "buyer").await?;
    let product_id = create_product(&state, &admin, 750, 6).await?;

    let placed = order_service::place_order(&state, &buyer, order_of(vec![(product_id, 4)]))
        .await?
        .data
        .expect("placed order");
    assert_eq!(stock_of(&state, product_id).await?, 2);

    // Ownership check comes before any state change.
    let err = order_service::cancel_order(&state, &other_buyer, placed.order_id)
        .await
        .expect_err("foreign order must read as absent");
    assert!(matches!(err, AppError::NotFound));

    let cancelled = order_service::cancel_order(&state, &buyer, placed.order_id)
        .await?
        .data
        .expect("cancelled order");
    assert_eq!(cancelled.status, "cancelled");
    assert_eq!(stock_of(&state, product_id).await?, 6);

    // Item rows survive cancellation as the audit trail.
    let order = order_service::get_order(&state, &buyer, placed.order_id)
        .await?
        .data
        .expect("order with items");
    assert_eq!(order.items.len(), 1);

    let err = order_service::cancel_order(&state, &buyer, placed.order_id)
        .await
        .expect_err("cancel is not idempotent");
    assert!(matches!(err, AppError::InvalidState(_)));
    assert_eq!(stock_of(&state, product_id).await?, 6);

    Ok(())
}

#[tokio::test]
async fn admin_status_transitions_respect_the_state_machine() -> Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let admin = create_account(&state, "admin").await?;
    let buyer = create_account(&state, "buyer").await?;
    let product_id = create_product(&state, &admin, 1_200, 8).await?;

    let placed = order_service::place_order(&state, &buyer, order_of(vec![(product_id, 1)]))
        .await?
        .data
        .expect("placed order");

    let err = admin_service::update_order_status(
        &state,
        &buyer,
        placed.order_id,
        UpdateOrderStatusRequest {
            status: "in_progress".into(),
        },
    )
    .await
    .expect_err("buyers cannot drive fulfilment");
    assert!(matches!(err, AppError::Forbidden));

    for status in ["in_progress", "delivered"] {
        let updated = admin_service::update_order_status(
            &state,
            &admin,
            placed.order_id,
            UpdateOrderStatusRequest {
                status: status.into(),
            },
        )
        .await?
        .data
        .expect("updated order");
        assert_eq!(updated.status, status);
    }

    // Delivered is terminal for both paths.
    let err = admin_service::update_order_status(
        &state,
        &admin,
        placed.order_id,
        UpdateOrderStatusRequest {
            status: "pending".into(),
        },
    )
    .await
    .expect_err("no transition out of delivered");
    assert!(matches!(err, AppError::InvalidState(_)));

    let err = order_service::cancel_order(&state, &buyer, placed.order_id)
        .await
        .expect_err("delivered orders cannot be cancelled");
    assert!(matches!(err, AppError::InvalidState(_)));
    assert_eq!(stock_of(&state, product_id).await?, 7);

    let err = admin_service::update_order_status(
        &state,
        &admin,
        placed.order_id,
        UpdateOrderStatusRequest {
            status: "cancelled".into(),
        },
    )
    .await
    .expect_err("cancelled is not admin-settable");
    assert!(matches!(err, AppError::Validation(_)));

    let err = admin_service::update_order_status(
        &state,
        &admin,
        Uuid::new_v4(),
        UpdateOrderStatusRequest {
            status: "pending".into(),
        },
    )
    .await
    .expect_err("unknown order id");
    assert!(matches!(err, AppError::NotFound));

    // The admin listing shows the order with the buyer's display name.
    let all = admin_service::list_all_orders(
        &state,
        &admin,
        OrderListQuery {
            pagination: Pagination {
                page: Some(1),
                per_page: Some(100),
            },
            status: Some("delivered".into()),
            sort_order: None,
        },
    )
    .await?
    .data
    .expect("admin order list");
    let entry = all
        .items
        .iter()
        .find(|o| o.order.id == placed.order_id)
        .expect("order in admin listing");
    assert_eq!(entry.buyer_name, "Test buyer");
    assert_eq!(entry.items.len(), 1);

    Ok(())
}

#[tokio::test]
async fn concurrent_placements_never_oversell() -> Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let admin = create_account(&state, "admin").await?;
    let buyer = create_account(&state, "buyer").await?;
    let product_id = create_product(&state, &admin, 300, 5).await?;

    // Four orders of two units against five in stock: exactly two can win.
    let attempts = (0..4).map(|_| {
        let state = state.clone();
        let buyer = buyer.clone();
        async move {
            order_service::place_order(&state, &buyer, order_of(vec![(product_id, 2)])).await
        }
    });
    let results = join_all(attempts).await;

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let stock_errors = results
        .iter()
        .filter(|r| matches!(r, Err(AppError::InsufficientStock(_))))
        .count();

    assert_eq!(successes, 2);
    assert_eq!(stock_errors, 2);
    assert_eq!(stock_of(&state, product_id).await?, 1);

    Ok(())
}
