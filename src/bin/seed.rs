use storefront_api::{config::AppConfig, db::create_pool, services::auth_service};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    // Ensure migrations are applied.
    sqlx::migrate!("./migrations").run(&pool).await?;

    let admin_id =
        ensure_user(&pool, "Admin", "admin@example.com", "admin123", "admin").await?;
    let buyer_id = ensure_user(&pool, "Buyer", "buyer@example.com", "buyer123", "buyer").await?;
    seed_products(&pool).await?;

    println!("Seed completed. Admin ID: {admin_id}, Buyer ID: {buyer_id}");
    Ok(())
}

async fn ensure_user(
    pool: &sqlx::PgPool,
    name: &str,
    email: &str,
    password: &str,
    role: &str,
) -> anyhow::Result<Uuid> {
    let password_hash =
        auth_service::hash_password(password).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        INSERT INTO users (id, name, email, password_hash, role)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (email) DO UPDATE SET role = EXCLUDED.role
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .bind(role)
    .fetch_optional(pool)
    .await?;

    row.map(|(id,)| id)
        .ok_or_else(|| anyhow::anyhow!("seed user insert returned no row"))
}

async fn seed_products(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let samples: [(&str, &str, i64, i32); 3] = [
        ("Walnut desk", "Solid walnut writing desk", 249_00, 12),
        ("Desk lamp", "Adjustable brass desk lamp", 59_00, 40),
        ("Office chair", "Ergonomic mesh office chair", 189_00, 25),
    ];

    for (name, description, unit_price, stock_quantity) in samples {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, description, unit_price, stock_quantity)
            SELECT $1, $2, $3, $4, $5
            WHERE NOT EXISTS (SELECT 1 FROM products WHERE name = $2)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(description)
        .bind(unit_price)
        .bind(stock_quantity)
        .execute(pool)
        .await?;
    }

    Ok(())
}
