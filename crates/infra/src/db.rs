//! Postgres connection pool and schema bootstrap.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::DatabaseConfig;

/// Idempotent schema, applied statement by statement on startup.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS warehouses (
        id           BIGSERIAL PRIMARY KEY,
        name         TEXT NOT NULL,
        availability BOOLEAN NOT NULL DEFAULT TRUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS products (
        id   BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        size TEXT NOT NULL,
        code TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stock_records (
        id                BIGSERIAL PRIMARY KEY,
        warehouse_id      BIGINT NOT NULL REFERENCES warehouses (id),
        product_id        BIGINT NOT NULL REFERENCES products (id),
        quantity          BIGINT NOT NULL,
        reserved_quantity BIGINT NOT NULL DEFAULT 0,
        version           BIGINT NOT NULL DEFAULT 1,
        updated_at        TIMESTAMPTZ NOT NULL DEFAULT now(),
        CONSTRAINT stock_records_reserved_within_quantity
            CHECK (0 <= reserved_quantity AND reserved_quantity <= quantity),
        CONSTRAINT stock_records_warehouse_product_unique
            UNIQUE (warehouse_id, product_id)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS stock_records_warehouse_idx
        ON stock_records (warehouse_id)
    "#,
];

pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;
    info!(max_connections = config.max_connections, "connected to postgres");
    Ok(pool)
}

pub async fn bootstrap_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    info!(statements = SCHEMA.len(), "schema bootstrapped");
    Ok(())
}
