use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::message::StoreRecord;

use super::{Store, StoreError};

/// Table created by the bundled migrations.
pub const DEFAULT_TABLE: &str = "inventory_updates";

/// A store implemented on top of a PostgreSQL table keyed by `id`.
pub struct PgStore {
    table: String,
    pool: PgPool,
}

impl PgStore {
    pub async fn new(table: &str, url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|error| StoreError::ConnectionError { error })?;

        Ok(Self::new_from_pool(table, pool))
    }

    pub fn new_from_pool(table: &str, pool: PgPool) -> Self {
        Self {
            table: table.to_owned(),
            pool,
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn put(&self, record: &StoreRecord) -> Result<(), StoreError> {
        let base_query = format!(
            r#"
INSERT INTO "{}"
    (id, product_id, location, quantity, update_date)
VALUES
    ($1, $2, $3, $4, $5)
ON CONFLICT (id) DO UPDATE SET
    product_id = EXCLUDED.product_id,
    location = EXCLUDED.location,
    quantity = EXCLUDED.quantity,
    update_date = EXCLUDED.update_date
            "#,
            &self.table
        );

        sqlx::query(&base_query)
            .bind(record.id)
            .bind(&record.product_id)
            .bind(&record.location)
            .bind(record.quantity)
            .bind(&record.update_date)
            .execute(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                id: record.id,
                error,
            })?;

        Ok(())
    }
}
