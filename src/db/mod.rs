//! Replay guard
//!
//! Durable record of issued attestations keyed by
//! (transaction hash, log index, source chain). The uniqueness of that
//! triple is enforced by the storage backend itself: concurrent `record`
//! calls for the same key yield exactly one success and
//! [`StoreError::Duplicate`] for every other caller.

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};

pub mod memory;
pub mod models;

pub use memory::MemoryReplayGuard;
pub use models::*;

use crate::error::StoreError;

#[async_trait]
pub trait ReplayGuard: Send + Sync {
    /// Whether a record exists for the key
    async fn exists(&self, key: &AttestationKey) -> std::result::Result<bool, StoreError>;

    /// Insert a record, failing with [`StoreError::Duplicate`] if the key is taken.
    async fn record(&self, new: NewAttestation) -> std::result::Result<AttestationRecord, StoreError>;

    /// All records for a transaction, ordered by log index
    async fn find_by_tx(&self, tx_hash: &str)
        -> std::result::Result<Vec<AttestationRecord>, StoreError>;

    /// Backend name for logs and health output
    fn backend(&self) -> &'static str;
}

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

/// Postgres-backed replay guard
#[derive(Clone)]
pub struct PgReplayGuard {
    pool: PgPool,
}

impl PgReplayGuard {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and migrate.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl ReplayGuard for PgReplayGuard {
    async fn exists(&self, key: &AttestationKey) -> std::result::Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            r#"SELECT EXISTS(
                   SELECT 1 FROM attestations
                   WHERE tx_hash = $1 AND log_index = $2 AND source_chain_id = $3
               )"#,
        )
        .bind(&key.tx_hash)
        .bind(key.log_index as i64)
        .bind(key.source_chain as i32)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn record(&self, new: NewAttestation) -> std::result::Result<AttestationRecord, StoreError> {
        // The UNIQUE constraint decides concurrent inserts; a violation maps to Duplicate
        let record = sqlx::query_as::<_, AttestationRecord>(
            r#"
            INSERT INTO attestations (tx_hash, log_index, source_chain_id, bridger,
                message_id, amount, signed_at)
            VALUES ($1, $2, $3, $4, $5, $6::NUMERIC, $7)
            RETURNING id, tx_hash, log_index, source_chain_id, bridger, message_id,
                amount::TEXT AS amount, signed_at
            "#,
        )
        .bind(&new.key.tx_hash)
        .bind(new.key.log_index as i64)
        .bind(new.key.source_chain as i32)
        .bind(&new.bridger)
        .bind(&new.message_id)
        .bind(&new.amount)
        .bind(new.signed_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn find_by_tx(
        &self,
        tx_hash: &str,
    ) -> std::result::Result<Vec<AttestationRecord>, StoreError> {
        let records = sqlx::query_as::<_, AttestationRecord>(
            r#"SELECT id, tx_hash, log_index, source_chain_id, bridger, message_id,
                      amount::TEXT AS amount, signed_at
               FROM attestations WHERE tx_hash = $1
               ORDER BY source_chain_id, log_index"#,
        )
        .bind(tx_hash)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
