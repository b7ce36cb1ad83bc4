//! Embedding staging buffer and durable storage.
//!
//! Vectors land in `embedding_staging` first and only become durable
//! through [`EmbeddingRepository::promote_all_for`], a single
//! transaction that copies staged rows into `embedding` and clears the
//! buffer. Promotion uses `ON CONFLICT DO NOTHING`, so re-running it
//! after a crash can never duplicate a chunk's vector.

use async_trait::async_trait;
use chrono::Utc;
use pgvector::Vector;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use docflow_core::{EmbeddingRecord, EmbeddingRepository, Error, Result};

/// PostgreSQL implementation of EmbeddingRepository.
pub struct PgEmbeddingRepository {
    pool: Pool<Postgres>,
}

impl PgEmbeddingRepository {
    /// Create a new PgEmbeddingRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmbeddingRepository for PgEmbeddingRepository {
    async fn stage(&self, chunk_id: Uuid, document_id: Uuid, vector: Vec<f32>) -> Result<()> {
        sqlx::query(
            "INSERT INTO embedding_staging (chunk_id, document_id, vector, staged_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (chunk_id) DO UPDATE
             SET vector = EXCLUDED.vector, staged_at = EXCLUDED.staged_at",
        )
        .bind(chunk_id)
        .bind(document_id)
        .bind(Vector::from(vector))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn promote_all_for(&self, document_id: Uuid) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let result = sqlx::query(
            "INSERT INTO embedding (chunk_id, vector, created_at)
             SELECT chunk_id, vector, $2
             FROM embedding_staging
             WHERE document_id = $1
             ON CONFLICT (chunk_id) DO NOTHING",
        )
        .bind(document_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        sqlx::query("DELETE FROM embedding_staging WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn get(&self, chunk_id: Uuid) -> Result<Option<EmbeddingRecord>> {
        let row = sqlx::query(
            "SELECT chunk_id, vector, created_at FROM embedding WHERE chunk_id = $1",
        )
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| {
            let vector: Vector = row.get("vector");
            EmbeddingRecord {
                chunk_id: row.get("chunk_id"),
                vector: vector.to_vec(),
                created_at: row.get("created_at"),
            }
        }))
    }

    async fn durable_count_for(&self, document_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM embedding e
             JOIN chunk c ON c.id = e.chunk_id
             WHERE c.document_id = $1",
        )
        .bind(document_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(count)
    }

    async fn staged_count_for(&self, document_id: Uuid) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM embedding_staging WHERE document_id = $1")
                .bind(document_id)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(count)
    }
}
