//! Chunk repository implementation.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use docflow_core::{Chunk, ChunkRepository, Error, NewChunk, ReplaceOutcome, Result};

/// PostgreSQL implementation of ChunkRepository.
pub struct PgChunkRepository {
    pool: Pool<Postgres>,
}

const CHUNK_COLUMNS: &str = "id, document_id, sequence_index, text, content_hash, token_count";

impl PgChunkRepository {
    /// Create a new PgChunkRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: sqlx::postgres::PgRow) -> Chunk {
        Chunk {
            id: row.get("id"),
            document_id: row.get("document_id"),
            sequence_index: row.get("sequence_index"),
            text: row.get("text"),
            content_hash: row.get("content_hash"),
            token_count: row.get("token_count"),
        }
    }
}

#[async_trait]
impl ChunkRepository for PgChunkRepository {
    async fn replace_for_document(
        &self,
        document_id: Uuid,
        chunks: Vec<NewChunk>,
    ) -> Result<ReplaceOutcome> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Reprocessing a byte-identical document must not churn rows:
        // when the stored hash sequence matches the incoming one, the
        // existing chunk ids (and their embeddings) stay untouched.
        let existing: Vec<String> = sqlx::query_scalar(
            "SELECT content_hash FROM chunk
             WHERE document_id = $1
             ORDER BY sequence_index",
        )
        .bind(document_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let incoming: Vec<&str> = chunks.iter().map(|c| c.content_hash.as_str()).collect();
        if !existing.is_empty() && existing.iter().map(String::as_str).eq(incoming.iter().copied())
        {
            tx.rollback().await.map_err(Error::Database)?;
            return Ok(ReplaceOutcome {
                written: false,
                chunk_count: chunks.len(),
            });
        }

        sqlx::query("DELETE FROM chunk WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        let chunk_count = chunks.len();
        for chunk in &chunks {
            sqlx::query(
                "INSERT INTO chunk
                     (id, document_id, sequence_index, text, content_hash, token_count)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(Uuid::now_v7())
            .bind(document_id)
            .bind(chunk.sequence_index)
            .bind(&chunk.text)
            .bind(&chunk.content_hash)
            .bind(chunk.token_count)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(ReplaceOutcome {
            written: true,
            chunk_count,
        })
    }

    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(&format!(
            "SELECT {CHUNK_COLUMNS} FROM chunk
             WHERE document_id = $1
             ORDER BY sequence_index"
        ))
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_row).collect())
    }

    async fn get(&self, chunk_id: Uuid) -> Result<Option<Chunk>> {
        let row = sqlx::query(&format!(
            "SELECT {CHUNK_COLUMNS} FROM chunk WHERE id = $1"
        ))
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_row))
    }
}
