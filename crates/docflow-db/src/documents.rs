//! Document repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use docflow_core::{CreateDocumentRequest, Document, DocumentRepository, Error, Result};

/// PostgreSQL implementation of DocumentRepository.
pub struct PgDocumentRepository {
    pool: Pool<Postgres>,
}

impl PgDocumentRepository {
    /// Create a new PgDocumentRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: sqlx::postgres::PgRow) -> Document {
        Document {
            id: row.get("id"),
            owner_id: row.get("owner_id"),
            content_hash: row.get("content_hash"),
            storage_key: row.get("storage_key"),
            original_filename: row.get("original_filename"),
            content_type: row.get("content_type"),
            size_bytes: row.get("size_bytes"),
            created_at: row.get("created_at"),
            deleted_at: row.get("deleted_at"),
        }
    }
}

const DOCUMENT_COLUMNS: &str = "id, owner_id, content_hash, storage_key, original_filename, \
     content_type, size_bytes, created_at, deleted_at";

#[async_trait]
impl DocumentRepository for PgDocumentRepository {
    async fn insert(&self, req: CreateDocumentRequest) -> Result<Document> {
        let id = Uuid::now_v7();
        let now = Utc::now();

        let row = sqlx::query(&format!(
            "INSERT INTO document
                 (id, owner_id, content_hash, storage_key, original_filename,
                  content_type, size_bytes, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {DOCUMENT_COLUMNS}"
        ))
        .bind(id)
        .bind(req.owner_id)
        .bind(&req.content_hash)
        .bind(&req.storage_key)
        .bind(&req.original_filename)
        .bind(&req.content_type)
        .bind(req.size_bytes)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Self::parse_row(row))
    }

    async fn get(&self, id: Uuid) -> Result<Document> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM document WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::NotFound(format!("Document {} not found", id)))?;

        Ok(Self::parse_row(row))
    }

    async fn get_by_hash(&self, owner_id: Uuid, content_hash: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM document
             WHERE owner_id = $1 AND content_hash = $2 AND deleted_at IS NULL
             ORDER BY created_at DESC
             LIMIT 1"
        ))
        .bind(owner_id)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_row))
    }

    async fn soft_delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE document SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Document {} not found", id)));
        }
        Ok(())
    }
}
