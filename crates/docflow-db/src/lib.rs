//! # docflow-db
//!
//! PostgreSQL + pgvector persistence layer for docflow.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for documents, jobs, chunks, and embeddings
//! - The content-addressed object store backends
//! - The token-budgeted chunker
//! - In-memory repository implementations for tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use docflow_db::Database;
//! use docflow_core::DocumentRepository;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/docflow").await?;
//!     let doc = db.documents.get(document_id).await?;
//!     println!("stored at {}", doc.storage_key);
//!     Ok(())
//! }
//! ```

pub mod chunking;
pub mod chunks;
pub mod documents;
pub mod embeddings;
pub mod jobs;
pub mod memory;
pub mod object_store;
pub mod pool;

// Re-export core types
pub use docflow_core::*;

// Re-export repository implementations
pub use chunking::{Chunker, ChunkerConfig, ChunkSpan, TokenChunker};
pub use chunks::PgChunkRepository;
pub use documents::PgDocumentRepository;
pub use embeddings::PgEmbeddingRepository;
pub use jobs::PgJobRepository;
pub use memory::{
    MemoryChunkRepository, MemoryDocumentRepository, MemoryEmbeddingRepository,
    MemoryJobRepository, MemoryStorageBackend, MemoryStore,
};
pub use object_store::{FilesystemBackend, StorageBackend};
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Document repository.
    pub documents: PgDocumentRepository,
    /// Ingest job repository.
    pub jobs: PgJobRepository,
    /// Chunk repository.
    pub chunks: PgChunkRepository,
    /// Embedding staging and durable storage repository.
    pub embeddings: PgEmbeddingRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            documents: PgDocumentRepository::new(pool.clone()),
            jobs: PgJobRepository::new(pool.clone()),
            chunks: PgChunkRepository::new(pool.clone()),
            embeddings: PgEmbeddingRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
