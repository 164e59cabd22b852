//! Persisted embedding index and similarity retrieval.
//!
//! The index is a SQLite file holding documents, their chunks, and one
//! embedding vector per chunk. Ranking is brute-force cosine similarity over
//! every stored vector, which is plenty for a textbook-sized corpus.
//!
//! # Bootstrap
//!
//! [`VectorIndex::bootstrap`] runs once at start-up:
//!
//! ```text
//! lock <index>.lock ─▶ index missing or holds no vectors?
//!                        ├─ yes ─▶ scan pdf_dir ─▶ chunk ─▶ embed ─▶ persist
//!                        └─ no  ─▶ open as-is
//! ```
//!
//! The advisory lock makes check-then-build safe when several processes
//! cold-start against the same index file.

use anyhow::{Context, Result};
use async_trait::async_trait;
use fs2::FileExt;
use sqlx::{Row, SqlitePool};
use std::fs::File;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::{Config, EmbeddingConfig};
use crate::db;
use crate::embedding::{self, blob_to_vec, cosine_similarity, vec_to_blob};
use crate::ingest::load_pdfs;
use crate::migrate::run_migrations;
use crate::models::{Document, RetrievedDocument};

/// Similarity search over some corpus. The chain depends on this seam, not on
/// [`VectorIndex`] directly.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return up to `k` passages most similar to `query`, best first.
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedDocument>>;
}

/// Counts reported after indexing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub documents: u64,
    pub chunks: u64,
}

#[derive(Debug)]
pub struct VectorIndex {
    pool: SqlitePool,
    embedding: EmbeddingConfig,
    max_tokens: usize,
}

impl VectorIndex {
    /// Open (and migrate) the index file without ingesting anything.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(&config.paths.index).await?;
        run_migrations(&pool).await?;
        Ok(Self {
            pool,
            embedding: config.embedding.clone(),
            max_tokens: config.chunking.max_tokens,
        })
    }

    /// Open the persisted index, building it from `paths.pdf_dir` first if it
    /// is absent or empty.
    pub async fn bootstrap(config: &Config) -> Result<Self> {
        let _lock = BuildLock::acquire(&config.paths.index).await?;

        let existed = config.paths.index.exists();
        let index = Self::open(config).await?;

        if existed && index.vector_count().await? > 0 {
            info!("Opening existing index at {}", config.paths.index.display());
            return Ok(index);
        }

        info!("Initializing index at {}", config.paths.index.display());
        index.populate(config).await?;
        Ok(index)
    }

    /// Drop everything in the index and ingest the PDF folder again.
    pub async fn rebuild(config: &Config) -> Result<Self> {
        let _lock = BuildLock::acquire(&config.paths.index).await?;
        let index = Self::open(config).await?;
        index.clear().await?;
        index.populate(config).await?;
        Ok(index)
    }

    async fn populate(&self, config: &Config) -> Result<IndexStats> {
        let pdf_dir = &config.paths.pdf_dir;
        if !pdf_dir.exists() {
            warn!("PDF folder '{}' not found!", pdf_dir.display());
            return Ok(IndexStats::default());
        }

        let docs = load_pdfs(pdf_dir, config.ingest.workers).await?;
        if docs.is_empty() {
            warn!("No PDFs found in the folder or its subdirectories.");
            return Ok(IndexStats::default());
        }

        info!("Found {} PDFs. Building index...", docs.len());
        match self.add_documents(&docs).await {
            Ok(stats) => {
                info!(
                    "Successfully loaded {} PDFs ({} chunks) into the index.",
                    stats.documents, stats.chunks
                );
                Ok(stats)
            }
            Err(e) => {
                // a half-built index would be mistaken for a complete one next start
                if let Err(clear_err) = self.clear().await {
                    warn!("Failed to clear partial index: {:#}", clear_err);
                }
                Err(e.context("Failed to build index"))
            }
        }
    }

    /// Chunk, embed, and persist `docs`. A document whose source is already
    /// indexed is replaced.
    pub async fn add_documents(&self, docs: &[Document]) -> Result<IndexStats> {
        let provider = embedding::create_provider(&self.embedding)?;
        let model = provider.model_name().to_string();
        let batch_size = self.embedding.batch_size.max(1);
        let mut stats = IndexStats::default();

        for doc in docs {
            let doc_id = Uuid::new_v4().to_string();
            let chunks = chunk_text(&doc_id, &doc.text, self.max_tokens);
            if chunks.is_empty() {
                continue;
            }

            let mut vectors = Vec::with_capacity(chunks.len());
            for batch in chunks.chunks(batch_size) {
                let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
                let embedded = embedding::embed_texts(&self.embedding, &texts)
                    .await
                    .with_context(|| format!("Embedding failed for {}", doc.source))?;
                vectors.extend(embedded);
            }

            let mut tx = self.pool.begin().await?;

            sqlx::query(
                "DELETE FROM chunk_vectors WHERE document_id IN (SELECT id FROM documents WHERE source = ?)",
            )
            .bind(&doc.source)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "DELETE FROM chunks WHERE document_id IN (SELECT id FROM documents WHERE source = ?)",
            )
            .bind(&doc.source)
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM documents WHERE source = ?")
                .bind(&doc.source)
                .execute(&mut *tx)
                .await?;

            sqlx::query(
                "INSERT INTO documents (id, source, filename, body, ingested_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&doc_id)
            .bind(&doc.source)
            .bind(&doc.filename)
            .bind(&doc.text)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *tx)
            .await?;

            for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
                sqlx::query(
                    "INSERT INTO chunks (id, document_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&chunk.id)
                .bind(&chunk.document_id)
                .bind(chunk.chunk_index)
                .bind(&chunk.text)
                .bind(&chunk.hash)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    "INSERT INTO chunk_vectors (chunk_id, document_id, model, dims, embedding) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&chunk.id)
                .bind(&doc_id)
                .bind(&model)
                .bind(vector.len() as i64)
                .bind(vec_to_blob(vector))
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            stats.documents += 1;
            stats.chunks += chunks.len() as u64;
        }

        Ok(stats)
    }

    pub async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunk_vectors")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM documents")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn vector_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn document_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?)
    }

    /// Rank every stored chunk against `query_vec` and return the top `k`.
    pub async fn similarity_search(
        &self,
        query_vec: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedDocument>> {
        let rows = sqlx::query(
            r#"
            SELECT cv.embedding, c.text, d.source, d.filename
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            JOIN documents d ON d.id = cv.document_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut results: Vec<RetrievedDocument> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                RetrievedDocument {
                    source: row.get("source"),
                    filename: row.get("filename"),
                    text: row.get("text"),
                    score: cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64,
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(k);
        Ok(results)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Retriever for VectorIndex {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedDocument>> {
        if self.vector_count().await? == 0 {
            return Ok(Vec::new());
        }
        let query_vec = embedding::embed_query(&self.embedding, query).await?;
        self.similarity_search(&query_vec, k).await
    }
}

/// Exclusive advisory lock on `<index>.lock`, released on drop.
struct BuildLock {
    file: File,
}

impl BuildLock {
    async fn acquire(index_path: &Path) -> Result<Self> {
        if let Some(parent) = index_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let lock_path = index_path.with_extension("lock");
        let file = File::create(&lock_path)
            .with_context(|| format!("Failed to create {}", lock_path.display()))?;

        let file = tokio::task::spawn_blocking(move || file.lock_exclusive().map(|_| file))
            .await?
            .with_context(|| format!("Failed to lock {}", lock_path.display()))?;
        Ok(Self { file })
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(tmp: &TempDir) -> Config {
        let mut config = Config::minimal();
        config.paths.index = tmp.path().join("db/index.sqlite");
        config.paths.pdf_dir = tmp.path().join("pdf_data");
        config.embedding.provider = "disabled".to_string();
        config
    }

    async fn insert_vector(index: &VectorIndex, source: &str, text: &str, vector: &[f32]) {
        let doc_id = Uuid::new_v4().to_string();
        let chunk_id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO documents (id, source, filename, body, ingested_at) VALUES (?, ?, ?, ?, 0)",
        )
        .bind(&doc_id)
        .bind(source)
        .bind(source)
        .bind(text)
        .execute(&index.pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO chunks (id, document_id, chunk_index, text, hash) VALUES (?, ?, 0, ?, '')",
        )
        .bind(&chunk_id)
        .bind(&doc_id)
        .bind(text)
        .execute(&index.pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO chunk_vectors (chunk_id, document_id, model, dims, embedding) VALUES (?, ?, 'test', ?, ?)",
        )
        .bind(&chunk_id)
        .bind(&doc_id)
        .bind(vector.len() as i64)
        .bind(vec_to_blob(vector))
        .execute(&index.pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn similarity_search_returns_top_k_best_first() {
        let tmp = TempDir::new().unwrap();
        let index = VectorIndex::open(&test_config(&tmp)).await.unwrap();
        insert_vector(&index, "a.pdf", "about light", &[1.0, 0.0]).await;
        insert_vector(&index, "b.pdf", "about cells", &[0.0, 1.0]).await;
        insert_vector(&index, "c.pdf", "light and cells", &[0.7, 0.7]).await;

        let results = index.similarity_search(&[1.0, 0.1], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].source, "a.pdf");
        assert_eq!(results[1].source, "c.pdf");
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn empty_index_retrieves_nothing_without_embedding() {
        let tmp = TempDir::new().unwrap();
        let index = VectorIndex::open(&test_config(&tmp)).await.unwrap();
        // provider is disabled, so reaching the embedder would error
        let results = index.retrieve("what is light?", 2).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn bootstrap_without_pdf_folder_yields_empty_index() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let index = VectorIndex::bootstrap(&config).await.unwrap();
        assert_eq!(index.vector_count().await.unwrap(), 0);
        assert!(config.paths.index.exists());
    }

    #[tokio::test]
    async fn bootstrap_keeps_existing_vectors() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        {
            let index = VectorIndex::open(&config).await.unwrap();
            insert_vector(&index, "a.pdf", "about light", &[1.0, 0.0]).await;
            index.close().await;
        }
        // a PDF folder exists, but the populated index must not be rebuilt
        std::fs::create_dir_all(&config.paths.pdf_dir).unwrap();
        std::fs::write(config.paths.pdf_dir.join("new.pdf"), b"broken").unwrap();

        let index = VectorIndex::bootstrap(&config).await.unwrap();
        assert_eq!(index.document_count().await.unwrap(), 1);
        assert_eq!(index.vector_count().await.unwrap(), 1);
    }
}
