//! Parallel PDF ingestion.
//!
//! Discovers PDFs under a root and extracts each one on a bounded pool of
//! blocking workers. A file that fails to read or parse is logged and
//! skipped; it never aborts the scan. Results are gathered by joining the
//! tasks, so no accumulator is shared between workers.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::connector_fs::{scan_pdfs, PdfFile};
use crate::extract::extract_pdf_file;
use crate::models::Document;

/// Load every PDF under `root` into [`Document`]s using at most `workers`
/// concurrent extractions. Output order is unspecified.
pub async fn load_pdfs(root: &Path, workers: usize) -> Result<Vec<Document>> {
    info!("Scanning for PDFs in: {}", root.display());
    let files = scan_pdfs(root)?;
    let total = files.len();

    let permits = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();

    for file in files {
        let permits = permits.clone();
        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await.ok()?;
            let relative = file.relative.clone();
            match tokio::task::spawn_blocking(move || load_one(&file)).await {
                Ok(doc) => doc,
                Err(e) => {
                    warn!("Extraction task for {} failed: {}", relative, e);
                    None
                }
            }
        });
    }

    let mut documents = Vec::with_capacity(total);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some(doc)) => documents.push(doc),
            Ok(None) => {}
            Err(e) => warn!("Ingestion worker failed: {}", e),
        }
    }

    info!("Loaded {} of {} PDFs", documents.len(), total);
    Ok(documents)
}

fn load_one(file: &PdfFile) -> Option<Document> {
    match extract_pdf_file(&file.path) {
        Ok(text) if !text.trim().is_empty() => {
            info!("Loaded: {}", file.relative);
            Some(Document {
                text,
                source: file.relative.clone(),
                filename: file.filename.clone(),
            })
        }
        Ok(_) => {
            warn!("No text extracted from {}, skipping", file.relative);
            None
        }
        Err(e) => {
            warn!("Error extracting text from {}: {}", file.relative, e);
            None
        }
    }
}
