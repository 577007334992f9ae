use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::model::{Chunk, IndexBuildManifest, IngestRunManifest, Page};
use crate::store::{SqliteVectorStore, VectorStore};
use crate::util::{latest_manifest, read_json};

pub fn run(args: StatusArgs) -> Result<()> {
    let manifest_dir = args.cache_root.join("manifests");

    info!(cache_root = %args.cache_root.display(), "status requested");

    if args.pages_path.exists() {
        let pages: Vec<Page> = read_json(&args.pages_path)?;
        let documents = distinct_count(pages.iter().map(|page| page.doc_id.as_str()));
        let empty_pages = pages.iter().filter(|page| page.char_count == 0).count();
        info!(
            path = %args.pages_path.display(),
            documents,
            pages = pages.len(),
            empty_pages,
            "pages file"
        );
    } else {
        warn!(path = %args.pages_path.display(), "pages file missing");
    }

    if args.chunks_path.exists() {
        let chunks: Vec<Chunk> = read_json(&args.chunks_path)?;
        let documents = distinct_count(chunks.iter().map(|chunk| chunk.doc_id.as_str()));
        let oversized = chunks.iter().filter(|chunk| chunk.oversized).count();
        info!(
            path = %args.chunks_path.display(),
            documents,
            chunks = chunks.len(),
            oversized,
            "chunks file"
        );
    } else {
        warn!(path = %args.chunks_path.display(), "chunks file missing");
    }

    log_store(&args.db_path)?;

    match latest_manifest(&manifest_dir, "ingest_run_") {
        Some(path) => {
            let manifest: IngestRunManifest = read_json(&path)?;
            info!(
                path = %path.display(),
                run_id = %manifest.run_id,
                completed_at = %manifest.completed_at,
                chunk_mode = %manifest.chunk_mode,
                chunks = manifest.chunk_count,
                skipped_pages = manifest.skipped_pages.len(),
                "latest ingest run"
            );
        }
        None => warn!(path = %manifest_dir.display(), "no ingest run manifest"),
    }

    match latest_manifest(&manifest_dir, "index_build_") {
        Some(path) => {
            let manifest: IndexBuildManifest = read_json(&path)?;
            info!(
                path = %path.display(),
                run_id = %manifest.run_id,
                status = %manifest.status,
                model_id = %manifest.model_id,
                kept_chunks = manifest.kept_chunks,
                indexed_chunks = manifest.indexed_chunks,
                embedding_failures = manifest.embedding_failures,
                error = manifest.error.as_deref().unwrap_or(""),
                "latest index build"
            );
        }
        None => warn!(path = %manifest_dir.display(), "no index build manifest"),
    }

    Ok(())
}

fn log_store(db_path: &Path) -> Result<()> {
    if !db_path.exists() {
        warn!(path = %db_path.display(), "vector store missing");
        return Ok(());
    }

    let store = SqliteVectorStore::open_read_only(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    let entries = store.entry_count()?;
    match store.index_meta()? {
        Some(meta) => info!(
            path = %db_path.display(),
            model_id = %meta.model_id,
            dimensions = meta.dimensions,
            built_at = %meta.built_at,
            entries,
            checksum = %meta.checksum,
            "vector store"
        ),
        None => warn!(path = %db_path.display(), entries, "vector store has no completed build"),
    }
    Ok(())
}

fn distinct_count<'a>(ids: impl Iterator<Item = &'a str>) -> usize {
    let mut ids = ids.collect::<Vec<&str>>();
    ids.sort_unstable();
    ids.dedup();
    ids.len()
}
