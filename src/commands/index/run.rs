use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use crate::cli::IndexArgs;
use crate::commands::collaborators::build_embedder;
use crate::error::IndexBuildError;
use crate::model::{Chunk, IndexBuildManifest};
use crate::semantic::SemanticModelConfig;
use crate::store::SqliteVectorStore;
use crate::util::{ensure_directory, now_utc_string, read_json, utc_compact_string, write_json_pretty};

use super::build::{FilteredChunks, IndexBuildReport, IndexConfig, embed_and_swap, filter_chunks};
use super::noise::{NoiseFilter, NoiseFilterConfig};

pub fn run(args: IndexArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("index-{}", utc_compact_string(started_ts));

    let chunks: Vec<Chunk> = read_json(&args.chunks_path)?;
    info!(path = %args.chunks_path.display(), chunks = chunks.len(), "loaded chunks");

    let embedder = build_embedder(&args.embedder, &args.openai)?;
    let filter = NoiseFilter::new(NoiseFilterConfig::default())?;
    let config = IndexConfig {
        max_error_rate: args.max_error_rate,
        batch_size: args.batch_size,
        ..IndexConfig::default()
    };

    if let Some(parent) = args.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_directory(parent)?;
        }
    }
    let mut store = SqliteVectorStore::open(&args.db_path)
        .with_context(|| format!("failed to open vector store {}", args.db_path.display()))?;

    let model = embedder.model().clone();
    info!(
        model_id = %model.model_id,
        backend = %model.backend,
        dimensions = model.dimensions,
        "building index"
    );
    let mut manifest = pending_manifest(
        run_id,
        started_at,
        &args.chunks_path,
        &args.db_path,
        &model,
        chunks.len(),
    );
    let outcome = match filter_chunks(&chunks, &filter) {
        Ok(filtered) => {
            record_filtering(&mut manifest, &filtered);
            embed_and_swap(&filtered, embedder.as_ref(), &mut store, &config)
        }
        Err(err) => Err(err),
    };
    record_outcome(&mut manifest, &outcome);

    let manifest_path = args
        .cache_root
        .join("manifests")
        .join(format!("index_build_{}.json", utc_compact_string(started_ts)));
    write_json_pretty(&manifest_path, &manifest)
        .with_context(|| format!("failed to write index manifest {}", manifest_path.display()))?;

    let report = outcome.context("index build aborted; previous index left in place")?;
    for (reason, count) in &report.dropped_by_reason {
        info!(reason = %reason, chunks = count, "noise filter dropped chunks");
    }
    info!(
        path = %args.db_path.display(),
        indexed_chunks = report.meta.chunk_count,
        kept_chunks = report.kept_chunks,
        embedding_failures = report.embedding_failures,
        manifest = %manifest_path.display(),
        "index build completed"
    );

    Ok(())
}

/// Manifest for a build that has not got past loading its chunks.
pub(super) fn pending_manifest(
    run_id: String,
    started_at: String,
    chunks_path: &Path,
    db_path: &Path,
    model: &SemanticModelConfig,
    input_chunks: usize,
) -> IndexBuildManifest {
    IndexBuildManifest {
        manifest_version: 1,
        run_id,
        started_at,
        completed_at: String::new(),
        chunks_path: chunks_path.display().to_string(),
        db_path: db_path.display().to_string(),
        model_id: model.model_id.clone(),
        embedding_dim: model.dimensions,
        input_chunks,
        kept_chunks: 0,
        dropped_by_reason: Default::default(),
        embedding_failures: 0,
        indexed_chunks: 0,
        checksum: String::new(),
        status: "failed".to_string(),
        error: None,
    }
}

pub(super) fn record_filtering(manifest: &mut IndexBuildManifest, filtered: &FilteredChunks<'_>) {
    manifest.kept_chunks = filtered.kept.len();
    manifest.dropped_by_reason = filtered.dropped_by_reason.clone();
}

/// Fills in the embedding half of the manifest; filter counts stay as recorded.
pub(super) fn record_outcome(
    manifest: &mut IndexBuildManifest,
    outcome: &Result<IndexBuildReport, IndexBuildError>,
) {
    manifest.completed_at = now_utc_string();
    match outcome {
        Ok(report) => {
            manifest.embedding_failures = report.embedding_failures;
            manifest.indexed_chunks = report.meta.chunk_count;
            manifest.checksum = report.meta.checksum.clone();
            manifest.status = "completed".to_string();
        }
        Err(err) => {
            match err {
                IndexBuildError::ErrorRateExceeded { failed, .. } => {
                    manifest.embedding_failures = *failed;
                }
                IndexBuildError::EmbedderUnavailable(_) => {
                    manifest.embedding_failures = manifest.kept_chunks;
                }
                _ => {}
            }
            manifest.status = "failed".to_string();
            manifest.error = Some(err.to_string());
        }
    }
}
