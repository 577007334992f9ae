use std::collections::{BTreeMap, HashSet};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{CollaboratorError, IndexBuildError};
use crate::model::Chunk;
use crate::retry::RetryPolicy;
use crate::semantic::Embedder;
use crate::store::{IndexMeta, StoredEntry, VectorStore};
use crate::util::now_utc_string;

use super::noise::NoiseFilter;

#[derive(Clone, Debug)]
pub struct IndexConfig {
    /// Share of kept chunks allowed to fail embedding before the build aborts.
    pub max_error_rate: f64,
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_error_rate: 0.1,
            batch_size: 32,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct IndexBuildReport {
    pub input_chunks: usize,
    pub kept_chunks: usize,
    pub dropped_by_reason: BTreeMap<String, usize>,
    pub embedding_failures: usize,
    pub meta: IndexMeta,
}

/// Chunks that passed validation and the noise filter, with drop counts per reason.
#[derive(Debug)]
pub struct FilteredChunks<'a> {
    pub input_chunks: usize,
    pub kept: Vec<&'a Chunk>,
    pub dropped_by_reason: BTreeMap<String, usize>,
}

/// Filters, embeds and swaps the whole chunk set into `store`.
#[cfg(test)]
pub fn build_index(
    chunks: &[Chunk],
    embedder: &dyn Embedder,
    filter: &NoiseFilter,
    store: &mut dyn VectorStore,
    config: &IndexConfig,
) -> Result<IndexBuildReport, IndexBuildError> {
    let filtered = filter_chunks(chunks, filter)?;
    embed_and_swap(&filtered, embedder, store, config)
}

pub fn filter_chunks<'a>(
    chunks: &'a [Chunk],
    filter: &NoiseFilter,
) -> Result<FilteredChunks<'a>, IndexBuildError> {
    validate_chunks(chunks)?;

    let mut dropped_by_reason = BTreeMap::<String, usize>::new();
    let mut kept = Vec::<&Chunk>::with_capacity(chunks.len());
    for chunk in chunks {
        match filter.classify(&chunk.text) {
            Some(reason) => {
                debug!(chunk_id = %chunk.chunk_id, reason = reason.as_str(), "dropping noisy chunk");
                *dropped_by_reason
                    .entry(reason.as_str().to_string())
                    .or_default() += 1;
            }
            None => kept.push(chunk),
        }
    }
    info!(
        input_chunks = chunks.len(),
        kept_chunks = kept.len(),
        dropped_chunks = chunks.len() - kept.len(),
        "noise filter applied"
    );

    Ok(FilteredChunks {
        input_chunks: chunks.len(),
        kept,
        dropped_by_reason,
    })
}

/// Embeds the kept chunks and swaps them into `store`.
///
/// Nothing is written unless every step before the swap succeeds, so a failed
/// build leaves the previous index in place.
pub fn embed_and_swap(
    filtered: &FilteredChunks<'_>,
    embedder: &dyn Embedder,
    store: &mut dyn VectorStore,
    config: &IndexConfig,
) -> Result<IndexBuildReport, IndexBuildError> {
    let kept = &filtered.kept;
    let model = embedder.model().clone();
    let mut entries = Vec::<StoredEntry>::with_capacity(kept.len());
    let mut failures = 0usize;
    let mut last_error: Option<CollaboratorError> = None;

    for batch in kept.chunks(config.batch_size.max(1)) {
        for (chunk, outcome) in embed_batch(embedder, batch, &config.retry) {
            let outcome = outcome.and_then(|vector| {
                if vector.len() == model.dimensions {
                    Ok(vector)
                } else {
                    Err(CollaboratorError::Fatal(format!(
                        "expected {} dimensions, got {}",
                        model.dimensions,
                        vector.len()
                    )))
                }
            });
            match outcome {
                Ok(vector) => entries.push(StoredEntry {
                    metadata: chunk.metadata(),
                    vector,
                }),
                Err(err) => {
                    warn!(chunk_id = %chunk.chunk_id, error = %err, "skipping chunk after embedding failure");
                    failures += 1;
                    last_error = Some(err);
                }
            }
        }
    }

    if !kept.is_empty() && entries.is_empty() {
        if let Some(err) = last_error {
            return Err(IndexBuildError::EmbedderUnavailable(err));
        }
    }
    if !kept.is_empty() && failures as f64 / kept.len() as f64 > config.max_error_rate {
        return Err(IndexBuildError::ErrorRateExceeded {
            failed: failures,
            total: kept.len(),
            max_error_rate: config.max_error_rate,
        });
    }

    let meta = IndexMeta {
        model_id: model.model_id.clone(),
        dimensions: model.dimensions,
        built_at: now_utc_string(),
        chunk_count: entries.len(),
        checksum: index_checksum(&model.model_id, &entries),
    };
    store.rebuild(&meta, &entries)?;
    info!(
        model_id = %meta.model_id,
        indexed_chunks = meta.chunk_count,
        embedding_failures = failures,
        "index swapped in"
    );

    Ok(IndexBuildReport {
        input_chunks: filtered.input_chunks,
        kept_chunks: kept.len(),
        dropped_by_reason: filtered.dropped_by_reason.clone(),
        embedding_failures: failures,
        meta,
    })
}

fn validate_chunks(chunks: &[Chunk]) -> Result<(), IndexBuildError> {
    let mut seen = HashSet::<&str>::with_capacity(chunks.len());
    for chunk in chunks {
        chunk
            .validate()
            .map_err(|reason| IndexBuildError::InvalidChunk {
                chunk_id: chunk.chunk_id.clone(),
                reason,
            })?;
        if !seen.insert(chunk.chunk_id.as_str()) {
            return Err(IndexBuildError::DuplicateChunkId(chunk.chunk_id.clone()));
        }
    }
    Ok(())
}

/// One batched call; if it fails as a whole, falls back to per-chunk calls so
/// a single bad chunk does not take its neighbours down.
fn embed_batch<'a>(
    embedder: &dyn Embedder,
    batch: &[&'a Chunk],
    retry: &RetryPolicy,
) -> Vec<(&'a Chunk, Result<Vec<f32>, CollaboratorError>)> {
    let texts = batch
        .iter()
        .map(|chunk| chunk.text.as_str())
        .collect::<Vec<&str>>();

    match retry.run("embed_batch", || embedder.embed_batch(&texts)) {
        Ok(vectors) if vectors.len() == batch.len() => {
            return batch.iter().copied().zip(vectors.into_iter().map(Ok)).collect();
        }
        Ok(vectors) => {
            warn!(
                expected = batch.len(),
                received = vectors.len(),
                "embedding batch size mismatch; retrying per chunk"
            );
        }
        Err(exhausted) => {
            debug!(error = %exhausted.error, batch = batch.len(), "embedding batch failed; retrying per chunk");
        }
    }

    batch
        .iter()
        .map(|chunk| {
            let outcome = retry
                .run("embed", || embedder.embed(&chunk.text))
                .map_err(|exhausted| exhausted.error);
            (*chunk, outcome)
        })
        .collect()
}

fn index_checksum(model_id: &str, entries: &[StoredEntry]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model_id.as_bytes());
    for entry in entries {
        hasher.update(b"\n");
        hasher.update(entry.metadata.chunk_id.as_bytes());
        hasher.update(b"\t");
        hasher.update(entry.metadata.text.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
