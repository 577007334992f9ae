use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::IngestArgs;
use crate::model::{Chunk, IngestRunManifest, Page};
use crate::util::{now_utc_string, read_json, utc_compact_string, write_json_pretty};

use super::chunker::{Chunker, ChunkerConfig};

pub fn run(args: IngestArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("ingest-{}", utc_compact_string(started_ts));

    let config = ChunkerConfig::from_env()?;
    let chunker = Chunker::new(config)?;

    let pages: Vec<Page> = read_json(&args.pages_path)?;
    info!(
        path = %args.pages_path.display(),
        pages = pages.len(),
        mode = chunker.config().mode.as_str(),
        max_chunk_chars = chunker.config().max_chunk_chars,
        "loaded pages"
    );

    let (chunks, skipped) = chunker.chunk_pages(&pages);
    for err in &skipped {
        warn!(error = %err, "skipping unusable page");
    }

    write_json_pretty(&args.chunks_path, &chunks)?;

    let (chunks_by_doc, oversized_chunk_ids) = summarize_chunks(&chunks);
    for (doc_id, count) in &chunks_by_doc {
        info!(doc_id = %doc_id, chunks = count, "document chunked");
    }
    for chunk_id in &oversized_chunk_ids {
        warn!(chunk_id = %chunk_id, "paragraph exceeds max chunk size; kept whole");
    }

    let manifest = IngestRunManifest {
        manifest_version: 1,
        run_id,
        started_at,
        completed_at: now_utc_string(),
        pages_path: args.pages_path.display().to_string(),
        chunks_path: args.chunks_path.display().to_string(),
        chunk_mode: chunker.config().mode.as_str().to_string(),
        max_chunk_chars: chunker.config().max_chunk_chars,
        page_count: pages.len(),
        skipped_pages: skipped.iter().map(ToString::to_string).collect(),
        chunk_count: chunks.len(),
        chunks_by_doc,
        oversized_chunk_ids,
    };

    let manifest_path = args
        .cache_root
        .join("manifests")
        .join(format!("ingest_run_{}.json", utc_compact_string(started_ts)));
    write_json_pretty(&manifest_path, &manifest)
        .with_context(|| format!("failed to write ingest manifest {}", manifest_path.display()))?;

    info!(
        path = %args.chunks_path.display(),
        chunks = chunks.len(),
        skipped_pages = skipped.len(),
        manifest = %manifest_path.display(),
        "ingest completed"
    );

    Ok(())
}

pub(super) fn summarize_chunks(chunks: &[Chunk]) -> (BTreeMap<String, usize>, Vec<String>) {
    let mut by_doc = BTreeMap::<String, usize>::new();
    let mut oversized = Vec::<String>::new();
    for chunk in chunks {
        *by_doc.entry(chunk.doc_id.clone()).or_default() += 1;
        if chunk.oversized {
            oversized.push(chunk.chunk_id.clone());
        }
    }
    (by_doc, oversized)
}
