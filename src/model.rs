use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One extracted page of a source document. Immutable once written to `pages.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub doc_id: String,
    pub title: String,
    /// 1-based.
    pub page_number: u32,
    pub source: String,
    pub text: String,
    pub char_count: usize,
}

/// A bounded span of one page, the unit of indexing and retrieval.
///
/// `char_start`/`char_end` are char offsets into the page's raw text and
/// `text` is exactly that slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub title: String,
    pub page_number: u32,
    pub char_start: usize,
    pub char_end: usize,
    pub text: String,
    pub char_count: usize,
    /// Set when a single paragraph alone exceeds the size bound and was kept whole.
    #[serde(default)]
    pub oversized: bool,
}

impl Chunk {
    pub fn chunk_id_for(doc_id: &str, page_number: u32, char_start: usize) -> String {
        format!("{doc_id}:p{page_number:04}:c{char_start:06}")
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.doc_id.trim().is_empty() {
            return Err("doc_id is empty".to_string());
        }
        if self.page_number == 0 {
            return Err("page_number must be 1-based".to_string());
        }
        if self.char_start >= self.char_end {
            return Err(format!(
                "char_start {} is not before char_end {}",
                self.char_start, self.char_end
            ));
        }
        if self.text.trim().is_empty() {
            return Err("text is empty".to_string());
        }
        let expected_id = Self::chunk_id_for(&self.doc_id, self.page_number, self.char_start);
        if self.chunk_id != expected_id {
            return Err(format!("chunk_id does not match expected '{expected_id}'"));
        }
        Ok(())
    }

    pub fn metadata(&self) -> ChunkMetadata {
        ChunkMetadata {
            chunk_id: self.chunk_id.clone(),
            doc_id: self.doc_id.clone(),
            title: self.title.clone(),
            page: self.page_number,
            char_start: self.char_start,
            char_end: self.char_end,
            text: self.text.clone(),
        }
    }
}

/// What the vector store keeps next to each vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub chunk_id: String,
    pub doc_id: String,
    pub title: String,
    pub page: u32,
    pub char_start: usize,
    pub char_end: usize,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Query {
    pub question: String,
    pub doc_id: Option<String>,
    pub top_k: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub chunk: ChunkMetadata,
    /// Cosine distance, smaller is more similar.
    pub distance: f64,
    /// 1-based.
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceRef {
    pub doc_id: String,
    pub page: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub cited_sources: Vec<SourceRef>,
    pub refused: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub started_at: String,
    pub completed_at: String,
    pub pages_path: String,
    pub chunks_path: String,
    pub chunk_mode: String,
    pub max_chunk_chars: usize,
    pub page_count: usize,
    pub skipped_pages: Vec<String>,
    pub chunk_count: usize,
    pub chunks_by_doc: BTreeMap<String, usize>,
    pub oversized_chunk_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexBuildManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub started_at: String,
    pub completed_at: String,
    pub chunks_path: String,
    pub db_path: String,
    pub model_id: String,
    pub embedding_dim: usize,
    pub input_chunks: usize,
    pub kept_chunks: usize,
    pub dropped_by_reason: BTreeMap<String, usize>,
    pub embedding_failures: usize,
    pub indexed_chunks: usize,
    pub checksum: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
