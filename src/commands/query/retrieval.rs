use tracing::{debug, info};

use crate::error::RetrievalError;
use crate::model::{Query, RetrievalResult};
use crate::retry::RetryPolicy;
use crate::semantic::Embedder;
use crate::store::VectorStore;

/// Read-only nearest-neighbour search over a built index.
pub struct Retriever<'a> {
    store: &'a dyn VectorStore,
    embedder: &'a dyn Embedder,
    retry: RetryPolicy,
}

impl<'a> Retriever<'a> {
    pub fn new(store: &'a dyn VectorStore, embedder: &'a dyn Embedder) -> Self {
        Self {
            store,
            embedder,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// At most `top_k` results by ascending distance, ranked from 1.
    ///
    /// An empty index or a filter matching no document gives an empty list.
    pub fn query(&self, query: &Query) -> Result<Vec<RetrievalResult>, RetrievalError> {
        let question = query.question.trim();
        if question.is_empty() {
            return Err(RetrievalError::EmptyQuestion);
        }
        if query.top_k == 0 {
            return Err(RetrievalError::InvalidTopK);
        }
        let doc_filter = query.doc_id.as_deref().map(validate_doc_filter).transpose()?;

        let Some(meta) = self.store.index_meta()? else {
            info!("index has not been built; nothing to retrieve");
            return Ok(Vec::new());
        };
        let model = self.embedder.model();
        if meta.model_id != model.model_id || meta.dimensions != model.dimensions {
            return Err(RetrievalError::ModelMismatch {
                indexed: format!("{} ({} dims)", meta.model_id, meta.dimensions),
                query: format!("{} ({} dims)", model.model_id, model.dimensions),
            });
        }

        let vector = self
            .retry
            .run("embed_query", || self.embedder.embed(question))
            .map_err(|exhausted| RetrievalError::Embedding(exhausted.error))?;

        let results = self
            .store
            .nearest(&vector, query.top_k, doc_filter)?
            .into_iter()
            .enumerate()
            .map(|(index, (chunk, distance))| RetrievalResult {
                chunk,
                distance,
                rank: index + 1,
            })
            .collect::<Vec<RetrievalResult>>();

        debug!(
            doc_id = doc_filter.unwrap_or("*"),
            top_k = query.top_k,
            results = results.len(),
            best_distance = results.first().map(|result| result.distance),
            "retrieval completed"
        );
        Ok(results)
    }
}

/// Rejects filters that can never name a document: blank, or containing
/// whitespace or control characters.
pub fn validate_doc_filter(raw: &str) -> Result<&str, RetrievalError> {
    let malformed = raw.is_empty()
        || raw
            .chars()
            .any(|character| character.is_whitespace() || character.is_control());
    if malformed {
        return Err(RetrievalError::InvalidDocFilter(raw.to_string()));
    }
    Ok(raw)
}
