use tracing::info;

use crate::error::AskError;
use crate::generation::Generator;
use crate::model::{Answer, Query};
use crate::semantic::Embedder;
use crate::store::VectorStore;

use super::grounding::AnswerPolicy;
use super::retrieval::Retriever;

/// Question in, grounded answer (or refusal) out. Shared by the CLI and the service.
pub fn answer_question(
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    generator: &dyn Generator,
    policy: &AnswerPolicy,
    query: &Query,
) -> Result<Answer, AskError> {
    let results = Retriever::new(store, embedder)
        .with_retry(policy.config().retry)
        .query(query)?;
    let answer = policy.answer(&query.question, &results, generator)?;
    info!(
        doc_id = query.doc_id.as_deref().unwrap_or("*"),
        retrieved = results.len(),
        refused = answer.refused,
        sources = answer.cited_sources.len(),
        "question answered"
    );
    Ok(answer)
}
