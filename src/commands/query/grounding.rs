use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::error::GenerationError;
use crate::generation::Generator;
use crate::model::{Answer, RetrievalResult, SourceRef};
use crate::retry::RetryPolicy;
use crate::semantic::{
    DEFAULT_EMBEDDING_DIM, LOCAL_BACKEND, SemanticModelConfig, content_terms, normalize_whitespace,
};

pub const REFUSAL_TEXT: &str = "The answer was not found in the documents.";
pub const DEFAULT_MAX_DISTANCE: f64 = 0.75;
pub const DEFAULT_MIN_TERM_COVERAGE: f64 = 0.5;

#[derive(Clone, Debug)]
pub struct AnswerPolicyConfig {
    /// Exact sentence the generator must reply with when the context is insufficient.
    pub refusal_text: String,
    /// Results farther than this never reach the prompt.
    pub max_distance: Option<f64>,
    /// Share of the question's content words a result must contain to reach the prompt.
    pub min_term_coverage: Option<f64>,
    pub max_context_chunks: usize,
    pub retry: RetryPolicy,
}

impl AnswerPolicyConfig {
    /// Relevance gates for `model`.
    ///
    /// Local hashed vectors gate on term coverage: their distance to a short
    /// question grows with chunk length and overlaps hash-collision noise.
    /// With both gates off the generator alone decides.
    pub fn for_model(model: &SemanticModelConfig) -> Self {
        let (max_distance, min_term_coverage) = if model.backend == LOCAL_BACKEND {
            (None, Some(DEFAULT_MIN_TERM_COVERAGE))
        } else {
            (Some(DEFAULT_MAX_DISTANCE), None)
        };
        Self {
            refusal_text: REFUSAL_TEXT.to_string(),
            max_distance,
            min_term_coverage,
            max_context_chunks: 5,
            retry: RetryPolicy::default(),
        }
    }
}

impl Default for AnswerPolicyConfig {
    fn default() -> Self {
        Self::for_model(&SemanticModelConfig::local(DEFAULT_EMBEDDING_DIM))
    }
}

/// Turns retrieval results into a cited answer, or a refusal.
pub struct AnswerPolicy {
    config: AnswerPolicyConfig,
}

impl AnswerPolicy {
    pub fn new(config: AnswerPolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnswerPolicyConfig {
        &self.config
    }

    pub fn answer(
        &self,
        question: &str,
        results: &[RetrievalResult],
        generator: &dyn Generator,
    ) -> Result<Answer, GenerationError> {
        let context = self.supporting_results(question, results);
        if context.is_empty() {
            info!(
                results = results.len(),
                max_distance = self.config.max_distance,
                min_term_coverage = self.config.min_term_coverage,
                "no result passed the relevance gates; refusing"
            );
            return Ok(self.refusal());
        }

        let prompt = self.build_prompt(question, &context);
        debug!(context_chunks = context.len(), prompt_chars = prompt.len(), "requesting generation");
        let reply = self
            .config
            .retry
            .run("generate", || generator.generate(&prompt))
            .map_err(|exhausted| GenerationError::Failed {
                attempts: exhausted.attempts,
                source: exhausted.error,
            })?;

        let text = reply.trim();
        if text.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        if self.is_refusal(text) {
            info!("generator found no support in the context; refusing");
            return Ok(self.refusal());
        }

        Ok(Answer {
            text: text.to_string(),
            cited_sources: cited_sources(&context),
            refused: false,
        })
    }

    /// Results allowed into the prompt, in rank order.
    pub fn supporting_results<'r>(
        &self,
        question: &str,
        results: &'r [RetrievalResult],
    ) -> Vec<&'r RetrievalResult> {
        let question_terms = content_terms(question)
            .into_iter()
            .collect::<BTreeSet<String>>();
        results
            .iter()
            .filter(|result| {
                self.config
                    .max_distance
                    .is_none_or(|ceiling| result.distance <= ceiling)
            })
            .filter(|result| {
                self.config.min_term_coverage.is_none_or(|floor| {
                    term_coverage(&question_terms, &result.chunk.text) >= floor
                })
            })
            .take(self.config.max_context_chunks.max(1))
            .collect()
    }

    pub fn build_prompt(&self, question: &str, context: &[&RetrievalResult]) -> String {
        let blocks = context
            .iter()
            .enumerate()
            .map(|(index, result)| {
                let chunk = &result.chunk;
                format!(
                    "[Source {} | {} | doc_id {} | page {}]\n{}",
                    index + 1,
                    chunk.title,
                    chunk.doc_id,
                    chunk.page,
                    chunk.text.trim()
                )
            })
            .collect::<Vec<String>>()
            .join("\n\n");

        format!(
            "Answer the question using only the context below.\n\
             Rules:\n\
             - Do not use any knowledge that is not stated in the context.\n\
             - If the context does not contain the answer, reply with exactly this sentence and nothing else: {refusal}\n\
             - Mention the document title and page number of the sources you used, for example (Handbook, page 3).\n\
             \n\
             Question:\n{question}\n\
             \n\
             Context:\n{context}",
            refusal = self.config.refusal_text,
            question = question.trim(),
            context = blocks,
        )
    }

    fn is_refusal(&self, reply: &str) -> bool {
        let wanted = comparable(&self.config.refusal_text);
        !wanted.is_empty() && comparable(reply).contains(&wanted)
    }

    fn refusal(&self) -> Answer {
        Answer {
            text: self.config.refusal_text.clone(),
            cited_sources: Vec::new(),
            refused: true,
        }
    }
}

/// Share of `question_terms` that occur in `text`; zero for a question with no content words.
fn term_coverage(question_terms: &BTreeSet<String>, text: &str) -> f64 {
    if question_terms.is_empty() {
        return 0.0;
    }
    let text_terms = content_terms(text).into_iter().collect::<BTreeSet<String>>();
    let found = question_terms
        .iter()
        .filter(|term| text_terms.contains(*term))
        .count();
    found as f64 / question_terms.len() as f64
}

fn comparable(text: &str) -> String {
    normalize_whitespace(text)
        .trim_end_matches(['.', '!'])
        .to_lowercase()
}

/// One entry per (doc_id, page), in the order the pages first appear.
fn cited_sources(context: &[&RetrievalResult]) -> Vec<SourceRef> {
    let mut seen = BTreeSet::<SourceRef>::new();
    let mut sources = Vec::<SourceRef>::new();
    for result in context {
        let source = SourceRef {
            doc_id: result.chunk.doc_id.clone(),
            page: result.chunk.page,
        };
        if seen.insert(source.clone()) {
            sources.push(source);
        }
    }
    sources
}
