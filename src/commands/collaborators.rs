use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::{EmbedderArgs, EmbedderBackend, GeneratorArgs, OpenAiArgs, RelevanceArgs};
use crate::commands::query::grounding::{AnswerPolicy, AnswerPolicyConfig};
use crate::generation::{Generator, OpenAiGenerator};
use crate::semantic::{
    DEFAULT_EMBEDDING_DIM, Embedder, LocalHashEmbedder, OpenAiEmbedder, SemanticModelConfig,
};

const OPENAI_EMBEDDING_DIM: usize = 1536;

pub fn build_embedder(args: &EmbedderArgs, openai: &OpenAiArgs) -> Result<Arc<dyn Embedder>> {
    match args.backend {
        EmbedderBackend::Local => Ok(Arc::new(LocalHashEmbedder::new(
            args.embedding_dim.unwrap_or(DEFAULT_EMBEDDING_DIM),
        ))),
        EmbedderBackend::Openai => {
            let embedder = OpenAiEmbedder::new(
                require_api_key(openai)?,
                &openai.openai_base,
                &args.embed_model,
                args.embedding_dim.unwrap_or(OPENAI_EMBEDDING_DIM),
                openai.timeout(),
            )
            .context("failed to configure OpenAI embedder")?;
            Ok(Arc::new(embedder))
        }
    }
}

pub fn build_generator(args: &GeneratorArgs, openai: &OpenAiArgs) -> Result<Arc<dyn Generator>> {
    let generator = OpenAiGenerator::new(
        require_api_key(openai)?,
        &openai.openai_base,
        &args.chat_model,
        openai.timeout(),
    )
    .context("failed to configure OpenAI generator")?;
    Ok(Arc::new(generator))
}

/// Relevance gates default per embedding backend; flags override them one by one.
pub fn build_answer_policy(args: &RelevanceArgs, model: &SemanticModelConfig) -> AnswerPolicy {
    let mut config = AnswerPolicyConfig::for_model(model);
    if let Some(threshold) = args.max_distance {
        config.max_distance = threshold.value();
    }
    if let Some(threshold) = args.min_term_coverage {
        config.min_term_coverage = threshold.value();
    }
    info!(
        backend = %model.backend,
        max_distance = config.max_distance,
        min_term_coverage = config.min_term_coverage,
        "answer policy gates"
    );
    AnswerPolicy::new(config)
}

fn require_api_key(openai: &OpenAiArgs) -> Result<&str> {
    openai
        .openai_api_key
        .as_deref()
        .filter(|key| !key.trim().is_empty())
        .context("OPENAI_API_KEY is not set")
}
