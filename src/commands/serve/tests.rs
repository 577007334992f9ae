use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use super::run::{AppState, AskRequest, ask_handler, health, status_for};
use crate::commands::index::build::{IndexConfig, build_index};
use crate::commands::index::noise::{NoiseFilter, NoiseFilterConfig};
use crate::commands::query::grounding::{AnswerPolicy, AnswerPolicyConfig, REFUSAL_TEXT};
use crate::error::{AskError, CollaboratorError, GenerationError, RetrievalError};
use crate::generation::Generator;
use crate::semantic::LocalHashEmbedder;
use crate::store::{MemoryVectorStore, VectorStore};
use crate::test_support::{
    CAMPUS_PARKING, FixedGenerator, HANDBOOK_OBJECTIVE, HANDBOOK_STUDY_PLAN, chunk, instant_retry,
};

fn indexed_store(embedder: &LocalHashEmbedder) -> anyhow::Result<Box<dyn VectorStore>> {
    let chunks = vec![
        chunk("handbook", 3, 0, HANDBOOK_OBJECTIVE),
        chunk("handbook", 4, 0, HANDBOOK_STUDY_PLAN),
        chunk("campus-guide", 2, 0, CAMPUS_PARKING),
    ];
    let filter = NoiseFilter::new(NoiseFilterConfig::default())?;
    let mut store = MemoryVectorStore::default();
    build_index(&chunks, embedder, &filter, &mut store, &IndexConfig::default())?;
    Ok(Box::new(store))
}

fn state_with(generator: Arc<dyn Generator>) -> AppState {
    AppState {
        embedder: Arc::new(LocalHashEmbedder::default()),
        generator,
        policy: Arc::new(AnswerPolicy::new(AnswerPolicyConfig {
            retry: instant_retry(),
            ..AnswerPolicyConfig::default()
        })),
        open_store: Arc::new(|| indexed_store(&LocalHashEmbedder::default())),
        default_top_k: 5,
    }
}

fn ask(question: &str, doc_id: Option<&str>) -> Json<AskRequest> {
    Json(AskRequest {
        question: question.to_string(),
        top_k: None,
        doc_id: doc_id.map(str::to_string),
    })
}

#[tokio::test]
async fn health_reports_ok() {
    let Json(body) = health().await;
    assert_eq!(body.status, "ok");
}

#[tokio::test]
async fn ask_returns_answer_with_sources() {
    let generator = Arc::new(FixedGenerator::replying(
        "The handbook is meant to support guidance staff (page 3).",
    ));
    let state = state_with(generator.clone());

    let Json(response) = ask_handler(
        State(state),
        ask("What is the objective of this handbook?", Some("handbook")),
    )
    .await
    .expect("answer");

    assert!(response.answer.contains("support"));
    assert_eq!(response.sources.len(), 1);
    assert_eq!(response.sources[0].doc_id, "handbook");
    assert_eq!(response.sources[0].page, 3);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn refusal_is_a_successful_response() {
    let generator = Arc::new(FixedGenerator::replying("It is sunny."));
    let state = state_with(generator.clone());

    let Json(response) = ask_handler(
        State(state),
        ask("What is the weather in Helsinki today?", None),
    )
    .await
    .expect("refusal is not an error");

    assert_eq!(response.answer, REFUSAL_TEXT);
    assert!(response.sources.is_empty());
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn invalid_input_is_a_bad_request() {
    let state = state_with(Arc::new(FixedGenerator::replying("unused")));

    let (status, _) = ask_handler(State(state.clone()), ask("   ", None))
        .await
        .unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, Json(body)) = ask_handler(State(state), ask("What is this?", Some("two words")))
        .await
        .unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.message.contains("two words"));
}

#[tokio::test]
async fn generation_failure_is_a_bad_gateway() {
    let generator = Arc::new(FixedGenerator::with_replies(vec![Err(
        CollaboratorError::Fatal("invalid model".to_string()),
    )]));
    let state = state_with(generator);

    let (status, Json(body)) = ask_handler(
        State(state),
        ask("What is the objective of this handbook?", None),
    )
    .await
    .unwrap_err();
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body.message.contains("invalid model"));
}

#[tokio::test]
async fn unavailable_store_is_service_unavailable() {
    let mut state = state_with(Arc::new(FixedGenerator::replying("unused")));
    state.open_store =
        Arc::new(|| -> anyhow::Result<Box<dyn VectorStore>> { anyhow::bail!("database is locked") });

    let (status, _) = ask_handler(
        State(state),
        ask("What is the objective of this handbook?", None),
    )
    .await
    .unwrap_err();
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[test]
fn errors_map_to_distinct_statuses() {
    let mismatch = AskError::Retrieval(RetrievalError::ModelMismatch {
        indexed: "a".to_string(),
        query: "b".to_string(),
    });
    assert_eq!(status_for(&mismatch), StatusCode::SERVICE_UNAVAILABLE);

    let embedding = AskError::Retrieval(RetrievalError::Embedding(CollaboratorError::Transient(
        "timeout".to_string(),
    )));
    assert_eq!(status_for(&embedding), StatusCode::BAD_GATEWAY);

    assert_eq!(
        status_for(&AskError::Generation(GenerationError::EmptyResponse)),
        StatusCode::BAD_GATEWAY
    );
    assert_eq!(
        status_for(&AskError::Retrieval(RetrievalError::InvalidTopK)),
        StatusCode::BAD_REQUEST
    );
}
