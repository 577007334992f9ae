use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cli::ServeArgs;
use crate::commands::collaborators::{build_answer_policy, build_embedder, build_generator};
use crate::commands::query::grounding::AnswerPolicy;
use crate::commands::query::open_index;
use crate::commands::query::pipeline::answer_question;
use crate::error::{AskError, RetrievalError};
use crate::generation::Generator;
use crate::model::{Answer, Query, SourceRef};
use crate::semantic::Embedder;
use crate::store::VectorStore;

pub(super) type StoreOpener = dyn Fn() -> Result<Box<dyn VectorStore>> + Send + Sync;

#[derive(Clone)]
pub(super) struct AppState {
    pub(super) embedder: Arc<dyn Embedder>,
    pub(super) generator: Arc<dyn Generator>,
    pub(super) policy: Arc<AnswerPolicy>,
    /// Each request opens its own read-only handle; the index is never mutated here.
    pub(super) open_store: Arc<StoreOpener>,
    pub(super) default_top_k: usize,
}

impl AppState {
    fn answer(&self, query: &Query) -> Result<Answer, ApiError> {
        let store = (self.open_store)().map_err(|err| {
            api_error(
                StatusCode::SERVICE_UNAVAILABLE,
                format!("vector store unavailable: {err:#}"),
            )
        })?;
        answer_question(
            store.as_ref(),
            self.embedder.as_ref(),
            self.generator.as_ref(),
            &self.policy,
            query,
        )
        .map_err(|err| ask_error(&err))
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct AskRequest {
    pub(super) question: String,
    #[serde(default)]
    pub(super) top_k: Option<usize>,
    #[serde(default)]
    pub(super) doc_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct AskResponse {
    pub(super) answer: String,
    pub(super) sources: Vec<SourceRef>,
}

#[derive(Debug, Serialize)]
pub(super) struct ErrorBody {
    pub(super) message: String,
}

pub(super) type ApiError = (StatusCode, Json<ErrorBody>);

pub fn run(args: ServeArgs) -> Result<()> {
    // reqwest's blocking clients must be built outside the async runtime.
    let embedder = build_embedder(&args.embedder, &args.openai)?;
    let generator = build_generator(&args.generator, &args.openai)?;
    let policy = build_answer_policy(&args.relevance, embedder.model());
    let db_path = args.db_path.clone();
    let state = AppState {
        embedder,
        generator,
        policy: Arc::new(policy),
        open_store: Arc::new(move || open_index(&db_path)),
        default_top_k: args.default_top_k.max(1),
    };

    let addr: SocketAddr = args
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", args.bind))?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let served = runtime.block_on(serve(addr, state.clone()));
    drop(runtime);
    // the last handle on the blocking clients is released here, outside the runtime
    drop(state);
    served
}

async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "docqa listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown")?;
    info!("server stopped");
    Ok(())
}

pub(super) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ask", post(ask_handler))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

#[derive(Debug, Serialize)]
pub(super) struct HealthBody {
    pub(super) status: &'static str,
}

pub(super) async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

pub(super) async fn ask_handler(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let query = Query {
        question: request.question,
        doc_id: request.doc_id,
        top_k: request.top_k.unwrap_or(state.default_top_k),
    };

    let answer = tokio::task::spawn_blocking(move || state.answer(&query))
        .await
        .map_err(|err| {
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("answer task failed: {err}"),
            )
        })?
        .inspect_err(|(status, body)| {
            warn!(status = status.as_u16(), message = %body.message, "ask failed");
        })?;

    Ok(Json(AskResponse {
        answer: answer.text,
        sources: answer.cited_sources,
    }))
}

pub(super) fn status_for(err: &AskError) -> StatusCode {
    match err {
        AskError::Retrieval(
            RetrievalError::EmptyQuestion
            | RetrievalError::InvalidTopK
            | RetrievalError::InvalidDocFilter(_),
        ) => StatusCode::BAD_REQUEST,
        AskError::Retrieval(RetrievalError::ModelMismatch { .. } | RetrievalError::Store(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        AskError::Retrieval(RetrievalError::Embedding(_)) | AskError::Generation(_) => {
            StatusCode::BAD_GATEWAY
        }
    }
}

fn ask_error(err: &AskError) -> ApiError {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    api_error(status_for(err), message)
}

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}
