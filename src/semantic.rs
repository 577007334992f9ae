use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CollaboratorError;

pub const DEFAULT_MODEL_ID: &str = "local-hash-v1";
pub const DEFAULT_EMBEDDING_DIM: usize = 384;
pub const LOCAL_BACKEND: &str = "local-hash";
pub const OPENAI_BACKEND: &str = "openai";

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "how", "in", "is", "it", "of",
    "on", "or", "that", "the", "this", "to", "was", "what", "when", "where", "which", "who", "why",
    "with",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticModelConfig {
    pub model_id: String,
    pub dimensions: usize,
    pub backend: String,
}

impl SemanticModelConfig {
    pub fn local(dimensions: usize) -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            dimensions: dimensions.max(8),
            backend: LOCAL_BACKEND.to_string(),
        }
    }
}

/// Text → fixed-dimension vector. Index and query paths must share one model.
pub trait Embedder: Send + Sync {
    fn model(&self) -> &SemanticModelConfig;

    fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError>;

    /// Embeds a batch; output order matches input order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

/// Deterministic feature-hashing embedder; needs no model download or network.
#[derive(Debug, Clone)]
pub struct LocalHashEmbedder {
    model: SemanticModelConfig,
}

impl LocalHashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            model: SemanticModelConfig::local(dimensions),
        }
    }
}

impl Default for LocalHashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIM)
    }
}

impl Embedder for LocalHashEmbedder {
    fn model(&self) -> &SemanticModelConfig {
        &self.model
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
        Ok(embed_text_local(text, self.model.dimensions))
    }
}

/// Blocking client for OpenAI-compatible `/embeddings` endpoints.
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: SemanticModelConfig,
}

impl OpenAiEmbedder {
    pub fn new(
        api_key: &str,
        base_url: &str,
        model_name: &str,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing OpenAI API key");
        anyhow::ensure!(!model_name.trim().is_empty(), "missing embedding model name");

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid OpenAI API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build embedding HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: SemanticModelConfig {
                model_id: model_name.trim().to_string(),
                dimensions,
                backend: OPENAI_BACKEND.to_string(),
            },
        })
    }
}

impl Embedder for OpenAiEmbedder {
    fn model(&self) -> &SemanticModelConfig {
        &self.model
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
        let mut vectors = self.embed_batch(&[text])?;
        vectors
            .pop()
            .ok_or_else(|| CollaboratorError::Fatal("empty embedding response".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model.model_id,
            input: texts,
            dimensions: Some(self.model.dimensions),
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(classify_http_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(classify_status(status, &body));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .map_err(|err| CollaboratorError::Fatal(format!("malformed embedding response: {err}")))?;
        parsed.data.sort_by_key(|entry| entry.index);
        if parsed.data.len() != texts.len() {
            return Err(CollaboratorError::Fatal(format!(
                "received {} embeddings for {} inputs",
                parsed.data.len(),
                texts.len()
            )));
        }

        Ok(parsed
            .data
            .into_iter()
            .map(|entry| {
                let mut vector = entry.embedding;
                normalize_vector(&mut vector);
                vector
            })
            .collect())
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

pub fn classify_http_error(err: reqwest::Error) -> CollaboratorError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        CollaboratorError::Transient(err.to_string())
    } else {
        CollaboratorError::Fatal(err.to_string())
    }
}

pub fn classify_status(status: StatusCode, body: &str) -> CollaboratorError {
    let message = format!("endpoint returned {status}: {}", body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        CollaboratorError::Transient(message)
    } else {
        CollaboratorError::Fatal(message)
    }
}

pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<&str>>().join(" ")
}

pub fn embed_text_local(payload: &str, dimensions: usize) -> Vec<f32> {
    let dims = dimensions.max(8);
    let mut vector = vec![0_f32; dims];
    let tokens = tokenize_payload(payload);

    if tokens.is_empty() {
        return vector;
    }

    for token in &tokens {
        let hash = stable_hash(token);
        let index = (hash % dims as u64) as usize;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        let weight = 1.0 + (((hash >> 48) & 0xFF) as f32 / 255.0);
        vector[index] += sign * weight;
    }

    normalize_vector(&mut vector);
    vector
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    left.iter()
        .zip(right.iter())
        .map(|(left_value, right_value)| f64::from(*left_value) * f64::from(*right_value))
        .sum::<f64>()
}

/// `1 - cos`, clamped so rounding never yields a negative distance.
pub fn cosine_distance(left: &[f32], right: &[f32]) -> f64 {
    (1.0 - cosine_similarity(left, right)).max(0.0)
}

pub fn encode_embedding_blob(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::<u8>::with_capacity(values.len() * 4);
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode_embedding_blob(blob: &[u8], expected_dim: usize) -> Option<Vec<f32>> {
    if expected_dim == 0 || blob.len() != expected_dim.saturating_mul(4) {
        return None;
    }

    let out = blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect::<Vec<f32>>();

    if out.len() == expected_dim {
        Some(out)
    } else {
        None
    }
}

// sha256 rather than DefaultHasher: persisted vectors must survive toolchain upgrades.
fn stable_hash(value: &str) -> u64 {
    let digest = Sha256::digest(value.as_bytes());
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Lowercased alphanumeric words with stopwords removed, in text order.
pub fn content_terms(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|value| {
            value
                .chars()
                .filter(|character| character.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|value| !value.is_empty())
        .filter(|value| !STOPWORDS.contains(&value.as_str()))
        .collect()
}

fn tokenize_payload(payload: &str) -> Vec<String> {
    let words = content_terms(payload);

    let mut features = Vec::<String>::with_capacity(words.len() * 2);
    for (index, word) in words.iter().enumerate() {
        features.push(format!("w:{word}"));
        if let Some(next) = words.get(index + 1) {
            features.push(format!("b:{word}_{next}"));
        }
    }
    features
}

fn normalize_vector(values: &mut [f32]) {
    let squared_norm = values
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>();

    if squared_norm <= 0.0 {
        return;
    }

    let norm = squared_norm.sqrt() as f32;
    if norm == 0.0 {
        return;
    }

    for value in values {
        *value /= norm;
    }
}
