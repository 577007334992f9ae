use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "docqa",
    version,
    about = "Grounded question answering over a local PDF corpus"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract per-page text from PDFs into pages.json.
    Extract(ExtractArgs),
    /// Chunk pages.json into chunks.json.
    Ingest(IngestArgs),
    /// Filter, embed and store chunks in the vector index.
    Index(IndexArgs),
    /// Answer one question from the index.
    Query(QueryArgs),
    /// Serve the question endpoint over HTTP.
    Serve(ServeArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ExtractArgs {
    #[arg(long = "pdf", required = true)]
    pub pdfs: Vec<PathBuf>,

    /// Document title; only valid with a single --pdf.
    #[arg(long)]
    pub title: Option<String>,

    #[arg(long, default_value = "data/pages.json")]
    pub pages_path: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    #[arg(long, default_value = ".cache/docqa")]
    pub cache_root: PathBuf,

    #[arg(long, default_value = "data/pages.json")]
    pub pages_path: PathBuf,

    #[arg(long, default_value = "data/chunks.json")]
    pub chunks_path: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    #[arg(long, default_value = ".cache/docqa")]
    pub cache_root: PathBuf,

    #[arg(long, default_value = "data/chunks.json")]
    pub chunks_path: PathBuf,

    #[arg(long, default_value = "data/index.sqlite")]
    pub db_path: PathBuf,

    #[arg(long, default_value_t = 0.1)]
    pub max_error_rate: f64,

    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,

    #[command(flatten)]
    pub embedder: EmbedderArgs,

    #[command(flatten)]
    pub openai: OpenAiArgs,
}

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    /// Question text; prompted on stdin when omitted.
    pub question: Vec<String>,

    #[arg(long, default_value = "data/index.sqlite")]
    pub db_path: PathBuf,

    #[arg(long)]
    pub doc_id: Option<String>,

    #[arg(long, default_value_t = 5)]
    pub top_k: usize,

    #[command(flatten)]
    pub relevance: RelevanceArgs,

    /// Print ranked chunks without calling the generator.
    #[arg(long, default_value_t = false)]
    pub retrieve_only: bool,

    #[arg(long, default_value_t = false)]
    pub json: bool,

    #[command(flatten)]
    pub embedder: EmbedderArgs,

    #[command(flatten)]
    pub generator: GeneratorArgs,

    #[command(flatten)]
    pub openai: OpenAiArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, env = "DOCQA_BIND", default_value = "127.0.0.1:8000")]
    pub bind: String,

    #[arg(long, default_value = "data/index.sqlite")]
    pub db_path: PathBuf,

    #[arg(long, default_value_t = 5)]
    pub default_top_k: usize,

    #[command(flatten)]
    pub relevance: RelevanceArgs,

    #[command(flatten)]
    pub embedder: EmbedderArgs,

    #[command(flatten)]
    pub generator: GeneratorArgs,

    #[command(flatten)]
    pub openai: OpenAiArgs,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/docqa")]
    pub cache_root: PathBuf,

    #[arg(long, default_value = "data/pages.json")]
    pub pages_path: PathBuf,

    #[arg(long, default_value = "data/chunks.json")]
    pub chunks_path: PathBuf,

    #[arg(long, default_value = "data/index.sqlite")]
    pub db_path: PathBuf,
}

/// Overrides for the gates that keep weak matches out of the prompt. Unset
/// flags fall back to the defaults for the selected embedder.
#[derive(Args, Debug, Clone, Default)]
pub struct RelevanceArgs {
    /// Cosine distance ceiling, or `none`.
    #[arg(long)]
    pub max_distance: Option<Threshold>,

    /// Minimum share of question words a chunk must contain, or `none`.
    #[arg(long)]
    pub min_term_coverage: Option<Threshold>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Threshold {
    Disabled,
    At(f64),
}

impl Threshold {
    pub fn value(self) -> Option<f64> {
        match self {
            Self::Disabled => None,
            Self::At(value) => Some(value),
        }
    }
}

impl FromStr for Threshold {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("none") || raw.eq_ignore_ascii_case("off") {
            return Ok(Self::Disabled);
        }
        match raw.parse::<f64>() {
            Ok(value) if value.is_finite() && value >= 0.0 => Ok(Self::At(value)),
            _ => Err(format!("expected a non-negative number or `none`, got '{raw}'")),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum EmbedderBackend {
    Local,
    Openai,
}

#[derive(Args, Debug, Clone)]
pub struct EmbedderArgs {
    #[arg(
        long = "embedder",
        env = "DOCQA_EMBEDDER",
        value_enum,
        default_value_t = EmbedderBackend::Local
    )]
    pub backend: EmbedderBackend,

    /// Defaults to 384 for the local embedder and 1536 for OpenAI.
    #[arg(long)]
    pub embedding_dim: Option<usize>,

    #[arg(long, env = "DOCQA_EMBED_MODEL", default_value = "text-embedding-3-small")]
    pub embed_model: String,
}

#[derive(Args, Debug, Clone)]
pub struct GeneratorArgs {
    #[arg(long, env = "DOCQA_CHAT_MODEL", default_value = "gpt-4o-mini")]
    pub chat_model: String,
}

#[derive(Args, Debug, Clone)]
pub struct OpenAiArgs {
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "DOCQA_OPENAI_BASE", default_value = "https://api.openai.com/v1")]
    pub openai_base: String,

    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

impl OpenAiArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}
