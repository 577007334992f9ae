use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::cli::QueryArgs;
use crate::commands::collaborators::{build_answer_policy, build_embedder, build_generator};
use crate::model::Query;
use crate::store::{MemoryVectorStore, SqliteVectorStore, VectorStore};

use super::output::{write_answer_json, write_answer_text, write_retrieval_json, write_retrieval_text};
use super::pipeline::answer_question;
use super::retrieval::Retriever;

pub fn run(args: QueryArgs) -> Result<()> {
    let question = if args.question.is_empty() {
        prompt_question()?
    } else {
        args.question.join(" ").trim().to_string()
    };
    if question.is_empty() {
        bail!("no question provided");
    }

    let query = Query {
        question,
        doc_id: args.doc_id.clone(),
        top_k: args.top_k,
    };
    let embedder = build_embedder(&args.embedder, &args.openai)?;
    let store = open_index(&args.db_path)?;

    if args.retrieve_only {
        let results = Retriever::new(store.as_ref(), embedder.as_ref()).query(&query)?;
        info!(results = results.len(), "retrieval only; generator not called");
        return if args.json {
            write_retrieval_json(&query.question, query.doc_id.as_deref(), &results)
        } else {
            write_retrieval_text(&query.question, &results)
        };
    }

    let generator = build_generator(&args.generator, &args.openai)?;
    let policy = build_answer_policy(&args.relevance, embedder.model());
    let answer = answer_question(
        store.as_ref(),
        embedder.as_ref(),
        generator.as_ref(),
        &policy,
        &query,
    )?;

    if args.json {
        write_answer_json(&answer)
    } else {
        write_answer_text(&answer)
    }
}

/// Read-only handle on the index; a missing file reads as an empty index.
pub(crate) fn open_index(db_path: &Path) -> Result<Box<dyn VectorStore>> {
    if !db_path.exists() {
        warn!(path = %db_path.display(), "vector store missing; treating index as empty");
        return Ok(Box::new(MemoryVectorStore::default()));
    }
    let store = SqliteVectorStore::open_read_only(db_path)
        .with_context(|| format!("failed to open vector store {}", db_path.display()))?;
    Ok(Box::new(store))
}

fn prompt_question() -> Result<String> {
    let mut stderr = io::stderr();
    write!(stderr, "Question: ")?;
    stderr.flush()?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read question from stdin")?;
    Ok(line.trim().to_string())
}
