use std::io::{self, Write};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::model::{Answer, RetrievalResult, SourceRef};
use crate::semantic::normalize_whitespace;

const SNIPPET_CHARS: usize = 400;

#[derive(Debug, Serialize)]
struct AnswerResponse<'a> {
    answer: &'a str,
    sources: &'a [SourceRef],
    refused: bool,
}

#[derive(Debug, Serialize)]
struct RetrievalResponse<'a> {
    question: &'a str,
    doc_id: Option<&'a str>,
    returned: usize,
    results: &'a [RetrievalResult],
}

pub(super) fn write_answer_json(answer: &Answer) -> Result<()> {
    let response = AnswerResponse {
        answer: &answer.text,
        sources: &answer.cited_sources,
        refused: answer.refused,
    };
    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, &response)
        .context("failed to serialize answer json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

pub(super) fn write_answer_text(answer: &Answer) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    writeln!(output, "\n=== Answer ===\n")?;
    writeln!(output, "{}", answer.text)?;
    if !answer.cited_sources.is_empty() {
        writeln!(output, "\nSources:")?;
        for source in &answer.cited_sources {
            writeln!(output, "- {} (page {})", source.doc_id, source.page)?;
        }
    }
    output.flush()?;
    Ok(())
}

pub(super) fn write_retrieval_json(
    question: &str,
    doc_id: Option<&str>,
    results: &[RetrievalResult],
) -> Result<()> {
    let response = RetrievalResponse {
        question,
        doc_id,
        returned: results.len(),
        results,
    };
    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, &response)
        .context("failed to serialize retrieval json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

pub(super) fn write_retrieval_text(question: &str, results: &[RetrievalResult]) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    writeln!(output, "Question: {question}")?;
    writeln!(output, "Results: {}", results.len())?;
    for result in results {
        let chunk = &result.chunk;
        writeln!(output, "\n{}", "-".repeat(60))?;
        writeln!(
            output,
            "Rank {} | distance={:.4} | chunk_id={} | page={} | doc_id={}",
            result.rank, result.distance, chunk.chunk_id, chunk.page, chunk.doc_id
        )?;
        writeln!(output, "{}", snippet(&chunk.text, SNIPPET_CHARS))?;
    }
    output.flush()?;
    Ok(())
}

/// Single-line preview, cut at `max_chars` characters.
pub(super) fn snippet(text: &str, max_chars: usize) -> String {
    let flat = normalize_whitespace(text);
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut cut = flat.chars().take(max_chars).collect::<String>();
    cut.push_str("...");
    cut
}
