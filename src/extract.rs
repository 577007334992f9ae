use std::path::Path;
use std::process::Command;

use crate::error::IngestionError;
use crate::model::Page;

/// Runs `pdftotext` over the whole document and returns one Page per form-feed-delimited page.
pub fn extract_pages(pdf_path: &Path, doc_id: &str, title: &str) -> Result<Vec<Page>, IngestionError> {
    if !pdf_path.exists() {
        return Err(IngestionError::MissingSource(pdf_path.to_path_buf()));
    }

    let output = Command::new("pdftotext")
        .arg("-enc")
        .arg("UTF-8")
        .arg(pdf_path)
        .arg("-")
        .output()
        .map_err(|source| IngestionError::Io {
            path: pdf_path.to_path_buf(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(IngestionError::Extraction {
            path: pdf_path.to_path_buf(),
            reason: format!("pdftotext exited with {}: {}", output.status, stderr.trim()),
        });
    }

    let source = pdf_path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or_default()
        .to_string();
    let raw = String::from_utf8_lossy(&output.stdout);
    Ok(pages_from_text(&raw, doc_id, title, &source))
}

pub fn pages_from_text(raw: &str, doc_id: &str, title: &str, source: &str) -> Vec<Page> {
    let mut texts = raw
        .split('\u{000C}')
        .map(|page| page.replace('\u{0000}', "").trim().to_string())
        .collect::<Vec<String>>();

    while texts.last().is_some_and(|page| page.is_empty()) {
        texts.pop();
    }

    texts
        .into_iter()
        .enumerate()
        .map(|(index, text)| Page {
            doc_id: doc_id.to_string(),
            title: title.to_string(),
            page_number: (index + 1) as u32,
            source: source.to_string(),
            char_count: text.chars().count(),
            text,
        })
        .collect()
}

/// Lowercase ASCII slug of the file stem, e.g. `SAMK Guidance_2024.pdf` → `samk-guidance-2024`.
pub fn doc_id_from_path(pdf_path: &Path) -> String {
    let stem = pdf_path
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or("document");

    let mut slug = String::with_capacity(stem.len());
    for character in stem.chars() {
        if character.is_ascii_alphanumeric() {
            slug.push(character.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "document".to_string()
    } else {
        slug
    }
}

pub fn title_from_path(pdf_path: &Path) -> String {
    pdf_path
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or("document")
        .split(['_', '-'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<&str>>()
        .join(" ")
}
