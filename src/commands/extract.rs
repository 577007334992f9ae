use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::cli::ExtractArgs;
use crate::extract::{doc_id_from_path, extract_pages, title_from_path};
use crate::model::Page;
use crate::util::write_json_pretty;

pub fn run(args: ExtractArgs) -> Result<()> {
    if args.title.is_some() && args.pdfs.len() > 1 {
        bail!("--title can only be used with a single --pdf");
    }

    let mut pages = Vec::<Page>::new();
    for pdf_path in &args.pdfs {
        let doc_id = doc_id_from_path(pdf_path);
        if pages.iter().any(|page| page.doc_id == doc_id) {
            bail!("two PDFs map to the same doc_id '{doc_id}'");
        }
        let title = args
            .title
            .clone()
            .unwrap_or_else(|| title_from_path(pdf_path));

        let document_pages = extract_pages(pdf_path, &doc_id, &title)
            .with_context(|| format!("failed to extract {}", pdf_path.display()))?;

        let empty_pages = document_pages
            .iter()
            .filter(|page| page.char_count == 0)
            .map(|page| page.page_number.to_string())
            .collect::<Vec<String>>();
        if !empty_pages.is_empty() {
            warn!(
                doc_id = %doc_id,
                pages = %empty_pages.join(","),
                "pages without extractable text"
            );
        }
        info!(
            doc_id = %doc_id,
            title = %title,
            pages = document_pages.len(),
            "extracted document"
        );
        pages.extend(document_pages);
    }

    write_json_pretty(&args.pages_path, &pages)?;
    info!(
        path = %args.pages_path.display(),
        documents = args.pdfs.len(),
        pages = pages.len(),
        "pages written"
    );
    Ok(())
}
