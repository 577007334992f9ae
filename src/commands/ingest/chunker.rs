use anyhow::{Context, Result};
use regex::Regex;

use crate::error::ChunkingError;
use crate::model::{Chunk, Page};

pub const DEFAULT_MAX_CHUNK_CHARS: usize = 800;
pub const DEFAULT_WINDOW_CHARS: usize = 600;
pub const DEFAULT_OVERLAP_CHARS: usize = 150;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChunkMode {
    /// Groups blank-line separated paragraphs up to `max_chunk_chars`.
    Paragraph,
    /// Legacy sliding window over raw characters, snapped to word boundaries.
    Character,
}

impl ChunkMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Paragraph => "paragraph",
            Self::Character => "character",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "paragraph" => Some(Self::Paragraph),
            "character" | "char" | "legacy" => Some(Self::Character),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub mode: ChunkMode,
    pub max_chunk_chars: usize,
    pub window_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            mode: ChunkMode::Paragraph,
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            window_chars: DEFAULT_WINDOW_CHARS,
            overlap_chars: DEFAULT_OVERLAP_CHARS,
        }
    }
}

impl ChunkerConfig {
    pub fn from_env() -> Result<Self, ChunkingError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ChunkingError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("DOCQA_CHUNK_MODE") {
            config.mode = ChunkMode::parse(&raw).ok_or_else(|| {
                ChunkingError::InvalidConfig(format!("unknown DOCQA_CHUNK_MODE '{raw}'"))
            })?;
        }
        if let Some(value) = parse_usize(&lookup, "DOCQA_MAX_CHUNK_CHARS")? {
            config.max_chunk_chars = value;
        }
        if let Some(value) = parse_usize(&lookup, "DOCQA_WINDOW_CHARS")? {
            config.window_chars = value;
        }
        if let Some(value) = parse_usize(&lookup, "DOCQA_OVERLAP_CHARS")? {
            config.overlap_chars = value;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ChunkingError> {
        if self.max_chunk_chars == 0 {
            return Err(ChunkingError::InvalidConfig(
                "max_chunk_chars must be positive".to_string(),
            ));
        }
        if self.window_chars == 0 || self.overlap_chars >= self.window_chars {
            return Err(ChunkingError::InvalidConfig(format!(
                "overlap ({}) must be smaller than a positive window ({})",
                self.overlap_chars, self.window_chars
            )));
        }
        Ok(())
    }
}

fn parse_usize<F>(lookup: &F, key: &str) -> Result<Option<usize>, ChunkingError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<usize>()
                .map_err(|_| ChunkingError::InvalidConfig(format!("{key} must be an integer, got '{raw}'")))
        })
        .transpose()
}

pub struct Chunker {
    config: ChunkerConfig,
    paragraph_break: Regex,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            paragraph_break: Regex::new(r"\n(?:[ \t\r]*\n)+")
                .context("failed to compile paragraph break regex")?,
        })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunks every page of a document, skipping (and reporting) unusable pages.
    pub fn chunk_pages(&self, pages: &[Page]) -> (Vec<Chunk>, Vec<ChunkingError>) {
        let mut chunks = Vec::<Chunk>::new();
        let mut skipped = Vec::<ChunkingError>::new();
        for page in pages {
            match self.chunk_page(page) {
                Ok(page_chunks) => chunks.extend(page_chunks),
                Err(err) => skipped.push(err),
            }
        }
        (chunks, skipped)
    }

    pub fn chunk_page(&self, page: &Page) -> Result<Vec<Chunk>, ChunkingError> {
        if page.doc_id.trim().is_empty() {
            return Err(invalid_page(page, "doc_id is empty"));
        }
        if page.page_number == 0 {
            return Err(invalid_page(page, "page_number must be 1-based"));
        }
        if page.text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let spans = match self.config.mode {
            ChunkMode::Paragraph => self.paragraph_spans(&page.text),
            ChunkMode::Character => window_spans(
                &page.text,
                self.config.window_chars,
                self.config.overlap_chars,
            ),
        };

        let bound = match self.config.mode {
            ChunkMode::Paragraph => self.config.max_chunk_chars,
            ChunkMode::Character => self.config.window_chars,
        };
        let chars = page.text.chars().collect::<Vec<char>>();
        Ok(spans
            .into_iter()
            .map(|(char_start, char_end)| {
                let text = chars[char_start..char_end].iter().collect::<String>();
                let char_count = char_end - char_start;
                Chunk {
                    chunk_id: Chunk::chunk_id_for(&page.doc_id, page.page_number, char_start),
                    doc_id: page.doc_id.clone(),
                    title: page.title.clone(),
                    page_number: page.page_number,
                    char_start,
                    char_end,
                    text,
                    char_count,
                    oversized: char_count > bound,
                }
            })
            .collect())
    }

    /// Char spans of paragraph groups; each group stays within the bound unless
    /// it is a single oversized paragraph.
    fn paragraph_spans(&self, text: &str) -> Vec<(usize, usize)> {
        let offsets = CharOffsets::new(text);
        let max_chars = self.config.max_chunk_chars;

        let mut spans = Vec::<(usize, usize)>::new();
        let mut buffer: Option<(usize, usize)> = None;
        for (para_start, para_end) in self.paragraphs(text) {
            let para_start = offsets.char_at(para_start);
            let para_end = offsets.char_at(para_end);
            buffer = match buffer {
                None => Some((para_start, para_end)),
                Some((buf_start, buf_end)) => {
                    if para_end - buf_start > max_chars {
                        spans.push((buf_start, buf_end));
                        Some((para_start, para_end))
                    } else {
                        Some((buf_start, para_end))
                    }
                }
            };
        }
        if let Some(span) = buffer {
            spans.push(span);
        }
        spans
    }

    /// Byte ranges of non-blank paragraphs, trimmed of surrounding whitespace.
    fn paragraphs(&self, text: &str) -> Vec<(usize, usize)> {
        let mut out = Vec::<(usize, usize)>::new();
        let mut cursor = 0usize;
        let breaks = self
            .paragraph_break
            .find_iter(text)
            .map(|found| (found.start(), found.end()))
            .chain(std::iter::once((text.len(), text.len())));
        for (break_start, break_end) in breaks {
            let piece = &text[cursor..break_start];
            let leading = piece.len() - piece.trim_start().len();
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                let start = cursor + leading;
                out.push((start, start + trimmed.len()));
            }
            cursor = break_end;
        }
        out
    }
}

fn invalid_page(page: &Page, reason: &str) -> ChunkingError {
    ChunkingError::InvalidPage {
        doc_id: page.doc_id.clone(),
        page_number: page.page_number,
        reason: reason.to_string(),
    }
}

struct CharOffsets {
    byte_starts: Vec<usize>,
}

impl CharOffsets {
    fn new(text: &str) -> Self {
        Self {
            byte_starts: text.char_indices().map(|(index, _)| index).collect(),
        }
    }

    fn char_at(&self, byte_offset: usize) -> usize {
        self.byte_starts.partition_point(|start| *start < byte_offset)
    }
}

fn is_word_char(character: char) -> bool {
    character.is_alphanumeric()
}

/// Sliding windows of `window` chars advancing by `window - overlap`, with both
/// ends moved off partial words and trimmed of whitespace.
fn window_spans(text: &str, window: usize, overlap: usize) -> Vec<(usize, usize)> {
    let chars = text.chars().collect::<Vec<char>>();
    let total = chars.len();
    let step = window.saturating_sub(overlap).max(1);

    let mut spans = Vec::<(usize, usize)>::new();
    let mut window_start = 0usize;
    while window_start < total {
        let window_end = (window_start + window).min(total);

        let mut start = window_start;
        if start > 0 && is_word_char(chars[start - 1]) && is_word_char(chars[start]) {
            while start < window_end && is_word_char(chars[start]) {
                start += 1;
            }
        }
        while start < window_end && chars[start].is_whitespace() {
            start += 1;
        }
        if start >= window_end {
            if window_end >= total {
                break;
            }
            window_start += step;
            continue;
        }

        let mut end = window_end;
        if end < total && is_word_char(chars[end - 1]) && is_word_char(chars[end]) {
            let mut cut = end;
            while cut > start && is_word_char(chars[cut - 1]) {
                cut -= 1;
            }
            if cut > start {
                end = cut;
            } else {
                while end < total && is_word_char(chars[end]) {
                    end += 1;
                }
            }
        }
        while end > start && chars[end - 1].is_whitespace() {
            end -= 1;
        }

        let advances = spans.last().is_none_or(|(previous, _)| start > *previous);
        if start < end && advances {
            spans.push((start, end));
        }

        if window_end >= total {
            break;
        }
        window_start += step;
    }
    spans
}
