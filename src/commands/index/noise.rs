use anyhow::{Context, Result};
use regex::Regex;

#[derive(Clone, Debug)]
pub struct NoiseFilterConfig {
    /// Chunks shorter than this (after trimming) carry too little signal.
    pub min_chars: usize,
    /// Reference headings are only looked for within this many leading chars.
    pub heading_window_chars: usize,
    pub max_urls_per_1k_chars: f64,
    pub reference_line_ratio: f64,
    pub min_reference_lines: usize,
}

impl Default for NoiseFilterConfig {
    fn default() -> Self {
        Self {
            min_chars: 150,
            heading_window_chars: 50,
            max_urls_per_1k_chars: 2.5,
            reference_line_ratio: 0.5,
            min_reference_lines: 2,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum NoiseReason {
    Trivial,
    Identifier,
    UrlDensity,
    ReferenceList,
}

impl NoiseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trivial => "trivial",
            Self::Identifier => "identifier",
            Self::UrlDensity => "url_density",
            Self::ReferenceList => "reference_list",
        }
    }
}

/// Pure keep/drop predicate applied to chunk text before embedding.
pub struct NoiseFilter {
    config: NoiseFilterConfig,
    identifier: Regex,
    url: Regex,
    reference_heading: Regex,
    bracketed_citation: Regex,
    author_initials: Regex,
    author_year: Regex,
}

impl NoiseFilter {
    pub fn new(config: NoiseFilterConfig) -> Result<Self> {
        Ok(Self {
            config,
            identifier: Regex::new(
                r"(?i)\b(?:isbn|issn)(?:-1[03])?\b|\bdoi\s*:|\b10\.\d{4,9}/\S+|\burn:[a-z0-9]",
            )
            .context("failed to compile identifier regex")?,
            url: Regex::new(r"(?i)\bhttps?://\S+|\bwww\.\S+")
                .context("failed to compile url regex")?,
            reference_heading: Regex::new(
                r"(?im)^[ \t]*(?:references|sources|bibliography|works cited|lähteet)\b",
            )
            .context("failed to compile reference heading regex")?,
            bracketed_citation: Regex::new(r"^\s*\[\d{1,3}\]")
                .context("failed to compile bracketed citation regex")?,
            author_initials: Regex::new(r"^\s*\p{Lu}[\p{L}'’-]+,\s+\p{Lu}\.")
                .context("failed to compile author initials regex")?,
            author_year: Regex::new(r"^\s*\p{Lu}[\p{L}'’-]+,.*\((?:19|20)\d{2}[a-z]?\)")
                .context("failed to compile author-year regex")?,
        })
    }

    /// First rule that fires, checked in a fixed order; `None` keeps the chunk.
    pub fn classify(&self, text: &str) -> Option<NoiseReason> {
        let trimmed = text.trim();
        let char_count = trimmed.chars().count();

        if char_count < self.config.min_chars {
            return Some(NoiseReason::Trivial);
        }
        if self.identifier.is_match(trimmed) {
            return Some(NoiseReason::Identifier);
        }
        if self.url_density(trimmed, char_count) > self.config.max_urls_per_1k_chars {
            return Some(NoiseReason::UrlDensity);
        }
        if self.looks_like_reference_list(trimmed) {
            return Some(NoiseReason::ReferenceList);
        }
        None
    }

    fn url_density(&self, text: &str, char_count: usize) -> f64 {
        if char_count == 0 {
            return 0.0;
        }
        let urls = self.url.find_iter(text).count();
        urls as f64 * 1000.0 / char_count as f64
    }

    fn looks_like_reference_list(&self, text: &str) -> bool {
        let head_end = text
            .char_indices()
            .nth(self.config.heading_window_chars)
            .map_or(text.len(), |(index, _)| index);
        if self.reference_heading.is_match(&text[..head_end]) {
            return true;
        }

        let lines = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<&str>>();
        if lines.is_empty() {
            return false;
        }

        let citation_lines = lines
            .iter()
            .filter(|line| self.is_citation_line(line))
            .count();
        citation_lines >= self.config.min_reference_lines
            && citation_lines as f64 / lines.len() as f64 >= self.config.reference_line_ratio
    }

    fn is_citation_line(&self, line: &str) -> bool {
        self.bracketed_citation.is_match(line)
            || self.author_initials.is_match(line)
            || self.author_year.is_match(line)
    }
}
