//! Structural document chunker
//!
//! Recursive splitting for text and markdown attachments: top-level
//! headings first, then paragraphs and sentences within each section
//! until every chunk fits the token budget. Each chunk keeps its parent
//! heading as context so a section fragment still embeds meaningfully.

use text_splitter::{ChunkConfig, TextSplitter};
use tracing::debug;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Chunking limits
#[derive(Debug, Clone)]
pub struct ChunkParams {
    /// Token budget per chunk
    pub max_tokens: usize,
    /// Chunks below this are dropped (unless they are the whole document)
    pub min_tokens: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            max_tokens: 480,
            min_tokens: 32,
        }
    }
}

/// A document chunk with heading context attached.
#[derive(Debug, Clone, PartialEq)]
pub struct DocChunk {
    pub index: i32,
    pub text: String,
    pub heading: Option<String>,
    pub token_count: i32,
}

pub fn estimate_tokens(text: &str) -> usize {
    text.len() / CHARS_PER_TOKEN
}

/// One heading-delimited section of the document.
struct Section {
    heading: Option<String>,
    body: String,
}

/// Split on top-level markdown headings (`# `). Content before the first
/// heading forms a headingless section.
fn split_sections(text: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut heading: Option<String> = None;
    let mut body = String::new();

    for line in text.lines() {
        if let Some(title) = line.strip_prefix("# ") {
            if !body.trim().is_empty() {
                sections.push(Section {
                    heading: heading.clone(),
                    body: std::mem::take(&mut body),
                });
            } else {
                body.clear();
            }
            heading = Some(title.trim().to_string());
        } else {
            body.push_str(line);
            body.push('\n');
        }
    }

    if !body.trim().is_empty() {
        sections.push(Section { heading, body });
    }

    sections
}

/// Chunk a document. Deterministic: same text and params, same chunks.
pub fn chunk_document(text: &str, params: &ChunkParams) -> Vec<DocChunk> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let max_chars = params.max_tokens * CHARS_PER_TOKEN;
    let min_chars = params.min_tokens * CHARS_PER_TOKEN;
    let splitter = TextSplitter::new(ChunkConfig::new(max_chars));

    let sections = split_sections(trimmed);
    let mut chunks: Vec<DocChunk> = Vec::new();

    for section in &sections {
        // Heading context eats into the budget of each chunk it prefixes.
        let context = section.heading.as_deref().unwrap_or("");
        let body_budget = if context.is_empty() {
            max_chars
        } else {
            max_chars.saturating_sub(context.len() + 2).max(min_chars.max(1))
        };
        let section_splitter;
        let active = if body_budget == max_chars {
            &splitter
        } else {
            section_splitter = TextSplitter::new(ChunkConfig::new(body_budget));
            &section_splitter
        };

        for piece in active.chunks(section.body.trim()) {
            if piece.len() < min_chars && !(chunks.is_empty() && sections.len() == 1) {
                continue;
            }
            let text = match &section.heading {
                Some(h) => format!("{}\n\n{}", h, piece),
                None => piece.to_string(),
            };
            let token_count = estimate_tokens(&text) as i32;
            chunks.push(DocChunk {
                index: chunks.len() as i32,
                text,
                heading: section.heading.clone(),
                token_count,
            });
        }
    }

    // A short document still yields one chunk.
    if chunks.is_empty() {
        chunks.push(DocChunk {
            index: 0,
            text: trimmed.to_string(),
            heading: None,
            token_count: estimate_tokens(trimmed) as i32,
        });
    }

    debug!(
        input_len = text.len(),
        chunk_count = chunks.len(),
        "Document chunked"
    );

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_document_single_chunk() {
        let chunks = chunk_document("Just a short note.", &ChunkParams::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "Just a short note.");
    }

    #[test]
    fn test_empty_document() {
        assert!(chunk_document("", &ChunkParams::default()).is_empty());
        assert!(chunk_document("   \n  ", &ChunkParams::default()).is_empty());
    }

    #[test]
    fn test_headings_become_context() {
        let doc = "# Setup\n\nInstall the package and configure the endpoint before first use. \
                   This paragraph carries enough content to clear the minimum chunk size for the test."
            .to_string()
            + "\n\n# Usage\n\nRun the binary with a config file. \
               The second section also needs enough words to survive minimum-size filtering here.";

        let params = ChunkParams {
            max_tokens: 480,
            min_tokens: 8,
        };
        let chunks = chunk_document(&doc, &params);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.starts_with("Setup\n\n"));
        assert_eq!(chunks[0].heading.as_deref(), Some("Setup"));
        assert!(chunks[1].text.starts_with("Usage\n\n"));
    }

    #[test]
    fn test_budget_respected() {
        let long = "A sentence of filler content. ".repeat(400);
        let params = ChunkParams {
            max_tokens: 100,
            min_tokens: 8,
        };
        let chunks = chunk_document(&long, &params);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(
                chunk.text.len() <= params.max_tokens * CHARS_PER_TOKEN + 64,
                "chunk exceeds budget: {} chars",
                chunk.text.len()
            );
        }
    }

    #[test]
    fn test_indices_contiguous() {
        let doc = "# One\n\n".to_string()
            + &"alpha beta gamma delta epsilon zeta eta theta. ".repeat(100);
        let params = ChunkParams {
            max_tokens: 60,
            min_tokens: 8,
        };
        let chunks = chunk_document(&doc, &params);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i as i32);
        }
    }

    #[test]
    fn test_deterministic() {
        let doc = "# Title\n\nBody paragraph one with some words in it for the splitter.\n\n\
                   Body paragraph two, also long enough to be its own sentence group.";
        let params = ChunkParams {
            max_tokens: 40,
            min_tokens: 4,
        };
        let a = chunk_document(doc, &params);
        let b = chunk_document(doc, &params);
        assert_eq!(a, b);
    }
}
