//! PDF text extraction
//!
//! Per-page extraction via lopdf: the content stream of each page is
//! scanned for text-showing operators between BT/ET markers. Pages that
//! fail to parse are skipped rather than failing the document.

use convoforge_common::errors::{AppError, Result};
use tracing::{debug, warn};

/// Extract text per page from in-memory PDF bytes.
pub fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| AppError::ExtractionFailed {
        message: format!("Failed to load PDF: {}", e),
    })?;

    let pages = doc.get_pages();
    debug!(page_count = pages.len(), "Extracting text from PDF");

    let mut out = Vec::with_capacity(pages.len());
    for (page_num, page_id) in pages.iter() {
        match doc.get_page_content(*page_id) {
            Ok(content) => {
                let text = extract_text_from_content(&content);
                let cleaned = clean_text(&text);
                if !cleaned.is_empty() {
                    out.push(cleaned);
                }
            }
            Err(e) => {
                warn!(page = page_num, error = %e, "Failed to read page content, skipping");
            }
        }
    }

    if out.is_empty() {
        return Err(AppError::ExtractionFailed {
            message: "No text content extracted from PDF".to_string(),
        });
    }

    Ok(out)
}

/// Extract text from a PDF content stream
fn extract_text_from_content(content: &[u8]) -> String {
    let content_str = String::from_utf8_lossy(content);
    let mut text = String::new();
    let mut in_text_block = false;
    let mut current_text = String::new();

    for line in content_str.lines() {
        let trimmed = line.trim();

        if trimmed == "BT" {
            in_text_block = true;
            continue;
        }

        if trimmed == "ET" {
            in_text_block = false;
            if !current_text.is_empty() {
                text.push_str(&current_text);
                text.push(' ');
                current_text.clear();
            }
            continue;
        }

        if in_text_block {
            if let Some(text_content) = extract_text_from_operator(trimmed) {
                current_text.push_str(&text_content);
            }
        }
    }

    text
}

/// Extract text from a PDF text operator (`(text) Tj` and `[(..)..] TJ`)
fn extract_text_from_operator(line: &str) -> Option<String> {
    if line.ends_with("Tj") || line.ends_with('\'') || line.ends_with('"') {
        if let Some(start) = line.find('(') {
            if let Some(end) = line.rfind(')') {
                let text = &line[start + 1..end];
                return Some(decode_pdf_string(text));
            }
        }
    }

    if line.ends_with("TJ") {
        let mut result = String::new();
        let mut in_paren = false;
        let mut current = String::new();

        for ch in line.chars() {
            match ch {
                '(' => {
                    in_paren = true;
                }
                ')' => {
                    in_paren = false;
                    result.push_str(&decode_pdf_string(&current));
                    current.clear();
                }
                _ if in_paren => {
                    current.push(ch);
                }
                _ => {}
            }
        }

        if !result.is_empty() {
            return Some(result);
        }
    }

    None
}

/// Decode PDF string escapes
fn decode_pdf_string(s: &str) -> String {
    let mut result = String::new();
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some('\\') => result.push('\\'),
                Some('(') => result.push('('),
                Some(')') => result.push(')'),
                Some(c) => result.push(c),
                None => {}
            }
        } else {
            result.push(ch);
        }
    }

    result
}

/// Collapse whitespace and strip common PDF artifacts
fn clean_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{FEFF}', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text() {
        let input = "Hello   World\n\nTest";
        assert_eq!(clean_text(input), "Hello World Test");
    }

    #[test]
    fn test_decode_pdf_string() {
        assert_eq!(decode_pdf_string("Hello\\nWorld"), "Hello\nWorld");
        assert_eq!(decode_pdf_string("Test\\(paren\\)"), "Test(paren)");
    }

    #[test]
    fn test_extract_tj_operator() {
        assert_eq!(
            extract_text_from_operator("(Hello World) Tj"),
            Some("Hello World".to_string())
        );
        assert_eq!(
            extract_text_from_operator("[(Hel) -20 (lo)] TJ"),
            Some("Hello".to_string())
        );
        assert_eq!(extract_text_from_operator("1 0 0 1 50 700 Tm"), None);
    }

    #[test]
    fn test_content_stream_extraction() {
        let stream = b"BT\n(First line) Tj\nET\nBT\n(Second) Tj\nET\n";
        let text = extract_text_from_content(stream);
        assert!(text.contains("First line"));
        assert!(text.contains("Second"));
    }

    #[test]
    fn test_garbage_bytes_fail() {
        assert!(extract_pdf_pages(b"not a pdf at all").is_err());
    }
}
