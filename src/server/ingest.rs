//! Plain-text document ingestion for the upload route.
//!
//! Uploaded TXT/MD/CSV bodies are split into paragraph-aligned chunks
//! bounded in size before they reach the retrieval store. Binary
//! formats (PDF, DOCX, …) are rejected at the boundary — their parsing
//! is an external collaborator.

use crate::retrieval::RetrievalChunk;

/// Upper bound on chunk length, in characters.
const MAX_CHUNK_CHARS: usize = 500;

/// File extensions accepted by the upload route.
pub const ALLOWED_EXTENSIONS: &[&str] = &["txt", "md", "csv"];

/// Whether `filename`'s extension is ingestible as plain text.
pub fn is_supported(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Split `text` into retrieval chunks attributed to `source`.
///
/// Paragraphs are packed greedily up to the chunk bound; a paragraph
/// longer than the bound is split hard at character boundaries.
pub fn chunk_text(text: &str, source: &str) -> Vec<RetrievalChunk> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        for piece in split_long(paragraph) {
            let sep = if current.is_empty() { 0 } else { 2 };
            if !current.is_empty()
                && current.chars().count() + sep + piece.chars().count() > MAX_CHUNK_CHARS
            {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(&piece);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
        .into_iter()
        .enumerate()
        .map(|(chunk_id, text)| RetrievalChunk {
            text,
            source: source.to_string(),
            chunk_id,
        })
        .collect()
}

/// Break an over-long paragraph into bound-sized pieces.
fn split_long(paragraph: &str) -> Vec<String> {
    if paragraph.chars().count() <= MAX_CHUNK_CHARS {
        return vec![paragraph.to_string()];
    }
    let chars: Vec<char> = paragraph.chars().collect();
    chars
        .chunks(MAX_CHUNK_CHARS)
        .map(|c| c.iter().collect())
        .collect()
}
