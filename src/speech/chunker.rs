//! Paragraph-level text splitting for chunked synthesis.

use std::sync::LazyLock;

use regex::Regex;

static BLANK_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("valid blank-line pattern"));

/// A numbered step heading ("PASO 2", "Step 3") at the start of a line.
static STEP_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^[ \t]*(?:paso|step)\s+\d+").expect("valid step pattern"));

/// Split text into the chunks that are synthesized and played one by one.
///
/// Chunks break on blank lines and right before every step heading.
/// Surrounding whitespace is trimmed and empty chunks are dropped.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n");
    let mut chunks = Vec::new();

    for paragraph in BLANK_LINE.split(&normalized) {
        let mut start = 0;
        for marker in STEP_MARKER.find_iter(paragraph) {
            if marker.start() > start {
                push_trimmed(&mut chunks, &paragraph[start..marker.start()]);
                start = marker.start();
            }
        }
        push_trimmed(&mut chunks, &paragraph[start..]);
    }

    chunks
}

fn push_trimmed(chunks: &mut Vec<String>, piece: &str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        chunks.push(piece.to_string());
    }
}
