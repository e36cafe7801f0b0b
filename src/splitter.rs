//! Phase 0 — text segmentation (§4.1). Paragraphs are delimited by runs of
//! ≥2 line breaks; within a paragraph, sentences are greedily packed into
//! chunks up to `max_chunk_chars` runes, falling back to a fixed rune-window
//! slicer when a single sentence alone exceeds the limit. All offsets are
//! byte offsets into the original input.
//!
//! Grounded on `processing/chunker.rs`'s `TextChunker` (break-point search,
//! `snap_to_char_boundary`), generalized to the two-level paragraph/chunk
//! structure §4.1 requires and to sentence-greedy packing rather than a flat
//! fixed-size slicer.

use once_cell_like::OnceRegex;
use regex::Regex;

use crate::error::ExtractError;

/// Runs of ≥2 consecutive line breaks (allowing trailing whitespace on blank
/// lines) delimit paragraphs.
fn paragraph_break_re() -> &'static Regex {
    static RE: OnceRegex = OnceRegex::new(r"\n[ \t]*\n[ \t\n]*");
    RE.get()
}

/// A sentence ends at `. `, `! `, or `? ` (followed by whitespace) or at
/// end-of-paragraph.
fn sentence_boundary_re() -> &'static Regex {
    static RE: OnceRegex = OnceRegex::new(r"[.!?](\s+|$)");
    RE.get()
}

mod once_cell_like {
    //! A tiny `OnceLock`-backed lazy-regex helper so `Regex::new` is compiled
    //! exactly once per process without pulling in `once_cell`/`lazy_static`
    //! (the teacher's `dirs`/`lazy_static` style is for config paths, not
    //! regex compilation — `std::sync::OnceLock` suffices here).
    use regex::Regex;
    use std::sync::OnceLock;

    pub struct OnceRegex {
        pattern: &'static str,
        cell: OnceLock<Regex>,
    }

    impl OnceRegex {
        pub const fn new(pattern: &'static str) -> Self {
            Self {
                pattern,
                cell: OnceLock::new(),
            }
        }

        pub fn get(&self) -> &Regex {
            self.cell
                .get_or_init(|| Regex::new(self.pattern).expect("static regex is valid"))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitChunk {
    pub chunk_id: String,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitParagraph {
    pub paragraph_id: String,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub chunks: Vec<SplitChunk>,
}

/// Snap a byte offset to the nearest valid UTF-8 char boundary at or before
/// `pos`. Ported from `processing/chunker.rs::snap_to_char_boundary`.
fn snap_to_char_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    let mut p = pos;
    while p > 0 && !text.is_char_boundary(p) {
        p -= 1;
    }
    p
}

/// Split `text` into paragraphs and, within each, into chunks bounded by
/// `max_chunk_chars` runes with `overlap_chars` of rune overlap on the
/// window-slicer fallback path.
///
/// Fails with [`ExtractError::InvalidInput`] when `text` is blank. Clamps
/// `overlap_chars` so it is always strictly less than `max_chunk_chars`.
pub fn split(
    text: &str,
    max_chunk_chars: usize,
    overlap_chars: usize,
) -> Result<Vec<SplitParagraph>, ExtractError> {
    if text.trim().is_empty() {
        return Err(ExtractError::InvalidInput("text must not be blank".into()));
    }

    let max_chunk_chars = max_chunk_chars.max(1);
    let overlap_chars = overlap_chars.min(max_chunk_chars.saturating_sub(1));

    let mut paragraphs = Vec::new();
    let mut para_index = 0usize;
    let mut cursor = 0usize;

    let breaks: Vec<(usize, usize)> = paragraph_break_re()
        .find_iter(text)
        .map(|m| (m.start(), m.end()))
        .collect();

    let mut boundaries: Vec<(usize, usize)> = Vec::with_capacity(breaks.len() + 1);
    for (start, end) in &breaks {
        boundaries.push((cursor, *start));
        cursor = *end;
    }
    boundaries.push((cursor, text.len()));

    for (start, end) in boundaries {
        let para_text = &text[start..end];
        if para_text.trim().is_empty() {
            continue;
        }
        // Trim surrounding whitespace from the paragraph span without
        // losing track of its byte offsets.
        let leading_ws = para_text.len() - para_text.trim_start().len();
        let trailing_ws = para_text.len() - para_text.trim_end().len();
        let p_start = start + leading_ws;
        let p_end = end - trailing_ws;
        let p_text = &text[p_start..p_end];

        let chunks = split_paragraph_into_chunks(p_text, p_start, max_chunk_chars, overlap_chars);

        paragraphs.push(SplitParagraph {
            paragraph_id: format!("p{para_index}"),
            start: p_start,
            end: p_end,
            text: p_text.to_string(),
            chunks,
        });
        para_index += 1;
    }

    Ok(paragraphs)
}

fn split_paragraph_into_chunks(
    paragraph: &str,
    base_offset: usize,
    max_chunk_chars: usize,
    overlap_chars: usize,
) -> Vec<SplitChunk> {
    if paragraph.chars().count() <= max_chunk_chars {
        return vec![SplitChunk {
            chunk_id: "c0".to_string(),
            start: base_offset,
            end: base_offset + paragraph.len(),
            text: paragraph.to_string(),
        }];
    }

    // Greedily pack sentences up to the rune budget.
    let sentence_ends: Vec<usize> = sentence_boundary_re()
        .find_iter(paragraph)
        .map(|m| m.end())
        .collect();

    let mut sentence_bounds = Vec::new();
    let mut prev = 0usize;
    for end in sentence_ends {
        if end > prev {
            sentence_bounds.push((prev, end));
            prev = end;
        }
    }
    if prev < paragraph.len() {
        sentence_bounds.push((prev, paragraph.len()));
    }

    let mut chunks = Vec::new();
    let mut chunk_index = 0usize;
    let mut group_start: Option<usize> = None;
    let mut group_end = 0usize;
    let mut group_runes = 0usize;

    let push_group = |chunks: &mut Vec<SplitChunk>, idx: &mut usize, start: usize, end: usize| {
        if start >= end {
            return;
        }
        chunks.push(SplitChunk {
            chunk_id: format!("c{idx}"),
            start: base_offset + start,
            end: base_offset + end,
            text: paragraph[start..end].to_string(),
        });
        *idx += 1;
    };

    for (s_start, s_end) in sentence_bounds {
        let sentence_runes = paragraph[s_start..s_end].chars().count();

        if sentence_runes > max_chunk_chars {
            // Flush whatever we've accumulated, then window-slice this
            // oversized sentence on its own.
            if let Some(start) = group_start.take() {
                push_group(&mut chunks, &mut chunk_index, start, group_end);
                group_runes = 0;
            }
            for window in window_slice(&paragraph[s_start..s_end], max_chunk_chars, overlap_chars) {
                chunks.push(SplitChunk {
                    chunk_id: format!("c{chunk_index}"),
                    start: base_offset + s_start + window.0,
                    end: base_offset + s_start + window.1,
                    text: paragraph[s_start + window.0..s_start + window.1].to_string(),
                });
                chunk_index += 1;
            }
            continue;
        }

        if group_runes + sentence_runes > max_chunk_chars && group_start.is_some() {
            let start = group_start.take().unwrap();
            push_group(&mut chunks, &mut chunk_index, start, group_end);
            group_runes = 0;
        }

        if group_start.is_none() {
            group_start = Some(s_start);
        }
        group_end = s_end;
        group_runes += sentence_runes;
    }

    if let Some(start) = group_start {
        push_group(&mut chunks, &mut chunk_index, start, group_end);
    }

    if chunks.is_empty() {
        // Degenerate case (e.g. no sentence punctuation at all): window-slice
        // the whole paragraph.
        for window in window_slice(paragraph, max_chunk_chars, overlap_chars) {
            chunks.push(SplitChunk {
                chunk_id: format!("c{chunk_index}"),
                start: base_offset + window.0,
                end: base_offset + window.1,
                text: paragraph[window.0..window.1].to_string(),
            });
            chunk_index += 1;
        }
    }

    chunks
}

/// Fixed rune-window slicer with `overlap` runes of overlap between
/// consecutive windows, returning byte-offset pairs relative to `text`.
fn window_slice(text: &str, max_chunk_chars: usize, overlap_chars: usize) -> Vec<(usize, usize)> {
    let char_indices: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let total_runes = char_indices.len();
    if total_runes == 0 {
        return Vec::new();
    }

    let mut windows = Vec::new();
    let mut rune_start = 0usize;

    loop {
        let rune_end = (rune_start + max_chunk_chars).min(total_runes);
        let byte_start = char_indices[rune_start];
        let byte_end = if rune_end == total_runes {
            text.len()
        } else {
            char_indices[rune_end]
        };
        windows.push((byte_start, byte_end));

        if rune_end >= total_runes {
            break;
        }

        let step = max_chunk_chars.saturating_sub(overlap_chars).max(1);
        rune_start += step;
        if rune_start >= total_runes {
            break;
        }
    }

    windows
}

/// UTF-8-safe substring extraction by byte offsets, snapping both ends to
/// char boundaries — the primitive every phase uses to slice evidence text
/// out of the original input (§3 invariant (b)).
pub fn safe_slice(text: &str, start: usize, end: usize) -> &str {
    let start = snap_to_char_boundary(text, start.min(text.len()));
    let end = snap_to_char_boundary(text, end.min(text.len()));
    if start >= end {
        ""
    } else {
        &text[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rejects_blank_input() {
        assert!(split("   \n\n  ", 800, 0).is_err());
    }

    #[test]
    fn single_short_paragraph_is_one_chunk() {
        let text = "A short paragraph.";
        let paragraphs = split(text, 800, 0).unwrap();
        assert_eq!(paragraphs.len(), 1);
        assert_eq!(paragraphs[0].chunks.len(), 1);
        assert_eq!(paragraphs[0].chunks[0].text, text);
    }

    #[test]
    fn two_paragraphs_separated_by_blank_line() {
        let text = "First paragraph.\n\nSecond paragraph.";
        let paragraphs = split(text, 800, 0).unwrap();
        assert_eq!(paragraphs.len(), 2);
        assert_eq!(paragraphs[0].text, "First paragraph.");
        assert_eq!(paragraphs[1].text, "Second paragraph.");
    }

    #[test]
    fn offsets_are_exact_into_the_original_text() {
        let text = "First paragraph.\n\nSecond paragraph.";
        let paragraphs = split(text, 800, 0).unwrap();
        for paragraph in &paragraphs {
            assert_eq!(&text[paragraph.start..paragraph.end], paragraph.text);
            for chunk in &paragraph.chunks {
                assert_eq!(&text[chunk.start..chunk.end], chunk.text);
            }
        }
    }

    /// §8 concrete scenario 1.
    #[test]
    fn split_sentence_boundary_scenario() {
        let text = "First sentence. Second sentence is longer. Third.";
        let paragraphs = split(text, 35, 5).unwrap();
        assert_eq!(paragraphs.len(), 1);
        assert!(paragraphs[0].chunks.len() >= 2);
        for chunk in &paragraphs[0].chunks {
            assert!(chunk.text.chars().count() <= 35);
        }
        assert_eq!(paragraphs[0].chunks.first().unwrap().start, 0);
        assert_eq!(paragraphs[0].chunks.last().unwrap().end, text.len());
    }

    #[test]
    fn oversized_single_sentence_falls_back_to_window_slicing() {
        let long_word_run = "a".repeat(50);
        let text = format!("{long_word_run} no punctuation at all here");
        let paragraphs = split(&text, 20, 5).unwrap();
        assert_eq!(paragraphs.len(), 1);
        assert!(paragraphs[0].chunks.len() > 1);
        for chunk in &paragraphs[0].chunks {
            assert!(chunk.text.chars().count() <= 20);
        }
    }

    #[test]
    fn utf8_multibyte_text_splits_without_panicking() {
        let text = "Héllo wörld. Thís is a tëst sentence with áccents. Ánd more.";
        let paragraphs = split(text, 20, 2).unwrap();
        for paragraph in &paragraphs {
            for chunk in &paragraph.chunks {
                assert_eq!(&text[chunk.start..chunk.end], chunk.text);
            }
        }
    }

    /// §8 round-trip: concatenating chunk text reproduces the paragraph.
    #[test]
    fn chunks_concatenate_back_to_the_paragraph() {
        let text = "First sentence. Second sentence is longer. Third one here also.";
        let paragraphs = split(text, 30, 0).unwrap();
        for paragraph in &paragraphs {
            let joined: String = paragraph.chunks.iter().map(|c| c.text.as_str()).collect();
            assert_eq!(joined, paragraph.text);
        }
    }

    #[test]
    fn safe_slice_snaps_to_char_boundaries() {
        let text = "héllo";
        // byte 2 is inside the 2-byte 'é' — must snap down.
        let slice = safe_slice(text, 0, 2);
        assert!(text.is_char_boundary(slice.len()));
    }

    proptest! {
        /// §8 round-trip: every paragraph/chunk offset this function hands
        /// back slices the original text into exactly its own `text` field,
        /// for arbitrary non-blank input and chunk/overlap sizes.
        #[test]
        fn paragraph_and_chunk_offsets_always_slice_back_to_their_text(
            text in "[a-zA-Z0-9 .!?\n]{1,300}",
            max_chunk_chars in 1usize..60,
            overlap_chars in 0usize..60,
        ) {
            prop_assume!(!text.trim().is_empty());
            let paragraphs = split(&text, max_chunk_chars, overlap_chars).unwrap();
            for paragraph in &paragraphs {
                prop_assert_eq!(&text[paragraph.start..paragraph.end], paragraph.text.as_str());
                for chunk in &paragraph.chunks {
                    prop_assert_eq!(&text[chunk.start..chunk.end], chunk.text.as_str());
                    prop_assert!(chunk.start <= chunk.end);
                    prop_assert!(chunk.end <= text.len());
                }
            }
        }
    }
}
