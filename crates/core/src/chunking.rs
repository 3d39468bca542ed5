use crate::error::IngestError;
use crate::models::{Chunk, ChunkingOptions, Element, ElementCategory};
use sha2::{Digest, Sha256};

/// Separator between element texts inside a chunk and between chunk
/// texts inside a parent window.
const JOIN_SEPARATOR: &str = "\n\n";

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

/// Groups a filtered element sequence into bounded chunks.
///
/// Elements are appended to the open chunk until the next one would
/// push it past `max_chunk_size`; a size break carries `overlap`
/// trailing characters forward. A title element forces a break even
/// with budget left, unless the open chunk is still below
/// `min_chunk_size`. A single element larger than the whole budget is
/// kept intact as its own chunk. After assembly every chunk gets its
/// parent window: the chunk plus its immediate left/right siblings.
pub fn chunk_elements(
    document_id: &str,
    elements: &[Element],
    options: &ChunkingOptions,
) -> Result<Vec<Chunk>, IngestError> {
    options.validate()?;

    let mut builder = ChunkBuilder::new(options);
    for element in elements {
        builder.push(element);
    }
    let pieces = builder.finish();

    Ok(attach_parent_windows(document_id, pieces))
}

struct ChunkBuilder<'a> {
    options: &'a ChunkingOptions,
    pieces: Vec<ChunkPiece>,
    text: String,
    page_number: Option<u32>,
    section_title: Option<String>,
    has_elements: bool,
}

struct ChunkPiece {
    text: String,
    page_number: Option<u32>,
    section_title: Option<String>,
}

impl<'a> ChunkBuilder<'a> {
    fn new(options: &'a ChunkingOptions) -> Self {
        Self {
            options,
            pieces: Vec::new(),
            text: String::new(),
            page_number: None,
            section_title: None,
            has_elements: false,
        }
    }

    fn push(&mut self, element: &Element) {
        let element_len = char_len(&element.text);

        if element.category == ElementCategory::Title
            && self.has_elements
            && char_len(&self.text) >= self.options.min_chunk_size
        {
            // Section boundary: close the chunk without bleeding
            // overlap into the next section.
            self.flush(false);
        }

        if self.has_elements {
            let combined = char_len(&self.text) + JOIN_SEPARATOR.len() + element_len;
            if combined > self.options.max_chunk_size {
                self.flush(true);
            }
        }

        if !self.text.is_empty() {
            self.text.push_str(JOIN_SEPARATOR);
        }
        self.text.push_str(&element.text);

        if !self.has_elements {
            self.page_number = element.page_number;
            self.section_title = element.section_title.clone();
        }
        self.has_elements = true;
    }

    fn flush(&mut self, carry_overlap: bool) {
        if self.text.is_empty() {
            return;
        }

        let carried = if carry_overlap && self.options.overlap > 0 {
            tail_chars(&self.text, self.options.overlap)
        } else {
            String::new()
        };

        self.pieces.push(ChunkPiece {
            text: std::mem::take(&mut self.text),
            page_number: self.page_number,
            section_title: self.section_title.take(),
        });

        self.text = carried;
        self.page_number = None;
        self.has_elements = false;
    }

    fn finish(mut self) -> Vec<ChunkPiece> {
        if self.has_elements {
            self.flush(false);
        }
        self.pieces
    }
}

fn attach_parent_windows(document_id: &str, pieces: Vec<ChunkPiece>) -> Vec<Chunk> {
    let texts: Vec<&str> = pieces.iter().map(|piece| piece.text.as_str()).collect();
    let total = pieces.len();

    pieces
        .iter()
        .enumerate()
        .map(|(index, piece)| {
            let start = index.saturating_sub(1);
            let end = (index + 2).min(total);
            let parent_chunk_text = texts[start..end].join(JOIN_SEPARATOR);

            Chunk {
                chunk_id: make_chunk_id(document_id, index, &piece.text),
                document_id: document_id.to_string(),
                chunk_text: piece.text.clone(),
                parent_chunk_text,
                page_number: piece.page_number,
                section_title: piece.section_title.clone(),
            }
        })
        .collect()
}

fn make_chunk_id(document_id: &str, index: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update((index as u64).to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn tail_chars(text: &str, count: usize) -> String {
    let total = char_len(text);
    if total <= count {
        return text.to_string();
    }
    text.chars().skip(total - count).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn narrative(text: &str, page: u32) -> Element {
        Element {
            text: text.to_string(),
            category: ElementCategory::NarrativeText,
            page_number: Some(page),
            section_title: None,
        }
    }

    fn title(text: &str, page: u32) -> Element {
        Element {
            text: text.to_string(),
            category: ElementCategory::Title,
            page_number: Some(page),
            section_title: Some(text.to_string()),
        }
    }

    fn options(max: usize, overlap: usize, min: usize) -> ChunkingOptions {
        ChunkingOptions {
            max_chunk_size: max,
            overlap,
            min_chunk_size: min,
        }
    }

    #[test]
    fn empty_input_produces_zero_chunks() {
        let chunks = chunk_elements("doc", &[], &options(100, 10, 5)).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn chunks_respect_the_character_budget() {
        let elements: Vec<Element> = (0..6)
            .map(|i| narrative(&format!("sentence number {i} with some words"), 1))
            .collect();

        let max = 80;
        let chunks = chunk_elements("doc", &elements, &options(max, 0, 5)).unwrap();

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chunk_text.chars().count() <= max);
        }
    }

    #[test]
    fn oversized_atomic_element_is_kept_whole() {
        let giant = "x".repeat(300);
        let elements = vec![narrative("short lead-in text", 1), narrative(&giant, 1)];

        let chunks = chunk_elements("doc", &elements, &options(100, 0, 5)).unwrap();

        assert!(chunks.iter().any(|chunk| chunk.chunk_text == giant));
    }

    #[test]
    fn size_break_carries_overlap_forward() {
        let first = "a".repeat(90);
        let second = "b".repeat(40);
        let chunks =
            chunk_elements("doc", &[narrative(&first, 1), narrative(&second, 1)], &options(100, 20, 5))
                .unwrap();

        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].chunk_text.starts_with(&"a".repeat(20)));
        assert!(chunks[1].chunk_text.ends_with(&second));
    }

    #[test]
    fn title_boundary_forces_a_break() {
        let elements = vec![
            title("1 Introduction", 1),
            narrative("The introduction has enough text to pass the minimum.", 1),
            title("2 Details", 1),
            narrative("Details follow in a separate chunk.", 1),
        ];

        let chunks = chunk_elements("doc", &elements, &options(500, 0, 10)).unwrap();

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].chunk_text.contains("Introduction"));
        assert!(!chunks[0].chunk_text.contains("Details"));
        assert_eq!(chunks[1].section_title.as_deref(), Some("2 Details"));
    }

    #[test]
    fn tiny_open_chunk_absorbs_the_next_title() {
        let elements = vec![
            title("1 A", 1),
            title("2 B", 1),
            narrative("Body text that follows two stacked headings.", 1),
        ];

        let chunks = chunk_elements("doc", &elements, &options(500, 0, 50)).unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn first_element_supplies_chunk_metadata() {
        let elements = vec![
            title("3 Expenses", 2),
            narrative("Expenses are reimbursed monthly.", 2),
        ];

        let chunks = chunk_elements("doc", &elements, &options(500, 0, 5)).unwrap();
        assert_eq!(chunks[0].page_number, Some(2));
        assert_eq!(chunks[0].section_title.as_deref(), Some("3 Expenses"));
    }

    #[test]
    fn parent_windows_clip_at_document_bounds() {
        let elements: Vec<Element> = (0..4)
            .map(|i| narrative(&format!("chunk body {i} padded to force a split"), 1))
            .collect();

        let chunks = chunk_elements("doc", &elements, &options(40, 0, 5)).unwrap();
        assert_eq!(chunks.len(), 4);

        let text = |i: usize| chunks[i].chunk_text.clone();
        assert_eq!(
            chunks[0].parent_chunk_text,
            [text(0), text(1)].join(JOIN_SEPARATOR)
        );
        assert_eq!(
            chunks[1].parent_chunk_text,
            [text(0), text(1), text(2)].join(JOIN_SEPARATOR)
        );
        assert_eq!(
            chunks[3].parent_chunk_text,
            [text(2), text(3)].join(JOIN_SEPARATOR)
        );
    }

    #[test]
    fn single_chunk_window_is_itself() {
        let chunks =
            chunk_elements("doc", &[narrative("only one small piece", 1)], &options(100, 0, 5))
                .unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].parent_chunk_text, chunks[0].chunk_text);
    }

    #[test]
    fn chunk_ids_are_stable_across_runs() {
        let elements = vec![narrative("identical content", 1)];
        let first = chunk_elements("doc", &elements, &options(100, 0, 5)).unwrap();
        let second = chunk_elements("doc", &elements, &options(100, 0, 5)).unwrap();
        assert_eq!(first[0].chunk_id, second[0].chunk_id);
    }

    #[test]
    fn invalid_options_are_rejected() {
        let result = chunk_elements("doc", &[], &options(10, 10, 5));
        assert!(result.is_err());
    }
}
