use crate::chunking::normalize_whitespace;
use crate::error::IngestError;
use crate::models::{Element, ElementCategory};
use lopdf::Document;
use regex::Regex;
use std::fs;
use std::path::Path;

/// File extensions the default loader accepts.
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["pdf", "txt", "md"];

/// Turns a raw document file into an ordered, filtered element sequence.
pub trait ElementLoader: Send + Sync {
    fn load_elements(&self, path: &Path) -> Result<Vec<Element>, IngestError>;
}

/// Default loader: per-page PDF text via lopdf, paragraph blocks for
/// plain text and markdown. Filters boilerplate (page footers,
/// dot-leader lines) before handing elements to the chunker.
pub struct DocumentLoader {
    heading: Regex,
    list_item: Regex,
    page_footer: Regex,
    dot_leader: Regex,
}

impl DocumentLoader {
    pub fn new() -> Result<Self, IngestError> {
        Ok(Self {
            heading: Regex::new(r"^\s*\d+(?:\.\d+)*(?:\([a-zA-Z]\))?\s+\S.*$")?,
            list_item: Regex::new(r"^\s*(?:[-*\u{2022}]|\d+[.)])\s+\S")?,
            page_footer: Regex::new(r"(?i)(?:^footer:|page\s+\d+\s+of\s+\d+)")?,
            dot_leader: Regex::new(r"\.{5,}|(?:\.\s){5,}")?,
        })
    }

    fn is_boilerplate(&self, text: &str) -> bool {
        self.page_footer.is_match(text) || self.dot_leader.is_match(text)
    }

    fn classify(&self, block: &str) -> ElementCategory {
        let first_line = block.lines().next().unwrap_or_default().trim();

        if self.list_item.is_match(first_line) {
            return ElementCategory::ListItem;
        }

        let line_count = block.lines().count();
        if line_count == 1 && first_line.chars().count() < 120 {
            if self.heading.is_match(first_line) || is_title_case_heading(first_line) {
                return ElementCategory::Title;
            }
        }

        if line_count >= 2 && looks_tabular(block) {
            return ElementCategory::Table;
        }

        if !block.chars().any(|c| c.is_alphanumeric()) {
            return ElementCategory::Other;
        }

        if first_line.chars().count() < 4 {
            return ElementCategory::UncategorizedText;
        }

        ElementCategory::NarrativeText
    }

    fn elements_from_blocks<'a, I>(
        &self,
        blocks: I,
        page_number: Option<u32>,
        section: &mut Option<String>,
    ) -> Vec<Element>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut elements = Vec::new();

        for block in blocks {
            let cleaned = normalize_whitespace(block);
            if cleaned.is_empty() || self.is_boilerplate(&cleaned) {
                continue;
            }

            let category = self.classify(block);
            if category == ElementCategory::Other {
                continue;
            }

            if category == ElementCategory::Title {
                *section = Some(cleaned.clone());
            }

            elements.push(Element {
                text: cleaned,
                category,
                page_number,
                section_title: section.clone(),
            });
        }

        elements
    }

    fn load_pdf(&self, path: &Path) -> Result<Vec<Element>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::Parse(error.to_string()))?;

        let mut elements = Vec::new();
        let mut section: Option<String> = None;
        let mut readable_pages = 0usize;

        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::Parse(error.to_string()))?;

            if text.trim().is_empty() {
                continue;
            }
            readable_pages += 1;

            let blocks = split_blocks(&text);
            elements.extend(self.elements_from_blocks(
                blocks.iter().map(String::as_str),
                Some(page_no),
                &mut section,
            ));
        }

        if readable_pages == 0 {
            return Err(IngestError::Parse(format!(
                "document had no readable page text: {}",
                path.display()
            )));
        }

        Ok(elements)
    }

    fn load_text(&self, path: &Path, markdown: bool) -> Result<Vec<Element>, IngestError> {
        let content = fs::read_to_string(path)?;
        let mut section: Option<String> = None;
        let mut elements = Vec::new();

        for block in split_blocks(&content) {
            if markdown {
                if let Some(heading) = block.trim().strip_prefix('#') {
                    let title = normalize_whitespace(heading.trim_start_matches('#'));
                    if !title.is_empty() {
                        section = Some(title.clone());
                        elements.push(Element {
                            text: title,
                            category: ElementCategory::Title,
                            page_number: None,
                            section_title: section.clone(),
                        });
                    }
                    continue;
                }
            }

            elements.extend(self.elements_from_blocks([block.as_str()], None, &mut section));
        }

        Ok(elements)
    }
}

impl ElementLoader for DocumentLoader {
    fn load_elements(&self, path: &Path) -> Result<Vec<Element>, IngestError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => self.load_pdf(path),
            "txt" => self.load_text(path, false),
            "md" => self.load_text(path, true),
            other => Err(IngestError::UnsupportedType(format!(
                "{} ({})",
                path.display(),
                if other.is_empty() { "no extension" } else { other }
            ))),
        }
    }
}

fn split_blocks(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(|block| block.trim().to_string())
        .filter(|block| !block.is_empty())
        .collect()
}

fn looks_tabular(block: &str) -> bool {
    let columns = |line: &str| line.contains('\t') || line.contains("   ");
    let lines = block.lines().filter(|line| !line.trim().is_empty());
    let (total, tabular) = lines.fold((0usize, 0usize), |(total, tabular), line| {
        (total + 1, tabular + usize::from(columns(line)))
    });
    total >= 2 && tabular * 2 > total
}

fn is_title_case_heading(line: &str) -> bool {
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.is_empty() || words.len() > 10 || line.ends_with('.') {
        return false;
    }
    words
        .iter()
        .all(|word| word.chars().next().is_some_and(|c| c.is_uppercase() || c.is_numeric()))
}
