//! Document corpus: discovery, page extraction, section labels.
//!
//! PDFs are read page by page with lopdf; text and Markdown files are split
//! into pages on form feeds.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::RetrievalError;

/// Section label used when no heading can be inferred.
pub const NO_SECTION: &str = "N/A";

const MAX_LABEL_CHARS: usize = 250;
const MAX_TITLE_LINE_CHARS: usize = 80;
const PAGE_BREAK: char = '\x0c';
const DOCUMENT_EXTENSIONS: [&str; 4] = ["pdf", "txt", "md", "markdown"];

/// One page of extracted document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub page: usize,
    pub text: String,
    pub section_label: String,
}

/// Turns a document path into attributed page text.
pub trait CorpusProvider: Send + Sync {
    fn load(&self, document: &Path) -> Result<Vec<PageText>, RetrievalError>;
}

/// Plain-text provider. Form feeds separate pages.
#[derive(Debug, Clone, Default)]
pub struct TextCorpusProvider;

impl TextCorpusProvider {
    pub fn new() -> Self {
        Self
    }
}

impl CorpusProvider for TextCorpusProvider {
    fn load(&self, document: &Path) -> Result<Vec<PageText>, RetrievalError> {
        let content = std::fs::read_to_string(document).map_err(|e| RetrievalError::Io {
            path: document.to_path_buf(),
            source: e,
        })?;
        Ok(paginate(&content))
    }
}

/// PDF provider. Each PDF page becomes one [`PageText`].
///
/// Pages whose text cannot be decoded (e.g. scanned images or unsupported
/// font encodings) are skipped with a warning.
#[derive(Debug, Clone, Default)]
pub struct PdfCorpusProvider;

impl PdfCorpusProvider {
    pub fn new() -> Self {
        Self
    }
}

impl CorpusProvider for PdfCorpusProvider {
    fn load(&self, document: &Path) -> Result<Vec<PageText>, RetrievalError> {
        let _span = tracing::debug_span!("corpus.pdf", path = %document.display()).entered();

        let bytes = std::fs::read(document).map_err(|e| RetrievalError::Io {
            path: document.to_path_buf(),
            source: e,
        })?;
        let pdf = lopdf::Document::load_mem(&bytes).map_err(|e| RetrievalError::Pdf {
            path: document.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut pages = Vec::new();
        // lopdf numbers pages from 1
        for page_number in pdf.get_pages().into_keys() {
            match pdf.extract_text(&[page_number]) {
                Ok(text) if !text.trim().is_empty() => pages.push(PageText {
                    page: page_number.saturating_sub(1) as usize,
                    section_label: infer_section_label(&text),
                    text,
                }),
                Ok(_) => tracing::debug!(page = page_number, "PDF page has no text"),
                Err(e) => tracing::warn!(page = page_number, error = %e, "Skipping PDF page"),
            }
        }

        if pages.is_empty() {
            return Err(RetrievalError::Pdf {
                path: document.to_path_buf(),
                message: "no extractable text".to_string(),
            });
        }
        Ok(pages)
    }
}

/// Picks the PDF or text provider by file extension.
#[derive(Debug, Clone, Default)]
pub struct FileCorpusProvider {
    pdf: PdfCorpusProvider,
    text: TextCorpusProvider,
}

impl FileCorpusProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CorpusProvider for FileCorpusProvider {
    fn load(&self, document: &Path) -> Result<Vec<PageText>, RetrievalError> {
        let is_pdf = document
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        if is_pdf {
            self.pdf.load(document)
        } else {
            self.text.load(document)
        }
    }
}

/// Provider over text held in memory, keyed by path.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCorpus {
    documents: BTreeMap<PathBuf, String>,
}

impl InMemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        self.documents.insert(path.into(), text.into());
        self
    }

    /// Paths of every held document, in order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.documents.keys().cloned().collect()
    }
}

impl CorpusProvider for InMemoryCorpus {
    fn load(&self, document: &Path) -> Result<Vec<PageText>, RetrievalError> {
        self.documents
            .get(document)
            .map(|text| paginate(text))
            .ok_or_else(|| RetrievalError::Io {
                path: document.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not in corpus"),
            })
    }
}

fn paginate(content: &str) -> Vec<PageText> {
    content
        .split(PAGE_BREAK)
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(page, text)| PageText {
            page,
            text: text.to_string(),
            section_label: infer_section_label(text),
        })
        .collect()
}

/// Best-effort section label for a page.
///
/// A Markdown heading wins. Otherwise the first non-empty line is used when
/// it looks like a title: short, not ending in sentence punctuation, and
/// followed by more text.
pub fn infer_section_label(page: &str) -> String {
    let lines: Vec<&str> = page
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if let Some(heading) = lines.iter().find(|line| line.starts_with('#')) {
        let title = heading.trim_start_matches('#').trim();
        if !title.is_empty() {
            return truncate_label(title);
        }
    }

    match lines.first() {
        Some(first)
            if lines.len() > 1
                && first.chars().count() <= MAX_TITLE_LINE_CHARS
                && !first.ends_with(['.', '!', '?', ',', ':', ';']) =>
        {
            truncate_label(first)
        }
        _ => NO_SECTION.to_string(),
    }
}

fn truncate_label(label: &str) -> String {
    if label.chars().count() > MAX_LABEL_CHARS {
        let head: String = label.chars().take(MAX_LABEL_CHARS).collect();
        format!("{}...", head)
    } else {
        label.to_string()
    }
}

/// Find PDF, text and Markdown documents under a directory, sorted by path.
///
/// A file path is returned as-is.
pub fn discover_documents(root: &Path) -> Result<Vec<PathBuf>, RetrievalError> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }

    let mut found = Vec::new();
    for extension in DOCUMENT_EXTENSIONS {
        let pattern = root.join("**").join(format!("*.{}", extension));
        let pattern = pattern.to_string_lossy();
        let entries = glob::glob(&pattern).map_err(|e| RetrievalError::Pattern(e.to_string()))?;

        for entry in entries {
            match entry {
                Ok(path) if path.is_file() => found.push(path),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable corpus entry"),
            }
        }
    }

    found.sort();
    found.dedup();
    Ok(found)
}
