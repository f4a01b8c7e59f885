//! Document loaders: turn files into paged plain text.
//!
//! Loaders are selected by file extension through a [`LoaderRegistry`].
//! The default registry understands PDF, DOCX, and plain text; callers can
//! register their own [`DocumentLoader`] for other formats.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use crate::error::{RagError, Result};
use crate::models::{Document, Page};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Converts the bytes of one file into a [`Document`].
pub trait DocumentLoader: Send + Sync {
    /// Lower-case extensions (without the dot) this loader handles.
    fn extensions(&self) -> &[&'static str];

    /// Parse `bytes`, read from `path`, into ordered pages.
    fn load(&self, path: &Path, bytes: &[u8]) -> Result<Document>;
}

/// PDF loader backed by `pdf-extract`, one [`Page`] per PDF page.
pub struct PdfLoader;

impl DocumentLoader for PdfLoader {
    fn extensions(&self) -> &[&'static str] {
        &["pdf"]
    }

    fn load(&self, path: &Path, bytes: &[u8]) -> Result<Document> {
        let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
            .map_err(|e| extraction_error(path, e))?;
        Ok(Document {
            id: document_id(path),
            pages: pages
                .into_iter()
                .enumerate()
                .map(|(index, text)| Page { index, text })
                .collect(),
        })
    }
}

/// Plain text loader. Form feeds (`\x0c`) separate pages.
pub struct TextLoader;

impl DocumentLoader for TextLoader {
    fn extensions(&self) -> &[&'static str] {
        &["txt", "md"]
    }

    fn load(&self, path: &Path, bytes: &[u8]) -> Result<Document> {
        let text = std::str::from_utf8(bytes).map_err(|e| extraction_error(path, e))?;
        Ok(Document {
            id: document_id(path),
            pages: text
                .split('\x0c')
                .enumerate()
                .map(|(index, text)| Page {
                    index,
                    text: text.to_string(),
                })
                .collect(),
        })
    }
}

/// DOCX loader. The whole body becomes a single page; paragraphs end with `\n`.
pub struct DocxLoader;

impl DocumentLoader for DocxLoader {
    fn extensions(&self) -> &[&'static str] {
        &["docx"]
    }

    fn load(&self, path: &Path, bytes: &[u8]) -> Result<Document> {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
            .map_err(|e| extraction_error(path, e))?;
        let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)
            .map_err(|cause| extraction_error(path, cause))?;
        let text = extract_docx_paragraphs(&xml).map_err(|cause| extraction_error(path, cause))?;
        Ok(Document {
            id: document_id(path),
            pages: vec![Page { index: 0, text }],
        })
    }
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> std::result::Result<Vec<u8>, String> {
    let entry = archive.by_name(name).map_err(|e| format!("{}: {}", name, e))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    if out.len() as u64 >= max_bytes {
        return Err(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        ));
    }
    Ok(out)
}

fn extract_docx_paragraphs(xml: &[u8]) -> std::result::Result<String, String> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn document_id(path: &Path) -> String {
    path.display().to_string()
}

fn extraction_error(path: &Path, cause: impl ToString) -> RagError {
    RagError::Extraction {
        path: path.to_path_buf(),
        cause: cause.to_string(),
    }
}

/// Extension-keyed set of loaders.
pub struct LoaderRegistry {
    loaders: Vec<Box<dyn DocumentLoader>>,
    by_extension: HashMap<String, usize>,
}

impl LoaderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            loaders: Vec::new(),
            by_extension: HashMap::new(),
        }
    }

    /// Register a loader. Later registrations win for shared extensions.
    pub fn register(&mut self, loader: Box<dyn DocumentLoader>) {
        let slot = self.loaders.len();
        for ext in loader.extensions() {
            self.by_extension.insert(ext.to_string(), slot);
        }
        self.loaders.push(loader);
    }

    /// Find the loader for `path` by its (case-insensitive) extension.
    pub fn for_path(&self, path: &Path) -> Option<&dyn DocumentLoader> {
        let ext = extension_of(path);
        self.by_extension
            .get(&ext)
            .map(|&slot| self.loaders[slot].as_ref())
    }

    pub fn supports(&self, path: &Path) -> bool {
        self.for_path(path).is_some()
    }

    /// Load one file.
    ///
    /// # Errors
    ///
    /// - [`RagError::NotFound`] if `path` does not exist.
    /// - [`RagError::UnsupportedFormat`] if no loader handles its extension.
    /// - [`RagError::Extraction`] if the file cannot be read or parsed.
    pub fn load(&self, path: &Path) -> Result<Document> {
        if !path.exists() {
            return Err(RagError::NotFound(path.to_path_buf()));
        }
        let loader = self
            .for_path(path)
            .ok_or_else(|| RagError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension: extension_of(path),
            })?;
        let bytes = std::fs::read(path).map_err(|e| extraction_error(path, e))?;
        loader.load(path, &bytes)
    }
}

impl Default for LoaderRegistry {
    /// PDF, DOCX, and plain text.
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(PdfLoader));
        registry.register(Box::new(DocxLoader));
        registry.register(Box::new(TextLoader));
        registry
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}
