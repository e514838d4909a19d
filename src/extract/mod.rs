pub mod plaintext;
pub mod pdf;
pub mod office;

use std::path::Path;
use thiserror::Error;

/// Errors raised while extracting text from a single file.
///
/// These are recoverable at task level: the scheduler records the skip reason
/// and moves on to the next file.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// No extractor registered for the file's extension
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    /// File exceeds the configured size cap
    #[error("file too large: {size} bytes (cap {cap})")]
    TooLarge { size: u64, cap: u64 },

    /// Decoded text matched the content deny-list
    #[error("content rejected: {0}")]
    ContentRejected(String),

    /// Format-level decode failure (corrupt file, bad encoding)
    #[error("decode failed: {0}")]
    Decode(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    /// Short label used in skip statistics and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            ExtractError::UnsupportedType(_) => "unsupported_type",
            ExtractError::TooLarge { .. } => "too_large",
            ExtractError::ContentRejected(_) => "content_rejected",
            ExtractError::Decode(_) => "decode_failed",
            ExtractError::Io(_) => "io_error",
        }
    }
}

/// Result of a successful extraction.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub text: String,
    pub file_type: String,
    pub size_bytes: u64,
}

/// Trait for per-format text extractors.
///
/// Extractors only read file content; they never execute it.
pub trait Extractor: Send + Sync {
    /// Check if this extractor can handle the given file extension
    fn can_extract(&self, extension: &str) -> bool;

    /// Extract plain text from the file at `path`
    fn extract(&self, path: &Path) -> Result<String, ExtractError>;
}

/// Decoded text matching any of these patterns is rejected outright.
/// Case-insensitive substring match over the extracted text.
const DENY_PATTERNS: &[&str] = &["<script", "javascript:", "vbscript:", "data:text/html"];

/// Extractor registry that selects the appropriate extractor by extension
/// and enforces the size cap and content policy.
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn Extractor>>,
    max_file_size_bytes: u64,
}

impl ExtractorRegistry {
    /// Create a registry with all built-in extractors.
    pub fn new(max_file_size_bytes: u64) -> Self {
        let mut registry = Self {
            extractors: Vec::new(),
            max_file_size_bytes,
        };

        registry.register(Box::new(plaintext::PlainTextExtractor));
        registry.register(Box::new(plaintext::MarkdownExtractor));
        registry.register(Box::new(pdf::PdfExtractor));
        registry.register(Box::new(office::DocxExtractor));
        registry.register(Box::new(office::XlsxExtractor));
        registry.register(Box::new(office::PptxExtractor));

        registry
    }

    /// Register an extractor
    pub fn register(&mut self, extractor: Box<dyn Extractor>) {
        self.extractors.push(extractor);
    }

    /// Extract text from the file at `path`.
    ///
    /// Applies, in order: extension dispatch, the size cap, format decoding,
    /// and the content deny-list.
    pub fn extract(&self, path: &Path) -> Result<Extracted, ExtractError> {
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase();

        let extractor = self
            .extractors
            .iter()
            .find(|e| e.can_extract(&extension))
            .ok_or_else(|| ExtractError::UnsupportedType(extension.clone()))?;

        let size = std::fs::metadata(path)?.len();
        if size > self.max_file_size_bytes {
            return Err(ExtractError::TooLarge {
                size,
                cap: self.max_file_size_bytes,
            });
        }

        let text = extractor.extract(path)?;

        let lowered = text.to_lowercase();
        for pattern in DENY_PATTERNS {
            if lowered.contains(pattern) {
                return Err(ExtractError::ContentRejected(format!(
                    "matched deny pattern {:?}",
                    pattern
                )));
            }
        }

        Ok(Extracted {
            text,
            file_type: extension,
            size_bytes: size,
        })
    }
}
