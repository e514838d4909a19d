use std::path::Path;
use super::{ExtractError, Extractor};

/// PDF text extraction.
///
/// pdf-extract can panic on malformed input, so the call is wrapped in
/// catch_unwind and surfaced as a decode failure instead of taking down the
/// indexing task.
pub struct PdfExtractor;

impl Extractor for PdfExtractor {
    fn can_extract(&self, extension: &str) -> bool {
        extension == "pdf"
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let bytes = std::fs::read(path)?;

        let result = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(&bytes));

        match result {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(ExtractError::Decode(format!("pdf extraction failed: {}", e))),
            Err(_) => Err(ExtractError::Decode(
                "pdf extraction failed (file may be corrupted or use unsupported features)"
                    .to_string(),
            )),
        }
    }
}
