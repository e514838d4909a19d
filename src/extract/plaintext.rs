use std::path::Path;
use pulldown_cmark::{Event, Parser};
use super::{ExtractError, Extractor};

/// Plain text files read as UTF-8.
pub struct PlainTextExtractor;

impl Extractor for PlainTextExtractor {
    fn can_extract(&self, extension: &str) -> bool {
        matches!(extension, "txt" | "text" | "csv")
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let bytes = std::fs::read(path)?;
        String::from_utf8(bytes)
            .map_err(|e| ExtractError::Decode(format!("not valid UTF-8: {}", e)))
    }
}

/// Markdown files: markup is stripped so only the rendered text is indexed.
pub struct MarkdownExtractor;

impl Extractor for MarkdownExtractor {
    fn can_extract(&self, extension: &str) -> bool {
        matches!(extension, "md" | "markdown")
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let bytes = std::fs::read(path)?;
        let source = String::from_utf8(bytes)
            .map_err(|e| ExtractError::Decode(format!("not valid UTF-8: {}", e)))?;

        let mut text = String::with_capacity(source.len());
        for event in Parser::new(&source) {
            match event {
                Event::Text(t) | Event::Code(t) => text.push_str(&t),
                Event::SoftBreak | Event::HardBreak => text.push(' '),
                Event::End(_) => {
                    if !text.ends_with('\n') {
                        text.push('\n');
                    }
                }
                _ => {}
            }
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_plaintext_reads_utf8() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.txt");
        fs::write(&path, "héllo wörld").unwrap();

        let text = PlainTextExtractor.extract(&path).unwrap();
        assert_eq!(text, "héllo wörld");
    }

    #[test]
    fn test_plaintext_rejects_binary() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.txt");
        fs::write(&path, [0xff, 0xfe, 0x00, 0x01]).unwrap();

        let err = PlainTextExtractor.extract(&path).unwrap_err();
        assert!(matches!(err, ExtractError::Decode(_)));
    }

    #[test]
    fn test_markdown_strips_markup() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("doc.md");
        fs::write(&path, "# Title\n\nSome **bold** and [a link](https://example.com).\n").unwrap();

        let text = MarkdownExtractor.extract(&path).unwrap();
        assert!(text.contains("Title"));
        assert!(text.contains("bold"));
        assert!(text.contains("a link"));
        assert!(!text.contains("**"));
        assert!(!text.contains("example.com"));
    }

    #[test]
    fn test_extension_dispatch() {
        assert!(PlainTextExtractor.can_extract("txt"));
        assert!(!PlainTextExtractor.can_extract("md"));
        assert!(MarkdownExtractor.can_extract("md"));
        assert!(MarkdownExtractor.can_extract("markdown"));
        assert!(!MarkdownExtractor.can_extract("pdf"));
    }
}
