//! Office Open XML extraction: DOCX via docx-rs, XLSX/PPTX by walking the
//! text nodes of the relevant archive members.

use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

use super::{ExtractError, Extractor};

/// Word documents: walk paragraph runs.
pub struct DocxExtractor;

impl Extractor for DocxExtractor {
    fn can_extract(&self, extension: &str) -> bool {
        extension == "docx"
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let bytes = std::fs::read(path)?;
        let docx = docx_rs::read_docx(&bytes)
            .map_err(|e| ExtractError::Decode(format!("docx extraction failed: {}", e)))?;

        let mut text = String::new();
        for child in docx.document.children {
            if let docx_rs::DocumentChild::Paragraph(para) = child {
                for child in para.children {
                    if let docx_rs::ParagraphChild::Run(run) = child {
                        for child in run.children {
                            if let docx_rs::RunChild::Text(t) = child {
                                text.push_str(&t.text);
                                text.push(' ');
                            }
                        }
                    }
                }
                text.push('\n');
            }
        }

        Ok(text)
    }
}

/// Spreadsheets: the shared-strings table holds every cell string.
pub struct XlsxExtractor;

impl Extractor for XlsxExtractor {
    fn can_extract(&self, extension: &str) -> bool {
        extension == "xlsx"
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let file = std::fs::File::open(path)?;
        let mut archive = zip::ZipArchive::new(std::io::BufReader::new(file))
            .map_err(|e| ExtractError::Decode(format!("xlsx is not a valid archive: {}", e)))?;

        let xml = match read_member(&mut archive, "xl/sharedStrings.xml") {
            Some(xml) => xml,
            // Workbooks with only numeric cells have no shared strings
            None => return Ok(String::new()),
        };

        Ok(collect_text_elements(&xml))
    }
}

/// Presentations: concatenate the text runs of every slide, in slide order.
pub struct PptxExtractor;

impl Extractor for PptxExtractor {
    fn can_extract(&self, extension: &str) -> bool {
        extension == "pptx"
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let file = std::fs::File::open(path)?;
        let mut archive = zip::ZipArchive::new(std::io::BufReader::new(file))
            .map_err(|e| ExtractError::Decode(format!("pptx is not a valid archive: {}", e)))?;

        let mut slides: Vec<String> = archive
            .file_names()
            .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
            .map(String::from)
            .collect();
        // Member names carry the slide number ("slide10.xml"); a plain string
        // sort would put slide 10 before slide 2
        slides.sort_by(|a, b| slide_number(a).cmp(&slide_number(b)).then_with(|| a.cmp(b)));

        let mut text = String::new();
        for slide in slides {
            if let Some(xml) = read_member(&mut archive, &slide) {
                text.push_str(&collect_text_elements(&xml));
                text.push('\n');
            }
        }

        Ok(text)
    }
}

/// Trailing number of a slide member name: "ppt/slides/slide12.xml" -> 12.
/// Names without one sort after all numbered slides.
fn slide_number(name: &str) -> u32 {
    let stem = name.trim_end_matches(".xml");
    let digits: String = stem
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .chars()
        .rev()
        .collect();
    digits.parse().unwrap_or(u32::MAX)
}

fn read_member<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Option<String> {
    let mut member = archive.by_name(name).ok()?;
    let mut xml = String::new();
    member.read_to_string(&mut xml).ok()?;
    Some(xml)
}

/// Pull the character content of every `<t>` element (the text node of both
/// spreadsheet shared strings and presentation runs), space-separated.
fn collect_text_elements(xml: &str) -> String {
    let mut reader = Reader::from_str(xml);
    let mut text = String::new();
    let mut in_text_node = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                in_text_node = e.local_name().as_ref() == b"t";
            }
            Ok(Event::End(_)) => {
                in_text_node = false;
            }
            Ok(Event::Text(t)) if in_text_node => {
                if let Ok(value) = t.unescape() {
                    text.push_str(&value);
                    text.push(' ');
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }

    text.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_collect_text_elements_shared_strings() {
        let xml = r#"<?xml version="1.0"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="2">
  <si><t>Quarterly revenue</t></si>
  <si><t>Forecast &amp; actuals</t></si>
</sst>"#;
        let text = collect_text_elements(xml);
        assert!(text.contains("Quarterly revenue"));
        assert!(text.contains("Forecast & actuals"));
    }

    #[test]
    fn test_collect_text_elements_slide_runs() {
        let xml = r#"<p:sld xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main">
  <a:p><a:r><a:t>Roadmap 2025</a:t></a:r></a:p>
  <a:p><a:r><a:t>Milestones</a:t></a:r></a:p>
</p:sld>"#;
        let text = collect_text_elements(xml);
        assert_eq!(text, "Roadmap 2025 Milestones");
    }

    #[test]
    fn test_collect_text_ignores_non_text_elements() {
        let xml = "<root><other>skip me</other><t>keep me</t></root>";
        assert_eq!(collect_text_elements(xml), "keep me");
    }

    #[test]
    fn test_xlsx_roundtrip_through_zip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("book.xlsx");

        let file = fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("xl/sharedStrings.xml", options).unwrap();
        zip.write_all(br#"<sst><si><t>hello cells</t></si></sst>"#).unwrap();
        zip.finish().unwrap();

        let text = XlsxExtractor.extract(&path).unwrap();
        assert_eq!(text, "hello cells");
    }

    #[test]
    fn test_pptx_roundtrip_through_zip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("deck.pptx");

        let file = fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("ppt/slides/slide1.xml", options).unwrap();
        zip.write_all(br#"<sld><t>first slide</t></sld>"#).unwrap();
        zip.start_file("ppt/slides/slide2.xml", options).unwrap();
        zip.write_all(br#"<sld><t>second slide</t></sld>"#).unwrap();
        zip.finish().unwrap();

        let text = PptxExtractor.extract(&path).unwrap();
        assert!(text.contains("first slide"));
        assert!(text.contains("second slide"));
    }

    #[test]
    fn test_slide_number_parsing() {
        assert_eq!(slide_number("ppt/slides/slide1.xml"), 1);
        assert_eq!(slide_number("ppt/slides/slide12.xml"), 12);
        assert_eq!(slide_number("ppt/slides/slide.xml"), u32::MAX);
    }

    #[test]
    fn test_pptx_slides_in_numeric_order() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("deck.pptx");

        let file = fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        // Written out of order, with a two-digit slide that a string sort
        // would misplace before slide 2
        for (name, text) in [
            ("ppt/slides/slide10.xml", "<sld><t>tenth</t></sld>"),
            ("ppt/slides/slide2.xml", "<sld><t>second</t></sld>"),
            ("ppt/slides/slide1.xml", "<sld><t>first</t></sld>"),
        ] {
            zip.start_file(name, options).unwrap();
            zip.write_all(text.as_bytes()).unwrap();
        }
        zip.finish().unwrap();

        let text = PptxExtractor.extract(&path).unwrap();
        let pos = |needle: &str| text.find(needle).unwrap();
        assert!(pos("first") < pos("second"));
        assert!(pos("second") < pos("tenth"));
    }

    #[test]
    fn test_corrupt_archive_is_decode_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.xlsx");
        fs::write(&path, "not a zip archive").unwrap();

        let err = XlsxExtractor.extract(&path).unwrap_err();
        assert!(matches!(err, ExtractError::Decode(_)));
    }
}
