use deepresearch_common::{DeepResearchError, Result};

/// Collaborator seam for PDF text extraction, serialized behind the
/// Scheduler's single PDF mutex (§4.3/§9 — PDF parsing libraries are
/// memory-heavy and not safely run concurrently in-process).
pub trait PdfExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], max_pages: u32) -> Result<String>;
}

/// Minimal extractor that looks for the literal text runs between `BT`/`ET`
/// markers in an uncompressed PDF content stream. Handles simple,
/// non-compressed PDFs; anything using stream compression or embedded
/// fonts falls through to an empty string rather than failing the fetch.
pub struct NaivePdfExtractor;

impl PdfExtractor for NaivePdfExtractor {
    fn extract(&self, bytes: &[u8], max_pages: u32) -> Result<String> {
        if bytes.len() < 4 || &bytes[0..4] != b"%PDF" {
            return Err(DeepResearchError::FetchError {
                url: String::new(),
                detail: "not a PDF file".to_string(),
            });
        }

        let content = String::from_utf8_lossy(bytes);
        let mut out = String::new();
        let mut pages_seen = 0u32;

        for segment in content.split("BT") {
            if pages_seen >= max_pages.max(1) {
                break;
            }
            if let Some(et_pos) = segment.find("ET") {
                let block = &segment[..et_pos];
                for piece in block.split('(').skip(1) {
                    if let Some(end) = piece.find(')') {
                        out.push_str(&piece[..end]);
                        out.push(' ');
                    }
                }
                pages_seen += 1;
            }
        }

        Ok(out.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_pdf_bytes() {
        let extractor = NaivePdfExtractor;
        let result = extractor.extract(b"not a pdf", 10);
        assert!(result.is_err());
    }

    #[test]
    fn extracts_text_runs_between_bt_et() {
        let extractor = NaivePdfExtractor;
        let doc = b"%PDF-1.4\nBT (Hello) (World) ET";
        let text = extractor.extract(doc, 10).unwrap();
        assert_eq!(text, "Hello World");
    }
}
