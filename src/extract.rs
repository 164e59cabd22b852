//! PDF text extraction.
//!
//! Extraction itself is delegated to `pdf-extract`. This module only
//! guarantees that a bad file becomes an [`ExtractError`] rather than a panic,
//! so the ingestion pool can log it and move on.

use std::panic::{catch_unwind, AssertUnwindSafe};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read {0}: {1}")]
    Read(String, #[source] std::io::Error),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}

/// Extracts plain UTF-8 text from PDF bytes.
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract panics on some malformed inputs
    match catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes))) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(ExtractError::Pdf(e.to_string())),
        Err(_) => Err(ExtractError::Pdf("extractor panicked".to_string())),
    }
}

/// Reads a file from disk and extracts its text.
pub fn extract_pdf_file(path: &std::path::Path) -> Result<String, ExtractError> {
    let bytes =
        std::fs::read(path).map_err(|e| ExtractError::Read(path.display().to_string(), e))?;
    extract_pdf_text(&bytes)
}

/// Smallest well-formed single-page PDF showing `phrase`, with a correct
/// xref table so the extractor accepts it.
#[cfg(test)]
pub(crate) fn minimal_pdf(phrase: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R \
         /Resources << /Font << /F1 5 0 R >> >> >>"
            .to_string(),
        format!(
            "<< /Length {} >> stream\n{}\nendstream",
            content.len(),
            content
        ),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    ];

    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj {} endobj\n", i + 1, body).as_bytes());
    }
    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_start
        )
        .as_bytes(),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_text_from_a_valid_pdf() {
        let text = extract_pdf_text(&minimal_pdf("Photosynthesis uses light")).unwrap();
        assert!(text.contains("Photosynthesis uses light"), "got {:?}", text);
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_pdf_text(b"not a pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn missing_file_returns_read_error() {
        let err = extract_pdf_file(std::path::Path::new("/no/such/file.pdf")).unwrap_err();
        assert!(matches!(err, ExtractError::Read(_, _)));
    }
}
