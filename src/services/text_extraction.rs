use crate::errors::{AppError, Result};

pub struct TextExtractor;

impl TextExtractor {
    /// Text layer of a PDF. Scanned documents without one are rejected; the
    /// Mindee extractor handles those from the file URL instead.
    pub fn extract_from_pdf(bytes: &[u8]) -> Result<String> {
        // pdf-extract panics on some malformed inputs.
        let text = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
            .map_err(|_| AppError::ExtractionFailed("PDF text extraction panicked".to_string()))?
            .map_err(|e| AppError::ExtractionFailed(format!("PDF text extraction: {}", e)))?;
        if !Self::validate_text_quality(&text) {
            return Err(AppError::ExtractionFailed(
                "PDF has no usable text layer".to_string(),
            ));
        }
        Ok(text)
    }

    pub fn validate_text_quality(text: &str) -> bool {
        text.len() > 50 && text.split_whitespace().count() > 10
    }
}
