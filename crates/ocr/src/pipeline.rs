use boleta_core::{AppConfig, EnhanceConfig, ExtractionRecord, RecognizeConfig};
use std::time::Instant;
use thiserror::Error;
use tracing::{info, info_span, warn};

use crate::extract::{ExtractError, Extractor};
use crate::hash;
use crate::preprocess::{self, PreprocessError};
use crate::recognizer::{OcrBackend, OcrError};

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The upload is not an image we can read. Nothing else was attempted.
    #[error("Could not decode image: {0}")]
    Decode(#[source] PreprocessError),
    #[error("Could not encode enhanced image: {0}")]
    Encode(#[source] PreprocessError),
    #[error("OCR recognition failed: {0}")]
    Ocr(#[from] OcrError),
}

impl PipelineError {
    /// Whether the caller sent bad input, as opposed to a failure on our side.
    pub fn is_client_error(&self) -> bool {
        matches!(self, PipelineError::Decode(_))
    }
}

/// Orchestrates: decode → enhance → OCR → extract.
///
/// Stateless between calls and CPU-bound; callers on an async runtime should
/// run [`ReceiptPipeline::process_bytes`] on a blocking thread.
pub struct ReceiptPipeline<R: OcrBackend> {
    recognizer: R,
    extractor: Extractor,
    enhance: EnhanceConfig,
    recognize: RecognizeConfig,
}

impl<R: OcrBackend> ReceiptPipeline<R> {
    pub fn new(recognizer: R, config: &AppConfig) -> Result<Self, ExtractError> {
        Ok(Self {
            recognizer,
            extractor: Extractor::new(&config.extraction)?,
            enhance: config.enhance.clone(),
            recognize: config.recognize.clone(),
        })
    }

    /// Process one uploaded file.
    ///
    /// Only an undecodable upload or an OCR engine failure is an error; fields
    /// that cannot be found are simply absent from the record.
    pub fn process_bytes(
        &self,
        filename: &str,
        data: &[u8],
    ) -> Result<ExtractionRecord, PipelineError> {
        let fingerprint = hash::upload_fingerprint(data);
        let _span = info_span!("receipt", %fingerprint, filename).entered();
        let started = Instant::now();

        let png = preprocess::prepare_for_ocr_from_bytes(data, &self.enhance).map_err(|e| {
            match e {
                PreprocessError::Decode(_) => {
                    warn!(error = %e, "rejecting undecodable upload");
                    PipelineError::Decode(e)
                }
                PreprocessError::Encode(_) => PipelineError::Encode(e),
            }
        })?;

        let raw = self.recognizer.recognize(&png, &self.recognize)?;
        let record = self.extract_text(filename, raw.trim());

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            total = record.fields.total.is_some(),
            date = record.fields.date.is_some(),
            identifier = record.fields.identifier.is_some(),
            "receipt processed"
        );
        Ok(record)
    }

    /// Build a record from text that has already been recognized.
    pub fn extract_text(&self, filename: &str, text: &str) -> ExtractionRecord {
        let fields = self.extractor.extract(text);
        ExtractionRecord::new(filename, fields, text.to_string())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::MockRecognizer;
    use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
    use std::io::Cursor;

    struct FailingRecognizer;

    impl OcrBackend for FailingRecognizer {
        fn recognize(&self, _png: &[u8], _options: &RecognizeConfig) -> Result<String, OcrError> {
            Err(OcrError::Engine("engine crashed".into()))
        }
    }

    fn tiny_png() -> Vec<u8> {
        let img: GrayImage =
            ImageBuffer::from_fn(6, 4, |x, _| Luma([if x < 3 { 40 } else { 220 }]));
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.enhance.target_height = 16;
        config
    }

    fn pipeline<R: OcrBackend>(recognizer: R) -> ReceiptPipeline<R> {
        ReceiptPipeline::new(recognizer, &test_config()).unwrap()
    }

    #[test]
    fn process_bytes_produces_record() {
        let p = pipeline(MockRecognizer::new(
            "  TOTAL A PAGAR $12.990\nFECHA EMISION 05/01/2024\nNUMERO OPERACION 00456789\n\n",
        ));

        let record = p.process_bytes("boleta.png", &tiny_png()).unwrap();

        assert_eq!(record.filename, "boleta.png");
        assert_eq!(record.fields.total.as_deref(), Some("$12.990"));
        assert_eq!(record.fields.date.unwrap().to_string(), "05-01-24");
        let id = record.fields.identifier.unwrap();
        assert_eq!(id.value, "00456789");
        assert_eq!(id.label, "numero operacion");
        // Recognized text is trimmed before it is stored.
        assert!(record.ocr_text.starts_with("TOTAL"));
        assert!(record.ocr_text.ends_with("00456789"));
    }

    #[test]
    fn undecodable_upload_is_a_client_error() {
        let p = pipeline(MockRecognizer::new("TOTAL 1.000"));
        let err = p.process_bytes("notes.txt", b"plain text, not an image").unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
        assert!(err.is_client_error());
    }

    #[test]
    fn no_fields_is_not_an_error() {
        let p = pipeline(MockRecognizer::new("nada que ver aqui"));
        let record = p.process_bytes("blank.png", &tiny_png()).unwrap();
        assert!(record.fields.is_empty());
        assert_eq!(record.ocr_text, "nada que ver aqui");
    }

    #[test]
    fn engine_failure_is_a_server_error() {
        let p = pipeline(FailingRecognizer);
        let err = p.process_bytes("boleta.png", &tiny_png()).unwrap_err();
        assert!(matches!(err, PipelineError::Ocr(OcrError::Engine(_))));
        assert!(!err.is_client_error());
    }

    #[test]
    fn invalid_config_pattern_is_rejected() {
        let mut config = test_config();
        config.extraction.date.global_pattern = "[".into();
        assert!(ReceiptPipeline::new(MockRecognizer::new(""), &config).is_err());
    }

    /// Reports the size of the image it was handed.
    struct SizeReporter;

    impl OcrBackend for SizeReporter {
        fn recognize(&self, png: &[u8], _options: &RecognizeConfig) -> Result<String, OcrError> {
            let img = image::load_from_memory(png).map_err(|e| OcrError::ImageDecode(e.to_string()))?;
            Ok(format!("{}x{} {:?}", img.width(), img.height(), img.color()))
        }
    }

    #[test]
    fn recognizer_receives_enhanced_png() {
        let record = pipeline(SizeReporter).process_bytes("boleta.png", &tiny_png()).unwrap();
        // 6x4 upscaled to the configured height of 16, single channel.
        assert_eq!(record.ocr_text, "24x16 L8");
    }

    #[test]
    fn runs_are_independent() {
        let p = pipeline(MockRecognizer::new("COMPROBANTE 1234567"));
        let a = p.process_bytes("a.png", &tiny_png()).unwrap();
        let b = p.process_bytes("a.png", &tiny_png()).unwrap();
        assert_eq!(a, b);
    }
}
