use boleta_core::RecognizeConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Image decode error: {0}")]
    ImageDecode(String),
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("Tesseract not available; build with the `tesseract` feature")]
    NotAvailable,
}

/// Abstraction over an OCR backend.
/// Implementations accept PNG bytes of an enhanced image and return the
/// recognized text, lines in reading order.
pub trait OcrBackend: Send + Sync {
    fn recognize(&self, image_png: &[u8], options: &RecognizeConfig) -> Result<String, OcrError>;
}

impl<T: OcrBackend + ?Sized> OcrBackend for Box<T> {
    fn recognize(&self, image_png: &[u8], options: &RecognizeConfig) -> Result<String, OcrError> {
        (**self).recognize(image_png, options)
    }
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// Returns a pre-set string. Useful for unit testing the extraction pipeline
/// without requiring Tesseract to be installed.
pub struct MockRecognizer {
    pub text: String,
}

impl MockRecognizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl OcrBackend for MockRecognizer {
    fn recognize(&self, _image_png: &[u8], _options: &RecognizeConfig) -> Result<String, OcrError> {
        Ok(self.text.clone())
    }
}

// ── Tesseract backend (optional, gated behind `tesseract` feature) ─────────────

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use super::{OcrBackend, OcrError};
    use boleta_core::RecognizeConfig;
    use leptess::{LepTess, Variable};

    /// Runs libtesseract in-process. A fresh engine is created per call, so
    /// one recognizer can serve concurrent requests.
    #[derive(Debug, Default)]
    pub struct TesseractRecognizer;

    impl TesseractRecognizer {
        pub fn new() -> Self {
            Self
        }
    }

    impl OcrBackend for TesseractRecognizer {
        fn recognize(&self, image_png: &[u8], options: &RecognizeConfig) -> Result<String, OcrError> {
            let data_path = options
                .data_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned());
            let lang = options.language.as_deref().unwrap_or("eng");

            let mut lt = LepTess::new(data_path.as_deref(), lang)
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            lt.set_variable(
                Variable::TesseditPagesegMode,
                &options.page_segmentation_mode.to_string(),
            )
            .map_err(|e| OcrError::Engine(e.to_string()))?;
            lt.set_image_from_mem(image_png)
                .map_err(|e| OcrError::ImageDecode(e.to_string()))?;
            lt.get_utf8_text().map_err(|e| OcrError::Engine(e.to_string()))
        }
    }
}

/// The engine used by binaries: Tesseract when compiled in, otherwise a
/// backend that always reports [`OcrError::NotAvailable`].
pub fn default_backend() -> Box<dyn OcrBackend> {
    #[cfg(feature = "tesseract")]
    {
        Box::new(tesseract_backend::TesseractRecognizer::new())
    }
    #[cfg(not(feature = "tesseract"))]
    {
        Box::new(UnavailableRecognizer)
    }
}

#[cfg(not(feature = "tesseract"))]
struct UnavailableRecognizer;

#[cfg(not(feature = "tesseract"))]
impl OcrBackend for UnavailableRecognizer {
    fn recognize(&self, _image_png: &[u8], _options: &RecognizeConfig) -> Result<String, OcrError> {
        Err(OcrError::NotAvailable)
    }
}
