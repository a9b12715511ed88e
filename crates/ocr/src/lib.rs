pub mod extract;
pub mod filters;
pub mod hash;
pub mod matcher;
pub mod pipeline;
pub mod preprocess;
pub mod recognizer;
pub mod similarity;

pub use extract::{DateHit, DateSource, ExtractError, Extractor};
pub use matcher::{find_near, LineMatch, ReceiptLines};
pub use pipeline::{PipelineError, ReceiptPipeline};
pub use preprocess::{decode, enhance, prepare_for_ocr_from_bytes, PreprocessError};
pub use recognizer::{default_backend, MockRecognizer, OcrBackend, OcrError};
