pub mod config;
pub mod date;
pub mod record;

pub use config::{
    AppConfig, ConfigError, CueRule, DateCues, EnhanceConfig, ExtractionConfig, FieldCues,
    IdentifierCues, RecognizeConfig, ServerConfig,
};
pub use date::{normalize_date, CanonicalDate};
pub use record::{ExtractedFields, ExtractionRecord, Identifier, ReceiptResponse};
