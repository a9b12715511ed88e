use serde::{Deserialize, Serialize};

use crate::date::CanonicalDate;

/// A transaction identifier together with the cue label that located it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    pub value: String,
    pub label: String,
}

/// The three typed fields pulled out of one recognized text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractedFields {
    /// Amount token exactly as it appeared on the receipt (e.g. `$12.990`).
    pub total: Option<String>,
    pub date: Option<CanonicalDate>,
    pub identifier: Option<Identifier>,
}

impl ExtractedFields {
    pub fn is_empty(&self) -> bool {
        self.total.is_none() && self.date.is_none() && self.identifier.is_none()
    }
}

/// Outcome of processing a single uploaded receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRecord {
    pub filename: String,
    pub fields: ExtractedFields,
    /// Full recognized text the fields were extracted from.
    pub ocr_text: String,
}

impl ExtractionRecord {
    pub fn new(filename: impl Into<String>, fields: ExtractedFields, ocr_text: String) -> Self {
        Self {
            filename: filename.into(),
            fields,
            ocr_text,
        }
    }
}

/// Wire shape returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptResponse {
    pub filename: String,
    pub total: Option<String>,
    /// `DD-MM-YY`
    pub fecha: Option<String>,
    pub id_boleta: Option<String>,
    pub id_label_prioritario: Option<String>,
    pub texto_ocr: String,
}

impl From<&ExtractionRecord> for ReceiptResponse {
    fn from(record: &ExtractionRecord) -> Self {
        let fields = &record.fields;
        Self {
            filename: record.filename.clone(),
            total: fields.total.clone(),
            fecha: fields.date.map(|d| d.to_string()),
            id_boleta: fields.identifier.as_ref().map(|id| id.value.clone()),
            id_label_prioritario: fields.identifier.as_ref().map(|id| id.label.clone()),
            texto_ocr: record.ocr_text.clone(),
        }
    }
}

impl From<ExtractionRecord> for ReceiptResponse {
    fn from(record: ExtractionRecord) -> Self {
        Self::from(&record)
    }
}
