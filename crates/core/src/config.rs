use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Default cue tables ────────────────────────────────────────────────────────

/// Grouped thousands (`12.990`, `1 250 000`) or a plain/decimal amount, with
/// an optional leading `$`.
pub const AMOUNT_PATTERN: &str = r"(\$?\s?\d{1,3}(?:[.\s]\d{3})+|\$?\s?\d+(?:[.,]\d{2})?)";

/// ISO or day-first numeric dates next to a date cue.
pub const DATE_CUE_PATTERN: &str = r"(\d{4}[/-]\d{1,2}[/-]\d{1,2}|\d{1,2}[/-]\d{1,2}[/-]\d{2,4})";

/// Whole-text date scan. Captures `date` and an optional adjacent `time`.
pub const DATE_GLOBAL_PATTERN: &str = concat!(
    r"(?i)(?P<date>(?:\d{4}[/-]\d{1,2}[/-]\d{1,2})|(?:\d{1,2}[/-]\d{1,2}[/-]\d{2,4})|(?:\d{1,2}[.]\d{1,2}[.]\d{2,4}))",
    r"(?:\s*[/\-]?\s*(?P<time>\d{1,2}[:.]\d{2}(?::\d{2})?))?",
);

const AMOUNT_LABELS: &[&str] = &["total a pagar", "total", "monto", "importe total", "total compra"];

const DATE_LABELS: &[&str] = &[
    "fecha emision",
    "fecha emisión",
    "fecha compra",
    "fecha",
    "f. emision",
    "f. emisión",
];

const IDENTIFIER_RULES: &[(&str, &str)] = &[
    ("numero operacion", r"(\d{6,})"),
    ("comprobante", r"(\d{6,})"),
    ("nro transaccion", r"([A-Za-z0-9]{8,})"),
    ("boleta electronica", r"(\d{6,})"),
];

fn owned(labels: &[&str]) -> Vec<String> {
    labels.iter().map(|l| l.to_string()).collect()
}

// ── Image enhancement ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhanceConfig {
    /// Images shorter than this are upscaled to exactly this height.
    pub target_height: u32,
    /// Non-local-means filter strength (`h`).
    pub denoise_strength: f32,
    /// Side of the patch compared by the denoiser (odd).
    pub template_window: u32,
    /// Side of the neighbourhood searched by the denoiser (odd).
    pub search_window: u32,
    pub clahe_clip_limit: f32,
    /// Tiles per axis for adaptive equalization.
    pub clahe_tiles: u32,
    pub preblur_sigma: f32,
    /// Structuring element radius for opening/closing; 0 is the minimal element.
    pub morph_radius: u8,
    pub unsharp_sigma: f32,
    pub unsharp_strength: f32,
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            target_height: 1800,
            denoise_strength: 7.0,
            template_window: 7,
            search_window: 21,
            clahe_clip_limit: 2.0,
            clahe_tiles: 8,
            preblur_sigma: 0.8,
            morph_radius: 0,
            unsharp_sigma: 1.0,
            unsharp_strength: 1.0,
        }
    }
}

// ── Field extraction ──────────────────────────────────────────────────────────

/// Cue labels (in fallback order) plus the value pattern searched near them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCues {
    pub labels: Vec<String>,
    pub pattern: String,
    pub look_ahead: usize,
    pub cutoff: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateCues {
    pub labels: Vec<String>,
    pub pattern: String,
    pub look_ahead: usize,
    pub cutoff: f64,
    /// Fallback scan applied line by line when no cue yields a date.
    pub global_pattern: String,
}

/// One entry of the identifier priority list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CueRule {
    pub label: String,
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifierCues {
    /// Tried in order; the first rule that yields a value wins.
    pub rules: Vec<CueRule>,
    pub look_ahead: usize,
    pub cutoff: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub amount: FieldCues,
    pub date: DateCues,
    pub identifier: IdentifierCues,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            amount: FieldCues {
                labels: owned(AMOUNT_LABELS),
                pattern: AMOUNT_PATTERN.to_string(),
                look_ahead: 2,
                cutoff: 0.55,
            },
            date: DateCues {
                labels: owned(DATE_LABELS),
                pattern: DATE_CUE_PATTERN.to_string(),
                look_ahead: 2,
                cutoff: 0.55,
                global_pattern: DATE_GLOBAL_PATTERN.to_string(),
            },
            identifier: IdentifierCues {
                rules: IDENTIFIER_RULES
                    .iter()
                    .map(|(label, pattern)| CueRule {
                        label: label.to_string(),
                        pattern: pattern.to_string(),
                    })
                    .collect(),
                look_ahead: 3,
                cutoff: 0.55,
            },
        }
    }
}

// ── OCR engine ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizeConfig {
    /// Tesseract page segmentation mode; 6 assumes a single uniform block of text.
    pub page_segmentation_mode: u8,
    /// Tesseract language code, e.g. `spa`. Engine default when unset.
    pub language: Option<String>,
    pub data_path: Option<PathBuf>,
}

impl Default for RecognizeConfig {
    fn default() -> Self {
        Self {
            page_segmentation_mode: 6,
            language: None,
            data_path: None,
        }
    }
}

// ── HTTP boundary ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
    /// Wall-clock budget per request; results of slower runs are discarded.
    pub request_timeout_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_bytes: 20 * 1024 * 1024,
            request_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub enhance: EnhanceConfig,
    pub extraction: ExtractionConfig,
    pub recognize: RecognizeConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }
}
