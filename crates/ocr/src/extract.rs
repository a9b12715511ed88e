use boleta_core::{
    normalize_date, CanonicalDate, ExtractedFields, ExtractionConfig, FieldCues, Identifier,
};
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::matcher::ReceiptLines;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Invalid {field} pattern: {source}")]
    InvalidPattern {
        field: String,
        #[source]
        source: regex::Error,
    },
}

fn compile(field: &str, pattern: &str) -> Result<Regex, ExtractError> {
    Regex::new(pattern).map_err(|source| ExtractError::InvalidPattern {
        field: field.to_string(),
        source,
    })
}

// ── Compiled cue tables ───────────────────────────────────────────────────────

/// Fallback-ordered labels searched for one value pattern.
#[derive(Debug, Clone)]
struct CueSearch {
    labels: Vec<String>,
    pattern: Regex,
    look_ahead: usize,
    cutoff: f64,
}

impl CueSearch {
    fn new(
        field: &str,
        labels: &[String],
        pattern: &str,
        look_ahead: usize,
        cutoff: f64,
    ) -> Result<Self, ExtractError> {
        Ok(Self {
            labels: labels.to_vec(),
            pattern: compile(field, pattern)?,
            look_ahead,
            cutoff,
        })
    }

    fn from_cues(field: &str, cues: &FieldCues) -> Result<Self, ExtractError> {
        Self::new(field, &cues.labels, &cues.pattern, cues.look_ahead, cues.cutoff)
    }

    fn find(&self, lines: &ReceiptLines<'_>) -> Option<String> {
        lines.find_near(&self.labels, &self.pattern, self.look_ahead, self.cutoff)
    }
}

/// One entry of the identifier priority list.
#[derive(Debug, Clone)]
struct IdentifierRule {
    search: CueSearch,
}

impl IdentifierRule {
    fn label(&self) -> &str {
        &self.search.labels[0]
    }
}

// ── Date provenance ───────────────────────────────────────────────────────────

/// How a date token was located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateSource {
    /// Next to a date cue such as "fecha emision".
    Cue,
    /// Line-by-line scan of the whole text; `time` is whatever clock value
    /// sat next to the date.
    GlobalScan { time: Option<String> },
}

/// A raw date token and where it came from, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateHit {
    pub token: String,
    pub source: DateSource,
}

impl DateHit {
    pub fn normalize(&self) -> Option<CanonicalDate> {
        normalize_date(&self.token)
    }
}

// ── Extractor ─────────────────────────────────────────────────────────────────

/// Pulls total, date and identifier out of recognized receipt text.
///
/// Built once from an [`ExtractionConfig`]; every pattern is compiled up front
/// so extraction itself cannot fail.
#[derive(Debug, Clone)]
pub struct Extractor {
    amount: CueSearch,
    date: CueSearch,
    date_global: Regex,
    identifiers: Vec<IdentifierRule>,
}

impl Extractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self, ExtractError> {
        let amount = CueSearch::from_cues("amount", &config.amount)?;

        let date_cues = &config.date;
        let date = CueSearch::new(
            "date",
            &date_cues.labels,
            &date_cues.pattern,
            date_cues.look_ahead,
            date_cues.cutoff,
        )?;
        let date_global = compile("global date", &date_cues.global_pattern)?;

        let id_cues = &config.identifier;
        let identifiers = id_cues
            .rules
            .iter()
            .map(|rule| {
                CueSearch::new(
                    &format!("identifier ({})", rule.label),
                    std::slice::from_ref(&rule.label),
                    &rule.pattern,
                    id_cues.look_ahead,
                    id_cues.cutoff,
                )
                .map(|search| IdentifierRule { search })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            amount,
            date,
            date_global,
            identifiers,
        })
    }

    /// Extract every field. Fields are independent: a missing one never
    /// prevents the others from being found.
    pub fn extract(&self, text: &str) -> ExtractedFields {
        let lines = ReceiptLines::new(text);
        let fields = ExtractedFields {
            total: self.amount_in(&lines),
            date: self.date_in(&lines).and_then(|hit| hit.normalize()),
            identifier: self.identifier_in(&lines),
        };
        debug!(
            lines = lines.len(),
            total = fields.total.is_some(),
            date = fields.date.is_some(),
            identifier = fields.identifier.is_some(),
            "fields extracted"
        );
        fields
    }

    pub fn extract_amount(&self, text: &str) -> Option<String> {
        self.amount_in(&ReceiptLines::new(text))
    }

    /// Canonical date, or `None` when no token is found or it does not name a
    /// real day. A cue hit that fails to normalize does not fall through to
    /// the global scan.
    pub fn extract_date(&self, text: &str) -> Option<CanonicalDate> {
        self.locate_date(text)?.normalize()
    }

    /// Raw date token with its provenance.
    pub fn locate_date(&self, text: &str) -> Option<DateHit> {
        self.date_in(&ReceiptLines::new(text))
    }

    pub fn extract_identifier(&self, text: &str) -> Option<Identifier> {
        self.identifier_in(&ReceiptLines::new(text))
    }

    fn amount_in(&self, lines: &ReceiptLines<'_>) -> Option<String> {
        self.amount.find(lines)
    }

    fn date_in(&self, lines: &ReceiptLines<'_>) -> Option<DateHit> {
        if let Some(token) = self.date.find(lines) {
            debug!(%token, "date found via cue");
            return Some(DateHit {
                token,
                source: DateSource::Cue,
            });
        }

        let hit = lines.iter().find_map(|line| {
            let caps = self.date_global.captures(line)?;
            let token = caps
                .name("date")
                .or_else(|| caps.get(1))
                .or_else(|| caps.get(0))?;
            Some(DateHit {
                token: token.as_str().to_string(),
                source: DateSource::GlobalScan {
                    time: caps.name("time").map(|t| t.as_str().to_string()),
                },
            })
        })?;
        debug!(token = %hit.token, "date found via global scan");
        Some(hit)
    }

    fn identifier_in(&self, lines: &ReceiptLines<'_>) -> Option<Identifier> {
        self.identifiers.iter().find_map(|rule| {
            let value = rule.search.find(lines)?;
            Some(Identifier {
                value,
                label: rule.label().to_string(),
            })
        })
    }

    /// Labels of the identifier priority list, in evaluation order.
    pub fn identifier_labels(&self) -> impl Iterator<Item = &str> {
        self.identifiers.iter().map(IdentifierRule::label)
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(&ExtractionConfig::default()).expect("built-in patterns compile")
    }
}
