use regex::Regex;
use tracing::trace;

use crate::similarity::ratio;

/// Recognized text split once into lines, with a lower-cased copy used for
/// cue matching. Values are always read from the original lines.
#[derive(Debug, Clone)]
pub struct ReceiptLines<'a> {
    original: Vec<&'a str>,
    lowered: Vec<String>,
}

/// The line that best matched a cue label.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineMatch {
    pub index: usize,
    pub score: f64,
}

impl<'a> ReceiptLines<'a> {
    pub fn new(text: &'a str) -> Self {
        let original: Vec<&str> = text.lines().collect();
        let lowered = original.iter().map(|l| l.to_lowercase()).collect();
        Self { original, lowered }
    }

    pub fn len(&self) -> usize {
        self.original.len()
    }

    pub fn is_empty(&self) -> bool {
        self.original.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.original.iter().copied()
    }

    /// Most similar line to `label`, if its score reaches `cutoff`.
    /// Equal scores resolve to the earliest line.
    pub fn best_line(&self, label: &str, cutoff: f64) -> Option<LineMatch> {
        let label = label.to_lowercase();
        let mut best: Option<LineMatch> = None;
        for (index, line) in self.lowered.iter().enumerate() {
            let score = ratio(line, &label);
            if best.map_or(true, |b| score > b.score) {
                best = Some(LineMatch { index, score });
            }
        }
        best.filter(|b| b.score >= cutoff)
    }

    /// First value matched by `pattern` in the matched line and the
    /// `look_ahead` lines after it.
    pub fn value_in_window(
        &self,
        start: usize,
        look_ahead: usize,
        pattern: &Regex,
    ) -> Option<String> {
        let end = self.original.len().min(start + 1 + look_ahead);
        self.original
            .get(start..end)?
            .iter()
            .find_map(|line| capture_value(pattern, line))
    }

    /// Try each label in order; the first label whose best line clears
    /// `cutoff` *and* has a value in its window wins.
    pub fn find_near<S: AsRef<str>>(
        &self,
        labels: &[S],
        pattern: &Regex,
        look_ahead: usize,
        cutoff: f64,
    ) -> Option<String> {
        labels.iter().find_map(|label| {
            let label = label.as_ref();
            let hit = self.best_line(label, cutoff)?;
            trace!(label, line = hit.index, score = hit.score, "cue matched");
            self.value_in_window(hit.index, look_ahead, pattern)
        })
    }
}

/// Search `text` for a line resembling any of `labels` and return the first
/// `pattern` value found from that line through `look_ahead` lines below it.
pub fn find_near<S: AsRef<str>>(
    text: &str,
    labels: &[S],
    pattern: &Regex,
    look_ahead: usize,
    cutoff: f64,
) -> Option<String> {
    ReceiptLines::new(text).find_near(labels, pattern, look_ahead, cutoff)
}

/// Capture group 1 when the pattern has one, otherwise the whole match.
/// Surrounding whitespace picked up by optional `\s` is dropped.
pub(crate) fn capture_value(pattern: &Regex, line: &str) -> Option<String> {
    let caps = pattern.captures(line)?;
    caps.get(1)
        .or_else(|| caps.get(0))
        .map(|m| m.as_str().trim().to_string())
}
