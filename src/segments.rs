use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A timestamped span of transcribed text.
///
/// Segments are immutable once built: the only ways to get one are [`Segment::new`] (which
/// validates the time range) and deserializing a cache entry (which is re-validated on load).
/// Times are in seconds relative to the start of the chapter that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    text: String,
    start_seconds: f64,
    end_seconds: f64,
}

impl Segment {
    /// Build a segment, rejecting negative, non-finite or inverted ranges.
    pub fn new(text: impl Into<String>, start_seconds: f64, end_seconds: f64) -> Result<Self> {
        let seg = Self {
            text: text.into(),
            start_seconds,
            end_seconds,
        };
        seg.validate()?;
        Ok(seg)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn start_seconds(&self) -> f64 {
        self.start_seconds
    }

    pub fn end_seconds(&self) -> f64 {
        self.end_seconds
    }

    /// The same segment moved later in time by `offset_seconds`.
    ///
    /// Used to turn chapter-relative times into file-relative ones. Inline `<|S.SS|>`
    /// timestamp tags in the text move with it.
    pub fn shifted(&self, offset_seconds: f64) -> Result<Self> {
        Self::new(
            shift_timestamp_tags(&self.text, offset_seconds),
            self.start_seconds + offset_seconds,
            self.end_seconds + offset_seconds,
        )
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !self.start_seconds.is_finite() || !self.end_seconds.is_finite() {
            return Err(Error::invalid_input("segment times must be finite"));
        }
        if self.start_seconds < 0.0 {
            return Err(Error::invalid_input(format!(
                "segment start {} is negative",
                self.start_seconds
            )));
        }
        if self.end_seconds < self.start_seconds {
            return Err(Error::invalid_input(format!(
                "segment end {} precedes start {}",
                self.end_seconds, self.start_seconds
            )));
        }
        Ok(())
    }
}

/// Add `offset_seconds` to every numeric `<|S.SS|>` tag; other `<|...|>` text is kept as is.
fn shift_timestamp_tags(text: &str, offset_seconds: f64) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find("<|") {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 2..];
        let Some(close) = tail.find("|>") else {
            rest = &rest[open..];
            break;
        };

        let inner = &tail[..close];
        match inner.parse::<f64>() {
            Ok(seconds) if seconds.is_finite() => {
                out.push_str(&format!("<|{:.2}|>", seconds + offset_seconds));
            }
            _ => {
                out.push_str("<|");
                out.push_str(inner);
                out.push_str("|>");
            }
        }
        rest = &tail[close + 2..];
    }

    out.push_str(rest);
    out
}

// Validation rules out NaN, so bitwise float comparison is a total equivalence here.
impl Eq for Segment {}

impl Hash for Segment {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.text.hash(state);
        self.start_seconds.to_bits().hash(state);
        self.end_seconds.to_bits().hash(state);
    }
}
