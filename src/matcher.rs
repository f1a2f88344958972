//! Match script files to audio chapters by name.
//!
//! Every script label is scored against each stream's file name and each of its chapter
//! labels with the classic fuzzy "ratio" (normalized indel similarity, 0..=100). The single
//! best-scoring candidate wins; later candidates must score strictly higher to replace it.

use std::collections::HashMap;

use rapidfuzz::distance::indel;
use tracing::warn;

/// Labels of one audio file: its name and the labels of its chapters, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamLabels {
    pub name: String,
    pub chapters: Vec<String>,
}

/// Where a script was placed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assignment {
    /// Index of the matched audio file.
    pub stream: usize,
    /// Matched chapter; `None` when the file name itself was the best match.
    pub chapter: Option<usize>,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScriptMatch {
    Matched(Assignment),
    /// Every candidate scored zero.
    Unmatched,
    /// There was nothing to match against.
    NoCandidates,
}

impl ScriptMatch {
    pub fn assignment(&self) -> Option<&Assignment> {
        match self {
            ScriptMatch::Matched(a) => Some(a),
            _ => None,
        }
    }
}

/// Fuzzy similarity of two labels in `0.0..=100.0`.
pub fn similarity(a: &str, b: &str) -> f64 {
    indel::normalized_similarity(a.chars(), b.chars()) * 100.0
}

/// Pick the best stream or chapter for every script label, in script order.
pub fn match_scripts(scripts: &[String], streams: &[StreamLabels]) -> Vec<ScriptMatch> {
    scripts
        .iter()
        .map(|script| {
            if streams.is_empty() {
                return ScriptMatch::NoCandidates;
            }

            let mut best: Option<Assignment> = None;
            let mut consider = |stream: usize, chapter: Option<usize>, label: &str| {
                let score = similarity(script, label);
                if score > best.map_or(0.0, |b| b.score) {
                    best = Some(Assignment {
                        stream,
                        chapter,
                        score,
                    });
                }
            };

            for (j, s) in streams.iter().enumerate() {
                consider(j, None, &s.name);
                for (k, label) in s.chapters.iter().enumerate() {
                    consider(j, Some(k), label);
                }
            }

            match best {
                Some(a) => ScriptMatch::Matched(a),
                None => {
                    warn!(script = %script, "couldn't find a match for script by name");
                    ScriptMatch::Unmatched
                }
            }
        })
        .collect()
}

/// Inverse map `(stream, chapter) -> script index`. A later script wins a shared target.
pub fn chapter_index(matches: &[ScriptMatch]) -> HashMap<(usize, Option<usize>), usize> {
    matches
        .iter()
        .enumerate()
        .filter_map(|(i, m)| m.assignment().map(|a| ((a.stream, a.chapter), i)))
        .collect()
}
