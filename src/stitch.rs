//! Resolve speech transcribed twice by overlapping windows.
//!
//! Two strategies, both returning a [`Cut`]:
//! - [`trace_cut`] aligns the per-step probability traces of two greedy decodes.
//! - [`common_run_cut`] splices on the longest token run the two decodes share.
//!
//! Both only look at the earlier window's tail and the later window's head, so nothing
//! outside the overlap region is ever dropped.

use std::ops::Range;

/// Where to split a pair of adjacent decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cut {
    /// The earlier window keeps tokens `[..prev_end]`.
    pub prev_end: usize,
    /// The later window keeps tokens `[next_start..]`.
    pub next_start: usize,
}

// Absorbs rounding in fractions like 2/3 so region bounds land on whole tokens.
const EPSILON: f64 = 1e-9;

/// First index of the tail of a `len`-token decode that may overlap its successor.
fn tail_start(len: usize, overlap_fraction: f64) -> usize {
    ((len as f64 * (1.0 - overlap_fraction) + EPSILON).floor() as usize).min(len)
}

/// Exclusive end of the head of a `len`-token decode that may overlap its predecessor.
fn head_end(len: usize, overlap_fraction: f64) -> usize {
    ((len as f64 * overlap_fraction - EPSILON).ceil().max(0.0) as usize).min(len)
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Find the step pair where both windows most agree on what was said.
///
/// `prev[k]`/`next[k]` are the text-token distributions behind generated token `k`.
/// Scores are dot products; the earliest `x`, then the earliest `y`, wins ties. Returns
/// `None` when either trace is empty or no pair reaches `min_similarity`.
pub fn trace_cut(
    prev: &[Vec<f32>],
    next: &[Vec<f32>],
    overlap_fraction: f64,
    min_similarity: f32,
) -> Option<Cut> {
    if prev.is_empty() || next.is_empty() {
        return None;
    }

    let xs = tail_start(prev.len(), overlap_fraction)..prev.len();
    let ys = 0..head_end(next.len(), overlap_fraction);

    let mut best: Option<(f32, Cut)> = None;
    for x in xs {
        for y in ys.clone() {
            let score = dot(&prev[x], &next[y]);
            if best.is_none_or(|(s, _)| score > s) {
                best = Some((
                    score,
                    Cut {
                        prev_end: x,
                        next_start: y,
                    },
                ));
            }
        }
    }

    best.filter(|(score, _)| *score >= min_similarity)
        .map(|(_, cut)| cut)
}

/// Longest contiguous run shared by `f` and `s`, as index ranges into each.
///
/// Classic rolling-row dynamic program over `s`, scanned right to left so a single row
/// suffices. Only a strictly longer run replaces the best, so the leftmost run in `f`
/// wins ties. Empty inputs or no shared element give `(0..0, 0..0)`.
pub fn longest_common_run<T: PartialEq>(f: &[T], s: &[T]) -> (Range<usize>, Range<usize>) {
    let mut row = vec![0usize; s.len()];
    let mut longest = 0usize;
    let mut f_end = 0usize;
    let mut s_end = 0usize;

    for (i, a) in f.iter().enumerate() {
        for j in (0..s.len()).rev() {
            if *a == s[j] {
                row[j] = if j == 0 { 1 } else { row[j - 1] + 1 };
                if row[j] > longest {
                    longest = row[j];
                    f_end = i + 1;
                    s_end = j + 1;
                }
            } else {
                row[j] = 0;
            }
        }
    }

    (f_end - longest..f_end, s_end - longest..s_end)
}

/// Splice two token decodes on the longest run they share in the overlap.
///
/// Tokens for which `skip` returns true (timestamps) are ignored while matching. The
/// earlier decode keeps everything up to the end of the run, the later one resumes right
/// after it. Runs shorter than `min_run` are treated as coincidence and yield `None`.
pub fn common_run_cut(
    prev: &[u32],
    next: &[u32],
    overlap_fraction: f64,
    min_run: usize,
    skip: impl Fn(u32) -> bool,
) -> Option<Cut> {
    let tail: Vec<(usize, u32)> = (tail_start(prev.len(), overlap_fraction)..prev.len())
        .map(|i| (i, prev[i]))
        .filter(|(_, t)| !skip(*t))
        .collect();
    let head: Vec<(usize, u32)> = (0..head_end(next.len(), overlap_fraction))
        .map(|i| (i, next[i]))
        .filter(|(_, t)| !skip(*t))
        .collect();

    let tail_tokens: Vec<u32> = tail.iter().map(|(_, t)| *t).collect();
    let head_tokens: Vec<u32> = head.iter().map(|(_, t)| *t).collect();
    let (in_tail, in_head) = longest_common_run(&tail_tokens, &head_tokens);

    if in_tail.is_empty() || in_tail.len() < min_run.max(1) {
        return None;
    }

    Some(Cut {
        prev_end: tail[in_tail.end - 1].0 + 1,
        next_start: head[in_head.end - 1].0 + 1,
    })
}
