use crate::Result;
use crate::backend::{AcousticModel, DecodeResult};
use crate::opts::DecodeOpts;

use super::{log_softmax, step};

/// A token sequence (start sequence included) and its cumulative log-probability.
type Scored = (Vec<u32>, f32);

/// Insert or overwrite `seq`, keeping first-insertion order.
fn upsert(list: &mut Vec<Scored>, seq: Vec<u32>, score: f32) {
    match list.iter_mut().find(|(s, _)| *s == seq) {
        Some(entry) => entry.1 = score,
        None => list.push((seq, score)),
    }
}

/// Indices of the `k` largest values, best first.
fn top_k(values: &[f32], k: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    let k = k.min(idx.len());
    if k == 0 {
        return Vec::new();
    }
    idx.select_nth_unstable_by(k - 1, |&a, &b| values[b].total_cmp(&values[a]));
    idx.truncate(k);
    idx.sort_by(|&a, &b| values[b].total_cmp(&values[a]).then(a.cmp(&b)));
    idx
}

/// Beam search with `opts.beams` hypotheses per window.
///
/// Rows are laid out window-major: rows `[w * beams, (w + 1) * beams)` belong to window
/// `w` and all attend to its features. No probability trace is captured, so results pair
/// with the common-run stitcher.
pub(super) fn beam_search<M: AcousticModel>(
    model: &mut M,
    features: &[M::Features],
    opts: &DecodeOpts,
) -> Result<Vec<DecodeResult>> {
    let vocab = model.vocabulary().clone();
    let beams = opts.beams;
    let n_audio = features.len();
    let max_candidates = ((beams as f32 * opts.patience).round() as usize).max(1);
    let sot_len = vocab.sot_sequence.len();

    let row_features: Vec<M::Features> = features
        .iter()
        .flat_map(|f| std::iter::repeat_n(f.clone(), beams))
        .collect();

    let mut rows = vec![vocab.sot_sequence.clone(); n_audio * beams];
    let mut sum_lp = vec![0.0f32; n_audio * beams];
    let mut finished: Vec<Vec<Scored>> = vec![Vec::new(); n_audio];

    for k in 0..vocab.text_context / 2 {
        let logits = step(model, &rows, &row_features, k == 0)?;

        let mut next_rows = Vec::with_capacity(rows.len());
        let mut next_lp = Vec::with_capacity(rows.len());

        for (audio, done) in finished.iter_mut().enumerate() {
            let mut scores: Vec<Scored> = Vec::new();
            for j in 0..beams {
                let idx = audio * beams + j;
                let lps = log_softmax(&logits[idx]);
                for token in top_k(&lps, beams + 1) {
                    let mut seq = rows[idx].clone();
                    seq.push(token as u32);
                    upsert(&mut scores, seq, sum_lp[idx] + lps[token]);
                }
            }

            // Stable: equal scores keep insertion order.
            scores.sort_by(|a, b| b.1.total_cmp(&a.1));

            let mut newly_finished: Vec<Scored> = Vec::new();
            let mut saved = 0;
            let mut fallback: Option<Scored> = None;
            for (seq, score) in scores {
                if seq.last() == Some(&vocab.eot) {
                    upsert(&mut newly_finished, seq, score);
                } else {
                    if fallback.is_none() {
                        fallback = Some((seq.clone(), score));
                    }
                    next_rows.push(seq);
                    next_lp.push(score);
                    saved += 1;
                    if saved == beams {
                        break;
                    }
                }
            }

            // Keep the row layout rectangular even if too few hypotheses stayed open.
            while saved < beams {
                let (seq, score) = match &fallback {
                    Some(entry) => entry.clone(),
                    None => {
                        let mut seq = rows[audio * beams].clone();
                        seq.push(vocab.eot);
                        (seq, f32::NEG_INFINITY)
                    }
                };
                next_rows.push(seq);
                next_lp.push(score);
                saved += 1;
            }

            for (seq, score) in newly_finished {
                if done.len() >= max_candidates {
                    break;
                }
                upsert(done, seq, score);
            }
        }

        rows = next_rows;
        sum_lp = next_lp;

        let completed = finished.iter().all(|f| f.len() >= max_candidates);
        if completed || rows.first().is_some_and(|r| r.len() > vocab.text_context) {
            break;
        }
    }

    // Close out windows that never finished enough hypotheses with their best open beams.
    for (audio, done) in finished.iter_mut().enumerate() {
        if done.len() >= beams {
            continue;
        }
        let mut open: Vec<usize> = (audio * beams..(audio + 1) * beams).collect();
        open.sort_by(|&a, &b| sum_lp[b].total_cmp(&sum_lp[a]));
        for idx in open {
            let mut seq = rows[idx].clone();
            if seq.last() != Some(&vocab.eot) {
                seq.push(vocab.eot);
            }
            upsert(done, seq, sum_lp[idx]);
            if done.len() >= beams {
                break;
            }
        }
    }

    Ok(finished
        .into_iter()
        .map(|candidates| {
            let mut best: Option<(f32, Scored)> = None;
            for (seq, lp) in candidates {
                let generated = seq.len().saturating_sub(sot_len + 1);
                let score = lp / (generated + 1) as f32;
                if best.as_ref().is_none_or(|(s, _)| score > *s) {
                    best = Some((score, (seq, lp)));
                }
            }
            let (tokens, cumulative_log_prob) = best
                .map(|(_, c)| c)
                .unwrap_or_else(|| (vocab.sot_sequence.clone(), 0.0));
            DecodeResult {
                tokens,
                cumulative_log_prob,
                trace: Vec::new(),
            }
        })
        .collect())
}
