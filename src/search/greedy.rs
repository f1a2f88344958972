use crate::Result;
use crate::backend::{AcousticModel, DecodeResult};
use crate::opts::DecodeOpts;

use super::{argmax, log_softmax, softmax, step};

/// Arg-max decoding of every window in lock step.
///
/// Each step records the text-token distribution behind the token it picks, which is what
/// the trace stitcher later aligns. Only the first timestamp (`<|0.00|>`) may be chosen;
/// later ones are masked out. Rows that already ended keep emitting the end token until
/// every row has ended or the row length reaches `max_greedy_tokens`.
pub(super) fn greedy_search<M: AcousticModel>(
    model: &mut M,
    features: &[M::Features],
    opts: &DecodeOpts,
) -> Result<Vec<DecodeResult>> {
    let vocab = model.vocabulary().clone();
    let n = features.len();
    let text_len = vocab.text_len();

    let mut rows = vec![vocab.sot_sequence.clone(); n];
    let mut ended = vec![false; n];
    let mut log_probs = vec![0.0f32; n];
    let mut traces: Vec<Vec<Vec<f32>>> = vec![Vec::new(); n];

    let mut first = true;
    while n > 0 && !ended.iter().all(|e| *e) && rows[0].len() < opts.max_greedy_tokens {
        let logits = step(model, &rows, features, first)?;
        first = false;

        for (i, row_logits) in logits.iter().enumerate() {
            if ended[i] {
                rows[i].push(vocab.eot);
                continue;
            }

            let mut masked = row_logits.clone();
            let first_masked = (vocab.timestamp_begin as usize + 1).min(masked.len());
            masked[first_masked..].fill(f32::NEG_INFINITY);

            let token = argmax(&masked) as u32;
            log_probs[i] += log_softmax(&masked)[token as usize];

            if token == vocab.eot {
                ended[i] = true;
            } else {
                traces[i].push(softmax(&row_logits[..text_len.min(row_logits.len())]));
            }
            rows[i].push(token);
        }
    }

    Ok(rows
        .into_iter()
        .zip(log_probs)
        .zip(traces)
        .map(|((mut tokens, cumulative_log_prob), trace)| {
            // Drop the padding frozen rows collected after their first end token.
            let sot_len = vocab.sot_sequence.len();
            if let Some(pos) = tokens[sot_len..].iter().position(|&t| t == vocab.eot) {
                tokens.truncate(sot_len + pos + 1);
            }
            DecodeResult {
                tokens,
                cumulative_log_prob,
                trace,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;

    #[test]
    fn only_the_first_timestamp_survives_masking() -> anyhow::Result<()> {
        let mut model = ScriptedModel::new(Box::new(|_, generated| match generated.len() {
            // <|0.10|> is the favourite but masked; <|0.00|> beats every text token.
            0 => vec![(TS_BEGIN + 5, 10.0), (TS_BEGIN, 5.0), (7, 1.0)],
            _ => vec![(EOT, 10.0)],
        }));

        let results = greedy_search(&mut model, &[0], &DecodeOpts::default())?;
        assert_eq!(results[0].tokens, vec![SOT, 92, 93, TS_BEGIN, EOT]);
        Ok(())
    }

    #[test]
    fn rows_stop_at_the_greedy_token_cap() -> anyhow::Result<()> {
        let mut model = ScriptedModel::new(Box::new(|_, _| vec![(7, 10.0)]));
        let opts = DecodeOpts {
            max_greedy_tokens: 10,
            ..DecodeOpts::default()
        };

        let results = greedy_search(&mut model, &[0], &opts)?;
        assert_eq!(results[0].tokens.len(), 10);
        assert_eq!(results[0].trace.len(), 7);
        assert!(!results[0].tokens.contains(&EOT));
        Ok(())
    }

    #[test]
    fn cache_resets_only_on_the_first_step() -> anyhow::Result<()> {
        let mut model = ScriptedModel::reading(vec![vec![1, 2, 3]]);
        greedy_search(&mut model, &[0], &DecodeOpts::default())?;
        assert_eq!(model.resets, vec![true, false, false, false]);
        Ok(())
    }

    #[test]
    fn trace_is_a_text_token_distribution() -> anyhow::Result<()> {
        let mut model = ScriptedModel::reading(vec![vec![4]]);
        let results = greedy_search(&mut model, &[0], &DecodeOpts::default())?;

        let trace = &results[0].trace[0];
        assert_eq!(trace.len(), (TS_BEGIN - 1) as usize);
        assert_eq!(argmax(trace), 4);
        assert!((trace.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(results[0].cumulative_log_prob <= 0.0);
        Ok(())
    }

    #[test]
    fn immediate_end_token_is_an_empty_decode() -> anyhow::Result<()> {
        let mut model = ScriptedModel::reading(vec![vec![]]);
        let results = greedy_search(&mut model, &[0], &DecodeOpts::default())?;
        assert_eq!(results[0].tokens, vec![SOT, 92, 93, EOT]);
        assert!(results[0].trace.is_empty());
        Ok(())
    }
}
