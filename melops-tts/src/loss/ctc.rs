//! Forward-sum alignment loss (CTC over text positions).

use ndarray::{Array1, Array2, ArrayView2, Array4, s};

const BLANK_LOGPROB: f32 = -1.0;

fn log_add(a: f32, b: f32) -> f32 {
    if a == f32::NEG_INFINITY {
        return b;
    }
    if b == f32::NEG_INFINITY {
        return a;
    }
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

/// Row-wise log-softmax of a `(T, K)` matrix.
fn log_softmax_rows(x: ArrayView2<f32>) -> Array2<f32> {
    let mut out = x.to_owned();
    for mut row in out.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        let lse = max + row.iter().map(|&v| (v - max).exp()).sum::<f32>().ln();
        row.mapv_inplace(|v| v - lse);
    }
    out
}

/// Negative log-likelihood of emitting text positions `1..=n_text` in order
/// over `n_mel` frames, where column 0 of `logprob` is the blank.
fn ctc_nll(logprob: ArrayView2<f32>, n_text: usize) -> f32 {
    let n_frames = logprob.nrows();
    let states = 2 * n_text + 1;
    // Extended label sequence: blank, 1, blank, 2, ..., n_text, blank
    let label = |s: usize| if s % 2 == 0 { 0 } else { s.div_ceil(2) };

    let mut alpha = vec![f32::NEG_INFINITY; states];
    alpha[0] = logprob[[0, 0]];
    if states > 1 {
        alpha[1] = logprob[[0, label(1)]];
    }

    for t in 1..n_frames {
        let prev = alpha.clone();
        for s in 0..states {
            let mut acc = prev[s];
            if s >= 1 {
                acc = log_add(acc, prev[s - 1]);
            }
            // Text labels are all distinct, so skipping a blank is always allowed
            if s >= 2 && s % 2 == 1 {
                acc = log_add(acc, prev[s - 2]);
            }
            alpha[s] = acc + logprob[[t, label(s)]];
        }
    }

    let last = alpha[states - 1];
    let ll = if states > 1 {
        log_add(last, alpha[states - 2])
    } else {
        last
    };
    -ll
}

/// Forward-sum loss over attention log-probabilities `(B, 1, T_mel, T_text)`.
///
/// Each utterance's loss is normalized by its text length and infeasible
/// alignments (fewer frames than tokens) count as zero. The batch mean is
/// returned.
pub fn forward_sum_loss(
    attn_logprob: &Array4<f32>,
    in_lens: &Array1<i64>,
    out_lens: &Array1<i64>,
) -> f32 {
    let batch = attn_logprob.shape()[0];
    if batch == 0 {
        return 0.0;
    }

    let total: f32 = (0..batch)
        .map(|b| {
            let n_text = in_lens[b].max(0) as usize;
            let n_mel = out_lens[b].max(0) as usize;
            if n_text == 0 || n_mel == 0 {
                return 0.0;
            }

            let mut padded = Array2::<f32>::from_elem((n_mel, n_text + 1), BLANK_LOGPROB);
            padded
                .slice_mut(s![.., 1..])
                .assign(&attn_logprob.slice(s![b, 0, ..n_mel, ..n_text]));

            let logprob = log_softmax_rows(padded.view());
            let nll = ctc_nll(logprob.view(), n_text);
            if nll.is_finite() { nll / n_text as f32 } else { 0.0 }
        })
        .sum();

    total / batch as f32
}
