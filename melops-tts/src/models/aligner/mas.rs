//! Monotonic alignment search.

use ndarray::{Array2, ArrayView2};

/// Most likely monotonic path through `log_attn` `(T_mel, T_text)`.
///
/// Every frame is assigned exactly one token; the path starts at token 0,
/// ends at the last token and advances by at most one token per frame.
/// Returns a 0/1 matrix of the same shape.
pub fn monotonic_alignment(log_attn: ArrayView2<f32>) -> Array2<f32> {
    let (n_mel, n_text) = log_attn.dim();
    let mut hard = Array2::zeros((n_mel, n_text));
    if n_mel == 0 || n_text == 0 {
        return hard;
    }

    let mut score = Array2::from_elem((n_mel, n_text), f32::NEG_INFINITY);
    let mut from_prev = Array2::<bool>::from_elem((n_mel, n_text), false);
    score[[0, 0]] = log_attn[[0, 0]];

    for i in 1..n_mel {
        for j in 0..n_text {
            let stay = score[[i - 1, j]];
            let advance = if j > 0 { score[[i - 1, j - 1]] } else { f32::NEG_INFINITY };
            let (best, advanced) = if advance >= stay && j > 0 {
                (advance, true)
            } else {
                (stay, false)
            };
            score[[i, j]] = best + log_attn[[i, j]];
            from_prev[[i, j]] = advanced;
        }
    }

    let mut j = n_text - 1;
    for i in (0..n_mel).rev() {
        hard[[i, j]] = 1.0;
        if i > 0 && from_prev[[i, j]] {
            j -= 1;
        }
    }
    hard
}

/// Frames assigned to each token by a hard alignment `(T_mel, T_text)`.
pub fn durations(hard: ArrayView2<f32>) -> Vec<f32> {
    hard.columns().into_iter().map(|c| c.sum()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    #[test]
    fn follows_the_diagonal() {
        let log_attn = array![
            [0.0_f32, -9.0, -9.0],
            [-9.0, 0.0, -9.0],
            [-9.0, -9.0, 0.0],
        ];

        let hard = monotonic_alignment(log_attn.view());

        assert_eq!(hard, Array2::<f32>::eye(3));
    }

    #[test]
    fn every_frame_has_one_token_and_path_is_monotonic() {
        let log_attn = Array2::from_shape_fn((7, 3), |(i, j)| -((i as f32 / 2.0 - j as f32).powi(2)));

        let hard = monotonic_alignment(log_attn.view());

        let mut last = 0;
        for row in hard.rows() {
            assert_eq!(row.sum(), 1.0);
            let j = row.iter().position(|&v| v == 1.0).unwrap();
            assert!(j == last || j == last + 1);
            last = j;
        }
        assert_eq!(hard[[0, 0]], 1.0);
        assert_eq!(hard[[6, 2]], 1.0);
        assert_eq!(durations(hard.view()).iter().sum::<f32>(), 7.0);
    }

    #[test]
    fn single_token_takes_every_frame() {
        let hard = monotonic_alignment(Array2::<f32>::zeros((4, 1)).view());

        assert_eq!(durations(hard.view()), vec![4.0]);
    }
}
