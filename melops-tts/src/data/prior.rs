//! Beta-binomial alignment prior.

use ndarray::Array2;

/// Prior over text positions for every mel frame, shape `(mel_count, text_count)`.
///
/// Row `i` (1-based) is the beta-binomial pmf with `n = text_count`,
/// `α = scaling · i`, `β = scaling · (mel_count + 1 − i)`, evaluated at
/// `0..text_count`. Early frames favour early tokens, late frames late ones.
pub fn beta_binomial_prior(text_count: usize, mel_count: usize, scaling: f32) -> Array2<f32> {
    let mut prior = Array2::zeros((mel_count, text_count));
    let n = text_count as f64;
    let scaling = f64::from(scaling);

    for (row_idx, mut row) in prior.rows_mut().into_iter().enumerate() {
        let i = (row_idx + 1) as f64;
        let a = scaling * i;
        let b = scaling * (mel_count as f64 + 1.0 - i);

        // pmf(0) = Π (b + j) / (a + b + j) for j in 0..n
        let mut pmf: f64 = (0..text_count)
            .map(|j| (b + j as f64) / (a + b + j as f64))
            .product();

        for k in 0..text_count {
            row[k] = pmf as f32;
            let k = k as f64;
            pmf *= (n - k) / (k + 1.0) * (k + a) / (n - k - 1.0 + b);
        }
    }

    prior
}
