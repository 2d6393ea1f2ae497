use super::Optimizer;
use crate::params::ParameterStore;
use ndarray::{ArrayD, Zip};

/// Rectified Adam (Liu et al., 2020).
///
/// Falls back to bias-corrected momentum SGD while the variance of the
/// adaptive learning rate is intractable (ρₜ ≤ 5), then applies the
/// variance rectification term `r` to the Adam update.
#[derive(Debug)]
pub struct RAdam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    weight_decay: f32,
    state: Vec<Option<(ArrayD<f32>, ArrayD<f32>)>>,
    t: u64,
}

impl RAdam {
    #[must_use]
    pub fn new(lr: f32) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
            state: Vec::new(),
            t: 0,
        }
    }

    #[must_use]
    pub fn betas(mut self, beta1: f32, beta2: f32) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    #[must_use]
    pub fn eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    #[must_use]
    pub fn weight_decay(mut self, wd: f32) -> Self {
        self.weight_decay = wd;
        self
    }

    /// Rectification factor for step `t`, `None` while ρₜ ≤ 5.
    fn rectification(&self, t: u64) -> Option<f32> {
        let beta2 = f64::from(self.beta2);
        let beta2_t = beta2.powi(t as i32);
        let rho_inf = 2.0 / (1.0 - beta2) - 1.0;
        let rho_t = rho_inf - 2.0 * t as f64 * beta2_t / (1.0 - beta2_t);

        (rho_t > 5.0).then(|| {
            let r = ((rho_t - 4.0) * (rho_t - 2.0) * rho_inf)
                / ((rho_inf - 4.0) * (rho_inf - 2.0) * rho_t);
            r.sqrt() as f32
        })
    }
}

impl Optimizer for RAdam {
    fn step(&mut self, params: &mut ParameterStore) {
        self.t += 1;
        if self.state.len() < params.len() {
            self.state.resize(params.len(), None);
        }

        let bias_correction1 = 1.0 - self.beta1.powi(self.t as i32);
        let bias_correction2 = 1.0 - self.beta2.powi(self.t as i32);
        let rect = self.rectification(self.t);
        let (beta1, beta2, eps, lr, wd) = (self.beta1, self.beta2, self.eps, self.lr, self.weight_decay);

        for (idx, param) in params.iter_mut().enumerate() {
            if !param.requires_grad {
                continue;
            }
            let Some(grad) = param.grad.as_ref() else {
                continue;
            };

            let (m, v) = self.state[idx].get_or_insert_with(|| {
                (
                    ArrayD::zeros(param.value.raw_dim()),
                    ArrayD::zeros(param.value.raw_dim()),
                )
            });

            Zip::from(&mut param.value)
                .and(grad)
                .and(m)
                .and(v)
                .for_each(|p, &g, m, v| {
                    let g = g + wd * *p;
                    *m = beta1 * *m + (1.0 - beta1) * g;
                    *v = beta2 * *v + (1.0 - beta2) * g * g;

                    let m_hat = *m / bias_correction1;
                    match rect {
                        Some(r) => {
                            let adaptive = bias_correction2.sqrt() / (v.sqrt() + eps);
                            *p -= lr * m_hat * adaptive * r;
                        }
                        None => *p -= lr * m_hat,
                    }
                });
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn steps(&self) -> u64 {
        self.t
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn warmup_steps_are_unrectified() {
        let radam = RAdam::new(0.1);

        assert!(radam.rectification(1).is_none());
        assert!(radam.rectification(4).is_none());
        let r = radam.rectification(1000).unwrap();
        assert!(r > 0.0 && r < 1.0);
    }

    #[test]
    fn first_step_is_momentum_sgd() {
        let mut store = ParameterStore::new();
        let idx = store.register("w", arr1(&[1.0_f32]).into_dyn());
        store
            .by_index_mut(idx)
            .accumulate(&arr1(&[0.5_f32]).into_dyn());

        let mut radam = RAdam::new(0.1);
        radam.step(&mut store);

        // m̂ = g on the first step
        assert!((store.by_index(idx).value[0] - 0.95).abs() < 1e-6);
    }

    #[test]
    fn minimizes_quadratic() {
        let mut store = ParameterStore::new();
        let idx = store.register("x", arr1(&[3.0_f32]).into_dyn());
        let mut radam = RAdam::new(0.05);

        for _ in 0..1000 {
            store.zero_grad();
            let x = store.by_index(idx).value[0];
            store
                .by_index_mut(idx)
                .accumulate(&arr1(&[2.0 * x]).into_dyn());
            radam.step(&mut store);
        }

        assert!(store.by_index(idx).value[0].abs() < 0.1);
    }
}
