use super::Optimizer;
use crate::params::ParameterStore;
use ndarray::{ArrayD, Zip};

/// Adam optimizer (Kingma & Ba, 2015).
///
/// Update rule:
/// ```text
/// g = grad + weight_decay * param
/// m = β₁ m + (1 - β₁) g
/// v = β₂ v + (1 - β₂) g²
/// param -= lr * m̂ / (√v̂ + ε)
/// ```
#[derive(Debug)]
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    weight_decay: f32,
    /// First and second moment estimates, by parameter index
    state: Vec<Option<(ArrayD<f32>, ArrayD<f32>)>>,
    t: u64,
}

impl Adam {
    /// Create a new Adam optimizer with default hyperparameters.
    ///
    /// Default: β₁=0.9, β₂=0.999, ε=1e-8
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

    /// Set beta parameters.
    #[must_use]
    pub fn betas(mut self, beta1: f32, beta2: f32) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    /// Set epsilon for numerical stability.
    #[must_use]
    pub fn eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    /// Set weight decay (L2 regularization, applied to gradient).
    #[must_use]
    pub fn weight_decay(mut self, wd: f32) -> Self {
        self.weight_decay = wd;
        self
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut ParameterStore) {
        self.t += 1;
        if self.state.len() < params.len() {
            self.state.resize(params.len(), None);
        }

        let bias_correction1 = 1.0 - self.beta1.powi(self.t as i32);
        let bias_correction2 = 1.0 - self.beta2.powi(self.t as i32);
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
                    let v_hat = *v / bias_correction2;
                    *p -= lr * m_hat / (v_hat.sqrt() + eps);
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
