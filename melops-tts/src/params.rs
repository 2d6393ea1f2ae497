//! Named trainable parameters.

use crate::error::{ModelError, Result};
use ndarray::{ArrayD, IxDyn, Zip};
use serde::{Deserialize, Serialize};

/// A named tensor with its accumulated gradient.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: ArrayD<f32>,
    #[serde(skip)]
    pub grad: Option<ArrayD<f32>>,
    pub requires_grad: bool,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: ArrayD<f32>) -> Self {
        Self {
            name: name.into(),
            value,
            grad: None,
            requires_grad: true,
        }
    }

    /// Add `grad` into the accumulated gradient. No-op when frozen.
    pub fn accumulate(&mut self, grad: &ArrayD<f32>) {
        if !self.requires_grad {
            return;
        }
        match &mut self.grad {
            Some(g) => Zip::from(g).and(grad).for_each(|g, &d| *g += d),
            None => self.grad = Some(grad.clone()),
        }
    }
}

/// Ordered collection of named parameters.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ParameterStore {
    params: Vec<Parameter>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parameter and return its index.
    pub fn register(&mut self, name: impl Into<String>, value: ArrayD<f32>) -> usize {
        self.params.push(Parameter::new(name, value));
        self.params.len() - 1
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }

    pub fn get(&self, name: &str) -> Result<&Parameter> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ModelError::UnknownParameter(name.to_string()).into())
    }

    pub fn by_index(&self, idx: usize) -> &Parameter {
        &self.params[idx]
    }

    pub fn by_index_mut(&mut self, idx: usize) -> &mut Parameter {
        &mut self.params[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Parameter> {
        self.params.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Number of scalar elements that receive gradient updates.
    pub fn num_trainable(&self) -> usize {
        self.params
            .iter()
            .filter(|p| p.requires_grad)
            .map(|p| p.value.len())
            .sum()
    }

    pub fn zero_grad(&mut self) {
        for p in &mut self.params {
            p.grad = None;
        }
    }

    /// Copy values from `other` by name, leaving flags and gradients alone.
    pub fn load_values(&mut self, other: &ParameterStore) -> Result<()> {
        for src in &other.params {
            let idx = self
                .index_of(&src.name)
                .ok_or_else(|| ModelError::UnknownParameter(src.name.clone()))?;
            let dst = &mut self.params[idx];
            if dst.value.shape() != src.value.shape() {
                return Err(ndarray::ShapeError::from_kind(ndarray::ErrorKind::IncompatibleShape).into());
            }
            dst.value.assign(&src.value);
        }
        Ok(())
    }

    /// Global L2 norm of all present gradients.
    pub fn grad_norm(&self) -> f32 {
        self.params
            .iter()
            .filter_map(|p| p.grad.as_ref())
            .flat_map(|g| g.iter())
            .map(|g| g * g)
            .sum::<f32>()
            .sqrt()
    }

    /// Scale gradients so their global norm is at most `max_norm`.
    pub fn clip_grad_norm(&mut self, max_norm: f32) -> f32 {
        let norm = self.grad_norm();
        if max_norm > 0.0 && norm > max_norm {
            let scale = max_norm / (norm + 1e-6);
            for g in self.params.iter_mut().filter_map(|p| p.grad.as_mut()) {
                g.mapv_inplace(|v| v * scale);
            }
        }
        norm
    }
}

/// Shorthand for a zero-initialised dynamic array.
pub(crate) fn zeros(shape: &[usize]) -> ArrayD<f32> {
    ArrayD::zeros(IxDyn(shape))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn frozen_parameters_ignore_gradients() {
        let mut p = Parameter::new("w", arr1(&[1.0_f32, 2.0]).into_dyn());
        p.requires_grad = false;
        p.accumulate(&arr1(&[1.0_f32, 1.0]).into_dyn());

        assert!(p.grad.is_none());
    }

    #[test]
    fn gradients_accumulate() {
        let mut p = Parameter::new("w", arr1(&[0.0_f32, 0.0]).into_dyn());
        p.accumulate(&arr1(&[1.0_f32, 2.0]).into_dyn());
        p.accumulate(&arr1(&[0.5_f32, 0.5]).into_dyn());

        assert_eq!(p.grad.unwrap(), arr1(&[1.5_f32, 2.5]).into_dyn());
    }

    #[test]
    fn clip_scales_to_max_norm() {
        let mut store = ParameterStore::new();
        let idx = store.register("w", zeros(&[2]));
        store
            .by_index_mut(idx)
            .accumulate(&arr1(&[3.0_f32, 4.0]).into_dyn());

        let norm = store.clip_grad_norm(1.0);

        assert!((norm - 5.0).abs() < 1e-6);
        assert!((store.grad_norm() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn load_values_by_name() {
        let mut a = ParameterStore::new();
        a.register("w", zeros(&[2]));
        let mut b = ParameterStore::new();
        b.register("w", arr1(&[1.0_f32, 2.0]).into_dyn());

        a.load_values(&b).unwrap();
        assert_eq!(a.get("w").unwrap().value, arr1(&[1.0_f32, 2.0]).into_dyn());

        let mut c = ParameterStore::new();
        c.register("v", zeros(&[1]));
        assert!(a.load_values(&c).is_err());
    }
}
