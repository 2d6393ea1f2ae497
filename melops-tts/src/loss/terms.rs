//! Insertion-ordered loss terms.

use serde::Serialize;

/// Name of the auxiliary attention binarization term.
pub const BINARIZATION_LOSS: &str = "binarization_loss";

/// A scalar loss value with its aggregation weight.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LossTerm {
    pub value: f32,
    pub weight: f32,
}

/// Insertion-ordered mapping from loss name to [`LossTerm`].
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LossTerms {
    entries: Vec<(String, LossTerm)>,
}

impl LossTerms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a term, replacing the value of an existing name in place.
    pub fn push(&mut self, name: impl Into<String>, value: f32, weight: f32) {
        let name = name.into();
        let term = LossTerm { value, weight };
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = term,
            None => self.entries.push((name, term)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&LossTerm> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, term)| term)
    }

    /// Effective weight of `name`, zero when absent or non-positive.
    pub fn active_weight(&self, name: &str) -> f32 {
        self.get(name).map_or(0.0, |t| t.weight.max(0.0))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LossTerm)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn names(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>> FromIterator<(N, f32, f32)> for LossTerms {
    fn from_iter<I: IntoIterator<Item = (N, f32, f32)>>(iter: I) -> Self {
        let mut terms = Self::new();
        for (name, value, weight) in iter {
            terms.push(name, value, weight);
        }
        terms
    }
}
