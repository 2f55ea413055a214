//! L2 normalization of raw model output

use serde::{Serialize, Serializer};

use crate::error::NormalizationError;

/// Model output before normalization
#[derive(Debug, Clone, PartialEq)]
pub struct RawVector(Vec<f32>);

impl RawVector {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Scale to unit Euclidean norm
    pub fn normalize(self) -> Result<EmbeddingVector, NormalizationError> {
        normalize(self.0).map(EmbeddingVector)
    }
}

impl From<Vec<f32>> for RawVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Unit-length embedding
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector(Vec<f32>);

impl EmbeddingVector {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    pub fn norm(&self) -> f64 {
        l2_norm(&self.0)
    }
}

impl Serialize for EmbeddingVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

/// Euclidean norm, accumulated in f64
pub fn l2_norm(values: &[f32]) -> f64 {
    values
        .iter()
        .map(|&v| f64::from(v) * f64::from(v))
        .sum::<f64>()
        .sqrt()
}

/// Divide every element by the vector's norm
pub fn normalize(mut values: Vec<f32>) -> Result<Vec<f32>, NormalizationError> {
    if values.is_empty() {
        return Err(NormalizationError::Empty);
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(NormalizationError::NonFinite);
    }

    let norm = l2_norm(&values);
    if norm == 0.0 {
        return Err(NormalizationError::Degenerate);
    }

    for v in values.iter_mut() {
        *v = (f64::from(*v) / norm) as f32;
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_unit_norm() {
        let v = RawVector::from(vec![3.0, 4.0]).normalize().unwrap();
        assert_eq!(v.as_slice(), &[0.6, 0.8]);
        assert!((v.norm() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let raw: Vec<f32> = (0..512).map(|i| ((i * 37 % 101) as f32 - 50.0) / 7.0).collect();
        let once = normalize(raw).unwrap();
        let twice = normalize(once.clone()).unwrap();

        for (a, b) in once.iter().zip(twice.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_zero_vector_is_degenerate() {
        assert_eq!(
            RawVector::from(vec![0.0; 512]).normalize().unwrap_err(),
            NormalizationError::Degenerate
        );
    }

    #[test]
    fn test_empty_and_non_finite() {
        assert_eq!(normalize(vec![]).unwrap_err(), NormalizationError::Empty);
        assert_eq!(
            normalize(vec![1.0, f32::NAN]).unwrap_err(),
            NormalizationError::NonFinite
        );
        assert_eq!(
            normalize(vec![f32::INFINITY, 0.0]).unwrap_err(),
            NormalizationError::NonFinite
        );
    }

    #[test]
    fn test_tiny_values_do_not_underflow() {
        // squares underflow in f32 but not in f64
        let v = normalize(vec![1e-30, 1e-30]).unwrap();
        assert!((v[0] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn test_serializes_as_array() {
        let v = RawVector::from(vec![0.0, 2.0]).normalize().unwrap();
        assert_eq!(serde_json::to_string(&v).unwrap(), "[0.0,1.0]");
    }
}
