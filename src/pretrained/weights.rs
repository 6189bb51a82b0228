use crate::error::{Result, VqaError};
use burn::prelude::*;
use std::collections::HashMap;

/// Path of the imported classifier weight, `[in, out]`.
pub const CLASSIFIER_WEIGHTS: &str = "fully_connected/weights";
/// Path of the imported classifier bias, `[out]`.
pub const CLASSIFIER_BIASES: &str = "fully_connected/biases";

/// A dense `f32` tensor as stored in the checkpoint.
///
/// Convolution kernels keep the checkpoint layout `[k, k, c_in, c_out]`.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightTensor {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl WeightTensor {
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Self {
        debug_assert_eq!(shape.iter().product::<usize>(), values.len());
        Self { shape, values }
    }

    pub fn filled(shape: Vec<usize>, value: f32) -> Self {
        let len = shape.iter().product();
        Self::new(shape, vec![value; len])
    }

    /// Drops the leading unit dimensions of a 1×1 kernel, `[1, 1, i, o]` → `[i, o]`.
    pub fn squeeze_leading(mut self) -> Self {
        while self.shape.len() > 2 && self.shape[0] == 1 {
            self.shape.remove(0);
        }
        self
    }

    /// Creates a burn tensor with the stored shape. `D` must equal the stored rank.
    pub fn to_tensor<B: Backend, const D: usize>(&self, device: &B::Device) -> Tensor<B, D> {
        debug_assert_eq!(self.shape.len(), D);
        let data = TensorData::new(self.values.clone(), self.shape.clone()).convert::<B::FloatElem>();
        Tensor::from_data(data, device)
    }
}

/// Immutable map from canonical parameter path to pretrained tensor.
///
/// Built once by the [`WeightImporter`](super::WeightImporter) and only read afterwards,
/// so it can be shared by reference across every parameter-creation call.
#[derive(Debug, Clone, Default)]
pub struct PretrainedWeights {
    tensors: HashMap<String, WeightTensor>,
}

impl PretrainedWeights {
    pub fn from_tensors(tensors: HashMap<String, WeightTensor>) -> Self {
        Self { tensors }
    }

    pub fn get(&self, path: &str) -> Option<&WeightTensor> {
        self.tensors.get(path)
    }

    /// Looks up a required tensor, checking its shape.
    pub fn tensor(&self, path: &str, expected: &[usize]) -> Result<&WeightTensor> {
        let tensor = self
            .tensors
            .get(path)
            .ok_or_else(|| VqaError::MissingTensor(path.to_string()))?;
        if tensor.shape != expected {
            return Err(VqaError::TensorShape {
                path: path.to_string(),
                expected: expected.to_vec(),
                actual: tensor.shape.clone(),
            });
        }
        Ok(tensor)
    }

    /// The original classifier's final dense layer as `(weights, biases)`.
    pub fn classifier(&self) -> Result<(&WeightTensor, &WeightTensor)> {
        let weights = self
            .get(CLASSIFIER_WEIGHTS)
            .ok_or_else(|| VqaError::MissingTensor(CLASSIFIER_WEIGHTS.into()))?;
        let biases = self
            .get(CLASSIFIER_BIASES)
            .ok_or_else(|| VqaError::MissingTensor(CLASSIFIER_BIASES.into()))?;
        Ok((weights, biases))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    #[test]
    fn lookup_checks_shape() {
        let mut tensors = HashMap::new();
        tensors.insert("res1/weights".to_string(), WeightTensor::filled(vec![7, 7, 3, 64], 0.5));
        let weights = PretrainedWeights::from_tensors(tensors);

        assert!(weights.tensor("res1/weights", &[7, 7, 3, 64]).is_ok());
        assert!(matches!(
            weights.tensor("res1/weights", &[7, 7, 3, 32]),
            Err(VqaError::TensorShape { .. })
        ));
        assert!(matches!(
            weights.tensor("res2/block1/branch1/weights", &[1, 1, 64, 256]),
            Err(VqaError::MissingTensor(_))
        ));
    }

    #[test]
    fn to_tensor_keeps_layout() {
        let device = Default::default();
        let t = WeightTensor::new(vec![2, 3], vec![0., 1., 2., 3., 4., 5.]);
        let tensor: Tensor<B, 2> = t.to_tensor(&device);
        assert_eq!(tensor.dims(), [2, 3]);
        let values: Vec<f32> = tensor.to_data().iter::<f32>().collect();
        assert_eq!(values, t.values);
    }

    #[test]
    fn squeeze_one_by_one_kernel() {
        let t = WeightTensor::filled(vec![1, 1, 8, 4], 1.).squeeze_leading();
        assert_eq!(t.shape, vec![8, 4]);
    }
}
