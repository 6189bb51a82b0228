//! Maps the flat tensor names of a pretrained TF-slim ResNet checkpoint onto
//! the canonical [`ParamScope`] paths.
//!
//! Source names look like `resnet_v1_101/block1/unit_2/bottleneck_v1/conv3/BatchNorm/gamma`
//! (→ `res2/block2/branch2/c/batch_normalization/gamma`) or `resnet_v1_101/conv1/weights`
//! (→ `res1/weights`). Names that do not follow this shape are skipped.

use super::path::{BnRole, ParamScope};
use super::weights::{CLASSIFIER_BIASES, CLASSIFIER_WEIGHTS, PretrainedWeights, WeightTensor};
use crate::error::{Result, VqaError};
use num_traits::AsPrimitive;
use regex::Regex;
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::collections::HashMap;
use std::path::Path;

pub const DEFAULT_SCOPE: &str = "resnet_v1_101";

pub struct WeightImporter {
    scope: String,
    pattern: Regex,
}

impl Default for WeightImporter {
    fn default() -> Self {
        Self::new(DEFAULT_SCOPE)
    }
}

impl WeightImporter {
    /// `scope` is the top-level variable scope of the source network.
    pub fn new(scope: &str) -> Self {
        let pattern = format!(
            r"^{}/(?:block(?P<block>\d+)/unit_(?P<unit>\d+)/bottleneck_v1/)?(?P<branch>conv(?P<conv>\d+)|shortcut)/(?:BatchNorm/)?(?P<role>weights|gamma|beta|moving_mean|moving_variance)$",
            regex::escape(scope)
        );
        Self {
            scope: scope.to_string(),
            pattern: Regex::new(&pattern).expect("the scope is escaped into a fixed template"),
        }
    }

    /// Canonical path for a checkpoint tensor name, or `None` if the name is not an encoder parameter.
    pub fn canonical_path(&self, name: &str) -> Option<String> {
        let caps = self.pattern.captures(name)?;
        let role = &caps["role"];

        let scope = match (caps.name("block"), caps.name("unit")) {
            (Some(block), Some(unit)) => {
                let stage = block.as_str().parse::<usize>().ok()? + 1;
                let unit = unit.as_str().parse::<usize>().ok()?;
                let block = ParamScope::block(stage, unit);
                match caps.name("conv") {
                    Some(conv) => {
                        let conv = conv.as_str().parse::<usize>().ok()?;
                        if !(1..=3).contains(&conv) {
                            return None;
                        }
                        block.branch2(conv)
                    }
                    None => block.branch1(),
                }
            }
            _ => {
                // only the stem convolution lives outside of the blocks
                if &caps["branch"] != "conv1" {
                    return None;
                }
                ParamScope::stem()
            }
        };

        Some(match BnRole::from_name(role) {
            Some(bn_role) => scope.batch_norm(bn_role),
            None => scope.weights(),
        })
    }

    /// Builds the checkpoint map from named tensors.
    ///
    /// `fetch` is only called for names that map to a canonical path, plus the
    /// final dense layer, so auxiliary tensors of any dtype are never decoded.
    pub fn import<F>(&self, names: &[String], mut fetch: F) -> Result<PretrainedWeights>
    where
        F: FnMut(&str) -> Result<WeightTensor>,
    {
        let mut tensors = HashMap::new();
        let mut skipped = 0usize;
        for name in names {
            match self.canonical_path(name) {
                Some(path) => {
                    let tensor = fetch(name)?;
                    tracing::debug!("{name} -> {path} {:?}", tensor.shape);
                    tensors.insert(path, tensor);
                }
                None => skipped += 1,
            }
        }

        let logits_weights = format!("{}/logits/weights", self.scope);
        let logits_biases = format!("{}/logits/biases", self.scope);
        for (source, target) in [
            (&logits_weights, CLASSIFIER_WEIGHTS),
            (&logits_biases, CLASSIFIER_BIASES),
        ] {
            if !names.contains(source) {
                return Err(VqaError::MissingTensor(source.clone()));
            }
            // logits are stored as a 1x1 convolution
            let tensor = fetch(source)?.squeeze_leading();
            tensors.insert(target.to_string(), tensor);
        }

        tracing::info!(
            "imported {} pretrained tensors, skipped {skipped} unrelated entries",
            tensors.len()
        );
        Ok(PretrainedWeights::from_tensors(tensors))
    }

    /// Imports from an in-memory safetensors buffer.
    pub fn import_safetensors(&self, bytes: &[u8], origin: &Path) -> Result<PretrainedWeights> {
        let store = SafeTensors::deserialize(bytes).map_err(|e| VqaError::Checkpoint {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut names = store.names().into_iter().cloned().collect::<Vec<_>>();
        names.sort();
        self.import(&names, |name| {
            let view = store.tensor(name).map_err(|e| VqaError::Checkpoint {
                path: origin.to_path_buf(),
                reason: e.to_string(),
            })?;
            view_to_weight(name, &view)
        })
    }

    /// Reads and imports a safetensors checkpoint file.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<PretrainedWeights> {
        let path = path.as_ref();
        tracing::info!("loading pretrained checkpoint {path:?}");
        let bytes = std::fs::read(path).map_err(|e| VqaError::io(path, e))?;
        self.import_safetensors(&bytes, path)
    }
}

fn view_to_weight(name: &str, view: &TensorView<'_>) -> Result<WeightTensor> {
    let shape = view.shape().to_vec();
    let values: Vec<f32> = match view.dtype() {
        Dtype::F32 => view
            .data()
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        Dtype::F64 => view
            .data()
            .chunks_exact(8)
            .map(|b| {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(b);
                f64::from_le_bytes(bytes).as_()
            })
            .collect(),
        other => {
            return Err(VqaError::UnsupportedDtype {
                name: name.to_string(),
                dtype: format!("{other:?}"),
            });
        }
    };
    Ok(WeightTensor::new(shape, values))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn maps_block_names() {
        let importer = WeightImporter::default();
        let cases = [
            (
                "resnet_v1_101/block1/unit_1/bottleneck_v1/conv1/weights",
                "res2/block1/branch2/a/weights",
            ),
            (
                "resnet_v1_101/block2/unit_3/bottleneck_v1/conv3/BatchNorm/moving_mean",
                "res3/block3/branch2/c/batch_normalization/moving_mean",
            ),
            (
                "resnet_v1_101/block1/unit_1/bottleneck_v1/shortcut/weights",
                "res2/block1/branch1/weights",
            ),
            (
                "resnet_v1_101/block2/unit_1/bottleneck_v1/shortcut/BatchNorm/beta",
                "res3/block1/branch1/batch_normalization/beta",
            ),
            ("resnet_v1_101/conv1/weights", "res1/weights"),
            (
                "resnet_v1_101/conv1/BatchNorm/gamma",
                "res1/batch_normalization/gamma",
            ),
        ];
        for (name, path) in cases {
            assert_eq!(importer.canonical_path(name).as_deref(), Some(path), "{name}");
        }
    }

    #[test]
    fn skips_unrelated_names() {
        let importer = WeightImporter::default();
        for name in [
            "global_step",
            "resnet_v1_101/logits/weights",
            "resnet_v1_101/block1/unit_1/bottleneck_v1/conv1/weights/Momentum",
            "other_net/conv1/weights",
            "resnet_v1_101/block1/unit_1/bottleneck_v1/conv0/weights",
            "resnet_v1_101/block1/unit_1/bottleneck_v1/conv4/weights",
            "resnet_v1_101/block1/unit_1/bottleneck_v1/conv200/BatchNorm/gamma",
        ] {
            assert_eq!(importer.canonical_path(name), None, "{name}");
        }
    }

    #[test]
    fn imports_safetensors_store() {
        let stem = vec![0.25f32; 2 * 2 * 3 * 4];
        let gamma = vec![1.5f32; 4];
        let logits_w = vec![0.1f32; 4 * 10];
        let logits_b = vec![0.0f32; 10];
        let step = 7i64.to_le_bytes().to_vec();
        let stem_b = f32_bytes(&stem);
        let gamma_b = f32_bytes(&gamma);
        let logits_w_b = f32_bytes(&logits_w);
        let logits_b_b = f32_bytes(&logits_b);

        let mut views = HashMap::new();
        views.insert(
            "resnet_v1_101/conv1/weights".to_string(),
            TensorView::new(Dtype::F32, vec![2, 2, 3, 4], &stem_b).unwrap(),
        );
        views.insert(
            "resnet_v1_101/conv1/BatchNorm/gamma".to_string(),
            TensorView::new(Dtype::F32, vec![4], &gamma_b).unwrap(),
        );
        views.insert(
            "resnet_v1_101/logits/weights".to_string(),
            TensorView::new(Dtype::F32, vec![1, 1, 4, 10], &logits_w_b).unwrap(),
        );
        views.insert(
            "resnet_v1_101/logits/biases".to_string(),
            TensorView::new(Dtype::F32, vec![10], &logits_b_b).unwrap(),
        );
        views.insert(
            "global_step".to_string(),
            TensorView::new(Dtype::I64, vec![], &step).unwrap(),
        );
        let bytes = safetensors::serialize(&views, &None).unwrap();

        let weights = WeightImporter::default()
            .import_safetensors(&bytes, Path::new("memory"))
            .unwrap();
        assert_eq!(weights.len(), 4);
        assert_eq!(
            weights.tensor("res1/weights", &[2, 2, 3, 4]).unwrap().values,
            stem
        );
        assert_eq!(
            weights
                .tensor("res1/batch_normalization/gamma", &[4])
                .unwrap()
                .values,
            gamma
        );
        let (fc_w, fc_b) = weights.classifier().unwrap();
        assert_eq!(fc_w.shape, vec![4, 10]);
        assert_eq!(fc_b.shape, vec![10]);
    }

    #[test]
    fn missing_dense_layer_is_fatal() {
        let names = vec!["resnet_v1_101/conv1/weights".to_string()];
        let result = WeightImporter::default()
            .import(&names, |_| Ok(WeightTensor::filled(vec![7, 7, 3, 64], 0.)));
        assert!(matches!(result, Err(VqaError::MissingTensor(name)) if name == "resnet_v1_101/logits/weights"));
    }
}
