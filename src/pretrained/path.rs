//! Canonical parameter paths of the image encoder.
//!
//! Every frozen parameter is addressed as `res{stage}/block{block}/branch{1|2}/{a|b|c}/<role>`,
//! or `res1/<role>` for the stem. Builders thread a [`ParamScope`] down explicitly
//! instead of deriving it from any ambient naming context.

use std::fmt;

/// Batch-norm tensor roles, namespaced under `batch_normalization/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BnRole {
    Gamma,
    Beta,
    MovingMean,
    MovingVariance,
}

impl BnRole {
    pub const ALL: [BnRole; 4] = [
        BnRole::Gamma,
        BnRole::Beta,
        BnRole::MovingMean,
        BnRole::MovingVariance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BnRole::Gamma => "gamma",
            BnRole::Beta => "beta",
            BnRole::MovingMean => "moving_mean",
            BnRole::MovingVariance => "moving_variance",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        BnRole::ALL.into_iter().find(|role| role.as_str() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamScope(String);

impl ParamScope {
    /// Scope of the stem convolution.
    pub fn stem() -> Self {
        ParamScope("res1".into())
    }

    /// Scope of a residual block, e.g. `res2/block1`.
    ///
    /// `stage` counts the stem as stage 1; `block` is 1-based.
    pub fn block(stage: usize, block: usize) -> Self {
        ParamScope(format!("res{stage}/block{block}"))
    }

    /// The projection shortcut of a block.
    pub fn branch1(&self) -> Self {
        self.child("branch1")
    }

    /// One of the convolutions of the residual branch, `unit` in `1..=3` maps to `a..=c`.
    pub fn branch2(&self, unit: usize) -> Self {
        debug_assert!((1..=3).contains(&unit));
        let letter = ["a", "b", "c"][unit.clamp(1, 3) - 1];
        self.child("branch2").child(letter)
    }

    pub fn child(&self, segment: &str) -> Self {
        ParamScope(format!("{}/{segment}", self.0))
    }

    pub fn weights(&self) -> String {
        format!("{}/weights", self.0)
    }

    pub fn batch_norm(&self, role: BnRole) -> String {
        format!("{}/batch_normalization/{}", self.0, role.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParamScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_paths() {
        let scope = ParamScope::block(2, 1);
        assert_eq!(scope.branch2(1).weights(), "res2/block1/branch2/a/weights");
        assert_eq!(
            scope.branch2(3).batch_norm(BnRole::MovingVariance),
            "res2/block1/branch2/c/batch_normalization/moving_variance"
        );
        assert_eq!(scope.branch1().weights(), "res2/block1/branch1/weights");
    }

    #[test]
    fn stem_paths() {
        assert_eq!(ParamScope::stem().weights(), "res1/weights");
        assert_eq!(
            ParamScope::stem().batch_norm(BnRole::Gamma),
            "res1/batch_normalization/gamma"
        );
    }
}
