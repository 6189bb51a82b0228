use crate::data::PrefetchConfig;
use burn::optim::AdamConfig;
use burn::prelude::*;

#[derive(Config)]
pub struct TrainingConfig {
    #[config(default = "AdamConfig::new().with_epsilon(1e-8)")]
    pub optimizer: AdamConfig,
    #[config(default = 5e-5)]
    pub lr: f64,
    #[config(default = 32)]
    pub batch_size: usize,
    /// Optimizer steps of a run.
    #[config(default = 100)]
    pub iterations: usize,
    /// Steps between two logged summaries.
    #[config(default = 10)]
    pub log_interval: usize,
    /// Steps between two checkpoints. Step 0 is always checkpointed.
    #[config(default = 5000)]
    pub checkpoint_interval: usize,
    #[config(default = 0)]
    pub seed: u64,
    #[config(default = "PrefetchConfig::new()")]
    pub prefetch: PrefetchConfig,
}

impl TrainingConfig {
    pub(crate) fn logs_at(&self, step: usize) -> bool {
        step % self.log_interval.max(1) == 0
    }

    pub(crate) fn checkpoints_at(&self, step: usize) -> bool {
        step % self.checkpoint_interval.max(1) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_run() {
        let config = TrainingConfig::new();
        assert_eq!(config.lr, 5e-5);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.iterations, 100);
        assert!(config.logs_at(0) && config.logs_at(10) && !config.logs_at(15));
        assert!(config.checkpoints_at(0) && !config.checkpoints_at(10));
        assert_eq!(config.prefetch.workers, 4);
    }

    #[test]
    fn config_survives_json() {
        let config = TrainingConfig::new().with_iterations(7).with_seed(3);
        let json = serde_json::to_string(&config).unwrap();
        let back: TrainingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.iterations, 7);
        assert_eq!(back.seed, 3);
    }
}
