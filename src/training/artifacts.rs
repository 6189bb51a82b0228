//! Everything a run leaves on disk: configs, checkpoints and summaries.

use crate::backend::RecorderTy;
use crate::error::{Result, VqaError};
use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use burn::prelude::*;
use burn::record::{FileRecorder, Recorder};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const TRAINING_CONFIG_NAME: &str = "training_config";
pub const MODEL_CONFIG_NAME: &str = "model_config";
pub const HEAD_NAME: &str = "head";
pub const OPTIM_NAME: &str = "optim";
pub const CHECKPOINT_NAME: &str = "checkpoint.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct CheckpointState {
    step: usize,
}

/// A directory holding one training run.
#[derive(Debug, Clone)]
pub struct RunDirectory {
    path: PathBuf,
}

impl RunDirectory {
    /// A fresh `<logs_root>/<YYYY-mm-dd-HH-MM-SS>` directory.
    pub fn create(logs_root: impl AsRef<Path>) -> Result<Self> {
        let stamp = chrono::Local::now().format("%Y-%m-%d-%H-%M-%S").to_string();
        Self::open(logs_root.as_ref().join(stamp))
    }

    /// Uses `path` as the run directory, creating it if needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        std::fs::create_dir_all(&path).map_err(|e| VqaError::io(&path, e))?;
        tracing::info!("run directory: {path:?}");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save_config(&self, name: &str, config: &impl Config) -> Result<PathBuf> {
        let path = self.path.join(format!("{name}.json"));
        tracing::debug!("saving {name} into {path:?}");
        config
            .save(&path)
            .map_err(|e| VqaError::io(&path, e))?;
        Ok(path)
    }

    fn step_path(&self, name: &str, step: usize) -> PathBuf {
        self.path.join(format!("{name}-{step}"))
    }

    /// Saves the trainable parameters and the optimizer state reached after `step`.
    pub fn save_checkpoint<AutoB, M, O>(&self, step: usize, head: &M, optim: &O) -> Result<()>
    where
        AutoB: AutodiffBackend,
        M: AutodiffModule<AutoB>,
        O: Optimizer<M, AutoB>,
    {
        let head_path = self.step_path(HEAD_NAME, step);
        head.clone()
            .save_file(head_path.clone(), &RecorderTy::new()) // ext added automatically
            .map_err(|e| recorder_error(HEAD_NAME, &head_path, e))?;

        let optim_path = self.step_path(OPTIM_NAME, step);
        RecorderTy::new()
            .record(optim.to_record(), optim_path.clone())
            .map_err(|e| recorder_error(OPTIM_NAME, &optim_path, e))?;

        let state_path = self.path.join(CHECKPOINT_NAME);
        let state = serde_json::to_string(&CheckpointState { step })?;
        std::fs::write(&state_path, state).map_err(|e| VqaError::io(&state_path, e))?;

        let ext = <RecorderTy as FileRecorder<AutoB>>::file_extension();
        tracing::info!("checkpoint at step {step}: {head_path:?}.{ext}");
        Ok(())
    }

    /// Step of the most recent checkpoint, if any was written.
    pub fn latest_step(&self) -> Result<Option<usize>> {
        let path = self.path.join(CHECKPOINT_NAME);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path).map_err(|e| VqaError::io(&path, e))?;
        let state: CheckpointState = serde_json::from_str(&text)?;
        Ok(Some(state.step))
    }

    /// Loads the parameters saved at `step` into `head`.
    pub fn load_head<B: Backend, M: Module<B>>(
        &self,
        head: M,
        step: usize,
        device: &B::Device,
    ) -> Result<M> {
        let path = self.step_path(HEAD_NAME, step);
        head.load_file(path.clone(), &RecorderTy::new(), device)
            .map_err(|e| recorder_error(HEAD_NAME, &path, e))
    }

    /// Loads the optimizer state saved at `step` into `optim`.
    pub fn load_optim<AutoB, M, O>(&self, optim: O, step: usize, device: &AutoB::Device) -> Result<O>
    where
        AutoB: AutodiffBackend,
        M: AutodiffModule<AutoB>,
        O: Optimizer<M, AutoB>,
    {
        let path = self.step_path(OPTIM_NAME, step);
        let record = RecorderTy::new()
            .load(path.clone(), device)
            .map_err(|e| recorder_error(OPTIM_NAME, &path, e))?;
        Ok(optim.load_record(record))
    }
}

pub fn load_config<C: Config>(path: impl AsRef<Path>) -> Result<C> {
    let path = path.as_ref();
    tracing::info!("loading config from {path:?}");
    C::load(path).map_err(|e| VqaError::Recorder {
        what: format!("config {path:?}"),
        reason: format!("{e:?}"),
    })
}

fn recorder_error(what: &str, path: &Path, e: impl std::fmt::Debug) -> VqaError {
    VqaError::Recorder {
        what: format!("{what} at {path:?}"),
        reason: format!("{e:?}"),
    }
}
