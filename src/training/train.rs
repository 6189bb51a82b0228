use super::artifacts::RunDirectory;
use super::config::TrainingConfig;
use super::summary::{SummaryWriter, prediction_table};
use crate::data::{
    AnswerDictionary, Prefetcher, VqaBatch, VqaBatcher, VqaItem, Vocabulary, attention_mask,
    attention_overlay,
};
use crate::error::{Result, VqaError};
use crate::model::{VqaHead, VqaModel, accuracy, predictions};
use burn::data::dataloader::batcher::Batcher;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

/// Metrics and outputs of one optimizer step.
#[derive(Debug, Clone)]
pub struct StepOutput<B: Backend> {
    pub loss: f32,
    pub accuracy: f32,
    pub predictions: Vec<usize>,
    /// `[batch, grid * grid]`
    pub attention: Tensor<B, 2>,
}

/// Trains the head of a [`VqaModel`]; the image encoder stays frozen.
pub struct Trainer<AutoB: AutodiffBackend> {
    config: TrainingConfig,
    model: VqaModel<AutoB>,
    optim: OptimizerAdaptor<Adam, VqaHead<AutoB>, AutoB>,
    batcher: VqaBatcher,
    device: AutoB::Device,
    /// First step of [`run`](Self::run); past zero after a resume.
    start_step: usize,
}

impl<AutoB: AutodiffBackend> Trainer<AutoB> {
    /// Fails when the batch size differs from the one the attention layer expects.
    pub fn new(
        config: TrainingConfig,
        model: VqaModel<AutoB>,
        image_side: usize,
        device: AutoB::Device,
    ) -> Result<Self> {
        let expected = model.head.attention.batch_size;
        if config.batch_size != expected {
            return Err(VqaError::ShapeMismatch {
                what: "training batch size",
                expected: vec![expected],
                actual: vec![config.batch_size],
            });
        }
        AutoB::seed(config.seed);
        let optim = config.optimizer.init::<AutoB, VqaHead<AutoB>>();
        Ok(Self {
            config,
            model,
            optim,
            batcher: VqaBatcher::new(image_side),
            device,
            start_step: 0,
        })
    }

    /// Restores the head and optimizer of the latest checkpoint of `run`.
    ///
    /// Returns the restored step; [`run`](Self::run) then continues right after it.
    pub fn resume(&mut self, run: &RunDirectory) -> Result<Option<usize>> {
        let Some(step) = run.latest_step()? else {
            tracing::info!("no checkpoint in {:?}, starting from scratch", run.path());
            return Ok(None);
        };
        self.model.head =
            run.load_head::<AutoB, _>(self.model.head.clone(), step, &self.device)?;
        self.optim = run.load_optim::<AutoB, VqaHead<AutoB>, _>(
            self.config.optimizer.init::<AutoB, VqaHead<AutoB>>(),
            step,
            &self.device,
        )?;
        self.start_step = step + 1;
        tracing::info!("resumed from the checkpoint of step {step}");
        Ok(Some(step))
    }

    pub fn model(&self) -> &VqaModel<AutoB> {
        &self.model
    }

    pub fn into_model(self) -> VqaModel<AutoB> {
        self.model
    }

    pub fn batch(&self, items: Vec<VqaItem>) -> VqaBatch<AutoB> {
        self.batcher.batch(items, &self.device)
    }

    /// Forward pass, loss, backward pass and one optimizer update of the head.
    pub fn step(&mut self, batch: VqaBatch<AutoB>) -> Result<StepOutput<AutoB>> {
        let (output, attention) = self.model.forward_classification(batch)?;

        let grads = output.loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.model.head);
        self.model.head = self
            .optim
            .step(self.config.lr, self.model.head.clone(), grads);

        Ok(StepOutput {
            loss: output.loss.into_scalar().elem::<f32>(),
            accuracy: accuracy(output.output.clone(), output.targets),
            predictions: predictions(output.output),
            attention: attention.weights,
        })
    }

    /// Runs every configured iteration, pulling batches from `prefetcher`.
    ///
    /// The prefetcher is shut down before returning, whether the run failed or not.
    pub fn run(
        &mut self,
        prefetcher: &mut Prefetcher<VqaItem>,
        run: &RunDirectory,
        vocab: &Vocabulary,
        answers: &AnswerDictionary,
    ) -> Result<()> {
        let result = self.run_steps(prefetcher, run, vocab, answers);
        prefetcher.shutdown();
        if let Err(e) = &result {
            tracing::error!("training stopped: {e}");
        }
        result
    }

    fn run_steps(
        &mut self,
        prefetcher: &Prefetcher<VqaItem>,
        run: &RunDirectory,
        vocab: &Vocabulary,
        answers: &AnswerDictionary,
    ) -> Result<()> {
        let mut summaries = SummaryWriter::create(run.path())?;
        tracing::info!(
            "training steps {}..{}",
            self.start_step,
            self.config.iterations
        );

        for step in self.start_step..self.config.iterations {
            let items = prefetcher.next_batch(self.config.batch_size)?;
            let batch = self.batch(items);
            let snapshot = self.config.logs_at(step).then(|| batch.clone());

            let output = self.step(batch)?;
            tracing::debug!("step {step}: loss {:.4}", output.loss);

            if let Some(batch) = snapshot {
                tracing::info!(
                    "step {step}: cross entropy {:.4}, accuracy {:.4}",
                    output.loss,
                    output.accuracy
                );
                self.summarize(&mut summaries, step, batch, &output, vocab, answers)?;
            }
            if self.config.checkpoints_at(step) {
                run.save_checkpoint(step, &self.model.head, &self.optim)?;
            }
        }
        summaries.flush()?;
        tracing::info!("training finished");
        Ok(())
    }

    fn summarize(
        &self,
        summaries: &mut SummaryWriter,
        step: usize,
        batch: VqaBatch<AutoB>,
        output: &StepOutput<AutoB>,
        vocab: &Vocabulary,
        answers: &AnswerDictionary,
    ) -> Result<()> {
        summaries.scalar(step, "cross_entropy", output.loss)?;
        summaries.scalar(step, "accuracy", output.accuracy)?;

        let [batch_size, max_len] = batch.words.dims();
        let words: Vec<usize> = batch
            .words
            .into_data()
            .iter::<i64>()
            .map(|id| id as usize)
            .collect();
        let questions: Vec<Vec<usize>> = words.chunks(max_len).map(<[usize]>::to_vec).collect();
        let gold: Vec<usize> = batch
            .answers
            .into_data()
            .iter::<i64>()
            .map(|id| id as usize)
            .collect();
        let table = prediction_table(vocab, answers, &questions, &gold, &output.predictions);
        summaries.text(step, "question_answer_prediction", &table)?;

        if batch_size > 0 {
            let [_, _, side, _] = batch.images.dims();
            // first example, NCHW -> HWC
            let pixels: Vec<f32> = batch
                .images
                .slice([0..1])
                .swap_dims(1, 3)
                .swap_dims(1, 2)
                .into_data()
                .iter::<f32>()
                .collect();
            let [_, cells] = output.attention.dims();
            let attention: Vec<f32> = output
                .attention
                .clone()
                .slice([0..1])
                .into_data()
                .iter::<f32>()
                .collect();
            let grid = (cells as f64).sqrt() as usize;
            let overlay = attention_overlay(&pixels, side, &attention, grid);
            summaries.image(step, "masked_input", &overlay)?;
            summaries.image(step, "attention_mask", &attention_mask(&attention, grid))?;
        }
        summaries.flush()
    }
}
