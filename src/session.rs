use crate::config::TrainConfig;
use crate::data::TranslationBatch;
use crate::model::TranslationModel;
use crate::tracking::Run;
use burn::data::dataloader::DataLoader;
use burn::lr_scheduler::noam::NoamLrScheduler;
use burn::lr_scheduler::LrScheduler;
use burn::module::{AutodiffModule, Module};
use burn::optim::{GradientsParams, Optimizer};
use burn::record::{CompactRecorder, RecorderError};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::ElementConversion;
use crossterm::{
    cursor, execute,
    terminal::{Clear, ClearType},
};
use serde::Serialize;
use serde_json::json;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TrainingMetrics {
    pub train_loss: f64,
    pub train_perplexity: f64,
    pub validation_loss: f64,
    pub validation_perplexity: f64,
    pub epochs_completed: usize,
    pub steps_completed: usize,
}

impl Default for TrainingMetrics {
    fn default() -> Self {
        Self {
            train_loss: f64::NAN,
            train_perplexity: f64::NAN,
            validation_loss: f64::NAN,
            validation_perplexity: f64::NAN,
            epochs_completed: 0,
            steps_completed: 0,
        }
    }
}

/// Loop behavior of a training run, lifted from the merged config.
pub struct TrainerOptions {
    pub max_epochs: usize,
    pub batch_size: usize,
    pub check_val_every_n_epoch: usize,
    pub log_every_n_steps: usize,
    pub overfit_batches: usize,
    pub fast_dev_run: bool,
}

impl TrainerOptions {
    pub fn from_config(config: &TrainConfig) -> Self {
        Self {
            max_epochs: config.max_epochs,
            batch_size: config.batch_size,
            check_val_every_n_epoch: config.check_val_every_n_epoch,
            log_every_n_steps: config.log_every_n_steps,
            overfit_batches: config.overfit_batches,
            fast_dev_run: config.fast_dev_run,
        }
    }
}

/// Run the training loop over any dispatchable translation model. Metrics
/// stream into the run; the caller decides what to do with the trained
/// model based on `epochs_completed`.
pub fn fit<B, M, O>(
    mut model: M,
    mut optimizer: O,
    mut scheduler: NoamLrScheduler,
    dataloader_train: Arc<dyn DataLoader<TranslationBatch<B>>>,
    dataloader_valid: Arc<dyn DataLoader<TranslationBatch<B::InnerBackend>>>,
    options: &TrainerOptions,
    run: &mut Run,
) -> io::Result<(M, TrainingMetrics)>
where
    B: AutodiffBackend,
    M: TranslationModel<B> + AutodiffModule<B>,
    M::InnerModule: TranslationModel<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    let mut metrics = TrainingMetrics::default();

    let batches_per_epoch = batches_per_epoch(
        dataloader_train.num_items(),
        options.batch_size,
        options.overfit_batches,
    );
    let total_steps = if options.fast_dev_run {
        1
    } else {
        options.max_epochs * batches_per_epoch
    };
    let mut progress = ProgressIndicator::new(
        total_steps,
        options.max_epochs,
        dataloader_train.num_items(),
        options.batch_size,
    );

    let mut step = 0;
    let mut last_lr = f64::NAN;
    for epoch in 0..options.max_epochs {
        for (index, batch) in dataloader_train.iter().enumerate() {
            if options.overfit_batches > 0 && index >= options.overfit_batches {
                break;
            }

            let output = model.forward(batch);
            let loss_value: f64 = output.loss.clone().into_scalar().elem();

            let grads = output.loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            let lr = scheduler.step();
            model = optimizer.step(lr, model, grads);
            last_lr = lr;

            metrics.train_loss = loss_value;
            metrics.train_perplexity = loss_value.exp();
            metrics.steps_completed = step + 1;

            if options.log_every_n_steps > 0 && step % options.log_every_n_steps == 0 {
                run.log(json!({
                    "step": step,
                    "epoch": epoch,
                    "loss": loss_value,
                    "perplexity": loss_value.exp(),
                    "lr": lr,
                }))?;
            }
            progress.update(&metrics)?;

            step += 1;
            if options.fast_dev_run {
                break;
            }
        }
        metrics.epochs_completed = epoch + 1;

        let check_val = options.check_val_every_n_epoch > 0
            && (epoch + 1) % options.check_val_every_n_epoch == 0;
        if check_val || options.fast_dev_run {
            progress.set_mode("Validating");
            let model_valid = model.valid();
            let mut losses = Vec::new();

            for (index, batch) in dataloader_valid.iter().enumerate() {
                if options.overfit_batches > 0 && index >= options.overfit_batches {
                    break;
                }
                let output = model_valid.forward(batch);
                losses.push(output.loss.into_scalar().elem::<f64>());
                if options.fast_dev_run {
                    break;
                }
            }

            if !losses.is_empty() {
                metrics.validation_loss = losses.iter().sum::<f64>() / losses.len() as f64;
                metrics.validation_perplexity =
                    losses.iter().map(|loss| loss.exp()).sum::<f64>() / losses.len() as f64;
                run.log(json!({
                    "epoch": epoch,
                    "val_loss": metrics.validation_loss,
                    "val_perplexity": metrics.validation_perplexity,
                }))?;
            }
            progress.set_mode("Training");
        }

        // Learning-rate record at epoch cadence
        run.log(json!({ "epoch": epoch, "lr": last_lr }))?;

        if options.fast_dev_run {
            break;
        }
    }
    println!();

    Ok((model, metrics))
}

/// Batches one pass over the data takes, counting the partial final batch
/// the loader emits.
fn batches_per_epoch(num_items: usize, batch_size: usize, overfit_batches: usize) -> usize {
    match overfit_batches {
        0 => num_items.div_ceil(batch_size.max(1)).max(1),
        n => n,
    }
}

/// Save the trained weights under `<root>/transformer.mpk` and return the
/// written path.
pub fn save_checkpoint<B: Backend, M: Module<B>>(
    model: &M,
    root: &Path,
) -> Result<PathBuf, RecorderError> {
    let stem = root.join("transformer");
    model.clone().save_file(stem.clone(), &CompactRecorder::new())?;
    Ok(stem.with_extension("mpk"))
}

const UPDATE_FREQUENCY: usize = 50;

pub struct ProgressIndicator {
    start_time: Instant,
    total_steps: usize,
    total_epochs: usize,
    total_items: usize,
    batch_size: usize,
    last_update: usize,
    mode: &'static str,
}

impl ProgressIndicator {
    pub fn new(
        total_steps: usize,
        total_epochs: usize,
        total_items: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            start_time: Instant::now(),
            total_steps: total_steps.max(1),
            total_epochs,
            total_items,
            batch_size: batch_size.max(1),
            last_update: 0,
            mode: "Training",
        }
    }

    pub fn update(&mut self, metrics: &TrainingMetrics) -> io::Result<()> {
        if metrics.steps_completed - self.last_update < UPDATE_FREQUENCY
            && metrics.steps_completed > 1
        {
            return Ok(());
        }
        self.last_update = metrics.steps_completed;

        execute!(
            io::stdout(),
            cursor::MoveToColumn(0),
            Clear(ClearType::CurrentLine)
        )?;

        let elapsed = self.start_time.elapsed();
        let mins = elapsed.as_secs() / 60;
        let progress = (metrics.steps_completed as f32 / self.total_steps as f32 * 100.0) as usize;

        let batches_per_epoch = self.total_items.div_ceil(self.batch_size).max(1);
        let steps_in_epoch = metrics.steps_completed % batches_per_epoch;
        let items_processed = (steps_in_epoch * self.batch_size).min(self.total_items);

        print!(
            "{} | Epoch: {}/{} | Step: {} | Items: {}/{} | ({} mins) | Loss: {:.4} - PPL: {:.4} | {}%",
            self.mode,
            metrics.epochs_completed,
            self.total_epochs,
            metrics.steps_completed,
            items_processed,
            self.total_items,
            mins,
            metrics.train_loss,
            metrics.train_perplexity,
            progress,
        );

        io::stdout().flush()?;
        Ok(())
    }

    pub fn set_mode(&mut self, mode: &'static str) {
        self.mode = mode;
    }
}
