#[macro_use]
extern crate derive_new;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::data::dataset::Dataset;
use burn::grad_clipping::GradientClippingConfig;
use burn::lr_scheduler::noam::NoamLrSchedulerConfig;
use burn::module::AutodiffModule;
use burn::nn::transformer::{TransformerDecoderConfig, TransformerEncoderConfig};
use burn::optim::AdamConfig;

pub mod cli;
pub mod config;
pub mod data;
pub mod model;
pub mod paths;
pub mod session;
pub mod tracking;

use cli::*;
use config::TrainConfig;
use data::tokenizer::{fetch_tokenizer, Tokenizer};
use data::{
    Kor2EngDataset, Kor2EngSmallDataset, TranslationBatch, TranslationBatcher, TranslationItem,
};
use model::scratch::{TransformerScratch, TransformerScratchConfig};
use model::{TransformerBuiltin, TransformerBuiltinConfig, TranslationModel};
use session::{TrainerOptions, TrainingMetrics};
use tracking::{Artifact, Run};

pub const PROJECT: &str = "kor2eng";

type Elem = f32;
type Backend = burn::backend::Autodiff<burn::backend::Wgpu<Elem>>;
type ValidBackend = burn::backend::Wgpu<Elem>;

struct TrainReport {
    metrics: TrainingMetrics,
    checkpoint: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Cli::parse();

    let registry = config::fetch_config()?;
    let mut config = registry.resolve(&args.model, &args.ver).ok_or_else(|| {
        format!("no training config for model={} ver={}", args.model, args.ver)
    })?;
    config.merge_cli(&args);

    let root = paths::root_dir();
    let mut run = Run::init(&root, &config.entity, PROJECT, &config)?;
    log::info!("initialized run {} for entity {}", run.id(), config.entity);

    // fetch the pre-trained tokenizer named in the config
    let tokenizer = fetch_tokenizer(&root, &config.entity, &config.tokenizer)?;

    let device = burn::backend::wgpu::WgpuDevice::default();

    // choose the implementation of transformer to train
    let report = if config.model == TransformerBuiltin::<Backend>::NAME {
        // burn's transformer modules carry no constant tensors of their own,
        // so every embedding is created on an explicit device here
        let encoder = TransformerEncoderConfig::new(
            config.hidden_size,
            config.ffn_size,
            config.heads,
            config.depth,
        )
        .with_norm_first(false)
        .with_dropout(config.dropout);
        let decoder = TransformerDecoderConfig::new(
            config.hidden_size,
            config.ffn_size,
            config.heads,
            config.depth,
        )
        .with_norm_first(false)
        .with_dropout(config.dropout);
        let transformer = TransformerBuiltinConfig::new(
            encoder,
            decoder,
            tokenizer.vocab_size(),
            tokenizer.pad_token(),
            config.max_length,
        )
        .init::<Backend>(&device);
        run_training(transformer, &config, tokenizer, &mut run, &device, &root)?
    } else if config.model == TransformerScratch::<Backend>::NAME {
        // the scratch blocks derive their position table from the input,
        // so init is the only place a device shows up
        let transformer = TransformerScratchConfig::new(
            config.hidden_size,
            config.ffn_size,
            tokenizer.vocab_size(),
            config.max_length,
            tokenizer.pad_token(),
            config.heads,
            config.depth,
            config.dropout,
        )
        .init::<Backend>(&device);
        run_training(transformer, &config, tokenizer, &mut run, &device, &root)?
    } else {
        return Err(format!("invalid model: {}", config.model).into());
    };

    // upload only if the training properly ran to completion
    if let Some(checkpoint) = &report.checkpoint {
        let dest = upload_checkpoint(&run, &config, checkpoint)?;
        log::info!("logged checkpoint artifact to {}", dest.display());
    }

    println!("\nTraining completed! Final metrics:");
    println!("{}", "-".repeat(60));
    println!("Training metrics:");
    println!("  Loss:       {:.4}", report.metrics.train_loss);
    println!("  Perplexity: {:.4}", report.metrics.train_perplexity);
    println!("\nValidation metrics:");
    println!("  Loss:       {:.4}", report.metrics.validation_loss);
    println!("  Perplexity: {:.4}", report.metrics.validation_perplexity);
    println!("\nTraining summary:");
    println!("  Total epochs: {}", report.metrics.epochs_completed);
    println!("  Total steps:  {}", report.metrics.steps_completed);
    println!("{}", "-".repeat(60));

    run.finish(&report.metrics)?;
    Ok(())
}

fn run_training<M>(
    model: M,
    config: &TrainConfig,
    tokenizer: Arc<dyn Tokenizer>,
    run: &mut Run,
    device: &burn::tensor::Device<Backend>,
    root: &Path,
) -> Result<TrainReport, Box<dyn std::error::Error>>
where
    M: TranslationModel<Backend> + AutodiffModule<Backend>,
    M::InnerModule: TranslationModel<ValidBackend>,
{
    // choose the data
    let (dataloader_train, dataloader_valid) = if config.data == Kor2EngDataset::NAME {
        build_dataloaders(
            Kor2EngDataset::train(),
            Kor2EngDataset::validation(),
            &tokenizer,
            config,
            device,
        )
    } else if config.data == Kor2EngSmallDataset::NAME {
        build_dataloaders(
            Kor2EngSmallDataset::train(),
            Kor2EngSmallDataset::validation(),
            &tokenizer,
            config,
            device,
        )
    } else {
        return Err(format!("invalid data: {}", config.data).into());
    };

    let clipping = GradientClippingConfig::Norm(1.0);
    let optimizer = AdamConfig::new()
        .with_beta_2(0.99)
        .with_grad_clipping(Some(clipping))
        .init();
    let scheduler = NoamLrSchedulerConfig::new(config.lr)
        .with_warmup_steps(config.warmup_steps)
        .with_model_size(config.hidden_size)
        .init();

    let options = TrainerOptions::from_config(config);
    let (model, metrics) = session::fit(
        model,
        optimizer,
        scheduler,
        dataloader_train,
        dataloader_valid,
        &options,
        run,
    )?;

    // save only if the training is properly done
    let checkpoint = if training_complete(config, &metrics) {
        Some(session::save_checkpoint(&model, root)?)
    } else {
        None
    };

    Ok(TrainReport {
        metrics,
        checkpoint,
    })
}

/// The checkpoint is reserved for runs that genuinely trained to the
/// configured epoch count; a dev run or an empty epoch budget never counts.
fn training_complete(config: &TrainConfig, metrics: &TrainingMetrics) -> bool {
    !config.fast_dev_run && config.max_epochs > 0 && metrics.epochs_completed == config.max_epochs
}

/// Log the checkpoint as a model artifact carrying the merged config, then
/// drop the local copy.
fn upload_checkpoint(
    run: &Run,
    config: &TrainConfig,
    checkpoint: &Path,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let artifact = Artifact::new(&config.model, "model")
        .with_metadata(serde_json::to_value(config)?)
        .with_file(checkpoint);
    let dest = run.log_artifact(artifact, &["latest", &config.ver])?;
    fs::remove_file(checkpoint)?;
    Ok(dest)
}

type TrainLoader = Arc<dyn DataLoader<TranslationBatch<Backend>>>;
type ValidLoader = Arc<dyn DataLoader<TranslationBatch<ValidBackend>>>;

fn build_dataloaders<D>(
    train: D,
    valid: D,
    tokenizer: &Arc<dyn Tokenizer>,
    config: &TrainConfig,
    device: &burn::tensor::Device<Backend>,
) -> (TrainLoader, ValidLoader)
where
    D: Dataset<TranslationItem> + 'static,
{
    let batcher_train =
        TranslationBatcher::<Backend>::new(tokenizer.clone(), device.clone(), config.max_length);
    let batcher_valid = TranslationBatcher::<ValidBackend>::new(
        tokenizer.clone(),
        device.clone(),
        config.max_length,
    );

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(config.batch_size)
        .shuffle(42)
        .num_workers(config.num_workers)
        .build(train);
    let dataloader_valid = DataLoaderBuilder::new(batcher_valid)
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(valid);

    (dataloader_train, dataloader_valid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn base_config() -> TrainConfig {
        let mut config = config::fetch_config()
            .unwrap()
            .resolve("transformer_scratch", "overfit")
            .unwrap();
        config.entity = "iseul".into();
        config.model = "transformer_scratch".into();
        config.ver = "overfit".into();
        config
    }

    fn metrics_after(epochs_completed: usize) -> TrainingMetrics {
        TrainingMetrics {
            epochs_completed,
            ..TrainingMetrics::default()
        }
    }

    #[test]
    fn completed_runs_pass_the_upload_gate() {
        let config = base_config();
        assert!(training_complete(&config, &metrics_after(config.max_epochs)));
    }

    #[test]
    fn unfinished_runs_do_not_upload() {
        let config = base_config();
        assert!(!training_complete(&config, &metrics_after(config.max_epochs - 1)));
        assert!(!training_complete(&config, &metrics_after(0)));
    }

    #[test]
    fn fast_dev_runs_never_upload() {
        let mut config = base_config();
        config.fast_dev_run = true;
        assert!(!training_complete(&config, &metrics_after(config.max_epochs)));
    }

    #[test]
    fn zero_epoch_budget_never_uploads() {
        let mut config = base_config();
        config.max_epochs = 0;
        assert!(!training_complete(&config, &metrics_after(0)));
    }

    #[test]
    fn upload_logs_the_artifact_and_removes_the_local_checkpoint() {
        let root = std::env::temp_dir().join(format!("kor2eng-upload-{}", std::process::id()));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(&root).unwrap();

        let config = base_config();
        let run = Run::init(&root, &config.entity, PROJECT, &config).unwrap();

        let checkpoint = root.join("transformer.mpk");
        fs::write(&checkpoint, b"weights").unwrap();

        let dest = upload_checkpoint(&run, &config, &checkpoint).unwrap();
        assert!(dest.join("transformer.mpk").exists());
        assert!(!checkpoint.exists());

        let manifest = fs::read_to_string(dest.join("manifest.json")).unwrap();
        assert!(manifest.contains("\"latest\""));
        assert!(manifest.contains("\"overfit\""));
    }
}
