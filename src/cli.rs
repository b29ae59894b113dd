pub use clap::Parser;

/// Train a Korean-to-English translation transformer and upload the
/// checkpoint to the tracking store once the run completes.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Entity (user or team) the run is logged under
    pub entity: String,

    /// Model implementation to train
    #[arg(long, default_value = "transformer_builtin")]
    pub model: String,

    /// Config version to resolve under train.<model>
    #[arg(long, default_value = "overfit")]
    pub ver: String,

    /// Number of dataloader workers
    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,

    /// Log metrics to the run every n training steps
    #[arg(long, default_value_t = 1)]
    pub log_every_n_steps: usize,

    /// Run a single train and validation batch, without saving anything
    #[arg(long, default_value_t = false)]
    pub fast_dev_run: bool,

    /// Truncate train and validation loaders to this many batches (0 = off)
    #[arg(long, default_value_t = 0)]
    pub overfit_batches: usize,

    /// Run validation every n epochs
    #[arg(long, default_value_t = 1)]
    pub check_val_every_n_epoch: usize,
}
