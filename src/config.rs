use crate::cli::Cli;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fs;

/// Bundled copy of the training registry, used when the repo root does not
/// carry a config.yaml of its own.
const DEFAULT_CONFIG: &str = include_str!("../config.yaml");

/// One resolved train.<model>.<ver> entry, plus the CLI arguments merged
/// over it. The merged struct is what gets recorded as run config and
/// artifact metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub data: String,
    pub tokenizer: String,
    pub hidden_size: usize,
    pub ffn_size: usize,
    pub max_length: usize,
    pub heads: usize,
    pub depth: usize,
    pub dropout: f64,
    pub lr: f64,
    pub warmup_steps: usize,
    pub batch_size: usize,
    pub max_epochs: usize,

    // Filled in by merge_cli; CLI values always win.
    #[serde(default)]
    pub entity: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub ver: String,
    #[serde(default)]
    pub num_workers: usize,
    #[serde(default)]
    pub log_every_n_steps: usize,
    #[serde(default)]
    pub fast_dev_run: bool,
    #[serde(default)]
    pub overfit_batches: usize,
    #[serde(default)]
    pub check_val_every_n_epoch: usize,
}

impl TrainConfig {
    pub fn merge_cli(&mut self, args: &Cli) {
        self.entity = args.entity.clone();
        self.model = args.model.clone();
        self.ver = args.ver.clone();
        self.num_workers = args.num_workers;
        self.log_every_n_steps = args.log_every_n_steps;
        self.fast_dev_run = args.fast_dev_run;
        self.overfit_batches = args.overfit_batches;
        self.check_val_every_n_epoch = args.check_val_every_n_epoch;
    }
}

#[derive(Debug, Deserialize)]
pub struct ConfigRegistry {
    train: HashMap<String, HashMap<String, TrainConfig>>,
}

impl ConfigRegistry {
    pub fn parse(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    pub fn resolve(&self, model: &str, ver: &str) -> Option<TrainConfig> {
        self.train.get(model)?.get(ver).cloned()
    }
}

pub fn fetch_config() -> Result<ConfigRegistry, Box<dyn Error>> {
    let path = paths::root_dir().join("config.yaml");
    let raw = if path.exists() {
        fs::read_to_string(&path)?
    } else {
        DEFAULT_CONFIG.to_string()
    };
    Ok(ConfigRegistry::parse(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ConfigRegistry {
        ConfigRegistry::parse(DEFAULT_CONFIG).unwrap()
    }

    #[test]
    fn resolves_every_bundled_entry() {
        let registry = registry();
        for model in ["transformer_builtin", "transformer_scratch"] {
            for ver in ["overfit", "base"] {
                let config = registry
                    .resolve(model, ver)
                    .unwrap_or_else(|| panic!("missing entry {model}/{ver}"));
                assert!(config.hidden_size > 0);
                assert!(config.max_epochs > 0);
                assert!(!config.data.is_empty());
                assert!(!config.tokenizer.is_empty());
            }
        }
    }

    #[test]
    fn overfit_entry_uses_the_small_corpus() {
        let config = registry().resolve("transformer_scratch", "overfit").unwrap();
        assert_eq!(config.data, "kor2eng_small");
        assert_eq!(config.tokenizer, "character");
    }

    #[test]
    fn unknown_names_resolve_to_none() {
        let registry = registry();
        assert!(registry.resolve("transformer_rnn", "overfit").is_none());
        assert!(registry.resolve("transformer_builtin", "huge").is_none());
    }

    #[test]
    fn cli_values_override_the_fetched_entry() {
        let mut config = registry().resolve("transformer_builtin", "overfit").unwrap();
        let args = Cli {
            entity: "iseul".into(),
            model: "transformer_builtin".into(),
            ver: "overfit".into(),
            num_workers: 2,
            log_every_n_steps: 10,
            fast_dev_run: true,
            overfit_batches: 3,
            check_val_every_n_epoch: 5,
        };
        config.merge_cli(&args);
        assert_eq!(config.entity, "iseul");
        assert_eq!(config.num_workers, 2);
        assert_eq!(config.log_every_n_steps, 10);
        assert!(config.fast_dev_run);
        assert_eq!(config.overfit_batches, 3);
        assert_eq!(config.check_val_every_n_epoch, 5);
    }
}
