use std::env;
use std::path::PathBuf;

/// Overrides the repo root used for config, data, runs and artifacts.
pub const ROOT_ENV: &str = "KOR2ENG_ROOT";

pub fn root_dir() -> PathBuf {
    env::var(ROOT_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(env!("CARGO_MANIFEST_DIR")))
}
