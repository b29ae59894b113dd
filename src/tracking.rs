use chrono::prelude::*;
use serde::Serialize;
use serde_json::json;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Directory an artifact with the given name lives in. Shared between
/// uploads and fetches so logged artifacts round-trip.
pub fn artifact_dir(root: &Path, entity: &str, name: &str) -> PathBuf {
    root.join("artifacts").join(entity).join(name)
}

/// A checkpoint (or any other file bundle) logged against a run, with the
/// run config carried along as metadata.
pub struct Artifact {
    name: String,
    kind: String,
    metadata: serde_json::Value,
    files: Vec<PathBuf>,
}

impl Artifact {
    pub fn new(name: &str, kind: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            metadata: serde_json::Value::Null,
            files: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.files.push(path.into());
        self
    }
}

/// One tracked training run under `<root>/runs/<entity>/<project>/<id>/`.
/// Metrics append to a JSONL file, the merged config is written at init and
/// a summary at finish.
pub struct Run {
    dir: PathBuf,
    artifacts_root: PathBuf,
    entity: String,
    project: String,
    id: String,
}

impl Run {
    pub fn init<C: Serialize>(
        root: &Path,
        entity: &str,
        project: &str,
        config: &C,
    ) -> io::Result<Run> {
        let id = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let dir = root.join("runs").join(entity).join(project).join(&id);
        fs::create_dir_all(&dir)?;
        let config_str = serde_json::to_string_pretty(config)?;
        fs::write(dir.join("config.json"), config_str)?;
        Ok(Run {
            dir,
            artifacts_root: root.join("artifacts").join(entity),
            entity: entity.to_string(),
            project: project.to_string(),
            id,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Append one metrics record to the run.
    pub fn log(&mut self, record: serde_json::Value) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join("metrics.jsonl"))?;
        writeln!(file, "{record}")
    }

    /// Copy the artifact files into the store and write its manifest.
    /// Returns the artifact directory.
    pub fn log_artifact(&self, artifact: Artifact, aliases: &[&str]) -> io::Result<PathBuf> {
        let dest = self.artifacts_root.join(&artifact.name);
        fs::create_dir_all(&dest)?;

        let mut files = Vec::with_capacity(artifact.files.len());
        for file in &artifact.files {
            let name = file.file_name().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "artifact file has no name")
            })?;
            fs::copy(file, dest.join(name))?;
            files.push(name.to_string_lossy().into_owned());
        }

        let manifest = json!({
            "name": artifact.name,
            "type": artifact.kind,
            "metadata": artifact.metadata,
            "aliases": aliases,
            "files": files,
            "entity": self.entity,
            "project": self.project,
            "run": self.id,
            "logged_at": Local::now().to_rfc3339(),
        });
        fs::write(dest.join("manifest.json"), serde_json::to_string_pretty(&manifest)?)?;
        Ok(dest)
    }

    pub fn finish<S: Serialize>(self, summary: &S) -> io::Result<()> {
        fs::write(
            self.dir.join("summary.json"),
            serde_json::to_string_pretty(summary)?,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn scratch_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kor2eng-tracking-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn init_records_the_config() {
        let root = scratch_root("init");
        let config: HashMap<&str, u32> = [("hidden_size", 128)].into_iter().collect();
        let run = Run::init(&root, "iseul", "kor2eng", &config).unwrap();
        let config_path = root
            .join("runs")
            .join("iseul")
            .join("kor2eng")
            .join(run.id())
            .join("config.json");
        let written = fs::read_to_string(config_path).unwrap();
        assert!(written.contains("hidden_size"));
    }

    #[test]
    fn log_appends_jsonl_records() {
        let root = scratch_root("log");
        let mut run = Run::init(&root, "iseul", "kor2eng", &json!({})).unwrap();
        run.log(json!({"step": 0, "loss": 4.2})).unwrap();
        run.log(json!({"step": 1, "loss": 3.9})).unwrap();
        let metrics = fs::read_to_string(run.dir.join("metrics.jsonl")).unwrap();
        assert_eq!(metrics.lines().count(), 2);
        assert!(metrics.lines().next().unwrap().contains("4.2"));
    }

    #[test]
    fn log_artifact_copies_files_and_writes_manifest() {
        let root = scratch_root("artifact");
        let run = Run::init(&root, "iseul", "kor2eng", &json!({})).unwrap();

        let checkpoint = root.join("transformer.mpk");
        fs::write(&checkpoint, b"weights").unwrap();

        let artifact = Artifact::new("transformer_scratch", "model")
            .with_metadata(json!({"ver": "overfit"}))
            .with_file(&checkpoint);
        let dest = run.log_artifact(artifact, &["latest", "overfit"]).unwrap();

        assert!(dest.join("transformer.mpk").exists());
        let manifest = fs::read_to_string(dest.join("manifest.json")).unwrap();
        assert!(manifest.contains("latest"));
        assert!(manifest.contains("transformer_scratch"));
        assert_eq!(dest, artifact_dir(&root, "iseul", "transformer_scratch"));
    }

    #[test]
    fn finish_writes_a_summary() {
        let root = scratch_root("finish");
        let run = Run::init(&root, "iseul", "kor2eng", &json!({})).unwrap();
        let dir = run.dir.clone();
        run.finish(&json!({"train_loss": 0.5})).unwrap();
        assert!(dir.join("summary.json").exists());
    }
}
