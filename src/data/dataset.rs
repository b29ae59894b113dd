use crate::paths;
use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One parallel sentence pair.
#[derive(new, Clone, Debug, Serialize, Deserialize)]
pub struct TranslationItem {
    pub kor: String,
    pub eng: String,
}

/// The full Korean-English parallel corpus, read from
/// `<root>/data/kor2eng/<split>.json`.
#[derive(Debug)]
pub struct Kor2EngDataset {
    pairs: Vec<TranslationItem>,
}

impl Kor2EngDataset {
    pub const NAME: &'static str = "kor2eng";

    pub fn new(split: &str) -> Self {
        Self::from_dir(&paths::root_dir().join("data").join(Self::NAME), split)
    }

    pub fn train() -> Self {
        Self::new("train")
    }

    pub fn validation() -> Self {
        Self::new("validation")
    }

    pub fn from_dir(dir: &Path, split: &str) -> Self {
        let path = dir.join(format!("{split}.json"));
        let content = fs::read_to_string(&path)
            .unwrap_or_else(|_| panic!("failed to read translation corpus at {}", path.display()));
        let pairs: Vec<TranslationItem> =
            serde_json::from_str(&content).expect("failed to parse translation corpus JSON");
        Self { pairs }
    }
}

impl Dataset<TranslationItem> for Kor2EngDataset {
    fn get(&self, index: usize) -> Option<TranslationItem> {
        self.pairs.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.pairs.len()
    }
}

/// Small sample of the corpus, shipped in-repo for overfit runs.
#[derive(Debug)]
pub struct Kor2EngSmallDataset {
    inner: Kor2EngDataset,
}

impl Kor2EngSmallDataset {
    pub const NAME: &'static str = "kor2eng_small";

    pub fn new(split: &str) -> Self {
        Self {
            inner: Kor2EngDataset::from_dir(&paths::root_dir().join("data").join(Self::NAME), split),
        }
    }

    pub fn train() -> Self {
        Self::new("train")
    }

    pub fn validation() -> Self {
        Self::new("validation")
    }
}

impl Dataset<TranslationItem> for Kor2EngSmallDataset {
    fn get(&self, index: usize) -> Option<TranslationItem> {
        self.inner.get(index)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fixture_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kor2eng-dataset-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("train.json"),
            r#"[{"kor": "안녕하세요", "eng": "Hello"}, {"kor": "감사합니다", "eng": "Thank you"}]"#,
        )
        .unwrap();
        dir
    }

    #[test]
    fn loads_pairs_from_json() {
        let dataset = Kor2EngDataset::from_dir(&fixture_dir(), "train");
        assert_eq!(dataset.len(), 2);
        let item = dataset.get(0).unwrap();
        assert_eq!(item.kor, "안녕하세요");
        assert_eq!(item.eng, "Hello");
        assert!(dataset.get(2).is_none());
    }

    #[test]
    fn bundled_small_corpus_loads() {
        let train = Kor2EngSmallDataset::train();
        let validation = Kor2EngSmallDataset::validation();
        assert!(train.len() > 0);
        assert!(validation.len() > 0);
        assert!(!train.get(0).unwrap().eng.is_empty());
    }
}
