use crate::registry::DocumentMapping;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    /// Known type labels beyond the ones the index mappings mention.
    pub models: Option<Vec<String>>,

    // Feature configs
    pub job_queue: Option<JobQueueConfig>,
    pub index: Option<IndexConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct JobQueueConfig {
    pub workers: Option<usize>,
    pub max_retries: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct IndexConfig {
    pub documents: Vec<DocumentMapping>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_full_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
db_dir = "/var/lib/index-sync"
models = ["blog.Comment"]

[job_queue]
workers = 8
max_retries = 3

[[index.documents]]
type = "blog.Article"
fields = ["title"]

[[index.documents.embeds]]
relation = "tags"
target = "blog.Tag"
"#
        )
        .unwrap();

        let config = FileConfig::load(file.path()).unwrap();
        assert_eq!(config.db_dir.as_deref(), Some("/var/lib/index-sync"));
        assert_eq!(config.models, Some(vec!["blog.Comment".to_string()]));

        let queue = config.job_queue.unwrap();
        assert_eq!(queue.workers, Some(8));
        assert_eq!(queue.max_retries, Some(3));
        assert_eq!(queue.initial_backoff_ms, None);

        let index = config.index.unwrap();
        assert_eq!(index.documents.len(), 1);
        assert!(index.documents[0].embeds[0].fields.is_empty());
    }

    #[test]
    fn test_empty_config() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert!(config.db_dir.is_none());
        assert!(config.job_queue.is_none());
        assert!(config.index.is_none());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(FileConfig::load(Path::new("/nonexistent/index-sync.toml")).is_err());
    }
}
