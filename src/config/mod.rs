mod file_config;

pub use file_config::{FileConfig, IndexConfig, JobQueueConfig};

use crate::model::TypeLabel;
use crate::registry::DocumentMapping;
use anyhow::{anyhow, bail, Context, Result};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub models: Vec<TypeLabel>,
    pub job_queue: JobQueueSettings,
    pub index: IndexSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobQueueSettings {
    /// Jobs executing at the same time.
    pub workers: usize,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for JobQueueSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            max_retries: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 60_000,
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IndexSettings {
    pub documents: Vec<DocumentMapping>,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| anyhow!("db_dir must be specified via --db-dir or in config file"))?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let defaults = JobQueueSettings::default();
        let queue_file = file.job_queue.unwrap_or_default();
        let job_queue = JobQueueSettings {
            workers: queue_file
                .workers
                .or(cli.workers)
                .unwrap_or(defaults.workers),
            max_retries: queue_file.max_retries.unwrap_or(defaults.max_retries),
            initial_backoff_ms: queue_file
                .initial_backoff_ms
                .unwrap_or(defaults.initial_backoff_ms),
            max_backoff_ms: queue_file.max_backoff_ms.unwrap_or(defaults.max_backoff_ms),
            backoff_multiplier: queue_file
                .backoff_multiplier
                .unwrap_or(defaults.backoff_multiplier),
        };
        if job_queue.workers == 0 {
            bail!("job_queue.workers must be at least 1");
        }
        if job_queue.backoff_multiplier < 1.0 {
            bail!(
                "job_queue.backoff_multiplier must be >= 1.0, got {}",
                job_queue.backoff_multiplier
            );
        }

        let documents = file.index.unwrap_or_default().documents;
        let mut seen = BTreeSet::new();
        for mapping in &documents {
            if !seen.insert(mapping.type_label.clone()) {
                bail!("Duplicate document mapping for {}", mapping.type_label);
            }
        }

        let models = file
            .models
            .unwrap_or_default()
            .iter()
            .map(|label| {
                label
                    .parse::<TypeLabel>()
                    .with_context(|| format!("Invalid model type label in config: {}", label))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            db_dir,
            models,
            job_queue,
            index: IndexSettings { documents },
        })
    }

    pub fn store_db_path(&self) -> PathBuf {
        self.db_dir.join("store.db")
    }

    pub fn index_db_path(&self) -> PathBuf {
        self.db_dir.join("index.db")
    }

    /// Every type the process knows: configured models, document types and
    /// the types they embed.
    pub fn known_types(&self) -> BTreeSet<TypeLabel> {
        let mut types: BTreeSet<TypeLabel> = self.models.iter().cloned().collect();
        for mapping in &self.index.documents {
            types.insert(mapping.type_label.clone());
            types.extend(mapping.embeds.iter().map(|e| e.target.clone()));
        }
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cli_for(dir: &TempDir) -> CliConfig {
        CliConfig {
            db_dir: Some(dir.path().to_path_buf()),
            workers: None,
        }
    }

    #[test]
    fn test_resolve_cli_only() {
        let temp_dir = TempDir::new().unwrap();
        let mut cli = cli_for(&temp_dir);
        cli.workers = Some(2);

        let config = AppConfig::resolve(&cli, None).unwrap();
        assert_eq!(config.db_dir, temp_dir.path());
        assert_eq!(config.job_queue.workers, 2);
        assert_eq!(config.job_queue.max_retries, 5);
        assert!(config.index.documents.is_empty());
        assert_eq!(config.store_db_path(), temp_dir.path().join("store.db"));
        assert_eq!(config.index_db_path(), temp_dir.path().join("index.db"));
    }

    #[test]
    fn test_toml_overrides_cli() {
        let temp_dir = TempDir::new().unwrap();
        let mut cli = cli_for(&temp_dir);
        cli.workers = Some(2);

        let file: FileConfig = toml::from_str(
            r#"
            models = ["blog.Comment"]

            [job_queue]
            workers = 6
            initial_backoff_ms = 10

            [[index.documents]]
            type = "blog.Article"

            [[index.documents.embeds]]
            relation = "tags"
            target = "blog.Tag"
            "#,
        )
        .unwrap();

        let config = AppConfig::resolve(&cli, Some(file)).unwrap();
        assert_eq!(config.job_queue.workers, 6);
        assert_eq!(config.job_queue.initial_backoff_ms, 10);

        let known = config.known_types();
        assert!(known.contains(&TypeLabel::new("blog", "Comment")));
        assert!(known.contains(&TypeLabel::new("blog", "Article")));
        assert!(known.contains(&TypeLabel::new("blog", "Tag")));
    }

    #[test]
    fn test_missing_db_dir() {
        let result = AppConfig::resolve(&CliConfig::default(), None);
        assert!(result.is_err());

        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/nonexistent/index-sync")),
            workers: None,
        };
        assert!(AppConfig::resolve(&cli, None).is_err());
    }

    #[test]
    fn test_rejects_duplicate_mapping_and_bad_model() {
        let temp_dir = TempDir::new().unwrap();
        let cli = cli_for(&temp_dir);

        let duplicate: FileConfig = toml::from_str(
            r#"
            [[index.documents]]
            type = "blog.Article"
            [[index.documents]]
            type = "blog.Article"
            "#,
        )
        .unwrap();
        assert!(AppConfig::resolve(&cli, Some(duplicate)).is_err());

        let bad_model: FileConfig = toml::from_str(r#"models = ["Comment"]"#).unwrap();
        assert!(AppConfig::resolve(&cli, Some(bad_model)).is_err());
    }

    #[test]
    fn test_rejects_zero_workers() {
        let temp_dir = TempDir::new().unwrap();
        let mut cli = cli_for(&temp_dir);
        cli.workers = Some(0);
        assert!(AppConfig::resolve(&cli, None).is_err());
    }
}
