use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::ModelSize;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// External tool locations
    pub tools: ToolsConfig,

    /// Storage settings
    pub storage: StorageConfig,

    /// Pipeline settings
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to the yt-dlp executable
    pub yt_dlp_path: String,

    /// Path to the whisper executable
    pub whisper_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file (defaults to the platform data directory)
    pub database_path: Option<PathBuf>,

    /// How long a connection waits on a locked database
    pub busy_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Default language code, "auto" for engine-side detection
    pub default_language: String,

    /// Default whisper model size
    pub default_model: String,

    /// Deadline for the audio download stage
    pub download_timeout_secs: u64,

    /// Deadline for the transcription stage
    pub transcribe_timeout_secs: u64,

    /// Overall deadline for one pipeline run
    pub pipeline_deadline_secs: u64,

    /// Grace period between SIGTERM and SIGKILL for supervised children
    pub kill_grace_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tools: ToolsConfig {
                yt_dlp_path: "yt-dlp".to_string(),
                whisper_path: "whisper".to_string(),
            },
            storage: StorageConfig {
                database_path: None,
                busy_timeout_secs: 5,
            },
            pipeline: PipelineConfig {
                default_language: "auto".to_string(),
                default_model: "base".to_string(),
                download_timeout_secs: 900,
                transcribe_timeout_secs: 7200,
                pipeline_deadline_secs: 10800,
                kill_grace_secs: 5,
            },
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let config: Config = serde_yaml::from_str(&content)
                .context("Failed to parse config file")?;

            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save().await?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(&config_path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("clipscribe").join("config.yaml"))
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        ModelSize::from_str(&self.pipeline.default_model)
            .context("Invalid default model size in config")?;

        if self.pipeline.download_timeout_secs == 0 || self.pipeline.transcribe_timeout_secs == 0 {
            anyhow::bail!("Stage timeouts must be greater than zero");
        }

        Ok(())
    }

    /// Resolve the SQLite database file location
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.storage.database_path {
            return Ok(path.clone());
        }

        let data_dir = dirs::data_dir()
            .context("Could not determine data directory")?;

        Ok(data_dir.join("clipscribe").join("transcripts.db"))
    }

    /// Open the SQLite pool handed to the store.
    ///
    /// Foreign keys are enabled per connection so the schema's cascade
    /// delete holds; read deadlines are bounded by the acquire and busy
    /// timeouts set here.
    pub async fn open_pool(&self) -> Result<SqlitePool> {
        let database_path = self.database_path()?;
        if let Some(parent) = database_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&database_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(self.storage.busy_timeout_secs));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(self.storage.busy_timeout_secs))
            .connect_with(options)
            .await
            .context("Failed to open transcript database")?;

        Ok(pool)
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  yt-dlp: {}", self.tools.yt_dlp_path);
        println!("  whisper: {}", self.tools.whisper_path);
        match self.database_path() {
            Ok(path) => println!("  Database: {}", path.display()),
            Err(_) => println!("  Database: (unresolved)"),
        }
        println!("  Default Language: {}", self.pipeline.default_language);
        println!("  Default Model: {}", self.pipeline.default_model);
        println!(
            "  Timeouts: download {}s, transcribe {}s, pipeline {}s",
            self.pipeline.download_timeout_secs,
            self.pipeline.transcribe_timeout_secs,
            self.pipeline.pipeline_deadline_secs
        );
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.download_timeout_secs)
    }

    pub fn transcribe_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.transcribe_timeout_secs)
    }

    pub fn pipeline_deadline(&self) -> Duration {
        Duration::from_secs(self.pipeline.pipeline_deadline_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.pipeline.kill_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_bad_model_fails_validation() {
        let mut config = Config::default();
        config.pipeline.default_model = "gigantic".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_round_trips_through_yaml() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.tools.yt_dlp_path, config.tools.yt_dlp_path);
        assert_eq!(
            parsed.pipeline.transcribe_timeout_secs,
            config.pipeline.transcribe_timeout_secs
        );
    }
}
