//! Noah chronic-disease risk scoring library
//!
//! Derives a risk score, category and reasons per patient from their lab
//! observation history.

pub mod core;
pub mod error;
pub mod fhir;
pub mod models;
pub mod report;

pub use crate::core::{RiskCategory, RiskEngine, RiskRow, RiskTable, RuleSet};
pub use crate::error::{Result, RiskError};
pub use crate::models::{Observation, Patient, SCHEMA_VERSION};

/// Application configuration
pub mod config {
    use std::path::{Path, PathBuf};

    use serde::Deserialize;
    use validator::Validate;

    use crate::core::{CategoryBounds, MarkerRule, RiskEngine, RuleSet};
    use crate::error::Result;

    #[derive(Debug, Clone, Default, Deserialize, Validate)]
    pub struct Config {
        #[serde(default)]
        #[validate]
        pub scoring: ScoringConfig,
        #[serde(default)]
        pub input: InputConfig,
        #[serde(default)]
        pub output: OutputConfig,
        #[serde(default)]
        pub log: LogConfig,
    }

    #[derive(Debug, Clone, Deserialize, Validate)]
    pub struct ScoringConfig {
        /// Tracked markers in declaration order.
        #[serde(default = "shipped_rules")]
        #[validate]
        pub rules: Vec<MarkerRule>,
        #[serde(default)]
        pub bounds: CategoryBounds,
    }

    fn shipped_rules() -> Vec<MarkerRule> {
        RuleSet::shipped().rules().to_vec()
    }

    impl Default for ScoringConfig {
        fn default() -> Self {
            Self {
                rules: shipped_rules(),
                bounds: CategoryBounds::default(),
            }
        }
    }

    impl ScoringConfig {
        pub fn engine(&self) -> Result<RiskEngine> {
            RiskEngine::new(RuleSet::new(self.rules.clone())?, self.bounds)
        }
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct InputConfig {
        pub path: PathBuf,
    }

    impl Default for InputConfig {
        fn default() -> Self {
            Self {
                path: PathBuf::from("data/fhir_sample_data.json"),
            }
        }
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct OutputConfig {
        pub dir: PathBuf,
    }

    impl Default for OutputConfig {
        fn default() -> Self {
            Self {
                dir: PathBuf::from("outputs"),
            }
        }
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct LogConfig {
        pub level: String,
        #[serde(default)]
        pub json: bool,
    }

    impl Default for LogConfig {
        fn default() -> Self {
            Self {
                level: "info".to_string(),
                json: false,
            }
        }
    }

    /// Load configuration from file
    pub fn load_config() -> Result<Config> {
        load_config_from(None)
    }

    /// Load configuration, replacing `config/default` with `file` when given.
    pub fn load_config_from(file: Option<&Path>) -> Result<Config> {
        let env = std::env::var("NOAH_ENV").unwrap_or_else(|_| "development".into());

        let mut builder = config::Config::builder();

        // Start with default settings
        builder = match file {
            Some(path) => builder.add_source(config::File::from(path.to_path_buf())),
            None => builder.add_source(config::File::with_name("config/default").required(false)),
        };

        // Override with environment-specific settings
        builder = builder.add_source(config::File::with_name(&format!("config/{}", env)).required(false));

        // Override with environment variables, e.g. NOAH_LOG__LEVEL=debug
        builder = builder.add_source(
            config::Environment::with_prefix("NOAH")
                .prefix_separator("_")
                .separator("__"),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

}
