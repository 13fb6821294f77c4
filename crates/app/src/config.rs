use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tripclaim_core::ClassificationRules;
use tripclaim_email::SmtpConfig;
use tripclaim_report::TemplateSchema;
use tripclaim_rides::{ApiConfig, RetryPolicy};

pub const DEFAULT_CONFIG_FILE: &str = "tripclaim.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// File holding the browser session cookie.
    pub token_file: PathBuf,
    /// Rider's local offset from UTC. When set, it overrides both the feed
    /// parser's and the claim form's offset.
    pub utc_offset_minutes: Option<i32>,
    pub api: ApiConfig,
    pub retry: RetryPolicy,
    pub classification: ClassificationRules,
    pub receipts: ReceiptSettings,
    pub report: ReportSettings,
    pub output: OutputSettings,
    pub bundle: BundleSettings,
    pub email: EmailSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            token_file: PathBuf::from("token.txt"),
            utc_offset_minutes: None,
            api: ApiConfig::default(),
            retry: RetryPolicy::default(),
            classification: ClassificationRules::default(),
            receipts: ReceiptSettings::default(),
            report: ReportSettings::default(),
            output: OutputSettings::default(),
            bundle: BundleSettings::default(),
            email: EmailSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiptSettings {
    /// Receipt downloads in flight at once.
    pub concurrency: usize,
    /// Keep each receipt as its own file next to the merged document.
    pub keep_individual: bool,
}

impl Default for ReceiptSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            keep_individual: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub template_path: PathBuf,
    #[serde(flatten)]
    pub schema: TemplateSchema,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            template_path: PathBuf::from("claim_form.xlsx"),
            schema: TemplateSchema::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Each run writes into `<directory>/<YYYY-MM>/`.
    pub directory: PathBuf,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("output"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleSettings {
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailSettings {
    /// Sending needs a bundle; enabling email enables bundling too.
    pub enabled: bool,
    #[serde(flatten)]
    pub smtp: SmtpConfig,
}

impl AppConfig {
    /// Loads a TOML file. Relative paths inside it are taken relative to
    /// the file's directory.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// `tripclaim.toml` in the working directory if present, defaults
    /// otherwise.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Path::new(DEFAULT_CONFIG_FILE);
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        let mut config: Self = toml::from_str(raw)?;
        if let Some(minutes) = config.utc_offset_minutes {
            config.api.utc_offset_minutes = minutes;
            config.report.schema.utc_offset_minutes = minutes;
        }
        Ok(config)
    }

    pub fn bundle_enabled(&self) -> bool {
        self.bundle.enabled || self.email.enabled
    }

    fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.token_file,
            &mut self.report.template_path,
            &mut self.output.directory,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}
