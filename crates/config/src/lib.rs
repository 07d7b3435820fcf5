//! Layered configuration for signage.
//!
//! Values are resolved in order, later sources winning:
//!
//! 1. built-in defaults,
//! 2. a configuration file (TOML, YAML or JSON, chosen by extension), either
//!    given explicitly or found at `<config dir>/signage/config.toml`,
//! 3. environment variables (`MEDIA_DIR`, `PORT`, `URL_PREFIX`,
//!    `SYNC_INTERVAL_MINUTES`, `SOURCE_DIR`, `S3_*`, `AWS_ACCESS_KEY_ID`,
//!    `AWS_SECRET_ACCESS_KEY`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use figment::Figment;
use figment::providers::{Env, Format, Json, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_REGION: &str = "sa-east-1";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Local media root that gets synchronized and served.
    pub media_dir: PathBuf,
    /// Port of the HTTP layer serving the media list and files.
    pub port: u16,
    /// URL prefix media files are served under.
    pub url_prefix: String,
    pub sync_interval_minutes: u64,
    /// Mirror from a mounted directory instead of an S3 bucket.
    pub source_dir: Option<PathBuf>,
    pub s3: S3Config,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            media_dir: PathBuf::from("./media"),
            port: 8080,
            url_prefix: "/media/".to_string(),
            sync_interval_minutes: 15,
            source_dir: None,
            s3: S3Config::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct S3Config {
    /// Sync is disabled unless a bucket is set.
    pub bucket: Option<String>,
    pub region: String,
    pub prefix: Option<String>,
    /// Custom endpoint for S3-compatible services.
    pub endpoint: Option<String>,
    /// Static credentials. When both are unset the default AWS credential
    /// chain (environment, shared profile, instance role) is used.
    pub key_id: Option<String>,
    pub key_secret: Option<String>,
}
impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: None,
            region: DEFAULT_REGION.to_string(),
            prefix: None,
            endpoint: None,
            key_id: None,
            key_secret: None,
        }
    }
}

/// Where media gets mirrored from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remote {
    S3 {
        bucket: String,
        region: String,
        prefix: Option<String>,
        endpoint: Option<String>,
        key_id: Option<String>,
        key_secret: Option<String>,
    },
    Directory(PathBuf),
}

impl Config {
    /// Load configuration from an optional file plus the environment.
    ///
    /// An explicitly given file must exist; the default location is only
    /// used when present.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();
        match file {
            Some(path) => {
                if !path.is_file() {
                    exn::bail!(ErrorKind::Load(format!("config file not found: {}", path.display())));
                }
                figment = merge_file(figment, path)?;
            },
            None => {
                if let Some(path) = default_path()
                    && path.is_file()
                {
                    tracing::debug!(path = %path.display(), "Using default config file");
                    figment = merge_file(figment, &path)?;
                }
            },
        }
        Self::from_figment(figment.merge(env()))
    }

    /// Extract and validate configuration from any figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().map_err(|e| ErrorKind::Load(e.to_string()))?;
        config.validated()
    }

    fn validated(mut self) -> Result<Self> {
        if self.sync_interval_minutes == 0 {
            exn::bail!(ErrorKind::Invalid("sync_interval_minutes must be at least 1".to_string()));
        }
        self.url_prefix = normalize_prefix(&self.url_prefix);
        // Empty environment variables mean "unset".
        for value in [
            &mut self.s3.bucket,
            &mut self.s3.prefix,
            &mut self.s3.endpoint,
            &mut self.s3.key_id,
            &mut self.s3.key_secret,
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *value = None;
            }
        }
        if self.source_dir.as_deref().is_some_and(|p| p.as_os_str().is_empty()) {
            self.source_dir = None;
        }
        if self.s3.bucket.is_some() {
            if self.source_dir.is_some() {
                exn::bail!(ErrorKind::Invalid("s3.bucket and source_dir are mutually exclusive".to_string()));
            }
            if self.s3.key_id.is_some() != self.s3.key_secret.is_some() {
                exn::bail!(ErrorKind::Invalid("s3.key_id and s3.key_secret must be set together".to_string()));
            }
        }
        Ok(self)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_minutes.saturating_mul(60))
    }

    /// The configured remote store, if sync is enabled.
    pub fn remote(&self) -> Option<Remote> {
        if let Some(dir) = &self.source_dir {
            return Some(Remote::Directory(dir.clone()));
        }
        let s3 = &self.s3;
        s3.bucket.as_ref().map(|bucket| Remote::S3 {
            bucket: bucket.clone(),
            region: s3.region.clone(),
            prefix: s3.prefix.clone(),
            endpoint: s3.endpoint.clone(),
            key_id: s3.key_id.clone(),
            key_secret: s3.key_secret.clone(),
        })
    }
}

/// `<config dir>/signage/config.toml` for the current platform.
pub fn default_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "signage").map(|dirs| dirs.config_dir().join("config.toml"))
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
    Ok(match extension.as_deref() {
        Some("toml") => figment.merge(Toml::file(path)),
        Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
        Some("json") => figment.merge(Json::file(path)),
        _ => exn::bail!(ErrorKind::Load(format!("unsupported config format: {}", path.display()))),
    })
}

fn env() -> Figment {
    Figment::new()
        .merge(Env::raw().only(&["media_dir", "port", "url_prefix", "sync_interval_minutes", "source_dir"]))
        .merge(Env::prefixed("S3_").map(|key| format!("s3.{}", key.as_str().to_ascii_lowercase()).into()))
        .merge(Env::raw().only(&["aws_access_key_id", "aws_secret_access_key"]).map(|key| {
            match key.as_str().eq_ignore_ascii_case("aws_access_key_id") {
                true => "s3.key_id".into(),
                false => "s3.key_secret".into(),
            }
        }))
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    match trimmed.is_empty() {
        true => "/".to_string(),
        false => format!("/{trimmed}/"),
    }
}
