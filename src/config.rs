//! Site configuration management for `arbor.toml`.
//!
//! Configuration is layered: defaults, then the optional `arbor.toml` at the
//! site root, then CLI flags. After layering, [`SiteConfig::finalize`]
//! absolutizes the root and output paths and normalizes the base path so the
//! rest of the crate never re-derives them.
//!
//! # Example
//!
//! ```toml
//! source = "src"
//! data = "data"
//! templates = "templates"
//! output = "./public"
//! base = "/blog"
//! minify = true
//! ```

use crate::cli::{Cli, Commands};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Default regex of directories the watcher never subscribes to.
pub const DEFAULT_EXCLUDE: &str = "^(node_modules|bower_components)";

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error when reading `{0}`")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Config file parsing error")]
    Toml(#[from] toml::de::Error),

    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Root configuration for one site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SiteConfig {
    /// Absolute site root (set by `finalize`)
    #[serde(skip)]
    pub root: PathBuf,

    /// Dev mode: serving with watch + hot reload (set by `finalize`)
    #[serde(skip)]
    pub dev: bool,

    /// Source directory, relative to the site root
    pub source: PathBuf,

    /// Data directory, relative to the site root
    pub data: PathBuf,

    /// Template directory, relative to the site root
    pub templates: PathBuf,

    /// Output directory (absolute after `finalize`)
    pub output: PathBuf,

    /// URL base path; normalized to `/` or `/prefix/`
    pub base: String,

    /// Regex of paths excluded from watching
    pub exclude: String,

    /// Clear the output directory before a full build
    pub clean: bool,

    /// Minify rendered markup and recognized assets
    pub minify: bool,

    /// Development server port
    pub port: u16,

    /// Development server interface
    pub interface: String,

    /// Watcher settle delay in milliseconds
    pub settle_ms: u64,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./site"),
            dev: false,
            source: PathBuf::from("src"),
            data: PathBuf::from("data"),
            templates: PathBuf::from("templates"),
            output: PathBuf::from("./public"),
            base: "/".to_string(),
            exclude: DEFAULT_EXCLUDE.to_string(),
            clean: false,
            minify: false,
            port: 8888,
            interface: "127.0.0.1".to_string(),
            settle_ms: 500,
        }
    }
}

impl SiteConfig {
    /// Load configuration from a TOML file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Ok(toml::from_str(&raw)?)
    }

    /// Load layered configuration for a CLI invocation.
    pub fn load(cli: &Cli) -> Result<Self> {
        let config_path = cli.root.join(&cli.config);
        let mut config = if config_path.exists() {
            Self::from_path(&config_path)
                .with_context(|| format!("failed to load {}", config_path.display()))?
        } else {
            Self::default()
        };

        config.update_with_cli(cli);
        config.finalize(&cli.root, cli.is_serve())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI flag overrides on top of file/default values.
    pub fn update_with_cli(&mut self, cli: &Cli) {
        let args = cli.build_args();
        if let Some(source) = &args.source {
            self.source = source.clone();
        }
        if let Some(data) = &args.data {
            self.data = data.clone();
        }
        if let Some(templates) = &args.templates {
            self.templates = templates.clone();
        }
        if let Some(output) = &args.output {
            self.output = output.clone();
        }
        if let Some(base) = &args.base {
            self.base = base.clone();
        }
        if args.clean {
            self.clean = true;
        }
        if let Some(minify) = args.minify {
            self.minify = minify;
        }

        if let Commands::Serve {
            interface,
            port,
            exclude,
            ..
        } = &cli.command
        {
            if let Some(interface) = interface {
                self.interface = interface.clone();
            }
            if let Some(port) = port {
                self.port = *port;
            }
            if let Some(exclude) = exclude {
                self.exclude = exclude.clone();
            }
        }
    }

    /// Absolutize roots and normalize the base path.
    pub fn finalize(&mut self, root: &Path, dev: bool) -> Result<()> {
        self.root = root
            .canonicalize()
            .with_context(|| format!("site root not found: {}", root.display()))?;
        if self.output.is_relative() {
            self.output = self.root.join(&self.output);
        }
        self.base = normalize_base(&self.base);
        self.dev = dev;
        Ok(())
    }

    /// Check invariants that later stages rely on.
    pub fn validate(&self) -> Result<()> {
        if !self.source_dir().is_dir() {
            bail!(ConfigError::Validation(format!(
                "source directory not found: {}",
                self.source_dir().display()
            )));
        }
        if self.output.starts_with(self.source_dir()) {
            bail!(ConfigError::Validation(
                "output directory cannot live inside the source directory".to_string()
            ));
        }
        Ok(())
    }

    pub fn source_dir(&self) -> PathBuf {
        self.root.join(&self.source)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(&self.data)
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.root.join(&self.templates)
    }
}

/// Normalize a base path to `/` or `/prefix/` form.
///
/// Guarantees exactly one leading slash and a trailing slash, with
/// backslashes folded to forward slashes.
pub fn normalize_base(base: &str) -> String {
    let base = base.replace('\\', "/");
    let trimmed = base.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}/")
    }
}
