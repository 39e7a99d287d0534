//! Arbor: a template-driven static site builder with live rebuild and hot
//! reload.
//!
//! The crate is organized around one [`build::SiteGen`] per site:
//!
//! - [`config`] — layered `arbor.toml` + CLI configuration
//! - [`source`] / [`paths`] — build units, frontmatter, path resolution
//! - [`template`] — template sets, the function library and the executor
//! - [`build`] — targeted builds, full rebuilds, artifact removal
//! - [`watch`] / [`reload`] / [`serve`] — the development loop

pub mod build;
pub mod cli;
pub mod config;
pub mod logger;
pub mod paths;
pub mod reload;
pub mod serve;
pub mod source;
pub mod template;
pub mod utils;
pub mod watch;

pub use build::{BuildError, BuildSummary, SiteGen};
pub use config::SiteConfig;
