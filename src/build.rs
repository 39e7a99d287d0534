//! The build pipeline: registry scan, targeted builds, full rebuilds and
//! artifact removal.
//!
//! All builds against one [`SiteGen`] run one at a time (`&mut self`); the
//! generation queue and the template cache are never shared across builds.

use crate::{
    config::SiteConfig,
    log,
    paths,
    source::{ContentKind, Source},
    template::{self, BuildCtx, Engine, RenderEnv},
    utils::{self, exec, minify},
};
use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use std::{
    cell::RefCell,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("build failed for {0}: not found")]
    NotFound(PathBuf),

    #[error("build failed for {path}")]
    Failed {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

/// Outcome of a full rebuild: per-extension output counts and every
/// per-source failure.
#[derive(Debug, Default)]
pub struct BuildSummary {
    pub counts: FxHashMap<String, usize>,
    pub errors: Vec<BuildError>,
}

impl BuildSummary {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// The site build engine: configuration, source registry and template cache.
pub struct SiteGen {
    config: SiteConfig,
    sources: FxHashMap<PathBuf, Source>,
    engine: Engine,
}

impl SiteGen {
    /// Scan the source directory and register every non-hidden file.
    pub fn new(config: SiteConfig) -> Result<Self> {
        let mut sg = Self {
            config,
            sources: FxHashMap::default(),
            engine: Engine::new(),
        };
        sg.scan()?;
        Ok(sg)
    }

    fn scan(&mut self) -> Result<()> {
        let source_dir = self.config.source_dir();
        for entry in walkdir::WalkDir::new(&source_dir)
            .into_iter()
            .filter_entry(|e| !is_hidden(e.file_name().to_string_lossy().as_ref()))
        {
            let entry = entry.with_context(|| {
                format!("failed to scan source directory {}", source_dir.display())
            })?;
            if entry.file_type().is_file() {
                self.insert(entry.path().to_path_buf());
            }
        }
        Ok(())
    }

    /// Register (or re-register) a source, loading its content and metadata.
    pub fn insert(&mut self, local: PathBuf) {
        let mut source = Source::new(local);
        let _ = source.load(&self.config);
        self.sources.insert(source.local.clone(), source);
    }

    /// Reload a registered source from disk, or register it if new.
    pub fn reload(&mut self, local: &Path) {
        match self.sources.get_mut(local) {
            Some(source) => {
                let _ = source.reload(&self.config);
            }
            None => self.insert(local.to_path_buf()),
        }
    }

    /// Drop a source from the registry.
    pub fn forget(&mut self, local: &Path) -> Option<Source> {
        self.sources.remove(local)
    }

    pub fn contains(&self, local: &Path) -> bool {
        self.sources.contains_key(local)
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    /// Drop cached template sets; the next render re-globs the directory.
    pub fn invalidate_templates(&mut self) {
        self.engine.invalidate();
    }

    // ------------------------------------------------------------------
    // Build
    // ------------------------------------------------------------------

    /// Build one registered source, draining any derived pages it queues.
    pub fn build(&mut self, local: &Path) -> Result<(), BuildError> {
        let config = &self.config;
        let Some(source) = self.sources.get_mut(local) else {
            return Err(BuildError::NotFound(local.to_path_buf()));
        };
        let _ = source.load(config);
        let current = source.clone();

        self.build_source(current).map_err(|err| BuildError::Failed {
            path: local.to_path_buf(),
            source: err,
        })
    }

    fn build_source(&mut self, mut current: Source) -> Result<()> {
        let body = current.load(&self.config).map(<[u8]>::to_vec);

        // A body that references the page-path binding is only meaningful
        // when rendered through `page`; standalone it is a no-op.
        if current.sub_path.is_empty()
            && body
                .as_deref()
                .and_then(|b| std::str::from_utf8(b).ok())
                .is_some_and(|text| text.contains(" .Path"))
        {
            return Ok(());
        }

        let format = match current.meta_str("parse").as_deref() {
            Some("text") => Some("txt"),
            Some("html") => Some("html"),
            _ => current.kind.template_format(),
        };

        match format {
            Some(format) => self.build_rendered(current, body, format),
            None => self.build_passthrough(&current, body),
        }
    }

    /// Render a markup/text source, write it, then drain the generation
    /// queue in FIFO order. A failed render writes nothing and discards the
    /// remaining queue.
    fn build_rendered(&mut self, mut current: Source, body: Option<Vec<u8>>, format: &str) -> Result<()> {
        let Some(body) = body else {
            return Ok(());
        };
        let body = String::from_utf8(body)
            .with_context(|| format!("{} is not valid UTF-8", current.local.display()))?;

        let set = self.engine.template_set(&self.config, format)?;
        let build_ctx = RefCell::new(BuildCtx::default());

        let rendered = {
            let env = RenderEnv {
                config: &self.config,
                registry: &self.sources,
            };
            let (out, scope) = template::render(&set, &current, &body, &env, &build_ctx)?;
            current.page = scope.page;
            current.pages = scope.pages;
            out
        };
        self.write_rendered(&current, format, rendered)?;

        // Publish the pagination numbers this render computed, so later
        // renders calling `pages` on this source see them.
        if let Some(entry) = self.sources.get_mut(&current.local) {
            entry.page = current.page;
            entry.pages = current.pages;
        }

        loop {
            let next = build_ctx.borrow_mut().queue.pop_front();
            let Some(mut derived) = next else { break };

            // Loading re-resolves the path from the local file; a derived
            // source keeps the expanded logical path it was queued with.
            let logical = derived.path.clone();
            let derived_body = match derived.load(&self.config) {
                Some(bytes) => String::from_utf8(bytes.to_vec()).with_context(|| {
                    format!("{} is not valid UTF-8", derived.local.display())
                })?,
                None => continue,
            };
            derived.path = logical;
            let rendered = {
                let env = RenderEnv {
                    config: &self.config,
                    registry: &self.sources,
                };
                let (out, scope) = template::render(&set, &derived, &derived_body, &env, &build_ctx)?;
                derived.page = scope.page;
                derived.pages = scope.pages;
                out
            };
            self.write_rendered(&derived, format, rendered)?;
        }
        Ok(())
    }

    fn write_rendered(&self, source: &Source, format: &str, rendered: String) -> Result<()> {
        let bytes = if format == "html" && self.config.minify {
            match minify::minify(ContentKind::Markup, rendered.as_bytes()) {
                Ok(minified) => minified.into_owned(),
                Err(err) => {
                    log!("error"; "minify {}: {err}", source.local.display());
                    rendered.into_bytes()
                }
            }
        } else {
            rendered.into_bytes()
        };
        write_output(&paths::output_path(source, &self.config), &bytes)
    }

    /// Copy a non-template source to the output, honoring metadata commands
    /// and asset minification.
    fn build_passthrough(&self, current: &Source, body: Option<Vec<u8>>) -> Result<()> {
        let Some(mut bytes) = body else {
            return Ok(());
        };

        if self.config.dev {
            if let Some(command) = current.meta_str("serve") {
                exec::run_detached(&command);
                return Ok(());
            }
        } else if let Some(command) = current.meta_str("build") {
            exec::run_command(&command)?;
            return Ok(());
        }

        if self.config.minify && current.kind.is_minifiable() {
            match minify::minify(current.kind, &bytes).map(|m| m.into_owned()) {
                Ok(minified) => bytes = minified,
                Err(err) => log!("error"; "minify {}: {err}", current.local.display()),
            }
        }
        write_output(&paths::output_path(current, &self.config), &bytes)
    }

    /// Rebuild every registered source. Per-source failures are collected,
    /// never aborting the batch.
    pub fn build_all(&mut self, reload: bool) -> BuildSummary {
        let mut summary = BuildSummary::default();

        if self.config.clean && self.config.output.exists() {
            if let Err(err) = fs::remove_dir_all(&self.config.output) {
                log!("error"; "failed to clean {}: {err}", self.config.output.display());
            }
        }

        let mut locals: Vec<PathBuf> = self.sources.keys().cloned().collect();
        locals.sort();

        for local in locals {
            if reload {
                self.reload(&local);
            }
            if let Some(source) = self.sources.get(&local) {
                *summary.counts.entry(source.ext.clone()).or_insert(0) += 1;
            }
            if let Err(err) = self.build(&local) {
                log!("error"; "{err}");
                summary.errors.push(err);
            }
        }

        log!("build"; "generated:");
        let mut counts: Vec<_> = summary.counts.iter().collect();
        counts.sort();
        for (ext, count) in counts {
            log!("build"; "  {ext}: {count}");
        }
        summary
    }

    /// Delete the output artifact for a source, pruning one level of
    /// newly-empty parent directory.
    pub fn remove(&self, local: &Path) -> Result<()> {
        let Some(source) = self.sources.get(local) else {
            return Ok(());
        };

        let out_path = paths::output_path(source, &self.config);
        fs::remove_file(&out_path)
            .with_context(|| format!("remove failed for {}", out_path.display()))?;

        if let Some(parent) = out_path.parent() {
            if utils::is_dir_empty(parent)
                .with_context(|| format!("remove dir check for {}", parent.display()))?
            {
                fs::remove_dir(parent)
                    .with_context(|| format!("remove dir failed for {}", parent.display()))?;
            }
        }
        Ok(())
    }
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}
