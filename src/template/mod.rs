//! Template sets, the per-format cache and the render executor.
//!
//! A source body is itself a template: it is parsed on top of the named
//! templates globbed from the templates directory, registered under the
//! source's template name, and executed as the root. `define` blocks in the
//! body override directory templates with the same name.

pub mod funcs;
pub mod parse;
pub mod value;

pub use funcs::FuncCtx;
pub use value::Value;

use crate::{
    config::SiteConfig,
    source::Source,
    template::{
        parse::{Expr, Node},
        value::SourceRef,
    },
    utils,
};
use anyhow::{Context, Result, bail};
use rustc_hash::FxHashMap;
use std::{
    cell::RefCell,
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::Arc,
};
use walkdir::WalkDir;

/// Include nesting limit; cyclic includes hit this instead of recursing
/// forever.
const MAX_INCLUDE_DEPTH: usize = 64;

/// Read-only site state a render may consult.
pub struct RenderEnv<'a> {
    pub config: &'a SiteConfig,
    pub registry: &'a FxHashMap<PathBuf, Source>,
}

/// Per-render pagination scratch state.
///
/// Starts from the source's stored page numbers (0/0 for a fresh primary
/// render, preset for a derived pagination page) and is written back to the
/// source after a successful render.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderScope {
    pub page: usize,
    pub pages: usize,
}

/// Per-build generation state: the FIFO queue of derived sources and the
/// sub-path dedup map for `page`. Created fresh for every `build` call.
#[derive(Debug, Default)]
pub struct BuildCtx {
    pub queue: VecDeque<Source>,
    pub seen: FxHashMap<String, String>,
}

// ============================================================================
// Template sets
// ============================================================================

/// Named templates for one format, keyed by file name (extension included).
#[derive(Debug, Default)]
pub struct TemplateSet {
    templates: FxHashMap<String, Vec<Node>>,
}

impl TemplateSet {
    /// Glob the templates directory (non-recursive) for `*.{format}` files
    /// and parse each one. A missing directory yields an empty set.
    pub fn from_dir(dir: &Path, format: &str) -> Result<Self> {
        let mut set = Self::default();
        if !dir.is_dir() {
            return Ok(set);
        }

        let suffix = format!(".{format}");
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !entry.file_type().is_file() || !name.ends_with(&suffix) {
                continue;
            }
            let raw = std::fs::read_to_string(entry.path())
                .with_context(|| format!("failed to read template {}", entry.path().display()))?;
            let parsed = parse::parse(&raw)
                .with_context(|| format!("failed to parse template {name}"))?;
            for (define_name, body) in parsed.defines {
                set.templates.insert(define_name, body);
            }
            set.templates.insert(name, parsed.body);
        }
        Ok(set)
    }

    fn get(&self, name: &str) -> Option<&Vec<Node>> {
        self.templates.get(name)
    }

    #[cfg(test)]
    pub fn insert(&mut self, name: &str, src: &str) -> Result<()> {
        let parsed = parse::parse(src)?;
        for (define_name, body) in parsed.defines {
            self.templates.insert(define_name, body);
        }
        self.templates.insert(name.to_string(), parsed.body);
        Ok(())
    }
}

/// Per-format template-set cache, invalidated when a template file changes.
#[derive(Default)]
pub struct Engine {
    cache: FxHashMap<String, Arc<TemplateSet>>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn template_set(&mut self, config: &SiteConfig, format: &str) -> Result<Arc<TemplateSet>> {
        if let Some(set) = self.cache.get(format) {
            return Ok(Arc::clone(set));
        }
        let set = Arc::new(TemplateSet::from_dir(&config.templates_dir(), format)?);
        self.cache.insert(format.to_string(), Arc::clone(&set));
        Ok(set)
    }

    pub fn invalidate(&mut self) {
        self.cache.clear();
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// Render a source body against a template set.
///
/// The returned scope carries the pagination numbers `paginate` computed;
/// the caller writes them back to the registry entry.
pub fn render(
    set: &TemplateSet,
    source: &Source,
    body: &str,
    env: &RenderEnv<'_>,
    build: &RefCell<BuildCtx>,
) -> Result<(String, RenderScope)> {
    let parsed = parse::parse(body)
        .with_context(|| format!("failed to parse {}", source.local.display()))?;

    let mut overlays: FxHashMap<String, Vec<Node>> = parsed.defines.into_iter().collect();
    let template_name = source
        .meta_str("template")
        .unwrap_or_else(|| source.name.clone());
    overlays.insert(template_name.clone(), parsed.body);

    let scope = RefCell::new(RenderScope {
        page: source.page,
        pages: source.pages,
    });
    let renderer = Renderer {
        set,
        overlays,
        funcs: FuncCtx {
            env,
            current: source,
            scope: &scope,
            build,
        },
    };

    let dot = render_context(source, env);
    let mut out = String::new();
    renderer
        .exec_named(&template_name, &dot, &mut out, 0)
        .with_context(|| format!("failed to render {}", source.local.display()))?;
    Ok((out, scope.into_inner()))
}

/// The context map the root template executes against: every metadata
/// field, with the reserved keys layered on top.
fn render_context(source: &Source, env: &RenderEnv<'_>) -> Value {
    let mut map = FxHashMap::default();
    for (key, value) in &source.meta {
        map.insert(key.clone(), Value::Data(value.clone()));
    }
    map.insert("Path".into(), Value::Str(source.sub_path.clone()));
    map.insert("Page".into(), Value::Int(source.page as i64));
    map.insert("Pages".into(), Value::Int(source.pages as i64));
    map.insert("Dev".into(), Value::Bool(env.config.dev));
    map.insert("Source".into(), Value::Source(SourceRef::from_source(source)));
    map.insert("BasePath".into(), Value::Str(env.config.base.clone()));
    map.insert("Today".into(), Value::Str(utils::today()));
    Value::Map(map)
}

struct Renderer<'a> {
    set: &'a TemplateSet,
    /// Body root + body `define`s; shadow same-named directory templates
    overlays: FxHashMap<String, Vec<Node>>,
    funcs: FuncCtx<'a>,
}

impl Renderer<'_> {
    fn lookup(&self, name: &str) -> Option<&Vec<Node>> {
        self.overlays.get(name).or_else(|| self.set.get(name))
    }

    fn exec_named(&self, name: &str, dot: &Value, out: &mut String, depth: usize) -> Result<()> {
        if depth > MAX_INCLUDE_DEPTH {
            bail!("template include depth exceeded at `{name}`");
        }
        let Some(nodes) = self.lookup(name) else {
            bail!("template `{name}` is not defined");
        };
        self.exec(nodes, dot, out, depth)
    }

    fn exec(&self, nodes: &[Node], dot: &Value, out: &mut String, depth: usize) -> Result<()> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Output(expr) => {
                    let value = self.eval(expr, dot)?;
                    out.push_str(&value.to_display_string());
                }
                Node::If {
                    cond,
                    then_body,
                    else_body,
                } => {
                    let branch = if self.eval(cond, dot)?.is_truthy() {
                        then_body
                    } else {
                        else_body
                    };
                    self.exec(branch, dot, out, depth)?;
                }
                Node::Range { expr, body } => {
                    let value = self.eval(expr, dot)?;
                    let Some(items) = value.as_list() else {
                        bail!("range expects a list, got `{value}`");
                    };
                    for item in items {
                        self.exec(body, &item, out, depth)?;
                    }
                }
                Node::Include { name, arg } => {
                    let inner_dot = match arg {
                        Some(expr) => self.eval(expr, dot)?,
                        None => Value::Null,
                    };
                    self.exec_named(name, &inner_dot, out, depth + 1)?;
                }
            }
        }
        Ok(())
    }

    fn eval(&self, expr: &Expr, dot: &Value) -> Result<Value> {
        match expr {
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Int(n) => Ok(Value::Int(*n)),
            Expr::Var(path) => Ok(dot.lookup(path)),
            Expr::Call { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, dot))
                    .collect::<Result<Vec<_>>>()?;
                self.funcs.call(name, args)
            }
            Expr::Field { base, path } => Ok(self.eval(base, dot)?.lookup(path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render_body(body: &str, meta: serde_json::Value) -> Result<String> {
        render_with(TemplateSet::default(), body, meta)
    }

    fn render_with(set: TemplateSet, body: &str, meta: serde_json::Value) -> Result<String> {
        let mut config = SiteConfig::default();
        config.root = PathBuf::from("/site");
        config.output = PathBuf::from("/site/public");
        let registry = FxHashMap::default();
        let env = RenderEnv {
            config: &config,
            registry: &registry,
        };

        let mut source = Source::new(PathBuf::from("/site/src/page.html"));
        source.path = "/page".to_string();
        if let serde_json::Value::Object(map) = meta {
            source.meta = map;
        }

        let build = RefCell::new(BuildCtx::default());
        render(&set, &source, body, &env, &build).map(|(out, _)| out)
    }

    #[test]
    fn test_render_literal_and_meta() {
        let out = render_body("<h1>{{ .title }}</h1>", json!({"title": "Hi"})).unwrap();
        assert_eq!(out, "<h1>Hi</h1>");
    }

    #[test]
    fn test_render_reserved_keys() {
        let out = render_body("{{ .BasePath }}|{{ .Page }}|{{ if .Dev }}d{{ end }}", json!({}))
            .unwrap();
        assert_eq!(out, "/|0|");
    }

    #[test]
    fn test_render_source_key() {
        let out = render_body("{{ .Source.Path }}", json!({})).unwrap();
        assert_eq!(out, "/page");
    }

    #[test]
    fn test_render_if_else() {
        let out = render_body(
            "{{ if .draft }}DRAFT{{ else }}live{{ end }}",
            json!({"draft": false}),
        )
        .unwrap();
        assert_eq!(out, "live");
    }

    #[test]
    fn test_render_range_over_meta_list() {
        let out = render_body(
            "{{ range .tags }}[{{ . }}]{{ end }}",
            json!({"tags": ["a", "b"]}),
        )
        .unwrap();
        assert_eq!(out, "[a][b]");
    }

    #[test]
    fn test_render_function_pipeline() {
        let out = render_body(
            r#"{{ range limit 1 (sort "name" "asc" .people) }}{{ .name }}{{ end }}"#,
            json!({"people": [{"name": "zoe"}, {"name": "ada"}]}),
        )
        .unwrap();
        assert_eq!(out, "ada");
    }

    #[test]
    fn test_body_define_overrides_directory_template() {
        let mut set = TemplateSet::default();
        set.insert("head.html", "<title>default</title>").unwrap();
        let out = render_with(
            set,
            r#"{{ define "head.html" }}<title>mine</title>{{ end }}{{ template "head.html" }}"#,
            json!({}),
        )
        .unwrap();
        assert_eq!(out, "<title>mine</title>");
    }

    #[test]
    fn test_include_passes_arg_as_dot() {
        let mut set = TemplateSet::default();
        set.insert("tag.html", "<b>{{ . }}</b>").unwrap();
        let out = render_with(set, r#"{{ template "tag.html" .title }}"#, json!({"title": "x"}))
            .unwrap();
        assert_eq!(out, "<b>x</b>");
    }

    #[test]
    fn test_meta_template_name_targets_layout() {
        // A `template:` override names the body; a layout referencing that
        // name would resolve to the body, and execution starts at the body.
        let out = render_body("body", json!({"template": "content.html"})).unwrap();
        assert_eq!(out, "body");
    }

    #[test]
    fn test_missing_include_is_an_error() {
        assert!(render_body(r#"{{ template "nope.html" }}"#, json!({})).is_err());
    }

    #[test]
    fn test_cyclic_include_is_bounded() {
        let mut set = TemplateSet::default();
        set.insert("a.html", r#"{{ template "b.html" }}"#).unwrap();
        set.insert("b.html", r#"{{ template "a.html" }}"#).unwrap();
        assert!(render_with(set, r#"{{ template "a.html" }}"#, json!({})).is_err());
    }

    #[test]
    fn test_range_non_list_is_an_error() {
        assert!(render_body("{{ range .title }}x{{ end }}", json!({"title": "s"})).is_err());
    }

    #[test]
    fn test_paginate_sets_scope_and_queue() {
        let mut config = SiteConfig::default();
        config.root = PathBuf::from("/site");
        config.output = PathBuf::from("/site/public");
        let registry = FxHashMap::default();
        let env = RenderEnv {
            config: &config,
            registry: &registry,
        };

        let mut source = Source::new(PathBuf::from("/site/src/news/index.html"));
        source.path = "/news/".to_string();
        source.meta = json!({"items": [1, 2, 3, 4, 5]})
            .as_object()
            .cloned()
            .unwrap();

        let build = RefCell::new(BuildCtx::default());
        let (out, scope) = render(
            &TemplateSet::default(),
            &source,
            "{{ range paginate 2 .items }}{{ . }}{{ end }}",
            &env,
            &build,
        )
        .unwrap();
        assert_eq!(out, "12");
        assert_eq!((scope.page, scope.pages), (1, 3));
        assert_eq!(build.borrow().queue.len(), 2);
    }
}
