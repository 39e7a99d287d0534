//! The template function library.
//!
//! Everything here operates on [`Value`]s. Most functions are pure; the two
//! render-scoped ones — `page` and `paginate` — close over the current
//! build's generation queue and the current render's pagination scratch
//! state, never over anything longer-lived.

use crate::{
    log,
    paths::join_base,
    source::Source,
    template::{BuildCtx, RenderEnv, RenderScope},
    template::value::{Pair, SourceRef, Value},
};
use anyhow::{Context, Result, bail};
use regex::Regex;
use serde_json::{Value as Json, json};
use std::cell::RefCell;

/// Everything a function call may touch during one render.
pub struct FuncCtx<'a> {
    pub env: &'a RenderEnv<'a>,
    /// The source being rendered (immutable; pagination updates go to `scope`)
    pub current: &'a Source,
    /// Per-render pagination scratch state
    pub scope: &'a RefCell<RenderScope>,
    /// Per-build generation queue
    pub build: &'a RefCell<BuildCtx>,
}

impl FuncCtx<'_> {
    /// Dispatch a function call by name.
    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        match name {
            "sort" => self.sort(args),
            "limit" => self.limit(args),
            "offset" => self.offset(args),
            "filter" => self.filter(args),
            "select" => self.select(args),
            "contains" => self.contains(args),
            "json" => self.json(args),
            "data" => self.data(args),
            "path" => self.path(args),
            "sources" => self.sources(args),
            "pages" => self.pages(args),
            "page" => self.page(args),
            "paginate" => self.paginate(args),
            other => bail!("unknown template function `{other}`"),
        }
    }

    // ------------------------------------------------------------------
    // List operations
    // ------------------------------------------------------------------

    /// `sort prop order list` — stable sort by a dotted-field accessor.
    fn sort(&self, args: Vec<Value>) -> Result<Value> {
        let [prop, order, list] = take::<3>(args, "sort")?;
        let prop = prop.to_display_string();
        let order = order.to_display_string();
        let mut items = expect_list(&list, "sort")?;

        items.sort_by(|a, b| {
            let cmp = a.field_str(&prop).cmp(&b.field_str(&prop));
            if order == "desc" { cmp.reverse() } else { cmp }
        });
        Ok(Value::List(items))
    }

    /// `limit n list` — first `n` elements.
    fn limit(&self, args: Vec<Value>) -> Result<Value> {
        let [n, list] = take::<2>(args, "limit")?;
        let n = expect_int(&n, "limit")?.max(0) as usize;
        let mut items = expect_list(&list, "limit")?;
        items.truncate(n);
        Ok(Value::List(items))
    }

    /// `offset n list` — drop the first `n` elements.
    fn offset(&self, args: Vec<Value>) -> Result<Value> {
        let [n, list] = take::<2>(args, "offset")?;
        let n = expect_int(&n, "offset")?.max(0) as usize;
        let items = expect_list(&list, "offset")?;
        Ok(Value::List(items.into_iter().skip(n).collect()))
    }

    /// `filter prop pattern list` — keep elements whose field matches the
    /// regex, preserving relative order.
    fn filter(&self, args: Vec<Value>) -> Result<Value> {
        let [prop, pattern, list] = take::<3>(args, "filter")?;
        let prop = prop.to_display_string();
        let pattern = pattern.to_display_string();
        let re = Regex::new(&pattern)
            .with_context(|| format!("filter: invalid pattern `{pattern}`"))?;
        let items = expect_list(&list, "filter")?;
        Ok(Value::List(
            items
                .into_iter()
                .filter(|item| re.is_match(&item.field_str(&prop)))
                .collect(),
        ))
    }

    /// `select map` — map entries as a list of `{Key, Value}` pairs.
    fn select(&self, args: Vec<Value>) -> Result<Value> {
        let [map] = take::<1>(args, "select")?;
        match map {
            Value::Data(Json::Object(obj)) => Ok(Value::List(
                obj.into_iter()
                    .map(|(key, value)| Value::Pair(Box::new(Pair { key, value })))
                    .collect(),
            )),
            Value::Map(map) => {
                let mut entries: Vec<_> = map.into_iter().collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                Ok(Value::List(
                    entries
                        .into_iter()
                        .map(|(key, value)| {
                            Value::Pair(Box::new(Pair {
                                key,
                                value: value.to_json(),
                            }))
                        })
                        .collect(),
                ))
            }
            other => bail!("select expects a map, got {}", kind_name(&other)),
        }
    }

    // ------------------------------------------------------------------
    // Scalars
    // ------------------------------------------------------------------

    /// `contains substr s`
    fn contains(&self, args: Vec<Value>) -> Result<Value> {
        let [substr, s] = take::<2>(args, "contains")?;
        Ok(Value::Bool(
            s.to_display_string().contains(&substr.to_display_string()),
        ))
    }

    /// `json value` — raw JSON string, for safe script embedding.
    fn json(&self, args: Vec<Value>) -> Result<Value> {
        let [value] = take::<1>(args, "json")?;
        Ok(Value::Str(serde_json::to_string(&value.to_json())?))
    }

    /// `path p` — base-path-prefixed URL.
    fn path(&self, args: Vec<Value>) -> Result<Value> {
        let [p] = take::<1>(args, "path")?;
        Ok(Value::Str(join_base(
            &self.env.config.base,
            &p.to_display_string(),
        )))
    }

    // ------------------------------------------------------------------
    // Site access
    // ------------------------------------------------------------------

    /// `data name` — parsed structured value from the data directory.
    /// Missing or malformed files are a soft failure yielding null.
    fn data(&self, args: Vec<Value>) -> Result<Value> {
        let [name] = take::<1>(args, "data")?;
        let name = name.to_display_string();
        let path = self.env.config.data_dir().join(&name);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(err) => {
                log!("error"; "data: failed to read {}: {err}", path.display());
                return Ok(Value::Null);
            }
        };

        let parsed: Result<Json> = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => serde_yaml::from_slice(&raw).map_err(Into::into),
            _ => serde_json::from_slice(&raw).map_err(Into::into),
        };
        match parsed {
            Ok(json) => Ok(Value::Data(json)),
            Err(err) => {
                log!("error"; "data: failed to parse {}: {err}", path.display());
                Ok(Value::Null)
            }
        }
    }

    /// `sources prop pattern` — glob-matched registry entries, ordered by
    /// local path for deterministic output.
    fn sources(&self, args: Vec<Value>) -> Result<Value> {
        let [prop, pattern] = take::<2>(args, "sources")?;
        let prop = prop.to_display_string();
        let pattern = pattern.to_display_string();
        let re = glob_to_regex(&pattern)
            .with_context(|| format!("sources: invalid pattern `{pattern}`"))?;

        let mut entries: Vec<&Source> = self.env.registry.values().collect();
        entries.sort_by(|a, b| a.local.cmp(&b.local));

        Ok(Value::List(
            entries
                .into_iter()
                .filter(|s| re.is_match(&s.field(&prop)))
                .map(|s| Value::Source(SourceRef::from_source(s)))
                .collect(),
        ))
    }

    // ------------------------------------------------------------------
    // Pagination / derived pages
    // ------------------------------------------------------------------

    /// `paginate limit list` — current page's slice; queues pages 2..N on
    /// the first call of a page-1 render.
    fn paginate(&self, args: Vec<Value>) -> Result<Value> {
        let [limit, list] = take::<2>(args, "paginate")?;
        let limit = expect_int(&limit, "paginate")?.max(1) as usize;
        let Some(items) = list.as_list() else {
            bail!("paginate expects a list, got {}", kind_name(&list));
        };

        let mut scope = self.scope.borrow_mut();
        if scope.page == 0 {
            scope.pages = items.len().div_ceil(limit);
            scope.page = 1;
            if scope.pages > 1 {
                let mut build = self.build.borrow_mut();
                for i in 2..=scope.pages {
                    let mut derived = self.current.clone();
                    derived.path = format!("{}/{i}", self.current.path);
                    derived.name = format!("{i}.{}", derived.ext);
                    derived.page = i;
                    derived.pages = scope.pages;
                    build.queue.push_back(derived);
                }
            }
        }

        let start = (scope.page - 1) * limit;
        let end = (start + limit).min(items.len());
        let slice = if start >= items.len() {
            Vec::new()
        } else {
            items[start..end].to_vec()
        };
        Ok(Value::List(slice))
    }

    /// `page relSourcePath logicalSubPath` — look up or create (once per
    /// sub-path per build) a derived source; returns its logical path.
    fn page(&self, args: Vec<Value>) -> Result<Value> {
        let [rel, sub] = take::<2>(args, "page")?;
        let rel = rel.to_display_string();
        let sub = sub.to_display_string();

        let mut build = self.build.borrow_mut();
        if let Some(path) = build.seen.get(&sub) {
            return Ok(Value::Str(path.clone()));
        }

        let local = self.env.config.source_dir().join(&rel);
        let mut derived = Source::new(local);
        let _ = derived.load(self.env.config);
        derived.path = format!("{}/{sub}", derived.path);
        derived.name = format!("{sub}.{}", derived.ext);
        derived.sub_path = sub.clone();

        let path = derived.path.clone();
        build.seen.insert(sub, path.clone());
        build.queue.push_back(derived);
        Ok(Value::Str(path))
    }

    /// `pages source` — ordered `{Path, Page, Active}` descriptors for a
    /// paginated source; empty unless more than one page exists.
    fn pages(&self, args: Vec<Value>) -> Result<Value> {
        let [source] = take::<1>(args, "pages")?;
        let Value::Source(src) = source else {
            bail!("pages expects a source, got {}", kind_name(&source));
        };

        // The source being rendered reads its live pagination state; any
        // other source reads the snapshot it was captured with.
        let (page, total) = if src.local == self.current.local {
            let scope = self.scope.borrow();
            (scope.page, scope.pages)
        } else {
            (src.page, src.pages)
        };

        let base = strip_page_suffix(&src.path, page);
        let mut descriptors = Vec::new();
        if total > 1 {
            for i in 1..=total {
                let path = if i > 1 { format!("{base}/{i}") } else { base.clone() };
                descriptors.push(Value::Data(json!({
                    "Path": path,
                    "Page": i,
                    "Active": i == page,
                })));
            }
        }
        Ok(Value::List(descriptors))
    }
}

/// Remove the page-number suffix a derived pagination page carries, so
/// descriptors link to `/news`, `/news/2`, … rather than `/news/2/3`.
fn strip_page_suffix(path: &str, page: usize) -> String {
    if page > 1 {
        path.strip_suffix(&format!("/{page}"))
            .unwrap_or(path)
            .to_string()
    } else {
        path.to_string()
    }
}

// ============================================================================
// Argument helpers
// ============================================================================

fn take<const N: usize>(args: Vec<Value>, name: &str) -> Result<[Value; N]> {
    let got = args.len();
    args.try_into()
        .map_err(|_| anyhow::anyhow!("{name} expects {N} argument(s), got {got}"))
}

fn expect_list(value: &Value, name: &str) -> Result<Vec<Value>> {
    value
        .as_list()
        .with_context(|| format!("{name} expects a list, got {}", kind_name(value)))
}

fn expect_int(value: &Value, name: &str) -> Result<i64> {
    value
        .as_int()
        .with_context(|| format!("{name} expects a number, got {}", kind_name(value)))
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Int(_) => "number",
        Value::Str(_) => "string",
        Value::Data(_) => "data",
        Value::Source(_) => "source",
        Value::Pair(_) => "pair",
        Value::List(_) => "list",
        Value::Map(_) => "map",
    }
}

/// Translate a glob pattern (`*`, `?`) into an anchored regex.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteConfig;
    use rustc_hash::FxHashMap;
    use std::path::PathBuf;

    fn test_config() -> SiteConfig {
        let mut config = SiteConfig::default();
        config.root = PathBuf::from("/site");
        config.output = PathBuf::from("/site/public");
        config
    }

    struct Fixture {
        config: SiteConfig,
        registry: FxHashMap<PathBuf, Source>,
        current: Source,
    }

    impl Fixture {
        fn new() -> Self {
            let config = test_config();
            let mut current = Source::new(PathBuf::from("/site/src/news/index.html"));
            current.path = "/news/".to_string();
            Self {
                config,
                registry: FxHashMap::default(),
                current,
            }
        }

        fn run<T>(&self, f: impl FnOnce(&FuncCtx) -> T) -> T {
            let env = RenderEnv {
                config: &self.config,
                registry: &self.registry,
            };
            let scope = RefCell::new(RenderScope {
                page: self.current.page,
                pages: self.current.pages,
            });
            let build = RefCell::new(BuildCtx::default());
            let ctx = FuncCtx {
                env: &env,
                current: &self.current,
                scope: &scope,
                build: &build,
            };
            f(&ctx)
        }
    }

    fn str_list(items: &[&str]) -> Value {
        Value::List(items.iter().map(|s| Value::Str((*s).into())).collect())
    }

    fn data_list(items: Vec<Json>) -> Value {
        Value::Data(Json::Array(items))
    }

    #[test]
    fn test_sort_asc_desc_are_reverses() {
        let fx = Fixture::new();
        let list = data_list(vec![
            json!({"date": "2020-01-02"}),
            json!({"date": "2019-12-31"}),
            json!({"date": "2020-01-01"}),
        ]);
        let asc = fx
            .run(|ctx| ctx.sort(vec![Value::Str("date".into()), Value::Str("asc".into()), list.clone()]))
            .unwrap();
        let desc = fx
            .run(|ctx| ctx.sort(vec![Value::Str("date".into()), Value::Str("desc".into()), list]))
            .unwrap();

        let Value::List(mut asc_items) = asc else { panic!() };
        let Value::List(desc_items) = desc else { panic!() };
        asc_items.reverse();
        assert_eq!(asc_items, desc_items);
    }

    #[test]
    fn test_sort_rejects_non_list() {
        let fx = Fixture::new();
        let result = fx.run(|ctx| {
            ctx.sort(vec![
                Value::Str("x".into()),
                Value::Str("asc".into()),
                Value::Int(3),
            ])
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_limit_and_offset() {
        let fx = Fixture::new();
        let list = str_list(&["a", "b", "c"]);
        let limited = fx.run(|ctx| ctx.limit(vec![Value::Int(2), list.clone()])).unwrap();
        assert_eq!(limited, str_list(&["a", "b"]));

        let offset = fx.run(|ctx| ctx.offset(vec![Value::Int(2), list.clone()])).unwrap();
        assert_eq!(offset, str_list(&["c"]));

        // Out-of-range values degrade to everything / nothing.
        let all = fx.run(|ctx| ctx.limit(vec![Value::Int(99), list.clone()])).unwrap();
        assert_eq!(all, str_list(&["a", "b", "c"]));
        let none = fx.run(|ctx| ctx.offset(vec![Value::Int(99), list])).unwrap();
        assert_eq!(none, Value::List(vec![]));
    }

    #[test]
    fn test_filter_preserves_order() {
        let fx = Fixture::new();
        let list = data_list(vec![
            json!({"tag": "rust"}),
            json!({"tag": "go"}),
            json!({"tag": "rustacean"}),
        ]);
        let out = fx
            .run(|ctx| {
                ctx.filter(vec![
                    Value::Str("tag".into()),
                    Value::Str("^rust".into()),
                    list,
                ])
            })
            .unwrap();
        let Value::List(items) = out else { panic!() };
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].field_str("tag"), "rust");
        assert_eq!(items[1].field_str("tag"), "rustacean");
    }

    #[test]
    fn test_filter_invalid_regex_is_an_error() {
        let fx = Fixture::new();
        let result = fx.run(|ctx| {
            ctx.filter(vec![
                Value::Str("x".into()),
                Value::Str("(".into()),
                str_list(&[]),
            ])
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_select_keeps_object_order() {
        let fx = Fixture::new();
        let map = Value::Data(serde_json::from_str(r#"{"b": 1, "a": 2}"#).unwrap());
        let out = fx.run(|ctx| ctx.select(vec![map])).unwrap();
        let Value::List(items) = out else { panic!() };
        // preserve_order keeps insertion order
        assert_eq!(items[0].field_str("Key"), "b");
        assert_eq!(items[1].field_str("Key"), "a");
        assert_eq!(items[0].field_str("Value"), "1");
    }

    #[test]
    fn test_contains() {
        let fx = Fixture::new();
        let out = fx
            .run(|ctx| ctx.contains(vec![Value::Str("ews".into()), Value::Str("news".into())]))
            .unwrap();
        assert_eq!(out, Value::Bool(true));
    }

    #[test]
    fn test_json_emits_raw_string() {
        let fx = Fixture::new();
        let out = fx
            .run(|ctx| ctx.json(vec![Value::Data(json!({"a": [1, 2]}))]))
            .unwrap();
        assert_eq!(out, Value::Str(r#"{"a":[1,2]}"#.into()));
    }

    #[test]
    fn test_path_prefixes_base() {
        let mut fx = Fixture::new();
        fx.config.base = "/blog/".into();
        let out = fx
            .run(|ctx| ctx.path(vec![Value::Str("/news".into())]))
            .unwrap();
        assert_eq!(out, Value::Str("/blog/news".into()));
    }

    #[test]
    fn test_glob_to_regex() {
        let re = glob_to_regex("/news/*").unwrap();
        assert!(re.is_match("/news/a"));
        assert!(re.is_match("/news/2020/01"));
        assert!(!re.is_match("/about"));

        let re = glob_to_regex("/p?st").unwrap();
        assert!(re.is_match("/post"));
        assert!(!re.is_match("/poost"));

        // Regex metacharacters in the pattern are literal.
        let re = glob_to_regex("/a.b").unwrap();
        assert!(re.is_match("/a.b"));
        assert!(!re.is_match("/axb"));
    }

    #[test]
    fn test_sources_glob_and_order() {
        let mut fx = Fixture::new();
        for name in ["news/b.html", "news/a.html", "about.html"] {
            let mut s = Source::new(PathBuf::from(format!("/site/src/{name}")));
            s.path = format!(
                "/{}",
                name.trim_end_matches(".html")
            );
            fx.registry.insert(s.local.clone(), s);
        }
        let out = fx
            .run(|ctx| {
                ctx.sources(vec![Value::Str("Path".into()), Value::Str("/news/*".into())])
            })
            .unwrap();
        let Value::List(items) = out else { panic!() };
        assert_eq!(items.len(), 2);
        // ordered by local path
        assert_eq!(items[0].field_str("Path"), "/news/a");
        assert_eq!(items[1].field_str("Path"), "/news/b");
    }

    #[test]
    fn test_paginate_math() {
        let fx = Fixture::new();
        let list = str_list(&["a", "b", "c", "d", "e"]);
        fx.run(|ctx| {
            let out = ctx.paginate(vec![Value::Int(2), list.clone()]).unwrap();
            assert_eq!(out, str_list(&["a", "b"]));

            let scope = ctx.scope.borrow();
            assert_eq!((scope.page, scope.pages), (1, 3));
            drop(scope);

            // Pages 2..3 queued with correct paths and the true remainder
            // on the last page.
            let build = ctx.build.borrow();
            assert_eq!(build.queue.len(), 2);
            assert_eq!(build.queue[0].path, "/news//2");
            assert_eq!(build.queue[0].page, 2);
            assert_eq!(build.queue[1].page, 3);
        });
    }

    #[test]
    fn test_paginate_idempotent_within_render() {
        let fx = Fixture::new();
        let list = str_list(&["a", "b", "c"]);
        fx.run(|ctx| {
            let first = ctx.paginate(vec![Value::Int(2), list.clone()]).unwrap();
            let second = ctx.paginate(vec![Value::Int(2), list.clone()]).unwrap();
            assert_eq!(first, second);
            // Queue not extended by the second call.
            assert_eq!(ctx.build.borrow().queue.len(), 1);
        });
    }

    #[test]
    fn test_paginate_on_derived_page_slices_without_queueing() {
        let mut fx = Fixture::new();
        fx.current.page = 2;
        fx.current.pages = 3;
        let list = str_list(&["a", "b", "c", "d", "e"]);
        fx.run(|ctx| {
            let out = ctx.paginate(vec![Value::Int(2), list]).unwrap();
            assert_eq!(out, str_list(&["c", "d"]));
            assert!(ctx.build.borrow().queue.is_empty());
        });
    }

    #[test]
    fn test_paginate_last_page_remainder() {
        let mut fx = Fixture::new();
        fx.current.page = 3;
        fx.current.pages = 3;
        let list = str_list(&["a", "b", "c", "d", "e"]);
        fx.run(|ctx| {
            let out = ctx.paginate(vec![Value::Int(2), list]).unwrap();
            assert_eq!(out, str_list(&["e"]));
        });
    }

    #[test]
    fn test_paginate_rejects_non_sequence() {
        let fx = Fixture::new();
        let result = fx.run(|ctx| ctx.paginate(vec![Value::Int(2), Value::Str("nope".into())]));
        assert!(result.is_err());
    }

    #[test]
    fn test_pages_descriptors() {
        let fx = Fixture::new();
        fx.run(|ctx| {
            ctx.scope.borrow_mut().page = 2;
            ctx.scope.borrow_mut().pages = 3;
            let src = Value::Source(SourceRef::from_source(&fx.current));
            let out = ctx.pages(vec![src]).unwrap();
            let Value::List(items) = out else { panic!() };
            assert_eq!(items.len(), 3);
            assert_eq!(items[0].field_str("Path"), "/news/");
            assert_eq!(items[1].field_str("Path"), "/news//2");
            assert_eq!(items[1].field_str("Active"), "true");
            assert_eq!(items[2].field_str("Active"), "false");
        });
    }

    #[test]
    fn test_pages_single_page_is_empty() {
        let fx = Fixture::new();
        fx.run(|ctx| {
            ctx.scope.borrow_mut().page = 1;
            ctx.scope.borrow_mut().pages = 1;
            let src = Value::Source(SourceRef::from_source(&fx.current));
            let out = ctx.pages(vec![src]).unwrap();
            assert_eq!(out, Value::List(vec![]));
        });
    }

    #[test]
    fn test_unknown_function() {
        let fx = Fixture::new();
        assert!(fx.run(|ctx| ctx.call("frobnicate", vec![])).is_err());
    }
}
