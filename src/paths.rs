//! Logical and physical path resolution.
//!
//! Pure functions: re-resolving a source after a reload yields the same
//! result unless its metadata changed.

use crate::{
    config::SiteConfig,
    source::{ContentKind, Source, meta_display},
};
use std::path::PathBuf;

/// Resolve the logical/public path for a source.
///
/// A metadata `path` override is used verbatim (base-prefixed). Otherwise
/// the path relative to the source root is used; markup sources lose their
/// extension and a trailing `index` segment.
pub fn logical_path(source: &Source, config: &SiteConfig) -> String {
    if let Some(meta_path) = source.meta.get("path") {
        return join_base(&config.base, &meta_display(meta_path));
    }

    let rel = source
        .local
        .strip_prefix(config.source_dir())
        .unwrap_or(&source.local)
        .to_string_lossy()
        .replace('\\', "/");

    let mut path = rel;
    if source.kind == ContentKind::Markup {
        if let Some(stripped) = path.strip_suffix(&format!(".{}", source.ext)) {
            path = stripped.to_string();
        }
        path = strip_index_segment(&path);
    }
    join_base(&config.base, &path)
}

/// Physical output location for a source.
///
/// Markup sources use directory-style routing: unless the logical path
/// already ends in a markup extension, the file lands at
/// `<logical>/index.html`. Everything else maps directly under the
/// output root.
pub fn output_path(source: &Source, config: &SiteConfig) -> PathBuf {
    let logical = source.path.trim_start_matches('/');
    match source.kind {
        ContentKind::Markup => {
            if logical.ends_with(".html") || logical.ends_with(".htm") {
                config.output.join(logical)
            } else {
                config.output.join(logical).join("index.html")
            }
        }
        _ => config.output.join(logical),
    }
}

/// Prefix with the base path, ensuring exactly one slash at the seam.
pub fn join_base(base: &str, path: &str) -> String {
    format!("{base}{}", path.trim_start_matches('/'))
}

/// Drop a trailing `index` path segment, keeping the directory slash.
fn strip_index_segment(path: &str) -> String {
    if path == "index" {
        String::new()
    } else if let Some(dir) = path.strip_suffix("/index") {
        format!("{dir}/")
    } else {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    fn config_at(root: &Path) -> SiteConfig {
        let mut config = SiteConfig::default();
        config.root = root.to_path_buf();
        config.output = root.join("public");
        config
    }

    fn source_at(config: &SiteConfig, rel: &str) -> Source {
        let mut source = Source::new(config.source_dir().join(rel));
        source.path = logical_path(&source, config);
        source
    }

    #[test]
    fn test_meta_path_override_wins() {
        let config = config_at(Path::new("/site"));
        let mut source = Source::new(config.source_dir().join("deep/nested/file.html"));
        source.meta.insert("path".into(), json!("/custom"));
        assert_eq!(logical_path(&source, &config), "/custom");
    }

    #[test]
    fn test_markup_strips_extension_and_index() {
        let config = config_at(Path::new("/site"));
        assert_eq!(source_at(&config, "news/index.html").path, "/news/");
        assert_eq!(source_at(&config, "news.html").path, "/news");
        assert_eq!(source_at(&config, "index.html").path, "/");
    }

    #[test]
    fn test_index_only_stripped_as_whole_segment() {
        let config = config_at(Path::new("/site"));
        assert_eq!(source_at(&config, "myindex.html").path, "/myindex");
    }

    #[test]
    fn test_non_markup_keeps_extension() {
        let config = config_at(Path::new("/site"));
        assert_eq!(source_at(&config, "styles/site.css").path, "/styles/site.css");
        assert_eq!(source_at(&config, "robots.txt").path, "/robots.txt");
    }

    #[test]
    fn test_base_path_prefix() {
        let mut config = config_at(Path::new("/site"));
        config.base = "/blog/".to_string();
        assert_eq!(source_at(&config, "news.html").path, "/blog/news");
        let mut source = Source::new(config.source_dir().join("a.html"));
        source.meta.insert("path".into(), json!("/custom"));
        assert_eq!(logical_path(&source, &config), "/blog/custom");
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let config = config_at(Path::new("/site"));
        let mut source = source_at(&config, "news/index.html");
        let first = source.path.clone();
        source.path = logical_path(&source, &config);
        assert_eq!(source.path, first);
    }

    #[test]
    fn test_output_path_directory_routing() {
        let config = config_at(Path::new("/site"));
        let source = source_at(&config, "news/index.html");
        assert_eq!(
            output_path(&source, &config),
            Path::new("/site/public/news/index.html")
        );

        let source = source_at(&config, "about.html");
        assert_eq!(
            output_path(&source, &config),
            Path::new("/site/public/about/index.html")
        );
    }

    #[test]
    fn test_output_path_explicit_markup_extension() {
        let config = config_at(Path::new("/site"));
        let mut source = Source::new(config.source_dir().join("raw.html"));
        source.meta.insert("path".into(), json!("/raw.html"));
        source.path = logical_path(&source, &config);
        assert_eq!(
            output_path(&source, &config),
            Path::new("/site/public/raw.html")
        );
    }

    #[test]
    fn test_output_path_passthrough() {
        let config = config_at(Path::new("/site"));
        let source = source_at(&config, "img/logo.png");
        assert_eq!(
            output_path(&source, &config),
            Path::new("/site/public/img/logo.png")
        );
    }
}
