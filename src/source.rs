//! Source build units and content loading.
//!
//! A [`Source`] is one entry in the build registry: an absolute local path,
//! its resolved [`ContentKind`], frontmatter metadata, lazily loaded raw
//! content and the resolved public path. Content stays unloaded until the
//! first build touches it and is re-read only on an explicit [`Source::reload`].

use crate::{config::SiteConfig, log, paths};
use serde_json::{Map, Value as Json};
use std::{fs, path::PathBuf};

/// Frontmatter delimiter token; a block sits between two occurrences.
pub const FRONTMATTER_DELIM: &str = "---";

/// Content-type tag, resolved once from the file extension at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// `.html` / `.htm` — rendered through the html template family
    Markup,
    /// `.txt` — rendered through the txt template family
    Text,
    /// `.md`
    Markdown,
    /// `.css`
    Style,
    /// `.js`
    Script,
    /// `.json`
    Json,
    /// `.xml`
    Xml,
    /// anything else; copied verbatim
    Other,
}

impl ContentKind {
    pub fn from_ext(ext: &str) -> Self {
        match ext {
            "html" | "htm" => Self::Markup,
            "txt" => Self::Text,
            "md" => Self::Markdown,
            "css" => Self::Style,
            "js" => Self::Script,
            "json" => Self::Json,
            "xml" => Self::Xml,
            _ => Self::Other,
        }
    }

    /// Kinds whose files may carry a frontmatter block.
    pub const fn is_text_like(self) -> bool {
        matches!(
            self,
            Self::Markup | Self::Text | Self::Markdown | Self::Style | Self::Script | Self::Xml
        )
    }

    /// Template family this kind renders through, if any.
    pub const fn template_format(self) -> Option<&'static str> {
        match self {
            Self::Markup => Some("html"),
            Self::Text => Some("txt"),
            _ => None,
        }
    }

    /// Kinds minified on the pass-through path.
    pub const fn is_minifiable(self) -> bool {
        matches!(self, Self::Style | Self::Script)
    }
}

/// One build unit, keyed in the registry by `local`.
#[derive(Debug, Clone)]
pub struct Source {
    /// Base filename (default template name)
    pub name: String,
    /// Absolute local path; unique registry key
    pub local: PathBuf,
    /// Lowercased extension without the dot
    pub ext: String,
    /// Content-type tag resolved from the extension
    pub kind: ContentKind,
    /// Frontmatter metadata (empty object when absent or malformed)
    pub meta: Map<String, Json>,
    /// Resolved logical/public path
    pub path: String,
    /// Bound page-path parameter for derived sub-pages ("" when unbound)
    pub sub_path: String,
    /// Current pagination page (0 until a render computes it)
    pub page: usize,
    /// Total pagination pages (0 until a render computes it)
    pub pages: usize,
    /// Raw body bytes; `None` until first load
    content: Option<Vec<u8>>,
}

impl Source {
    pub fn new(local: PathBuf) -> Self {
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = local
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let kind = ContentKind::from_ext(&ext);
        Self {
            name,
            local,
            ext,
            kind,
            meta: Map::new(),
            path: String::new(),
            sub_path: String::new(),
            page: 0,
            pages: 0,
            content: None,
        }
    }

    /// Load content on first use; re-resolve the public path either way.
    ///
    /// An unreadable file is a soft failure: logged, content stays `None`,
    /// the source keeps its (empty) metadata and registry slot.
    pub fn load(&mut self, config: &SiteConfig) -> Option<&[u8]> {
        if self.content.is_none() {
            self.page = 0;
            self.pages = 0;
            match fs::read(&self.local) {
                Ok(raw) => {
                    let (meta, body) = if self.kind.is_text_like() {
                        split_frontmatter(&raw, FRONTMATTER_DELIM)
                    } else {
                        (None, raw.clone())
                    };
                    self.meta = meta
                        .map(|block| parse_meta(&block, &self.local))
                        .unwrap_or_default();
                    self.content = Some(body);
                }
                Err(err) => {
                    log!("error"; "failed to read {}: {err}", self.local.display());
                    self.meta = Map::new();
                }
            }
        }
        // Re-deriving the public path is idempotent unless metadata changed.
        self.path = paths::logical_path(self, config);
        self.content.as_deref()
    }

    /// Drop cached content and load it again from disk.
    pub fn reload(&mut self, config: &SiteConfig) -> Option<&[u8]> {
        self.content = None;
        self.load(config)
    }

    /// Metadata value rendered as a plain string, if the key exists.
    pub fn meta_str(&self, key: &str) -> Option<String> {
        self.meta.get(key).map(meta_display)
    }

    /// Dotted-field accessor returning a comparable string.
    ///
    /// Recognized props: `Path`, `Local`, `Name`, `Filename`, `Meta.<key…>`.
    pub fn field(&self, prop: &str) -> String {
        match prop {
            "Path" => self.path.clone(),
            "Local" => self.local.to_string_lossy().into_owned(),
            "Name" | "Filename" => self.name.clone(),
            _ => match prop.strip_prefix("Meta.") {
                Some(rest) => {
                    let mut value = self.meta.get(rest.split('.').next().unwrap_or(rest));
                    for key in rest.split('.').skip(1) {
                        value = value.and_then(|v| v.get(key));
                    }
                    value.map(meta_display).unwrap_or_default()
                }
                None => String::new(),
            },
        }
    }
}

/// Render a metadata value the way it reads in frontmatter.
///
/// Strings come out unquoted; everything else uses its JSON form.
pub fn meta_display(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse a frontmatter block as a YAML mapping. Malformed blocks are a
/// soft failure and yield empty metadata.
fn parse_meta(block: &str, local: &std::path::Path) -> Map<String, Json> {
    match serde_yaml::from_str::<Json>(block) {
        Ok(Json::Object(map)) => map,
        Ok(_) => {
            log!("error"; "{}: frontmatter is not a mapping", local.display());
            Map::new()
        }
        Err(err) => {
            log!("error"; "{}: frontmatter error: {err}", local.display());
            Map::new()
        }
    }
}

/// Split an optional delimited metadata block from the body.
///
/// Everything between the first and second occurrence of `delim` is the
/// metadata block; the body is the file with that block removed. If the
/// delimiter never closes (or the file is not UTF-8), the whole input is
/// body with no metadata.
pub fn split_frontmatter(raw: &[u8], delim: &str) -> (Option<String>, Vec<u8>) {
    let Ok(text) = std::str::from_utf8(raw) else {
        return (None, raw.to_vec());
    };
    let Some(start) = text.find(delim) else {
        return (None, raw.to_vec());
    };
    let after = &text[start + delim.len()..];
    let Some(end) = after.find(delim) else {
        return (None, raw.to_vec());
    };

    let meta = after[..end].to_string();
    let mut body = String::with_capacity(text.len());
    body.push_str(&text[..start]);
    body.push_str(&after[end + delim.len()..]);
    (Some(meta), body.into_bytes())
}
