//! File system watcher driving incremental rebuilds.
//!
//! Raw notify events are classified as `add` or `del`, deduplicated per
//! `(op, path)` key while pending, and processed after a settle delay:
//! directories adjust the watch set, source files get a targeted rebuild,
//! template/data changes trigger a full rebuild. Every completed rebuild
//! signals the notifier once detached commands have finished.

use crate::{
    build::SiteGen,
    log,
    reload::Notifier,
    utils::exec,
};
use anyhow::{Context, Result};
use notify::{
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
    event::ModifyKind,
};
use regex::Regex;
use rustc_hash::FxHashSet;
use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError, mpsc},
    thread,
    time::Duration,
};
use walkdir::WalkDir;

/// What a filesystem event means for the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Add,
    Del,
}

/// Map a raw event kind to a build op. Metadata-only and access events
/// are noise.
pub fn classify(kind: &EventKind) -> Option<Op> {
    match kind {
        EventKind::Create(_) => Some(Op::Add),
        EventKind::Remove(_) => Some(Op::Del),
        // A rename away is a delete; the new name arrives as a create.
        EventKind::Modify(ModifyKind::Name(_)) => Some(Op::Del),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(Op::Add),
        _ => None,
    }
}

/// Pending `(op, path)` keys; an event whose key is already pending is
/// dropped rather than queued.
#[derive(Default, Clone)]
pub struct Pending(Arc<Mutex<FxHashSet<(Op, PathBuf)>>>);

impl Pending {
    /// Mark a key pending. Returns false when it already was.
    pub fn mark(&self, op: Op, path: &Path) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((op, path.to_path_buf()))
    }

    pub fn clear(&self, op: Op, path: &Path) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(op, path.to_path_buf()));
    }
}

/// Check a root-relative path against the hidden-file rule and the
/// configured exclude pattern.
pub fn excluded(exclude: &Regex, rel: &str) -> bool {
    rel.starts_with('.') || exclude.is_match(rel)
}

fn is_hidden_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

struct WatchCtx {
    sg: Arc<Mutex<SiteGen>>,
    watcher: Mutex<RecommendedWatcher>,
    pending: Pending,
    notifier: Notifier,
    root: PathBuf,
    source_dir: PathBuf,
    templates_dir: PathBuf,
    exclude: Regex,
    settle: Duration,
}

/// A running watcher: the subscriptions are established, the event loop
/// has not started yet.
///
/// Splitting setup from the loop lets the caller fail fast when the site
/// root cannot be subscribed, instead of discovering it mid-serve.
pub struct Watch {
    ctx: Arc<WatchCtx>,
    rx: mpsc::Receiver<notify::Result<Event>>,
}

/// Subscribe to the site root and its directories. The root subscription
/// must succeed; subdirectories are best-effort.
pub fn init(sg: Arc<Mutex<SiteGen>>, notifier: Notifier) -> Result<Watch> {
    let (root, source_dir, templates_dir, output, exclude, settle) = {
        let g = sg.lock().unwrap_or_else(PoisonError::into_inner);
        let c = g.config();
        (
            c.root.clone(),
            c.source_dir(),
            c.templates_dir(),
            c.output.clone(),
            c.exclude.clone(),
            Duration::from_millis(c.settle_ms),
        )
    };
    let exclude =
        Regex::new(&exclude).with_context(|| format!("invalid exclude pattern `{exclude}`"))?;

    let (tx, rx) = mpsc::channel();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = tx.send(res);
    })?;

    watcher
        .watch(&root, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", root.display()))?;
    for entry in WalkDir::new(&root).min_depth(1).into_iter().flatten() {
        let path = entry.path();
        if !entry.file_type().is_dir() || path.starts_with(&output) {
            continue;
        }
        let rel = path.strip_prefix(&root).unwrap_or(path).to_string_lossy();
        if excluded(&exclude, &rel) {
            continue;
        }
        if let Err(err) = watcher.watch(path, RecursiveMode::NonRecursive) {
            log!("watch"; "failed to watch {}: {err}", path.display());
        }
    }

    let ctx = Arc::new(WatchCtx {
        sg,
        watcher: Mutex::new(watcher),
        pending: Pending::default(),
        notifier,
        root,
        source_dir,
        templates_dir,
        exclude,
        settle,
    });
    Ok(Watch { ctx, rx })
}

impl Watch {
    /// Drive rebuilds from filesystem events. Blocks until the watcher
    /// channel closes.
    pub fn run(self) {
        for result in self.rx {
            let event: Event = match result {
                Ok(event) => event,
                Err(err) => {
                    log!("error"; "watch error: {err}");
                    continue;
                }
            };
            let Some(op) = classify(&event.kind) else {
                continue;
            };
            for path in event.paths {
                if is_hidden_file(&path) {
                    continue;
                }
                if self.ctx.pending.mark(op, &path) {
                    let ctx = Arc::clone(&self.ctx);
                    thread::spawn(move || process(&ctx, op, path));
                }
            }
        }
    }
}

/// Handle one debounced `(op, path)` event end to end.
fn process(ctx: &WatchCtx, op: Op, path: PathBuf) {
    thread::sleep(ctx.settle);

    if path.is_dir() {
        process_dir(ctx, op, &path);
    } else {
        process_file(ctx, op, &path);
    }

    ctx.pending.clear(op, &path);
    // Notifications only go out once every side effect has settled.
    exec::wait_for_detached();
    ctx.notifier.broadcast("updated");
}

fn process_dir(ctx: &WatchCtx, op: Op, path: &Path) {
    let mut watcher = ctx.watcher.lock().unwrap_or_else(PoisonError::into_inner);
    match op {
        Op::Add => {
            let rel = path.strip_prefix(&ctx.root).unwrap_or(path).to_string_lossy();
            if !excluded(&ctx.exclude, &rel) {
                if let Err(err) = watcher.watch(path, RecursiveMode::NonRecursive) {
                    log!("watch"; "failed to watch {}: {err}", path.display());
                }
            }
        }
        Op::Del => {
            if let Err(err) = watcher.unwatch(path) {
                log!("watch"; "failed to unwatch {}: {err}", path.display());
            }
        }
    }
}

fn process_file(ctx: &WatchCtx, op: Op, path: &Path) {
    let mut sg = ctx.sg.lock().unwrap_or_else(PoisonError::into_inner);
    let rel = path.strip_prefix(&ctx.root).unwrap_or(path).display();

    if path.starts_with(&ctx.source_dir) {
        match op {
            Op::Add => {
                sg.reload(path);
                match sg.build(path) {
                    Ok(()) => log!("watch"; "rebuilt {rel}"),
                    Err(err) => log!("error"; "{err}"),
                }
            }
            Op::Del => {
                if let Err(err) = sg.remove(path) {
                    log!("error"; "{err}");
                } else {
                    log!("watch"; "deleted {rel}");
                }
                sg.forget(path);
            }
        }
    } else {
        if path.starts_with(&ctx.templates_dir) {
            sg.invalidate_templates();
        }
        log!("watch"; "changed {rel}, full rebuild");
        sg.build_all(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind, RenameMode};

    #[test]
    fn test_classify_ops() {
        assert_eq!(classify(&EventKind::Create(CreateKind::File)), Some(Op::Add));
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            Some(Op::Add)
        );
        assert_eq!(classify(&EventKind::Modify(ModifyKind::Any)), Some(Op::Add));
        assert_eq!(classify(&EventKind::Remove(RemoveKind::File)), Some(Op::Del));
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Name(RenameMode::From))),
            Some(Op::Del)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any))),
            None
        );
        assert_eq!(classify(&EventKind::Access(notify::event::AccessKind::Any)), None);
    }

    #[test]
    fn test_pending_dedup() {
        let pending = Pending::default();
        let path = Path::new("/site/src/a.html");
        assert!(pending.mark(Op::Add, path));
        assert!(!pending.mark(Op::Add, path));
        // A different op on the same path is its own key.
        assert!(pending.mark(Op::Del, path));

        pending.clear(Op::Add, path);
        assert!(pending.mark(Op::Add, path));
    }

    #[test]
    fn test_excluded() {
        let re = Regex::new("^(node_modules|bower_components)").unwrap();
        assert!(excluded(&re, "node_modules/pkg"));
        assert!(excluded(&re, ".git/config"));
        assert!(!excluded(&re, "src/news/index.html"));
    }

    #[test]
    fn test_hidden_file_rule() {
        assert!(is_hidden_file(Path::new("/site/src/.draft.html")));
        assert!(!is_hidden_file(Path::new("/site/src/page.html")));
    }

    fn site_gen(root: &Path) -> Arc<Mutex<SiteGen>> {
        std::fs::create_dir_all(root.join("src")).unwrap();
        let mut config = crate::config::SiteConfig::default();
        config.finalize(root, true).unwrap();
        Arc::new(Mutex::new(SiteGen::new(config).unwrap()))
    }

    #[test]
    fn test_init_subscribes_to_an_existing_root() {
        let dir = tempfile::tempdir().unwrap();
        let sg = site_gen(dir.path());
        assert!(init(sg, Notifier::new()).is_ok());
    }

    #[test]
    fn test_init_fails_when_root_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("site");
        let sg = site_gen(&root);
        std::fs::remove_dir_all(&root).unwrap();
        // Setup must surface the failure instead of serving with a dead
        // watcher.
        assert!(init(sg, Notifier::new()).is_err());
    }
}
