//! External command execution for metadata `serve`/`build` hooks.
//!
//! Pass-through sources may carry a shell command in their frontmatter.
//! `build` commands run synchronously inside the build; `serve` commands are
//! detached onto their own thread so a dev-mode build is not held up by a
//! long-running bundler. The watcher calls [`wait_for_detached`] before
//! broadcasting a reload so notifications only go out after all observable
//! side effects have settled.

use crate::log;
use anyhow::{Context, Result, bail};
use std::{
    process::Command,
    sync::{Condvar, LazyLock, Mutex, PoisonError},
    thread,
};

/// Count of currently running detached commands.
static DETACHED: LazyLock<CommandGate> = LazyLock::new(CommandGate::new);

/// Condvar-backed counter, the moral equivalent of a wait group.
struct CommandGate {
    count: Mutex<usize>,
    idle: Condvar,
}

impl CommandGate {
    fn new() -> Self {
        Self {
            count: Mutex::new(0),
            idle: Condvar::new(),
        }
    }

    fn enter(&self) {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    fn leave(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            count = self
                .idle
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Run a whitespace-split command line, logging its output.
///
/// The command's stdout is logged when non-empty; otherwise the command
/// line itself is echoed, matching what a user expects from a hook that
/// produced no output.
pub fn run_command(line: &str) -> Result<()> {
    let mut parts = line.split_whitespace();
    let Some(program) = parts.next() else {
        bail!("empty command");
    };

    let output = Command::new(program)
        .args(parts)
        .output()
        .with_context(|| format!("failed to run `{line}`"))?;

    if !output.status.success() {
        bail!(
            "`{line}` exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let msg = stdout.trim();
    if msg.is_empty() {
        log!("exec"; "{line}");
    } else {
        log!("exec"; "{msg}");
    }
    Ok(())
}

/// Run a command on a detached thread, tracked by the command gate.
pub fn run_detached(line: &str) {
    let line = line.to_string();
    DETACHED.enter();
    thread::spawn(move || {
        if let Err(err) = run_command(&line) {
            log!("exec"; "{err:#}");
        }
        DETACHED.leave();
    });
}

/// Block until every detached command has exited.
pub fn wait_for_detached() {
    DETACHED.wait();
}
