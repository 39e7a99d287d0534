//! Development server with live reload.
//!
//! A `tiny_http` static server over the build output: automatic
//! `index.html` resolution, directory redirects, a `404.html` fallback and
//! one `text/event-stream` connection per client on `/__hotreload`. Every
//! served HTML page gets the reload script injected before `</body>`.

use crate::{build::SiteGen, log, reload::{Notifier, Subscription}, watch};
use anyhow::{Context, Result};
use std::{
    fs,
    io::{self, Read},
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    thread,
};
use tiny_http::{Header, Request, Response, Server, StatusCode};

/// Reload client script (embedded at compile time)
const HOT_RELOAD_SCRIPT: &str = include_str!("embed/reload.html");

/// Try binding to port, retry with incremented port if in use
const MAX_PORT_RETRIES: u16 = 10;

const SSE_PATH: &str = "/__hotreload";

// ============================================================================
// Server Entry Point
// ============================================================================

/// Serve the output directory, watching the site root for changes.
/// Blocks until Ctrl+C.
pub fn serve_site(sg: Arc<Mutex<SiteGen>>, notifier: Notifier) -> Result<()> {
    let (output, base, interface, port) = {
        let g = sg.lock().unwrap_or_else(PoisonError::into_inner);
        let c = g.config();
        (
            c.output.clone(),
            c.base.clone(),
            c.interface.clone(),
            c.port,
        )
    };
    let interface: IpAddr = interface
        .parse()
        .with_context(|| format!("invalid interface `{interface}`"))?;

    let (server, addr) = try_bind_port(interface, port, MAX_PORT_RETRIES)?;
    let server = Arc::new(server);

    let server_for_signal = Arc::clone(&server);
    ctrlc::set_handler(move || {
        log!("serve"; "shutting down...");
        server_for_signal.unblock();
    })
    .context("failed to set Ctrl+C handler")?;

    // Subscribing can fail (missing root, exhausted inotify watches); do it
    // here so serving never starts with rebuilds dead.
    let watcher = watch::init(Arc::clone(&sg), notifier.clone())
        .context("failed to watch the site root")?;
    thread::spawn(move || watcher.run());

    log!("serve"; "http://{addr}{base}");
    log!("serve"; "press Ctrl+C to stop");

    for request in server.incoming_requests() {
        if request.url().starts_with(SSE_PATH) {
            let subscription = notifier.subscribe();
            thread::spawn(move || serve_events(request, subscription));
            continue;
        }
        if let Err(err) = handle_request(request, &output, &base) {
            log!("serve"; "request error: {err}");
        }
    }
    Ok(())
}

/// Try to bind to a port, retrying with incremented port numbers if in use.
fn try_bind_port(interface: IpAddr, base_port: u16, max_retries: u16) -> Result<(Server, SocketAddr)> {
    for offset in 0..max_retries {
        let port = base_port.saturating_add(offset);
        let addr = SocketAddr::new(interface, port);

        match Server::http(addr) {
            Ok(server) => {
                if offset > 0 {
                    log!("serve"; "port {base_port} in use, using {port} instead");
                }
                return Ok((server, addr));
            }
            Err(_) if offset + 1 < max_retries => continue,
            Err(err) => {
                return Err(anyhow::anyhow!(
                    "failed to bind after {max_retries} attempts (ports {base_port}-{port}): {err}"
                ));
            }
        }
    }
    unreachable!()
}

// ============================================================================
// Static Files
// ============================================================================

/// Resolution order: exact file, directory redirect, directory index,
/// base-prefixed `404.html` fallback, plain 404.
fn handle_request(request: Request, output: &Path, base: &str) -> Result<()> {
    let url_path = urlencoding::decode(request.url())
        .map(std::borrow::Cow::into_owned)
        .unwrap_or_default();
    let path_without_query = url_path.split('?').next().unwrap_or(&url_path);
    let request_path = path_without_query.trim_start_matches('/');

    // A `..` component would resolve outside the output root; such a
    // request falls straight through to the 404 handling.
    if !climbs_out(request_path) {
        let local_path = output.join(request_path.trim_end_matches('/'));

        if local_path.is_file() {
            return serve_file(request, &local_path);
        }

        if local_path.is_dir() {
            if !path_without_query.ends_with('/') {
                return redirect(request, &format!("{path_without_query}/"));
            }
            let index_path = local_path.join("index.html");
            if index_path.is_file() {
                return serve_file(request, &index_path);
            }
        }
    }

    let fallback = not_found_page(output, base);
    if fallback.is_file() {
        log!("serve"; "{path_without_query} not found, serving 404.html");
        return serve_file(request, &fallback);
    }
    serve_not_found(request)
}

fn not_found_page(output: &Path, base: &str) -> PathBuf {
    output.join(base.trim_matches('/')).join("404.html")
}

/// True when any path segment is `..`.
fn climbs_out(request_path: &str) -> bool {
    request_path
        .split(['/', '\\'])
        .any(|segment| segment == "..")
}

/// Serve a file with its content type; HTML gets the reload script spliced
/// in before `</body>`.
fn serve_file(request: Request, path: &Path) -> Result<()> {
    let mut content =
        fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let content_type = guess_content_type(path);

    if content_type.starts_with("text/html") {
        if let Ok(text) = std::str::from_utf8(&content) {
            if text.contains("</body>") {
                content = text
                    .replace("</body>", &format!("{HOT_RELOAD_SCRIPT}</body>"))
                    .into_bytes();
            }
        }
    }

    let response = Response::from_data(content)
        .with_header(header("Content-Type", content_type));
    request.respond(response)?;
    Ok(())
}

fn redirect(request: Request, location: &str) -> Result<()> {
    let response = Response::empty(StatusCode(301)).with_header(header("Location", location));
    request.respond(response)?;
    Ok(())
}

fn serve_not_found(request: Request) -> Result<()> {
    let response = Response::from_string("404 Not Found")
        .with_status_code(StatusCode(404))
        .with_header(header("Content-Type", "text/plain"));
    request.respond(response)?;
    Ok(())
}

fn header(field: &str, value: &str) -> Header {
    // both inputs are fixed ASCII strings
    Header::from_bytes(field.as_bytes(), value.as_bytes()).unwrap_or_else(|()| unreachable!())
}

/// Guess MIME content type from file extension.
fn guess_content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "application/javascript; charset=utf-8",
        Some("json") => "application/json; charset=utf-8",
        Some("xml") => "application/xml; charset=utf-8",
        Some("txt") => "text/plain; charset=utf-8",
        Some("md") => "text/markdown; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("otf") => "font/otf",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

// ============================================================================
// Hot Reload Stream
// ============================================================================

/// Stream `data: <event>` frames to one client until it disconnects.
/// Dropping the subscription on exit unregisters it from the notifier.
fn serve_events(request: Request, subscription: Subscription) {
    let stream = EventStream {
        subscription,
        buf: Vec::new(),
        pos: 0,
    };
    let response = Response::new(
        StatusCode(200),
        vec![
            header("Content-Type", "text/event-stream"),
            header("Cache-Control", "no-cache"),
            header("Access-Control-Allow-Origin", "*"),
        ],
        stream,
        None,
        None,
    );
    // Errors here mean the client went away.
    let _ = request.respond(response);
}

/// Blocking reader adapter: each notifier event becomes one SSE frame;
/// EOF when the notifier loop goes away.
struct EventStream {
    subscription: Subscription,
    buf: Vec<u8>,
    pos: usize,
}

impl Read for EventStream {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.buf.len() {
            match self.subscription.events.recv() {
                Ok(event) => {
                    self.buf = format!("data: {event}\n\n").into_bytes();
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = (self.buf.len() - self.pos).min(out.len());
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
