//! Development server with live reload.
//!
//! A small thread-per-connection HTTP/1.1 server over `std::net`, rooted at
//! the output directory. It only needs to serve static files to a local
//! browser, so every response closes its connection except the event stream.
//!
//! ## Live reload
//!
//! HTML responses get a client script injected before `</body>`. The script
//! opens an `EventSource` on [`EVENTS_PATH`]; each message is either `css`
//! (re-request every stylesheet link with a fresh query, no page reload) or
//! `reload` (reload the page). Messages are pushed through a [`ReloadHandle`],
//! which the watcher holds a clone of.
//!
//! ## Routing
//!
//! | Request | Response |
//! |---------|----------|
//! | `GET /__sitepipe/events` | `text/event-stream`, kept open |
//! | `GET /dir/` | `dir/index.html` |
//! | `GET` path containing `..` | 403 |
//! | `GET` missing file | 404 |
//! | any other method | 405 |

use std::fmt;
use std::fs;
use std::io::{Read as _, Write as _};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Path of the Server-Sent Events stream.
pub const EVENTS_PATH: &str = "/__sitepipe/events";

const MAX_REQUEST_HEAD: usize = 16 * 1024;
const KEEPALIVE: Duration = Duration::from_secs(15);

const RELOAD_SCRIPT: &str = r#"<script>
(function () {
  var source = new EventSource("/__sitepipe/events");
  source.onmessage = function (event) {
    if (event.data === "css") {
      document.querySelectorAll('link[rel="stylesheet"]').forEach(function (link) {
        var url = new URL(link.href);
        url.searchParams.set("sitepipe", Date.now());
        link.href = url.toString();
      });
    } else {
      window.location.reload();
    }
  };
})();
</script>
"#;

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What connected browsers should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadKind {
    /// Hot-swap stylesheets.
    Css,
    /// Reload the page.
    Full,
}

impl fmt::Display for ReloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReloadKind::Css => "css",
            ReloadKind::Full => "reload",
        })
    }
}

/// Fan-out of reload notifications to every connected event stream.
#[derive(Debug, Clone, Default)]
pub struct ReloadHandle {
    clients: Arc<Mutex<Vec<Sender<ReloadKind>>>>,
}

impl ReloadHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new client.
    pub fn subscribe(&self) -> Receiver<ReloadKind> {
        let (tx, rx) = mpsc::channel();
        self.lock().push(tx);
        rx
    }

    /// Send `kind` to every client. Clients that went away are dropped.
    /// Returns the number of clients notified.
    pub fn notify(&self, kind: ReloadKind) -> usize {
        let mut clients = self.lock();
        clients.retain(|tx| tx.send(kind).is_ok());
        clients.len()
    }

    pub fn client_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Sender<ReloadKind>>> {
        self.clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A running server. Dropping it stops accepting connections.
#[derive(Debug)]
pub struct DevServer {
    addr: SocketAddr,
    _stop: Sender<()>,
}

impl DevServer {
    /// Bind `host:port` and serve `root` on a background thread.
    ///
    /// Port 0 binds an ephemeral port; see [`DevServer::addr`].
    pub fn start(
        root: &Path,
        host: &str,
        port: u16,
        reload: ReloadHandle,
    ) -> Result<Self, ServeError> {
        let listener = TcpListener::bind((host, port)).map_err(|source| ServeError::Bind {
            addr: format!("{host}:{port}"),
            source,
        })?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        let (tx, rx) = mpsc::channel::<()>();
        let root = root.to_path_buf();

        thread::spawn(move || {
            loop {
                // Stop on an explicit signal or when the server is dropped.
                if !matches!(rx.try_recv(), Err(TryRecvError::Empty)) {
                    break;
                }
                match listener.accept() {
                    Ok((stream, _)) => {
                        let root = root.clone();
                        let reload = reload.clone();
                        thread::spawn(move || handle_connection(stream, &root, &reload));
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        thread::sleep(Duration::from_millis(50));
                    }
                }
            }
            debug!("server stopped");
        });

        info!(%addr, "dev server listening");
        Ok(Self { addr, _stop: tx })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Browser-facing URL. Unspecified bind addresses are shown as localhost.
    pub fn url(&self) -> String {
        if self.addr.ip().is_unspecified() {
            format!("http://localhost:{}", self.addr.port())
        } else {
            format!("http://{}", self.addr)
        }
    }
}

// =============================================================================
// Request handling
// =============================================================================

#[derive(Debug, PartialEq, Eq)]
enum Target {
    File(PathBuf),
    Forbidden,
}

struct Response {
    status: &'static str,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Response {
    fn text(status: &'static str, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.as_bytes().to_vec(),
        }
    }
}

fn handle_connection(mut stream: TcpStream, root: &Path, reload: &ReloadHandle) {
    let _ = stream.set_nonblocking(false);
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let Some(head) = read_head(&mut stream) else {
        return;
    };
    let mut parts = head.split_whitespace();
    let method = parts.next().unwrap_or("");
    let raw_path = parts.next().unwrap_or("/");
    let path = raw_path.split(['?', '#']).next().unwrap_or("/");

    if method == "GET" && path == EVENTS_PATH {
        debug!("event stream opened");
        stream_events(stream, reload);
        return;
    }

    let response = if method != "GET" {
        Response::text("405 Method Not Allowed", "Method Not Allowed")
    } else {
        match resolve_target(root, path) {
            Target::Forbidden => Response::text("403 Forbidden", "Forbidden"),
            Target::File(file) if file.is_file() => match fs::read(&file) {
                Ok(body) => file_response(&file, body),
                Err(e) => {
                    warn!(path = %file.display(), error = %e, "failed to read");
                    Response::text("500 Internal Server Error", "Internal Server Error")
                }
            },
            Target::File(_) => Response::text("404 Not Found", "Not Found"),
        }
    };
    info!(method, path = raw_path, status = response.status, "request");

    let header = format!(
        "HTTP/1.1 {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Cache-Control: no-cache\r\n\
         Connection: close\r\n\
         \r\n",
        response.status,
        response.content_type,
        response.body.len()
    );
    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&response.body);
}

/// Read up to the end of the request head.
fn read_head(stream: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match stream.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() >= MAX_REQUEST_HEAD {
            break;
        }
    }
    if buf.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(&buf).into_owned())
    }
}

fn stream_events(mut stream: TcpStream, reload: &ReloadHandle) {
    let rx = reload.subscribe();
    let header = "HTTP/1.1 200 OK\r\n\
                  Content-Type: text/event-stream\r\n\
                  Cache-Control: no-cache\r\n\
                  Connection: keep-alive\r\n\
                  \r\n\
                  : connected\n\n";
    if stream.write_all(header.as_bytes()).is_err() {
        return;
    }
    loop {
        let message = match rx.recv_timeout(KEEPALIVE) {
            Ok(kind) => format!("data: {kind}\n\n"),
            Err(RecvTimeoutError::Timeout) => ": ping\n\n".to_string(),
            Err(RecvTimeoutError::Disconnected) => return,
        };
        if stream
            .write_all(message.as_bytes())
            .and_then(|()| stream.flush())
            .is_err()
        {
            debug!("event stream closed");
            return;
        }
    }
}

/// Map a URL path onto the served tree.
fn resolve_target(root: &Path, url_path: &str) -> Target {
    let decoded = percent_decode(url_path);
    let mut file = root.to_path_buf();
    for segment in decoded.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => return Target::Forbidden,
            s => file.push(s),
        }
    }
    if file.is_dir() {
        file.push("index.html");
    }
    Target::File(file)
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn file_response(path: &Path, body: Vec<u8>) -> Response {
    let content_type = content_type(path);
    let body = if content_type.starts_with("text/html") {
        inject_reload_script(&String::from_utf8_lossy(&body)).into_bytes()
    } else {
        body
    };
    Response {
        status: "200 OK",
        content_type,
        body,
    }
}

fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" => "application/javascript",
        "json" | "map" | "webmanifest" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "eot" => "application/vnd.ms-fontobject",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// Insert the live-reload client before the last `</body>`, or append it.
pub fn inject_reload_script(html: &str) -> String {
    let lower = html.to_ascii_lowercase();
    match lower.rfind("</body>") {
        Some(at) => {
            let mut out = String::with_capacity(html.len() + RELOAD_SCRIPT.len());
            out.push_str(&html[..at]);
            out.push_str(RELOAD_SCRIPT);
            out.push_str(&html[at..]);
            out
        }
        None => format!("{html}{RELOAD_SCRIPT}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // =========================================================================
    // Reload handle
    // =========================================================================

    #[test]
    fn notify_reaches_every_subscriber() {
        let handle = ReloadHandle::new();
        let a = handle.subscribe();
        let b = handle.subscribe();

        assert_eq!(handle.notify(ReloadKind::Css), 2);
        assert_eq!(a.recv().unwrap(), ReloadKind::Css);
        assert_eq!(b.recv().unwrap(), ReloadKind::Css);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let handle = ReloadHandle::new();
        let kept = handle.subscribe();
        drop(handle.subscribe());

        assert_eq!(handle.notify(ReloadKind::Full), 1);
        assert_eq!(handle.client_count(), 1);
        assert_eq!(kept.recv().unwrap(), ReloadKind::Full);
    }

    #[test]
    fn clones_share_clients() {
        let handle = ReloadHandle::new();
        let _rx = handle.clone().subscribe();
        assert_eq!(handle.client_count(), 1);
    }

    #[test]
    fn reload_kinds_use_wire_names() {
        assert_eq!(ReloadKind::Css.to_string(), "css");
        assert_eq!(ReloadKind::Full.to_string(), "reload");
    }

    // =========================================================================
    // Routing helpers
    // =========================================================================

    #[test]
    fn directory_requests_serve_index() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("blog")).unwrap();

        assert_eq!(
            resolve_target(tmp.path(), "/"),
            Target::File(tmp.path().join("index.html"))
        );
        assert_eq!(
            resolve_target(tmp.path(), "/blog/"),
            Target::File(tmp.path().join("blog/index.html"))
        );
    }

    #[test]
    fn traversal_is_forbidden() {
        let root = Path::new("/srv/docs");
        assert_eq!(resolve_target(root, "/../etc/passwd"), Target::Forbidden);
        assert_eq!(resolve_target(root, "/css/%2e%2e/%2e%2e/x"), Target::Forbidden);
    }

    #[test]
    fn percent_escapes_are_decoded() {
        assert_eq!(percent_decode("/my%20page.html"), "/my page.html");
        assert_eq!(percent_decode("/100%"), "/100%");
        assert_eq!(percent_decode("/%zz"), "/%zz");
    }

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type(Path::new("a.HTML")), "text/html; charset=utf-8");
        assert_eq!(content_type(Path::new("style.css.map")), "application/json");
        assert_eq!(content_type(Path::new("fa.woff2")), "font/woff2");
        assert_eq!(content_type(Path::new("blob")), "application/octet-stream");
    }

    #[test]
    fn script_goes_before_closing_body() {
        let html = "<html><body><p>x</p></BODY></html>";
        let out = inject_reload_script(html);
        let script_at = out.find(EVENTS_PATH).unwrap();
        let body_at = out.find("</BODY>").unwrap();
        assert!(script_at < body_at);
        assert!(out.starts_with("<html><body><p>x</p><script>"));
    }

    #[test]
    fn script_is_appended_without_body() {
        let out = inject_reload_script("<p>fragment</p>");
        assert!(out.starts_with("<p>fragment</p><script>"));
    }
}
