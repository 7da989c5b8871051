//! Live reload
//!
//! [`ReloadServer`] serves the destination tree over HTTP. HTML responses get
//! a small client script injected that holds a WebSocket open; calling
//! [`Reloader::trigger`] makes every connected page refresh. The client shows
//! no connection banner, and connects/disconnects are only logged at debug.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Request, State};
use axum::http::header;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::error::{PipelineError, Result};
use crate::executor::Task;

pub const WS_PATH: &str = "/__assetpipe/ws";
pub const CLIENT_PATH: &str = "/__assetpipe/client.js";

const CLIENT_JS: &str = r#"(function () {
  var scheme = location.protocol === "https:" ? "wss:" : "ws:";
  function connect() {
    var ws = new WebSocket(scheme + "//" + location.host + "/__assetpipe/ws");
    ws.onmessage = function (event) {
      if (event.data === "reload") location.reload();
    };
    ws.onclose = function () {
      setTimeout(connect, 1000);
    };
  }
  connect();
})();
"#;

/// Broadcasts refresh signals to connected browsers
#[derive(Debug, Clone)]
pub struct Reloader {
    tx: broadcast::Sender<()>,
}

impl Default for Reloader {
    fn default() -> Self {
        Self::new()
    }
}

impl Reloader {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    /// Ask every connected client to refresh. Returns how many were told.
    pub fn trigger(&self) -> usize {
        self.tx.send(()).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn clients(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// The last step of every watch chain
pub struct ReloadTask {
    reloader: Reloader,
}

impl ReloadTask {
    pub fn new(reloader: Reloader) -> Self {
        Self { reloader }
    }
}

impl Task for ReloadTask {
    fn name(&self) -> &str {
        "reload"
    }

    fn run(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            let clients = self.reloader.trigger();
            debug!(clients, "reload triggered");
            Ok(())
        }
        .boxed()
    }
}

#[derive(Clone)]
struct ServerState {
    root: Arc<PathBuf>,
    reloader: Reloader,
}

/// HTTP server rooted at the destination tree
pub struct ReloadServer {
    root: PathBuf,
    config: ServerConfig,
    reloader: Reloader,
}

impl ReloadServer {
    pub fn new(root: impl Into<PathBuf>, config: ServerConfig, reloader: Reloader) -> Self {
        Self {
            root: root.into(),
            config,
            reloader,
        }
    }

    pub fn router(&self) -> Router {
        let state = ServerState {
            root: Arc::new(self.root.clone()),
            reloader: self.reloader.clone(),
        };

        Router::new()
            .route(WS_PATH, get(ws_upgrade))
            .route(CLIENT_PATH, get(client_script))
            .fallback(serve_file)
            .with_state(state)
    }

    /// Bind and serve until the process exits
    pub async fn serve(&self) -> Result<()> {
        let addr = self.config.addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| PipelineError::ServerBind {
                addr: addr.clone(),
                source: e,
            })?;

        info!(root = %self.root.display(), "serving at http://{addr}");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

impl Task for ReloadServer {
    fn name(&self) -> &str {
        "serve"
    }

    fn run(&self) -> BoxFuture<'_, Result<()>> {
        self.serve().boxed()
    }
}

async fn client_script() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/javascript")], CLIENT_JS)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    let rx = state.reloader.subscribe();
    ws.on_upgrade(move |socket| client_session(socket, rx))
}

async fn client_session(mut socket: WebSocket, mut rx: broadcast::Receiver<()>) {
    debug!("live-reload client connected");

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(()) | Err(RecvError::Lagged(_)) => {
                    if socket.send(Message::Text("reload".to_string())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("live-reload client disconnected");
}

async fn serve_file(State(state): State<ServerState>, req: Request) -> Response {
    if let Some(path) = resolve_html(&state.root, req.uri().path()) {
        if let Ok(body) = tokio::fs::read_to_string(&path).await {
            return Html(inject_client(&body)).into_response();
        }
    }

    match ServeDir::new(state.root.as_path()).oneshot(req).await {
        Ok(res) => res.into_response(),
        Err(never) => match never {},
    }
}

/// Map a request path onto an HTML file under `root`. Directory requests
/// resolve to their `index.html`; anything escaping the root is refused.
fn resolve_html(root: &Path, uri_path: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for component in Path::new(uri_path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(segment) => path.push(segment),
            Component::CurDir => {}
            _ => return None,
        }
    }

    if path.is_dir() {
        path.push("index.html");
    }

    let is_html = path
        .extension()
        .map(|ext| ext == "html" || ext == "htm")
        .unwrap_or(false);
    (is_html && path.is_file()).then_some(path)
}

/// Add the client script tag before `</body>`, or at the end
pub fn inject_client(html: &str) -> String {
    let tag = format!("<script src=\"{CLIENT_PATH}\"></script>");
    match html.to_ascii_lowercase().rfind("</body>") {
        Some(i) => format!("{}{}{}", &html[..i], tag, &html[i..]),
        None => format!("{html}{tag}"),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{self, StatusCode};

    use super::*;

    async fn get_body(router: Router, uri: &str) -> (StatusCode, String) {
        let res = router
            .oneshot(http::Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    fn server(root: &Path) -> ReloadServer {
        ReloadServer::new(root, ServerConfig::default(), Reloader::new())
    }

    #[test]
    fn test_inject_before_body_close() {
        let out = inject_client("<html><BODY><p>x</p></BODY></html>");
        assert_eq!(
            out,
            "<html><BODY><p>x</p><script src=\"/__assetpipe/client.js\"></script></BODY></html>"
        );
        assert!(inject_client("<p>fragment</p>").ends_with("</script>"));
    }

    #[test]
    fn test_resolve_html_refuses_traversal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "x").unwrap();

        assert_eq!(
            resolve_html(dir.path(), "/"),
            Some(dir.path().join("index.html"))
        );
        assert_eq!(resolve_html(dir.path(), "/../etc/passwd"), None);
        assert_eq!(resolve_html(dir.path(), "/missing.html"), None);
    }

    #[test]
    fn test_trigger_counts_clients() {
        let reloader = Reloader::new();
        assert_eq!(reloader.trigger(), 0);

        let mut rx = reloader.subscribe();
        assert_eq!(reloader.clients(), 1);
        assert_eq!(reloader.trigger(), 1);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_reload_task_signals_subscribers() {
        let reloader = Reloader::new();
        let mut rx = reloader.subscribe();

        ReloadTask::new(reloader.clone()).run().await.unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_html_gets_client_script() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<body>hi</body>").unwrap();
        std::fs::create_dir_all(dir.path().join("css")).unwrap();
        std::fs::write(dir.path().join("css/style.css"), "a{}").unwrap();

        let srv = server(dir.path());

        let (status, body) = get_body(srv.router(), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(CLIENT_PATH));
        assert!(body.starts_with("<body>hi"));

        let (status, body) = get_body(srv.router(), "/css/style.css").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "a{}");

        let (status, body) = get_body(srv.router(), CLIENT_PATH).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(WS_PATH));

        let (status, _) = get_body(srv.router(), "/nope.png").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
