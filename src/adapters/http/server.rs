use crate::domain::session::SessionState;
use crate::error::{PipelineError, Result};
use axum::{
    extract::Request,
    http::{header, HeaderValue},
    middleware::{self, Next},
    response::Response,
    Router,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use url::Url;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Static file router over `root`.
///
/// `ServeDir` answers `Range` requests with 206 and missing files with 404.
/// Playlists are sent with `no-cache` since ffmpeg rewrites them in place;
/// everything else gets `max-age=<cache_max_age>`.
pub fn router(root: &Path, cache_max_age: u64) -> Router {
    let cache_control = HeaderValue::from_str(&format!("max-age={}", cache_max_age))
        .unwrap_or_else(|_| HeaderValue::from_static("no-cache"));

    Router::new()
        .fallback_service(ServeDir::new(root).append_index_html_on_directories(false))
        .layer(middleware::from_fn(hls_headers))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            cache_control,
        ))
        .layer(TraceLayer::new_for_http())
}

fn is_playlist(path: &str) -> bool {
    path.ends_with(".m3u8")
}

fn hls_mime(path: &str) -> Option<&'static str> {
    if is_playlist(path) {
        Some("application/vnd.apple.mpegurl")
    } else if path.ends_with(".ts") {
        Some("video/mp2t")
    } else {
        None
    }
}

async fn hls_headers(req: Request, next: Next) -> Response {
    let mime = hls_mime(req.uri().path());
    let playlist = is_playlist(req.uri().path());
    let mut res = next.run(req).await;
    if !res.status().is_success() {
        return res;
    }

    let headers = res.headers_mut();
    if let Some(mime) = mime {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(mime));
    }
    if playlist {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    }
    res
}

struct Listening {
    base_url: Url,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Loopback HTTP server exposing the workspace directory.
///
/// One instance lives for the whole application; requests come and go while
/// only the directory contents change underneath it.
pub struct ContentServer {
    state: SessionState,
    cache_max_age: u64,
    inner: Mutex<Option<Listening>>,
}

impl ContentServer {
    pub fn new(state: SessionState, cache_max_age: u64) -> Self {
        Self {
            state,
            cache_max_age,
            inner: Mutex::new(None),
        }
    }

    /// Bind `addr` and serve `root`. Returns the base URL once bound.
    ///
    /// Port 0 picks an ephemeral port. Starting an already running server
    /// returns its current base URL.
    pub async fn start(&self, root: impl Into<PathBuf>, addr: SocketAddr) -> Result<Url> {
        let mut inner = self.inner.lock().await;
        if let Some(listening) = inner.as_ref() {
            return Ok(listening.base_url.clone());
        }

        if !addr.ip().is_loopback() {
            return Err(PipelineError::ServerBind {
                addr,
                reason: "refusing to bind a non-loopback address".to_string(),
            });
        }

        let bind_err = |e: std::io::Error| PipelineError::ServerBind {
            addr,
            reason: e.to_string(),
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        let base_url = Url::parse(&format!("http://{}/", local_addr)).map_err(|e| {
            PipelineError::ServerBind {
                addr,
                reason: e.to_string(),
            }
        })?;

        let root = root.into();
        let app = router(&root, self.cache_max_age);
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await });
            if let Err(e) = serve.await {
                tracing::error!(error = %e, "content server stopped with error");
            }
        });

        tracing::info!(%base_url, root = %root.display(), "content server listening");
        self.state.set_running(true);
        *inner = Some(Listening {
            base_url: base_url.clone(),
            shutdown,
            task,
        });
        Ok(base_url)
    }

    /// Unbind the listener. No-op when not running.
    pub async fn stop(&self) {
        let Some(listening) = self.inner.lock().await.take() else {
            return;
        };

        listening.shutdown.cancel();
        let mut task = listening.task;
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "content server task panicked"),
            Err(_) => {
                tracing::warn!("content server did not drain in time, aborting");
                task.abort();
            }
        }

        self.state.set_running(false);
        tracing::info!(base_url = %listening.base_url, "content server stopped");
    }

    pub async fn base_url(&self) -> Option<Url> {
        self.inner
            .lock()
            .await
            .as_ref()
            .map(|listening| listening.base_url.clone())
    }
}
