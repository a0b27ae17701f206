use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::artifacts::ArtifactStore;
use crate::types::CrawlResult;
use crate::worklist::Worklist;

/// What a freshly started browser tab pool asks for before opening tabs.
#[derive(Debug, Serialize)]
struct Parameters {
    urls: Vec<String>,
    /// per-page timeout in milliseconds
    timeout: u64,
    maxtabs: u32,
}

#[derive(Clone)]
struct AppState {
    worklist: Arc<Worklist>,
    store: Arc<ArtifactStore>,
    timeout_ms: u64,
    maxtabs: u32,
}

/// Loopback HTTP endpoint the in-browser crawler extension talks to. Binds
/// an ephemeral port so several crawler instances can share a machine; the
/// chosen port is handed to the browser on its command line.
pub struct CallbackServer {
    port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    serve_handle: JoinHandle<()>,
}

impl CallbackServer {
    pub async fn start(
        worklist: Arc<Worklist>,
        store: Arc<ArtifactStore>,
        timeout_secs: u64,
        maxtabs: u32,
    ) -> anyhow::Result<Self> {
        let state = AppState {
            worklist,
            store,
            timeout_ms: timeout_secs * 1000,
            maxtabs,
        };

        let app = Router::new()
            .route("/parameters", get(parameters))
            .route("/save", post(save))
            .fallback(not_found)
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .context("could not bind callback server")?;
        let port = listener.local_addr()?.port();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let serve_handle = tokio::spawn(async move {
            let res = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await;
            if let Err(e) = res {
                error!("callback server stopped with error: {}", e);
            }
        });

        debug!("callback server listening on 127.0.0.1:{}", port);

        Ok(CallbackServer {
            port,
            shutdown_tx: Some(shutdown_tx),
            serve_handle,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stops accepting connections and waits for in-flight requests to
    /// finish. Safe to call twice.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            tx.send(()).ok();
            (&mut self.serve_handle).await.ok();
        }
    }
}

async fn parameters(State(state): State<AppState>) -> impl IntoResponse {
    let urls = state.worklist.remaining().await;
    debug!("handing out parameters, {} urls left", urls.len());

    Json(Parameters {
        urls,
        timeout: state.timeout_ms,
        maxtabs: state.maxtabs,
    })
}

/// Persist first, then drop the URL from the worklist. A result that fails
/// to persist keeps its URL listed and is retried by a later session, so a
/// crash can duplicate an artifact but never lose one.
async fn save(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let result: CrawlResult = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            warn!("discarding malformed save payload: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };

    let url = result.url.clone();
    match state.store.store(result).await {
        Ok(artifact) => {
            state.worklist.remove(&url).await;
            debug!("stored {} as {}", url, artifact.base_name);
            StatusCode::NO_CONTENT
        }
        Err(e) => {
            error!("could not persist result for {}: {:#}", url, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn not_found() -> impl IntoResponse {
    StatusCode::NOT_FOUND
}
