//! Development server.
//!
//! Pages are rendered on request straight from the page map; nothing is
//! written to the output directory. A change anywhere under the watched
//! directories rebuilds the whole map.

use super::build::print_report;
use anyhow::{Context, Result};
use axum::{
    extract::{Path as AxumPath, State},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use pagewright_core::output::{content_type_for_path, output_file, render_page};
use pagewright_core::{Config, PageRecord, Pages, Redirects};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{mpsc, RwLock};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
struct AppState {
    pages: Pages,
    static_dir: PathBuf,
    redirects: Arc<RwLock<Redirects>>,
}

/// Build once, then serve and rebuild on change
pub async fn serve(config: Config, port: Option<u16>) -> Result<()> {
    let port = port.unwrap_or(config.server.port);
    let static_dir = config.static_dir();
    let mut watched: Vec<PathBuf> = [config.pages_dir(), config.layouts_dir(), static_dir.clone()]
        .into_iter()
        .filter(|dir| dir.exists())
        .collect();
    if let Some(path) = config.redirects_path().filter(|p| p.exists()) {
        watched.push(path);
    }

    let pages = Pages::from_config(config).context("Failed to set up build")?;
    let report = pages.init().await.context("Failed to build site")?;
    print_report(&report);

    let state = AppState {
        redirects: Arc::new(RwLock::new(load_redirects(&pages).await)),
        pages,
        static_dir,
    };

    // Set up file watching for live rebuilds
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = tx.send(res);
        },
        notify::Config::default(),
    )
    .context("Failed to initialize file watcher")?;
    for path in &watched {
        let mode = if path.is_dir() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(path, mode)
            .with_context(|| format!("Failed to watch {:?}", path))?;
    }

    tokio::spawn({
        let state = state.clone();
        async move {
            while let Some(event) = rx.recv().await {
                match event {
                    Ok(_event) => {
                        // Debounce a bit by draining pending events
                        while rx.try_recv().is_ok() {}
                        tracing::info!("Change detected, rebuilding pages...");
                        match state.pages.init().await {
                            Ok(report) => {
                                print_report(&report);
                                tracing::info!("Rebuild complete");
                            }
                            Err(e) => tracing::error!("Rebuild failed: {}", e),
                        }
                        *state.redirects.write().await = load_redirects(&state.pages).await;
                    }
                    Err(err) => tracing::warn!("Watcher error: {}", err),
                }
            }
        }
    });

    let addr = format!("127.0.0.1:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!("Starting dev server on http://localhost:{}", port);
    println!("\nServing at http://localhost:{}", port);
    println!("   Press Ctrl+C to stop\n");

    axum::serve(listener, router(state))
        .await
        .context("Server error")?;

    drop(watcher);
    Ok(())
}

async fn load_redirects(pages: &Pages) -> Redirects {
    let Some(path) = pages.config().redirects_path() else {
        return Redirects::default();
    };
    match Redirects::load(pages.context().fs.as_ref(), &path).await {
        Ok(redirects) => {
            tracing::debug!("Loaded {} redirect rules", redirects.len());
            redirects
        }
        Err(e) => {
            tracing::warn!("Ignoring {}: {}", path.display(), e);
            Redirects::default()
        }
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/__debug__", get(debug_index))
        .route("/__debug__/{*url}", get(debug_page))
        .fallback(serve_path)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Page-map keys to try for a request path, in order
fn candidate_urls(path: &str) -> Vec<String> {
    let trimmed = path.trim_end_matches('/');
    let mut candidates = vec![path.to_string()];
    if !trimmed.is_empty() && trimmed != path {
        candidates.push(trimmed.to_string());
    }
    candidates.push(format!("{}/index", trimmed));
    candidates.push(format!("{}/index.html", trimmed));
    candidates
}

async fn serve_path(State(state): State<AppState>, uri: Uri) -> Response {
    let path = uri.path();

    for candidate in candidate_urls(path) {
        if let Some(record) = state.pages.pages().get(&candidate) {
            return serve_record(&state, &record).await;
        }
    }

    if let Some(response) = serve_static(&state.static_dir, path).await {
        return response;
    }

    if let Some((to, status)) = state.redirects.read().await.matches(path) {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::MOVED_PERMANENTLY);
        return (status, [(header::LOCATION, to)]).into_response();
    }

    not_found(&state, path)
}

async fn serve_record(state: &AppState, record: &PageRecord) -> Response {
    let url = record.url().unwrap_or_default();
    match render_page(state.pages.context(), record).await {
        Ok(Some(body)) => {
            let mut mime = record
                .mime_type()
                .map(str::to_string)
                .unwrap_or_else(|| {
                    content_type_for_path(record.output_path().unwrap_or(url)).to_string()
                });
            if mime.starts_with("text/") && !mime.contains("charset") {
                mime.push_str("; charset=utf-8");
            }
            (StatusCode::OK, [(header::CONTENT_TYPE, mime)], body).into_response()
        }
        Ok(None) => (StatusCode::NOT_FOUND, format!("{} has no content", url)).into_response(),
        Err(e) => {
            tracing::error!("Failed to render {}: {}", url, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to render {}: {}", url, e),
            )
                .into_response()
        }
    }
}

async fn serve_static(static_dir: &Path, path: &str) -> Option<Response> {
    let file = output_file(static_dir, path).ok()?;
    let bytes = fs::read(&file).await.ok()?;
    Some(([(header::CONTENT_TYPE, content_type_for_path(path))], bytes).into_response())
}

fn not_found(state: &AppState, path: &str) -> Response {
    let mut body = format!("404 Not Found: {}\n\nKnown pages:\n", path);
    for url in state.pages.pages().urls() {
        body.push_str("  ");
        body.push_str(&url);
        body.push('\n');
    }
    (StatusCode::NOT_FOUND, body).into_response()
}

async fn debug_index(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.pages.pages().urls())
}

async fn debug_page(State(state): State<AppState>, AxumPath(url): AxumPath<String>) -> Response {
    let url = format!("/{}", url.trim_start_matches('/'));
    let Some(record) = state.pages.pages().get(&url) else {
        return (StatusCode::NOT_FOUND, format!("No page at {}", url)).into_response();
    };
    Json(serde_json::json!({
        "url": url,
        "filename": record.filename,
        "content": record.content.as_ref().map(|c| c.kind()),
        "attrs": record.attrs,
        "lineage": state.pages.lineage(record.id),
    }))
    .into_response()
}
