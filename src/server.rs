//! Read-only result viewer.
//!
//! Routes:
//! - `GET /results` the manifest of the last run, read fresh on every request
//! - `GET /` `compare_records/index.html` when present, otherwise a built-in page
//! - anything else is a static file from `compare_records/`, then
//!   `new_records/`, then `records/`

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::manifest::ComparisonResult;
use crate::store::ArtifactStore;

/// Viewer served at `/` when the diff directory has no `index.html`
pub const VIEWER_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Visual regression results</title>
<style>
  body { font-family: sans-serif; margin: 24px; background: #fafafa; }
  .result { background: #fff; border: 1px solid #ddd; margin-bottom: 24px; padding: 12px; }
  .result.changed { border-color: #e53935; }
  .shots { display: grid; grid-template-columns: repeat(3, 1fr); gap: 12px; }
  .shots img { width: 100%; border: 1px solid #eee; }
  .meta { color: #666; font-size: 14px; }
  #filter { margin-bottom: 16px; }
</style>
</head>
<body>
<h1>Visual regression results</h1>
<label id="filter"><input type="checkbox" id="changed-only"> only pages with differences</label>
<div id="results">Loading...</div>
<script>
async function load() {
  const response = await fetch('/results');
  const results = await response.json();
  const onlyChanged = document.getElementById('changed-only').checked;
  const root = document.getElementById('results');
  root.innerHTML = '';
  if (results.length === 0) {
    root.textContent = 'No results yet.';
    return;
  }
  for (const r of results) {
    if (onlyChanged && r.differences === 0) continue;
    const el = document.createElement('div');
    el.className = 'result' + (r.differences > 0 ? ' changed' : '');
    el.innerHTML = `
      <h2></h2>
      <div class="meta"></div>
      <div class="shots">
        <figure><img loading="lazy" src="/${r.baseScreenshot}"><figcaption>baseline</figcaption></figure>
        <figure><img loading="lazy" src="/${r.newScreenshot}"><figcaption>candidate</figcaption></figure>
        <figure><img loading="lazy" src="/${r.diffScreenshot}"><figcaption>diff</figcaption></figure>
      </div>`;
    el.querySelector('h2').textContent = r.title || r.url;
    el.querySelector('.meta').textContent = `${r.url} @ ${r.resolution}: ${r.differences} differing pixels`;
    root.appendChild(el);
  }
}
document.getElementById('changed-only').addEventListener('change', load);
load();
</script>
</body>
</html>
"#;

/// Build the viewer router over `store`
pub fn router(store: ArtifactStore) -> Router {
    let artifacts = ServeDir::new(&store.diff_dir).fallback(
        ServeDir::new(&store.candidate_dir).fallback(ServeDir::new(&store.baseline_dir)),
    );

    Router::new()
        .route("/", get(index))
        .route("/results", get(results))
        .fallback_service(artifacts)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(store))
}

/// Serve the viewer on `addr` until the process is stopped
pub async fn serve(store: ArtifactStore, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("result viewer listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(store)).await
}

async fn index(State(store): State<Arc<ArtifactStore>>) -> Html<String> {
    match tokio::fs::read_to_string(store.diff_dir.join("index.html")).await {
        Ok(html) => Html(html),
        Err(_) => Html(VIEWER_HTML.to_string()),
    }
}

async fn results(State(store): State<Arc<ArtifactStore>>) -> Response {
    let path = store.manifest_path();
    let raw = match tokio::fs::read_to_string(&path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Json(Vec::<ComparisonResult>::new()).into_response();
        }
        Err(e) => {
            error!("failed to read {}: {}", path.display(), e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "cannot read results").into_response();
        }
    };
    match serde_json::from_str::<Vec<ComparisonResult>>(&raw) {
        Ok(results) => Json(results).into_response(),
        Err(e) => {
            error!("malformed {}: {}", path.display(), e);
            (StatusCode::INTERNAL_SERVER_ERROR, "malformed results").into_response()
        }
    }
}
