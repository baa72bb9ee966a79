mod cache;
mod config;
mod handlers;
mod rate_limit;
mod state;
mod sweeper;

use std::{collections::HashSet, env, net::SocketAddr, path::PathBuf};

use anyhow::Context;
use axum::{
    routing::{any, get},
    Router,
};
use config::Config;
use state::AppState;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loaded_env_files = load_env_files()?;
    init_tracing();
    if loaded_env_files.is_empty() {
        tracing::debug!("No .env or .env.local file found. Using process environment only.");
    } else {
        let files = loaded_env_files
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        tracing::info!(files = %files, "Loaded environment files");
    }

    let config = Config::from_args();
    tracing::info!(
        ttl_ms = config.ttl.as_millis() as u64,
        threshold = config.threshold,
        sweep_interval_secs = config.sweep_interval.as_secs(),
        max_body_bytes = config.max_body_bytes,
        "Rate limiter configured"
    );

    let state = AppState::new(config.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = sweeper::spawn_sweeper(
        state.limiter.store().clone(),
        config.sweep_interval,
        config.ttl,
        shutdown_rx,
    );

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind TCP listener")?;
    tracing::info!(port = config.port, "Listening for reports");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    let _ = shutdown_tx.send(true);
    sweeper.await.context("cache sweeper panicked")?;
    tracing::info!("Shutdown complete");

    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/report", any(handlers::report))
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %error, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn load_env_files() -> anyhow::Result<Vec<PathBuf>> {
    let mut roots = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        roots.push(cwd);
    }
    if let Ok(executable_path) = env::current_exe() {
        if let Some(executable_dir) = executable_path.parent() {
            roots.push(executable_dir.to_path_buf());
        }
    }
    roots.push(PathBuf::from(env!("CARGO_MANIFEST_DIR")));

    let mut seen_roots = HashSet::new();
    let mut loaded = Vec::new();

    for root in roots {
        let key = root.to_string_lossy().to_string();
        if !seen_roots.insert(key) {
            continue;
        }

        for filename in [".env", ".env.local"] {
            let path = root.join(filename);
            if path.is_file() {
                dotenvy::from_path(&path)
                    .with_context(|| format!("failed to load {}", path.display()))?;
                loaded.push(path);
            }
        }
    }

    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{
        body::{to_bytes, Body},
        http::{header::CONTENT_TYPE, Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;

    fn test_state(ttl_ms: u64, threshold: u32) -> AppState {
        AppState::new(Config {
            port: 0,
            ttl: Duration::from_millis(ttl_ms),
            threshold,
            sweep_interval: Duration::from_secs(120),
            max_body_bytes: 0x2000,
        })
    }

    fn report_request(body: impl Into<String>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/report")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.into()))
            .unwrap()
    }

    fn reason(response: &axum::response::Response) -> &str {
        response
            .headers()
            .get("x-reason")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn report_allows_then_blocks() {
        let app = build_router(test_state(60_000, 2));
        let body = r#"{"url":"https://example.com/page"}"#;

        for _ in 0..2 {
            let response = app.clone().oneshot(report_request(body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }

        let response = app.clone().oneshot(report_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], br#"{"block":true}"#);

        let other = r#"{"url":"https://example.com/other"}"#;
        let response = app.oneshot(report_request(other)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn report_rejects_non_post() {
        let app = build_router(test_state(1000, 1));
        let request = Request::builder()
            .method("GET")
            .uri("/report")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(reason(&response), "non-post method");
    }

    #[tokio::test]
    async fn report_rejects_wrong_content_type() {
        let app = build_router(test_state(1000, 1));
        let request = Request::builder()
            .method("POST")
            .uri("/report")
            .header(CONTENT_TYPE, "text/plain")
            .body(Body::from(r#"{"url":"a"}"#))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(reason(&response), "wrong content type");
    }

    #[tokio::test]
    async fn report_rejects_oversized_body() {
        let app = build_router(test_state(1000, 1));
        let url = "a".repeat(0x2000);
        let body = format!(r#"{{"url":"{}"}}"#, url);

        let response = app.oneshot(report_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(reason(&response), "request body exceeds 8192 bytes");
    }

    #[tokio::test]
    async fn report_rejects_invalid_payloads() {
        let app = build_router(test_state(1000, 1));

        let response = app.clone().oneshot(report_request("{")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(!reason(&response).is_empty());

        for body in [r#"{"url":""}"#, r#"{"url":"a","b":"c"}"#, r#"{"u":"a"}"#] {
            let response = app.clone().oneshot(report_request(body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
            assert_eq!(reason(&response), "wrong payload");
        }
    }

    #[tokio::test]
    async fn health_reports_tracked_entries() {
        let state = test_state(60_000, 5);
        let app = build_router(state.clone());

        app.clone()
            .oneshot(report_request(r#"{"url":"https://example.com"}"#))
            .await
            .unwrap();

        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["trackedEntries"], 1);
    }

    #[tokio::test]
    async fn unknown_paths_are_not_found() {
        let app = build_router(test_state(1000, 1));
        let request = Request::builder()
            .uri("/nope")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
