use std::fs;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use cartscout::config::Environment;
use cartscout::mock::{MockLauncher, MockTarget};
use cartscout::orchestrator::{Orchestrator, SearchTimings};
use cartscout::pool::ContextPool;
use cartscout::registry::SessionRegistry;
use cartscout::server::{build_router, cors_layer, AppState};
use cartscout::targets::{TargetAdapter, TargetSet};
use cartscout::{Gateway, Target};

fn app(environment: Environment) -> (Router, TempDir) {
    let public = TempDir::new().unwrap();
    fs::write(public.path().join("index.html"), "<html>cartscout</html>").unwrap();

    let pool = Arc::new(ContextPool::new(Arc::new(MockLauncher::new())));
    let targets = TargetSet::from_adapters(
        Target::ALL
            .into_iter()
            .map(|target| Arc::new(MockTarget::new(target, None)) as Arc<dyn TargetAdapter>),
    );
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(SessionRegistry::new(pool)),
        targets,
        SearchTimings::default(),
    ));
    let state = AppState::new(Gateway::new(orchestrator), environment);
    (build_router(state, public.path()), public)
}

async fn get(app: Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn health_reports_environment() {
    let (app, _public) = app(Environment::Production);
    let (status, body) = get(app, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["environment"], "production");
    assert!(json["timestamp"].as_str().unwrap().contains('T'));
}

#[tokio::test]
async fn unknown_api_paths_are_json_404s() {
    let (app, _public) = app(Environment::Development);
    let (status, body) = get(app, "/api/products/42").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["error"], "API endpoint not found");
}

#[tokio::test]
async fn client_routes_fall_back_to_index() {
    let (app, _public) = app(Environment::Development);
    let (status, body) = get(app, "/compare/milk").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("cartscout"));
}

#[tokio::test]
async fn metrics_are_exposed_in_text_format() {
    let (app, _public) = app(Environment::Development);
    cartscout::metrics::record_search(Target::Zepto, cartscout::SearchStatus::Empty);
    let (status, body) = get(app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("cartscout_searches_total"));
}

#[test]
fn cors_rejects_unusable_origins() {
    assert!(cors_layer("http://localhost:3000").is_ok());
    assert!(cors_layer("http://bad\norigin").is_err());
}
