use super::*;
use crate::progress::ProgressEvent;
use crate::test_helpers::{TestGraph, sample_token};
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use std::time::Duration;
use tower::ServiceExt;


/// Router state over a mock identity provider and Graph API
struct TestApp {
    graph: TestGraph,
    state: AppState,
}

impl TestApp {
    async fn start() -> Self {
        let graph = TestGraph::start().await;
        let session = Arc::new(graph.session());
        let state = AppState::new(session, CancellationToken::new());
        Self { graph, state }
    }

    async fn signed_in() -> Self {
        let app = Self::start().await;
        app.graph.store_token(sample_token("valid-token", Some("refresh-1")));
        app
    }

    async fn get(&self, uri: &str) -> Response {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        create_router(self.state.clone())
            .oneshot(request)
            .await
            .unwrap()
    }

    async fn post_option(&self, option: &str) -> Response {
        let request = Request::builder()
            .method("POST")
            .uri("/handle_option")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                serde_json::json!({ "option": option }).to_string(),
            ))
            .unwrap();
        create_router(self.state.clone())
            .oneshot(request)
            .await
            .unwrap()
    }

    fn events(&self) -> Vec<ProgressEvent> {
        self.state.session.progress().snapshot()
    }

    fn messages(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.message).collect()
    }

    /// Wait for the background walk started by a handler to finish
    async fn wait_for_walk(&self) {
        for _ in 0..200 {
            if !self.state.walk.is_running() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("walk did not finish");
    }
}

async fn body_text(response: Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

#[tokio::test]
async fn test_server_stops_on_cancellation() {
    let graph = TestGraph::start().await;
    let mut config = graph.config.clone();
    config.web.bind_address = "127.0.0.1:0".parse().unwrap();
    let session = Arc::new(Session::new(config).unwrap());
    let shutdown = CancellationToken::new();

    let handle = tokio::spawn(start_server(session, shutdown.clone()));
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not stop after cancellation")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let app = TestApp::start().await;

    let response = app.get("/downloads").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
