//! API routes.

pub mod control;
pub mod health;
pub mod submissions;

use crate::AppState;
use axum::Router;
use tower_http::services::ServeDir;

/// Build the main router, including the static log mount.
pub fn router(state: AppState) -> Router {
    let logs = ServeDir::new(&state.config.output_dir);
    let log_prefix = state.config.log_url_prefix();

    Router::new()
        .nest("/api/v2", api_router())
        .merge(health::router())
        .nest_service(&log_prefix, logs)
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/submissions", submissions::router())
        .merge(control::router())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use bytes::Bytes;
    use dockyard_config::BuilderConfig;
    use dockyard_core::engine::{ContainerEngine, EngineEvent, EventStream};
    use dockyard_core::registry::RegistryAuth;
    use dockyard_db::MemorySubmissionStore;
    use dockyard_registry::RegistryClient;
    use dockyard_scheduler::Scheduler;
    use futures::StreamExt;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "dockyard-test-boundary";

    /// Engine that is never expected to be reached while the scheduler is paused.
    struct IdleEngine;

    #[async_trait]
    impl ContainerEngine for IdleEngine {
        fn name(&self) -> &'static str {
            "idle"
        }

        fn build_image(&self, _context: Bytes, _tag: &str) -> EventStream<'_> {
            futures::stream::iter([Ok(EngineEvent::output("built\n"))]).boxed()
        }

        fn push_image(&self, _tag: &str, _auth: &RegistryAuth) -> EventStream<'_> {
            futures::stream::iter([Ok(EngineEvent::status("Pushed"))]).boxed()
        }

        async fn remove_image(&self, _tag: &str) -> dockyard_core::Result<()> {
            Ok(())
        }
    }

    fn test_app(dir: &TempDir) -> Router {
        let recipe = dir.path().join("recipes/py");
        std::fs::create_dir_all(&recipe).unwrap();
        std::fs::write(recipe.join("Dockerfile"), "FROM python:3.12\n").unwrap();
        let output = dir.path().join("output");
        std::fs::create_dir_all(&output).unwrap();
        std::fs::write(output.join("team_7_0.log.gz"), b"not really gzip").unwrap();

        let config = BuilderConfig {
            output_dir: output,
            recipe_dir: dir.path().join("recipes"),
            ..BuilderConfig::default()
        };
        let registry = RegistryClient::new("http", "127.0.0.1:9").unwrap();
        let store = MemorySubmissionStore::with_teams([7]);
        let scheduler = Scheduler::new(
            &config,
            Arc::new(IdleEngine),
            Arc::new(registry),
            Arc::new(store),
        );
        router(AppState::new(Arc::new(scheduler), config))
    }

    fn tar_archive() -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let body = b"print('hi')\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "main.py", &body[..]).unwrap();
        builder.into_inner().unwrap()
    }

    fn multipart_body(archive: Option<&[u8]>, lang: Option<&str>) -> Body {
        let mut body = Vec::new();
        if let Some(lang) = lang {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"lang\"\r\n\r\n{lang}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some(archive) = archive {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"submission\"; filename=\"code.tar\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(archive);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Body::from(body)
    }

    fn upload(team: &str, archive: Option<&[u8]>, lang: Option<&str>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/api/v2/submissions/{}", team))
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(multipart_body(archive, lang))
            .unwrap()
    }

    async fn body_json(body: Body) -> Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir);

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response.into_body()).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["running"], false);
        assert_eq!(body["building"], 0);
    }

    #[tokio::test]
    async fn test_enqueue_and_query_status() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir);

        let archive = tar_archive();
        let response = app
            .clone()
            .oneshot(upload("7", Some(&archive[..]), Some("py")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response.into_body()).await;
        let id = created["submission"]["id"].as_str().unwrap().to_string();

        let request = Request::builder()
            .uri("/api/v2/submissions/7")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let submission = body_json(response.into_body()).await;
        assert_eq!(submission["id"], id);
        assert_eq!(submission["status"], "queued");
        assert_eq!(submission["version"], 0);
        assert_eq!(submission["log_url"], "/builder/output/team_7_0.log.gz");

        let request = Request::builder()
            .method("POST")
            .uri("/api/v2/submissions/statuses")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"ids":[7,8]}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let statuses = body_json(response.into_body()).await;
        assert_eq!(statuses[0][0], 7);
        assert_eq!(statuses[0][1]["id"], id);
        assert_eq!(statuses[1][0], 8);
        assert_eq!(statuses[1][1], serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_enqueue_rejects_bad_uploads() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir);
        let archive = tar_archive();

        let cases = [
            upload("7", Some(&b""[..]), Some("py")),
            upload("7", None, Some("py")),
            upload("7", Some(&b"plain text"[..]), Some("py")),
            upload("7", Some(&archive[..]), Some("cobol")),
            upload("7", Some(&archive[..]), None),
            upload("seven", Some(&archive[..]), Some("py")),
            upload("99", Some(&archive[..]), Some("py")),
        ];
        for request in cases {
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body = body_json(response.into_body()).await;
            assert!(body["error"].is_string());
        }

        let request = Request::builder()
            .uri("/api/v2/submissions/7")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir);

        for (path, running) in [("/api/v2/start", true), ("/api/v2/start", true), ("/api/v2/stop", false)] {
            let request = Request::builder()
                .method("POST")
                .uri(path)
                .body(Body::empty())
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_json(response.into_body()).await["running"], running);
        }
    }

    #[tokio::test]
    async fn test_serves_log_files() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir);

        let request = Request::builder()
            .uri("/builder/output/team_7_0.log.gz")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"not really gzip");
    }
}
