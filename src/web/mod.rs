pub mod api;
pub mod hls;

use crate::state::SharedState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

/// 注册 HTTP 路由
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/health", get(api::health)) // 健康检查
        .route("/api/system", get(api::sys_status)) // 系统状态
        .route("/api/stream/start", post(api::start_stream)) // 启动转码
        .route("/api/stream/stop", post(api::stop_stream)) // 停止转码
        .route("/api/stream/status", get(api::stream_status)) // 查询转码状态
        .route(
            "/api/overlays/:stream_id",
            get(api::get_overlays).post(api::upsert_overlays), // 叠加层读写
        )
        .route("/output/:file_name", get(hls::serve_output_file)) // 获取 HLS 文件
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::AppState;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use std::path::Path;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state(dir: &Path, ffmpeg_binary: &str, source_url: &str) -> SharedState {
        let mut config = AppConfig::default();
        config.server.ffmpeg_binary = ffmpeg_binary.to_string();
        config.stream.source_url = source_url.to_string();
        config.stream.output_dir = dir.join("out").to_string_lossy().into_owned();
        config.overlays.store_path = dir.join("overlays.json").to_string_lossy().into_owned();
        Arc::new(AppState::new(config))
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[cfg(unix)]
    fn fake_transcoder(dir: &Path) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-ffmpeg.sh");
        std::fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path(), "ffmpeg", "rtsp://cam/main"));

        let response = app.oneshot(get_request("/api/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn system_snapshot_has_memory_fields() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path(), "ffmpeg", "rtsp://cam/main"));

        let response = app.oneshot(get_request("/api/system")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json.get("mem_total").is_some());
        assert!(json.get("load_avg").is_some());
    }

    #[tokio::test]
    async fn start_without_source_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path(), "ffmpeg", ""));

        let response = app.oneshot(post_request("/api/stream/start")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["started"], false);
        assert!(json["error"].as_str().unwrap().contains("source_url"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stream_lifecycle_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_transcoder(dir.path());
        let state = test_state(dir.path(), &binary, "rtsp://cam/main");
        let app = router(state);

        let response = app
            .clone()
            .oneshot(get_request("/api/stream/status"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["running"], false);

        let response = app
            .clone()
            .oneshot(post_request("/api/stream/start"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["started"], true);

        // a second start reports the stream as already running
        let response = app
            .clone()
            .oneshot(post_request("/api/stream/start"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["started"], false);
        assert_eq!(json["running"], true);

        let response = app
            .clone()
            .oneshot(get_request("/api/stream/status"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["running"], true);

        let response = app
            .clone()
            .oneshot(post_request("/api/stream/stop"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["stopped"], true);

        let response = app
            .clone()
            .oneshot(post_request("/api/stream/stop"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["stopped"], false);

        let response = app
            .oneshot(get_request("/api/stream/status"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["running"], false);
    }

    #[tokio::test]
    async fn overlay_documents_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path(), "ffmpeg", "rtsp://cam/main"));

        // unknown id comes back as an empty skeleton
        let response = app
            .clone()
            .oneshot(get_request("/api/overlays/cam-1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["stream_id"], "cam-1");
        assert_eq!(json["overlays"]["image"], serde_json::json!([]));

        let payload = serde_json::json!({
            "stream_url": "http://host/output/stream.m3u8",
            "overlays": {
                "image": [],
                "text": [{ "id": "t1", "content": "LIVE", "styles": { "color": "#fff" } }]
            },
            "positions": {
                "image_position": [],
                "text_position": [{ "id": "t1", "xPct": 5.0, "yPct": 5.0, "wPct": 20.0, "hPct": 10.0 }]
            }
        });
        let request = Request::builder()
            .method("POST")
            .uri("/api/overlays/cam-1")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let stored = body_json(response).await;
        assert_eq!(stored["stream_id"], "cam-1");

        let response = app
            .oneshot(get_request("/api/overlays/cam-1"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["overlays"]["text"][0]["content"], "LIVE");
        assert_eq!(json["positions"]["text_position"][0]["xPct"], 5.0);
    }

    #[tokio::test]
    async fn overlay_persist_failure_maps_to_500() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.stream.output_dir = dir.path().join("out").to_string_lossy().into_owned();
        // a store file inside a directory that does not exist cannot be written
        config.overlays.store_path = dir
            .path()
            .join("absent-dir")
            .join("overlays.json")
            .to_string_lossy()
            .into_owned();
        let app = router(Arc::new(AppState::new(config)));

        let request = Request::builder()
            .method("POST")
            .uri("/api/overlays/cam-1")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn output_files_are_served_with_hls_content_types() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), "ffmpeg", "rtsp://cam/main");
        let out_dir = std::path::PathBuf::from(&state.config.stream.output_dir);
        std::fs::create_dir_all(&out_dir).unwrap();
        std::fs::write(out_dir.join("stream.m3u8"), "#EXTM3U\n").unwrap();
        std::fs::write(out_dir.join("seg0.ts"), b"x").unwrap();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(get_request("/output/stream.m3u8"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/vnd.apple.mpegurl"
        );

        let response = app
            .clone()
            .oneshot(get_request("/output/seg0.ts"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp2t");

        let response = app
            .oneshot(get_request("/output/absent.ts"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn output_requests_cannot_escape_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), "ffmpeg", "rtsp://cam/main");
        std::fs::create_dir_all(&state.config.stream.output_dir).unwrap();
        let app = router(state);

        let response = app
            .oneshot(get_request("/output/..%2F..%2Fetc%2Fpasswd"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
