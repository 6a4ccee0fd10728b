use crate::overlay::OverlayDocument;
use crate::state::SharedState;
use crate::supervisor::{StartOutcome, StreamStatus};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use tracing::error;

/// 健康检查 API
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// 获取系统状态 API
/// 该处理函数返回系统的内存和负载信息，作为 JSON 响应
pub async fn sys_status() -> Json<serde_json::Value> {
    // 获取内存信息，默认值为 0
    let mem = sys_info::mem_info().map(|m| (m.total, m.avail)).unwrap_or((0, 0));
    // 获取负载信息，默认值为 0.0
    let load = sys_info::loadavg().map(|l| l.one).unwrap_or(0.0);

    // 返回系统的内存和负载状态
    Json(serde_json::json!({
        "mem_total": mem.0 / 1024, // 转换为MB
        "mem_avail": mem.1 / 1024, // 转换为MB
        "load_avg": load,
    }))
}

/// 启动转码 API 的响应体
#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub started: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 启动转码 API
/// 已在运行时额外返回 running 标记；启动失败时返回 500 和错误信息
pub async fn start_stream(State(state): State<SharedState>) -> (StatusCode, Json<StartResponse>) {
    match state.supervisor.start().await {
        Ok(StartOutcome::Started) => (
            StatusCode::OK,
            Json(StartResponse {
                started: true,
                running: None,
                error: None,
            }),
        ),
        Ok(StartOutcome::AlreadyRunning) => (
            StatusCode::OK,
            Json(StartResponse {
                started: false,
                running: Some(true),
                error: None,
            }),
        ),
        Err(e) => {
            error!("Failed to start transcoder: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StartResponse {
                    started: false,
                    running: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

/// 停止转码 API
pub async fn stop_stream(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let stopped = state.supervisor.stop().await;
    Json(serde_json::json!({ "stopped": stopped }))
}

/// 查询转码状态 API
pub async fn stream_status(State(state): State<SharedState>) -> Json<StreamStatus> {
    Json(state.supervisor.status().await)
}

/// 读取指定流的叠加层文档
pub async fn get_overlays(
    State(state): State<SharedState>,
    Path(stream_id): Path<String>,
) -> Json<OverlayDocument> {
    Json(state.overlays.fetch(&stream_id).await)
}

/// 写入指定流的叠加层文档（整体替换）
pub async fn upsert_overlays(
    State(state): State<SharedState>,
    Path(stream_id): Path<String>,
    Json(doc): Json<OverlayDocument>,
) -> Result<Json<OverlayDocument>, (StatusCode, String)> {
    match state.overlays.upsert(&stream_id, doc).await {
        Ok(stored) => Ok(Json(stored)),
        Err(e) => {
            error!("Failed to persist overlays for [{}]: {}", stream_id, e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
