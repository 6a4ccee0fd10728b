use crate::config::AppConfig;
use crate::overlay::OverlayStore;
use crate::supervisor::StreamSupervisor;
use std::sync::Arc;

/// 全局应用上下文
pub struct AppState {
    pub config: AppConfig,
    /// 转码进程监管器（整个服务只有一路流）
    pub supervisor: StreamSupervisor,
    /// 叠加层文档存储
    pub overlays: OverlayStore,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let supervisor = StreamSupervisor::new(&config);
        let overlays = OverlayStore::open(&config.overlays.store_path);
        Self {
            config,
            supervisor,
            overlays,
        }
    }
}

pub type SharedState = Arc<AppState>;
