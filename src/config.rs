use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub stream: StreamConfig,
    pub overlays: OverlayConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP 监听地址
    pub listen: String,
    /// 转码器可执行文件路径
    pub ffmpeg_binary: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:9000".to_string(),
            ffmpeg_binary: "ffmpeg".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StreamConfig {
    /// RTSP 拉流地址
    pub source_url: String,

    /// HLS 切片输出目录
    /// 建议配置为 /dev/shm/relaycast 以保护闪存寿命
    pub output_dir: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            source_url: "rtsp://localhost:8554/mystream".to_string(),
            output_dir: "./outputs".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OverlayConfig {
    /// 叠加层文档的持久化文件
    pub store_path: String,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            store_path: "./overlays.json".to_string(),
        }
    }
}

impl AppConfig {
    /// 加载配置文件；文件不存在时使用内置默认值
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }
}
