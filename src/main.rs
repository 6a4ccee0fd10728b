mod config;
mod overlay;
mod state;
mod supervisor;
mod web;

use clap::Parser;
use config::AppConfig;
use state::AppState;
use std::sync::Arc;
use tracing::info;

/// Relaycast - RTSP to HLS Gateway
/// 解析命令行参数，初始化服务，加载配置文件，并启动 HTTP 服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 配置文件路径
    #[arg(short, long, default_value = "relaycast.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志系统，设置格式
    tracing_subscriber::fmt::init();

    // 解析命令行参数，获取配置文件路径
    let args = Args::parse();

    // 加载配置文件
    let config = AppConfig::load(&args.config)?;
    info!(
        "Relaycast initialized. HLS output: {}",
        config.stream.output_dir
    );

    // 初始化全局状态：配置、转码监管器、叠加层存储
    let state = Arc::new(AppState::new(config.clone()));

    // 注册 HTTP 路由
    let app = web::router(state.clone());

    // 启动 HTTP 服务，监听指定的地址和端口
    info!("Listening on {}", config.server.listen);
    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 服务退出前停掉仍在运行的转码进程
    if state.supervisor.stop().await {
        info!("Transcoder stopped on shutdown");
    }

    Ok(())
}

/// 等待 Ctrl-C 或 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
