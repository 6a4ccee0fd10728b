use crate::config::AppConfig;
use serde::Serialize;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time;
use tracing::{error, info, warn};

/// HLS 播放列表文件名（播放端依赖该固定路径）
const HLS_PLAYLIST: &str = "stream.m3u8";
/// 转码器日志文件名（追加写入，跨多次运行保留）
const TRANSCODER_LOG: &str = "ffmpeg.log";
/// HLS 切片文件扩展名
const SEGMENT_EXT: &str = "ts";
/// 优雅终止的默认宽限期
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// 监管器操作错误
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("stream source_url is not set")]
    SourceUrlMissing,
    #[error("stream output_dir is not set")]
    OutputDirMissing,
    #[error("output playlist path invalid")]
    PlaylistPathInvalid,
    #[error("failed to create output dir {path:?}: {source}")]
    CreateOutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to open transcoder log {path:?}: {source}")]
    OpenLogSink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn transcoder: {0}")]
    Spawn(#[source] io::Error),
}

/// start() 的结果：区分真正启动与已在运行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// 转码进程的对外状态
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StreamStatus {
    pub running: bool,
}

/// 受锁保护的进程槽位：进程句柄与日志句柄始终一起变更
#[derive(Default)]
struct ProcessSlot {
    /// FFmpeg 子进程句柄 (None 表示没有在管进程)
    process: Option<Child>,
    /// 转码器 stderr 的落盘句柄
    log_sink: Option<std::fs::File>,
}

/// 转码进程监管器
///
/// 整个服务只管理一路流：start / stop / status 都在同一把锁内串行执行，
/// 保证任意时刻最多只有一个 FFmpeg 进程存活。
pub struct StreamSupervisor {
    /// 转码器可执行文件路径
    ffmpeg_binary: String,
    /// RTSP 拉流地址
    source_url: String,
    /// HLS 切片输出目录
    output_dir: PathBuf,
    /// 优雅终止宽限期
    grace_period: Duration,
    slot: Mutex<ProcessSlot>,
}

impl StreamSupervisor {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            ffmpeg_binary: config.server.ffmpeg_binary.clone(),
            source_url: config.stream.source_url.clone(),
            output_dir: PathBuf::from(&config.stream.output_dir),
            grace_period: STOP_GRACE_PERIOD,
            slot: Mutex::new(ProcessSlot::default()),
        }
    }

    /// 启动转码进程
    ///
    /// # 副作用
    /// - 创建 HLS 输出目录
    /// - 清理上一次运行遗留的切片文件
    /// - 启动 FFmpeg 子进程并把 stderr 重定向到日志文件
    ///
    /// # 错误处理
    /// - 配置缺失（拉流地址 / 输出目录）时返回错误
    /// - 日志文件无法打开时返回错误
    /// - FFmpeg 启动失败时返回错误
    pub async fn start(&self) -> Result<StartOutcome, SupervisorError> {
        // 1. 校验配置，任何副作用之前完成
        if self.source_url.is_empty() {
            return Err(SupervisorError::SourceUrlMissing);
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(SupervisorError::OutputDirMissing);
        }

        let mut slot = self.slot.lock().await;

        // 2. 确保输出目录存在（可重复执行）
        fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| SupervisorError::CreateOutputDir {
                path: self.output_dir.clone(),
                source: e,
            })?;

        // 3. 派生播放列表路径
        let playlist = self.output_dir.join(HLS_PLAYLIST);
        if playlist.as_os_str().is_empty() {
            return Err(SupervisorError::PlaylistPathInvalid);
        }

        // 4. 幂等检查：已有存活进程则直接返回
        if slot_alive(&mut slot) {
            return Ok(StartOutcome::AlreadyRunning);
        }

        // 5. 回收已退出但尚未清理的残留句柄
        if slot.process.take().is_some() {
            info!("Cleared stale transcoder handle");
            slot.log_sink = None;
        }

        // 6. 清理上一次运行遗留的切片文件
        purge_segments(&self.output_dir).await;

        // 7. 打开日志文件（追加模式，保留历史运行记录）
        let log_path = self.output_dir.join(TRANSCODER_LOG);
        let log_sink = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| SupervisorError::OpenLogSink {
                path: log_path.clone(),
                source: e,
            })?;
        let stderr_sink = log_sink
            .try_clone()
            .map_err(|e| SupervisorError::OpenLogSink {
                path: log_path.clone(),
                source: e,
            })?;

        // 8. 构建 FFmpeg 命令并启动子进程
        let mut cmd = Command::new(&self.ffmpeg_binary);
        cmd.args(transcoder_args(&self.source_url, &playlist));
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::from(stderr_sink));
        cmd.kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            error!("Failed to spawn transcoder process: {}", e);
            SupervisorError::Spawn(e)
        })?;

        info!(
            "Transcoder started (pid {:?}). Playlist: {:?}",
            child.id(),
            playlist
        );

        // 9. 记录进程句柄与日志句柄
        slot.process = Some(child);
        slot.log_sink = Some(log_sink);

        Ok(StartOutcome::Started)
    }

    /// 停止转码进程
    ///
    /// 先请求优雅退出 (Unix 下为 SIGTERM)，超过宽限期后强制杀死。
    /// 返回 true 表示确实停止了一个正在运行的进程。
    pub async fn stop(&self) -> bool {
        let mut slot = self.slot.lock().await;

        let mut child = match slot.process.take() {
            Some(child) => child,
            None => return false,
        };

        // 进程已自行退出：残留句柄留给下一次 start() 回收，不触碰输出目录
        if !is_alive(&mut child) {
            slot.process = Some(child);
            return false;
        }

        // 1. 请求优雅退出
        request_exit(&mut child);

        // 2. 限时等待退出，超时后强制杀死
        match time::timeout(self.grace_period, child.wait()).await {
            Ok(Ok(status)) => info!("Transcoder exited with {}", status),
            Ok(Err(e)) => warn!("Failed to await transcoder exit: {}", e),
            Err(_) => {
                warn!(
                    "Transcoder ignored termination for {:?}. Killing.",
                    self.grace_period
                );
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill transcoder: {}", e);
                }
            }
        }

        // 3. 关闭日志句柄并清理切片文件
        slot.log_sink = None;
        purge_segments(&self.output_dir).await;

        true
    }

    /// 查询转码进程状态（非阻塞，不修改槽位）
    pub async fn status(&self) -> StreamStatus {
        let mut slot = self.slot.lock().await;
        StreamStatus {
            running: slot_alive(&mut slot),
        }
    }
}

/// 槽位中是否存在仍在运行的进程
fn slot_alive(slot: &mut ProcessSlot) -> bool {
    match slot.process.as_mut() {
        Some(child) => is_alive(child),
        None => false,
    }
}

/// 非阻塞探测进程是否存活
///
/// 探测出错时按存活处理：宁可拒绝一次启动，也不允许出现第二个转码进程。
fn is_alive(child: &mut Child) -> bool {
    match child.try_wait() {
        Ok(Some(_)) => false,
        Ok(None) => true,
        Err(e) => {
            warn!("Process liveness check failed: {}", e);
            true
        }
    }
}

/// 请求进程优雅退出
#[cfg(unix)]
fn request_exit(child: &mut Child) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!("Failed to send SIGTERM to transcoder (pid {}): {}", pid, e);
        }
    }
}

/// 请求进程优雅退出（无 SIGTERM 的平台上直接转入强制终止）
#[cfg(not(unix))]
fn request_exit(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!("Failed to kill transcoder: {}", e);
    }
}

/// 清理输出目录中的切片文件
///
/// 只删除 *.ts；播放列表由下一次运行覆盖，日志文件保留。
/// 删除失败仅记录警告，不影响调用方。
async fn purge_segments(dir: &Path) {
    let mut removed = 0;
    match fs::read_dir(dir).await {
        Ok(mut entries) => {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.extension().and_then(|ext| ext.to_str()) == Some(SEGMENT_EXT) {
                    match fs::remove_file(&path).await {
                        Ok(_) => removed += 1,
                        Err(e) => warn!("Failed to remove stale segment {:?}: {}", path, e),
                    }
                }
            }
        }
        Err(e) => warn!("Failed to scan output dir {:?}: {}", dir, e),
    }
    if removed > 0 {
        info!("Removed {} stale segment file(s) from {:?}", removed, dir);
    }
}

/// 固定的转码参数（低延迟 RTSP 拉流 + HLS 切片输出）
fn transcoder_args(source_url: &str, playlist: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    for arg in [
        "-nostdin",
        "-rtsp_transport",
        "tcp",
        "-fflags",
        "nobuffer",
        "-flags",
        "low_delay",
        "-reorder_queue_size",
        "0",
        "-i",
    ] {
        args.push(arg.into());
    }
    args.push(source_url.into());
    for arg in [
        "-c:v",
        "libx264",
        "-preset",
        "veryfast",
        "-tune",
        "zerolatency",
        "-x264-params",
        "bframes=0:keyint=30:min-keyint=30:scenecut=0",
        "-c:a",
        "aac",
        "-f",
        "hls",
        "-hls_time",
        "0.5",
        "-hls_list_size",
        "3",
        "-hls_flags",
        "delete_segments",
    ] {
        args.push(arg.into());
    }
    args.push(playlist.as_os_str().to_os_string());
    args
}
