use anyhow::{bail, Context, Result};
use avsync_player::backend::{SyntheticBackend, SyntheticMedia};
use avsync_player::{
    ChannelListener, Listeners, MediaBackend, MediaSource, Notification, PlaybackEvent, Player,
    PlayerConfig, RenderSurface, TransportState, VideoFrame,
};
use crossbeam_channel::RecvTimeoutError;
use log::{debug, info};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const USAGE: &str = "\
用法: avsync-player <uri> [选项]

选项:
  --speed <label>     播放倍速: 0.5x / 1.0x / 1.5x / 2.0x
  --seek <percent>    启动后 Seek 到指定进度（0-100）
  --seconds <n>       最多播放 n 秒
  --config <file>     JSON 配置文件
  --json              以 JSON 行输出播放事件
  -h, --help          显示帮助

以 synthetic: 开头的 URI 使用内置的合成媒体（10 秒 640x360@30 + 44.1kHz 立体声）。";

struct Options {
    uri: String,
    speed: Option<String>,
    seek: Option<f64>,
    seconds: Option<f64>,
    config: Option<PathBuf>,
    json: bool,
}

fn parse_options() -> Result<Options> {
    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        println!("{}", USAGE);
        std::process::exit(0);
    }

    let options = Options {
        json: args.contains("--json"),
        speed: args.opt_value_from_str("--speed")?,
        seek: args.opt_value_from_str("--seek")?,
        seconds: args.opt_value_from_str("--seconds")?,
        config: args.opt_value_from_str("--config")?,
        uri: args
            .free_from_str()
            .with_context(|| format!("缺少媒体 URI\n\n{}", USAGE))?,
    };

    let remaining = args.finish();
    if !remaining.is_empty() {
        bail!("无法识别的参数: {:?}", remaining);
    }
    Ok(options)
}

/// 只统计帧数的渲染表面
struct ConsoleSurface {
    frames: AtomicU64,
}

impl RenderSurface for ConsoleSurface {
    fn present(&self, frame: &VideoFrame<'_>) {
        let count = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        if count % 100 == 0 {
            info!(
                "🖼️  已渲染 {} 帧（当前 PTS {}ms, {}x{}）",
                count,
                frame.pts_us / 1000,
                frame.width,
                frame.height
            );
        }
    }
}

fn open_backend(uri: &str) -> Result<Arc<dyn MediaBackend>> {
    if uri.starts_with("synthetic:") {
        let backend = SyntheticBackend::new();
        backend.register(uri, SyntheticMedia::demo());
        return Ok(Arc::new(backend));
    }

    #[cfg(feature = "ffmpeg")]
    let backend: Result<Arc<dyn MediaBackend>> =
        Ok(Arc::new(avsync_player::backend::FfmpegBackend::new()?));
    #[cfg(not(feature = "ffmpeg"))]
    let backend: Result<Arc<dyn MediaBackend>> =
        Err(anyhow::anyhow!("未启用 ffmpeg feature，只能播放 synthetic: 媒体"));
    backend
}

fn report(event: &PlaybackEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    } else {
        info!("📣 {:?}", event);
    }
    Ok(())
}

fn main() -> Result<()> {
    // 初始化日志（RUST_LOG 可覆盖）
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = parse_options()?;
    let config = match &options.config {
        Some(path) => PlayerConfig::load(path)
            .with_context(|| format!("读取配置失败: {}", path.display()))?,
        None => PlayerConfig::default(),
    };

    info!("🎬 avsync-player 启动: {}", options.uri);
    let backend = open_backend(&options.uri)?;
    let (listener, rx) = ChannelListener::new();
    let player = Player::new(backend, config, Listeners::shared(listener));

    let surface = Arc::new(ConsoleSurface {
        frames: AtomicU64::new(0),
    });
    player.update_render_target(Some(surface.clone()));
    if let Some(label) = &options.speed {
        player.set_speed(label);
    }

    player.initiate(MediaSource::from_uri(options.uri.as_str()))?;
    if let Some(percent) = options.seek {
        player.seek(percent)?;
    }

    let deadline = options
        .seconds
        .map(|seconds| Instant::now() + Duration::from_secs_f64(seconds.max(0.0)));
    loop {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            info!("⏱️  到达播放时长上限");
            break;
        }
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(Notification::Event(event)) => report(&event, options.json)?,
            Ok(Notification::Duration(ms)) => info!("⏳ 总时长: {}ms", ms),
            Ok(Notification::Dimensions(width, height)) => info!("📐 视频尺寸: {}x{}", width, height),
            Ok(Notification::Position(ms)) => debug!("位置: {}ms", ms),
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) => {
                if player.state() == TransportState::Stopped && !player.is_active() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    player.stop();
    for notification in rx.try_iter() {
        if let Notification::Event(event) = notification {
            report(&event, options.json)?;
        }
    }
    info!(
        "✅ 播放结束，共渲染 {} 帧",
        surface.frames.load(Ordering::Relaxed)
    );
    Ok(())
}
