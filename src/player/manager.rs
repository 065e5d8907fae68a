use crate::core::{
    log_ctx, FilterId, MediaSource, PlaybackClock, PlaybackSpeed, PlayerConfig, PlayerError, Result,
    StreamKind, TransportState,
};
use crate::player::audio_session::AudioSession;
use crate::player::backend::MediaBackend;
use crate::player::listener::{
    ListenerSet, Listeners, PlaybackEvent, PlaybackEventListener, ProgressListener, VideoInfoListener,
};
use crate::player::prober::{ProbedTracks, TrackProber};
use crate::player::session::{spawn_session, SessionShared};
use crate::player::surface::{RenderSurface, SurfaceSlot};
use crate::player::transport::TransportController;
use crate::player::video_session::VideoSession;
use log::{info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;

/// 一次正在进行的播放
struct ActivePlayback {
    source: MediaSource,
    tracks: ProbedTracks,
    video_thread: Option<JoinHandle<()>>,
    audio_thread: Option<JoinHandle<()>>,
}

impl ActivePlayback {
    fn is_running(&self) -> bool {
        [&self.video_thread, &self.audio_thread]
            .into_iter()
            .flatten()
            .any(|handle| !handle.is_finished())
    }
}

/// 播放器门面 - 其他模块只和它打交道
///
/// 所有方法都接受 `&self`，可以在 UI 线程上与两个解码线程并发调用。
/// 不要在监听器回调里调用 `stop()`/`initiate()`/`play()`：回调运行在解码线程上，
/// 而这些方法可能等待解码线程结束。查询类方法（`state()`、`tracks()`、
/// `is_active()` 等）在回调里调用是安全的。
pub struct Player {
    backend: Arc<dyn MediaBackend>,
    config: PlayerConfig,
    transport: Arc<TransportController>,
    listeners: Arc<ListenerSet>,
    surface: SurfaceSlot,
    /// 串行化 initiate/stop；等待解码线程退出期间只持有这把锁
    lifecycle: Mutex<()>,
    playback: Mutex<Option<ActivePlayback>>,
    last_source: Mutex<Option<MediaSource>>,
    speed: Mutex<PlaybackSpeed>,
}

impl Player {
    pub fn new(backend: Arc<dyn MediaBackend>, config: PlayerConfig, listeners: Listeners) -> Self {
        info!("{} 🎮 创建播放器（后端: {}）", log_ctx(), backend.name());
        let speed = config.default_speed;
        Self {
            backend,
            transport: Arc::new(TransportController::new(PlaybackClock::with_speed(
                speed.multiplier(),
            ))),
            config,
            listeners: Arc::new(ListenerSet::new(listeners)),
            surface: SurfaceSlot::default(),
            lifecycle: Mutex::new(()),
            playback: Mutex::new(None),
            last_source: Mutex::new(None),
            speed: Mutex::new(speed),
        }
    }

    /// 加载媒体源并开始播放；已有播放时先停止并等待解码线程退出
    pub fn initiate(&self, source: MediaSource) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        // 先取出再等待线程退出，回调线程里的查询不会被 join 卡住
        let previous = self.playback.lock().take();
        if let Some(active) = previous {
            info!("{} 🔁 已有播放会话 {}，先停止", log_ctx(), active.source);
            self.shutdown(active);
        }
        *self.last_source.lock() = Some(source.clone());

        match self.start_playback(source) {
            Ok(active) => {
                *self.playback.lock() = Some(active);
                Ok(())
            }
            Err(e) => {
                if e.is_setup_error() {
                    warn!("{} ⚠️  启动失败，没有创建任何解码线程", log_ctx());
                }
                self.listeners.report_error(None, &e);
                Err(e)
            }
        }
    }

    fn start_playback(&self, source: MediaSource) -> Result<ActivePlayback> {
        info!("{} 📂 打开媒体源: {}", log_ctx(), source);
        let backend = self.backend.as_ref();
        let tracks = TrackProber::probe(backend, &source, self.config.default_frame_rate)?;

        // 时长和尺寸在任何解码线程启动之前发布，且只发布一次
        self.listeners.set_duration(tracks.duration_us() / 1000);
        if let Some((width, height)) = tracks.video.dimensions() {
            self.listeners.report_dimensions(width, height);
        }

        let shared = SessionShared {
            transport: self.transport.clone(),
            listeners: self.listeners.clone(),
            config: self.config.clone(),
            duration_us: tracks.duration_us(),
        };

        let video = VideoSession::open(backend, &source, &tracks.video, self.surface.clone(), shared.clone())?;
        let audio = match &tracks.audio {
            Some(track) => match AudioSession::open(backend, &source, track, shared.clone()) {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!("{} ⚠️  音频会话启动失败，视频将静音播放", log_ctx());
                    self.listeners.report_error(Some(StreamKind::Audio), &e);
                    None
                }
            },
            None => {
                info!("{} 🔇 没有音频轨道，跳过音频解码", log_ctx());
                None
            }
        };

        let mut kinds = vec![StreamKind::Video];
        if audio.is_some() {
            kinds.push(StreamKind::Audio);
        }
        self.transport.set_speed(self.speed.lock().multiplier());
        self.transport.begin(&kinds, self.config.auto_play);
        self.listeners.emit(PlaybackEvent::Initiated {
            uri: source.uri().to_string(),
        });

        let video_thread = match spawn_session(video) {
            Ok(handle) => handle,
            Err(e) => {
                // 视频线程都没起来：音频会话随之 drop
                self.transport.request_stop();
                return Err(e);
            }
        };
        let audio_thread = match audio.map(spawn_session).transpose() {
            Ok(handle) => handle,
            Err(e) => {
                self.transport.detach(StreamKind::Audio);
                self.listeners.report_error(Some(StreamKind::Audio), &e);
                None
            }
        };

        if self.config.auto_play {
            self.listeners.emit(PlaybackEvent::Playing);
        }
        Ok(ActivePlayback {
            source,
            tracks,
            video_thread: Some(video_thread),
            audio_thread,
        })
    }

    /// 播放 / 恢复
    ///
    /// 处于停止状态（手动停止或播放结束）时重新打开上一次的媒体源。
    pub fn play(&self) -> Result<()> {
        if self.transport.state() == TransportState::Stopped {
            let source = self
                .last_source
                .lock()
                .clone()
                .ok_or(PlayerError::NoActivePlayback)?;
            info!("{} 从停止状态恢复播放，重新打开: {}", log_ctx(), source);
            self.initiate(source)?;
        }

        if self.transport.play() {
            info!("{} ▶️  播放", log_ctx());
            self.listeners.emit(PlaybackEvent::Playing);
        }
        Ok(())
    }

    /// 暂停：不清空缓冲，恢复时从上次解码的位置继续
    pub fn pause(&self) {
        if self.transport.pause() {
            info!("{} ⏸️  暂停", log_ctx());
            self.listeners.emit(PlaybackEvent::Paused);
        }
    }

    pub fn toggle_play_pause(&self) -> Result<()> {
        if self.transport.state() == TransportState::Playing {
            self.pause();
            Ok(())
        } else {
            self.play()
        }
    }

    /// 按百分比（0-100）Seek；异步生效，调用方不能假设立即完成
    pub fn seek(&self, percent: f64) -> Result<()> {
        let request = self.transport.seek(percent)?;
        info!("{} 🎯 Seek 请求: {}% (#{})", log_ctx(), percent, request.generation);
        self.listeners.emit(PlaybackEvent::Seeking { percent });
        Ok(())
    }

    /// 按标签设置倍速（"0.5x" / "1.0x" / "1.5x" / "2.0x"，其他标签回退到 1.0x）
    pub fn set_speed(&self, label: &str) -> PlaybackSpeed {
        let speed = PlaybackSpeed::from_label(label);
        *self.speed.lock() = speed;
        self.transport.set_speed(speed.multiplier());
        info!("{} ⏩ 播放倍速: {}", log_ctx(), speed.label());
        self.listeners.emit(PlaybackEvent::SpeedChanged { speed });
        speed
    }

    /// 切换渲染滤镜（只转发给视频信息监听器）
    pub fn set_filter(&self, label: &str) -> FilterId {
        let filter = FilterId::from_label(label);
        self.listeners.report_filter(filter);
        self.listeners.emit(PlaybackEvent::FilterChanged { filter });
        filter
    }

    /// 替换渲染表面，不重启解码；下一帧生效
    pub fn update_render_target(&self, surface: Option<Arc<dyn RenderSurface>>) {
        info!(
            "{} 🖼️  更新渲染表面: {}",
            log_ctx(),
            if surface.is_some() { "新表面" } else { "无" }
        );
        self.surface.publish(surface);
    }

    /// 请求停止（异步，不等待线程退出）
    pub fn request_stop(&self) {
        self.transport.request_stop();
    }

    /// 停止播放并等待两个解码线程退出
    pub fn stop(&self) {
        let _lifecycle = self.lifecycle.lock();
        let active = self.playback.lock().take();
        match active {
            Some(active) => {
                self.shutdown(active);
                self.listeners.emit(PlaybackEvent::Stopped);
            }
            None => self.transport.request_stop(),
        }
    }

    fn shutdown(&self, mut active: ActivePlayback) {
        info!("{} ⏹️  停止播放: {}", log_ctx(), active.source);
        self.transport.request_stop();

        for (kind, handle) in [
            (StreamKind::Video, active.video_thread.take()),
            (StreamKind::Audio, active.audio_thread.take()),
        ] {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    warn!("{} ⚠️  {} 解码线程 panic", log_ctx(), kind.as_str());
                }
            }
        }
        info!("{} ✅ 停止完成，解码线程已全部退出", log_ctx());
    }

    pub fn state(&self) -> TransportState {
        self.transport.state()
    }

    pub fn speed(&self) -> PlaybackSpeed {
        *self.speed.lock()
    }

    /// 当前播放的轨道信息
    pub fn tracks(&self) -> Option<ProbedTracks> {
        self.playback.lock().as_ref().map(|active| active.tracks.clone())
    }

    /// 是否还有解码线程在运行
    pub fn is_active(&self) -> bool {
        self.playback
            .lock()
            .as_ref()
            .map_or(false, ActivePlayback::is_running)
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn set_progress_listener(&self, listener: Option<Arc<dyn ProgressListener>>) {
        self.listeners.set_progress(listener);
    }

    pub fn set_video_info_listener(&self, listener: Option<Arc<dyn VideoInfoListener>>) {
        self.listeners.set_video_info(listener);
    }

    pub fn set_event_listener(&self, listener: Option<Arc<dyn PlaybackEventListener>>) {
        self.listeners.set_events(listener);
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        if let Some(active) = self.playback.get_mut().take() {
            self.shutdown(active);
        }
    }
}
