use crate::core::{ErrorKind, FilterId, PlaybackSpeed, PlayerError, StreamKind};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

/// 进度监听（只由视频解码线程在送入样本时调用）
pub trait ProgressListener: Send + Sync {
    fn set_duration(&self, duration_ms: i64);
    fn update_position(&self, position_ms: i64);
    fn update_frame_count(&self, frame_count: i64);
}

/// 视频信息监听
pub trait VideoInfoListener: Send + Sync {
    /// 每次播放会话调用一次
    fn report_dimensions(&self, width: u32, height: u32);

    /// 滤镜切换（核心只透传）
    fn report_filter(&self, _filter: FilterId) {}
}

/// 播放事件监听
pub trait PlaybackEventListener: Send + Sync {
    fn on_event(&self, event: &PlaybackEvent);
}

/// 播放事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlaybackEvent {
    Initiated { uri: String },
    Playing,
    Paused,
    Seeking { percent: f64 },
    SpeedChanged { speed: PlaybackSpeed },
    FilterChanged { filter: FilterId },
    EndOfStream { stream: StreamKind },
    Stopped,
    Error {
        stream: Option<StreamKind>,
        kind: ErrorKind,
        message: String,
    },
}

/// 构造时传入的监听器（每个槽位只有一个所有者）
#[derive(Clone, Default)]
pub struct Listeners {
    pub progress: Option<Arc<dyn ProgressListener>>,
    pub video_info: Option<Arc<dyn VideoInfoListener>>,
    pub events: Option<Arc<dyn PlaybackEventListener>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同一个对象同时占用三个槽位
    pub fn shared<L>(listener: Arc<L>) -> Self
    where
        L: ProgressListener + VideoInfoListener + PlaybackEventListener + 'static,
    {
        Self {
            progress: Some(listener.clone()),
            video_info: Some(listener.clone()),
            events: Some(listener),
        }
    }

    pub fn with_progress(mut self, listener: Arc<dyn ProgressListener>) -> Self {
        self.progress = Some(listener);
        self
    }

    pub fn with_video_info(mut self, listener: Arc<dyn VideoInfoListener>) -> Self {
        self.video_info = Some(listener);
        self
    }

    pub fn with_events(mut self, listener: Arc<dyn PlaybackEventListener>) -> Self {
        self.events = Some(listener);
        self
    }
}

/// 运行期监听器集合
///
/// 回调前先克隆 Arc 再释放读锁，回调内部可以安全地替换监听器。
#[derive(Default)]
pub struct ListenerSet {
    progress: RwLock<Option<Arc<dyn ProgressListener>>>,
    video_info: RwLock<Option<Arc<dyn VideoInfoListener>>>,
    events: RwLock<Option<Arc<dyn PlaybackEventListener>>>,
}

impl ListenerSet {
    pub fn new(listeners: Listeners) -> Self {
        Self {
            progress: RwLock::new(listeners.progress),
            video_info: RwLock::new(listeners.video_info),
            events: RwLock::new(listeners.events),
        }
    }

    /// 替换进度监听器，返回旧的
    pub fn set_progress(
        &self,
        listener: Option<Arc<dyn ProgressListener>>,
    ) -> Option<Arc<dyn ProgressListener>> {
        std::mem::replace(&mut *self.progress.write(), listener)
    }

    pub fn set_video_info(
        &self,
        listener: Option<Arc<dyn VideoInfoListener>>,
    ) -> Option<Arc<dyn VideoInfoListener>> {
        std::mem::replace(&mut *self.video_info.write(), listener)
    }

    pub fn set_events(
        &self,
        listener: Option<Arc<dyn PlaybackEventListener>>,
    ) -> Option<Arc<dyn PlaybackEventListener>> {
        std::mem::replace(&mut *self.events.write(), listener)
    }

    pub(crate) fn set_duration(&self, duration_ms: i64) {
        if let Some(listener) = self.progress.read().clone() {
            listener.set_duration(duration_ms);
        }
    }

    pub(crate) fn update_progress(&self, position_ms: i64, frame_count: i64) {
        if let Some(listener) = self.progress.read().clone() {
            listener.update_position(position_ms);
            listener.update_frame_count(frame_count);
        }
    }

    pub(crate) fn report_dimensions(&self, width: u32, height: u32) {
        if let Some(listener) = self.video_info.read().clone() {
            listener.report_dimensions(width, height);
        }
    }

    pub(crate) fn report_filter(&self, filter: FilterId) {
        if let Some(listener) = self.video_info.read().clone() {
            listener.report_filter(filter);
        }
    }

    pub(crate) fn emit(&self, event: PlaybackEvent) {
        debug!("📣 播放事件: {:?}", event);
        if let Some(listener) = self.events.read().clone() {
            listener.on_event(&event);
        }
    }

    /// 通过事件通道上报错误（错误不会以 panic 的形式穿过组件边界）
    pub(crate) fn report_error(&self, stream: Option<StreamKind>, err: &PlayerError) {
        match stream {
            Some(kind) => error!("❌ {} 流错误: {}", kind.as_str(), err),
            None => error!("❌ 播放错误: {}", err),
        }
        self.emit(PlaybackEvent::Error {
            stream,
            kind: err.kind(),
            message: err.to_string(),
        });
    }
}

/// 监听器回调的通道化表示
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Duration(i64),
    Position(i64),
    FrameCount(i64),
    Dimensions(u32, u32),
    Filter(FilterId),
    Event(PlaybackEvent),
}

/// 把所有回调转发到 crossbeam 通道的监听器（供 UI 线程轮询）
pub struct ChannelListener {
    tx: Sender<Notification>,
}

impl ChannelListener {
    pub fn new() -> (Arc<Self>, Receiver<Notification>) {
        let (tx, rx) = unbounded();
        (Arc::new(Self { tx }), rx)
    }

    fn send(&self, notification: Notification) {
        // 接收端已关闭时静默丢弃
        let _ = self.tx.send(notification);
    }
}

impl ProgressListener for ChannelListener {
    fn set_duration(&self, duration_ms: i64) {
        self.send(Notification::Duration(duration_ms));
    }

    fn update_position(&self, position_ms: i64) {
        self.send(Notification::Position(position_ms));
    }

    fn update_frame_count(&self, frame_count: i64) {
        self.send(Notification::FrameCount(frame_count));
    }
}

impl VideoInfoListener for ChannelListener {
    fn report_dimensions(&self, width: u32, height: u32) {
        self.send(Notification::Dimensions(width, height));
    }

    fn report_filter(&self, filter: FilterId) {
        self.send(Notification::Filter(filter));
    }
}

impl PlaybackEventListener for ChannelListener {
    fn on_event(&self, event: &PlaybackEvent) {
        self.send(Notification::Event(event.clone()));
    }
}
