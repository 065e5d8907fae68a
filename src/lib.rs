//! 音视频同步播放引擎
//!
//! 打开媒体源，分别在独立线程上解码视频和音频，视频帧按播放时钟交给渲染表面，
//! 音频 PCM 写入音频设备。支持播放/暂停、按百分比 Seek、倍速和运行时替换渲染表面。
//!
//! 解封装、解码、音频输出都是能力接口（见 [`player::MediaBackend`]），
//! 内置一个纯内存的合成后端，FFmpeg / cpal 后端通过 feature 启用。

pub mod backend;
pub mod core;
pub mod player;

pub use crate::core::{
    FilterId, MediaSource, PlaybackClock, PlaybackSpeed, PlayerConfig, PlayerError, Result,
    StreamKind, TrackDescriptor, TransportState, VideoFrame,
};
pub use crate::player::{
    ChannelListener, Listeners, MediaBackend, Notification, PlaybackEvent, Player, RenderSurface,
};
