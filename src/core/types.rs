use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// 媒体源 - 一经绑定到播放会话即不可变
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaSource {
    uri: String,
}

impl MediaSource {
    /// 从 URI / 路径字符串创建媒体源
    pub fn from_uri(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// 去掉 `file://` 前缀后的本地路径
    pub fn local_path(&self) -> PathBuf {
        PathBuf::from(self.uri.strip_prefix("file://").unwrap_or(&self.uri))
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

impl From<&str> for MediaSource {
    fn from(uri: &str) -> Self {
        Self::from_uri(uri)
    }
}

/// 流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
        }
    }

    /// 用于位集合的位掩码
    pub(crate) fn bit(self) -> u8 {
        match self {
            StreamKind::Video => 0b01,
            StreamKind::Audio => 0b10,
        }
    }
}

/// 解封装器报告的原始轨道格式（键可能缺失）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackFormat {
    pub mime: String,
    pub duration_us: Option<i64>,
    pub frame_rate: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channel_count: Option<u16>,
}

/// 轨道参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TrackParams {
    Video {
        width: u32,
        height: u32,
        frame_rate: u32,
    },
    Audio {
        sample_rate: u32,
        channel_count: u16,
    },
}

/// 轨道描述 - 每次成功 initiate 由 TrackProber 生成一次，之后只读
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackDescriptor {
    pub index: usize,
    pub mime: String,
    pub duration_us: i64,
    pub params: TrackParams,
}

impl TrackDescriptor {
    pub fn kind(&self) -> StreamKind {
        match self.params {
            TrackParams::Video { .. } => StreamKind::Video,
            TrackParams::Audio { .. } => StreamKind::Audio,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        self.duration_us / 1000
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self.params {
            TrackParams::Video { width, height, .. } => Some((width, height)),
            TrackParams::Audio { .. } => None,
        }
    }

    pub fn frame_rate(&self) -> Option<u32> {
        match self.params {
            TrackParams::Video { frame_rate, .. } => Some(frame_rate),
            TrackParams::Audio { .. } => None,
        }
    }
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
    /// 不透明的解码器私有数据（由渲染器自行解释）
    Opaque,
}

/// 交给渲染表面的已解码视频帧
#[derive(Debug, Clone, Copy)]
pub struct VideoFrame<'a> {
    pub pts_us: i64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: &'a [u8],
}

/// 传输状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    Stopped,
    Playing,
    Paused,
}

/// 播放倍速（封闭标签集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaybackSpeed {
    #[serde(rename = "0.5x")]
    Half,
    #[default]
    #[serde(rename = "1.0x")]
    Normal,
    #[serde(rename = "1.5x")]
    OneAndHalf,
    #[serde(rename = "2.0x")]
    Double,
}

impl PlaybackSpeed {
    /// 未知标签一律回退到 1.0x
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "0.5x" => PlaybackSpeed::Half,
            "1.0x" => PlaybackSpeed::Normal,
            "1.5x" => PlaybackSpeed::OneAndHalf,
            "2.0x" => PlaybackSpeed::Double,
            _ => PlaybackSpeed::Normal,
        }
    }

    pub fn multiplier(&self) -> f32 {
        match self {
            PlaybackSpeed::Half => 0.5,
            PlaybackSpeed::Normal => 1.0,
            PlaybackSpeed::OneAndHalf => 1.5,
            PlaybackSpeed::Double => 2.0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PlaybackSpeed::Half => "0.5x",
            PlaybackSpeed::Normal => "1.0x",
            PlaybackSpeed::OneAndHalf => "1.5x",
            PlaybackSpeed::Double => "2.0x",
        }
    }
}

/// 渲染滤镜编号（核心只透传，不解释）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterId {
    #[default]
    None,
    Filter1,
    Filter2,
    Filter3,
}

impl FilterId {
    /// 未知标签回退到 NONE
    pub fn from_label(label: &str) -> Self {
        match label {
            "FILTER1" => FilterId::Filter1,
            "FILTER2" => FilterId::Filter2,
            "FILTER3" => FilterId::Filter3,
            _ => FilterId::None,
        }
    }

    pub fn ordinal(&self) -> u32 {
        *self as u32
    }
}
