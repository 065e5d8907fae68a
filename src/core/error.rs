use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("无法打开媒体源 {uri}: {reason}")]
    SourceOpen { uri: String, reason: String },

    #[error("无法找到视频流")]
    NoVideoTrack,

    #[error("解码器配置失败: {0}")]
    DecoderConfig(String),

    #[error("音频输出初始化失败: {0}")]
    SinkInit(String),

    #[error("解码错误: {0}")]
    RuntimeDecode(String),

    #[error("无效的 Seek 进度: {0}（有效范围 0-100）")]
    InvalidSeek(f64),

    #[error("当前没有正在进行的播放")]
    NoActivePlayback,

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("配置解析错误: {0}")]
    Config(#[from] serde_json::Error),
}

/// 错误分类（用于通过事件通道上报，不携带底层错误对象）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SourceOpen,
    NoVideoTrack,
    DecoderConfig,
    SinkInit,
    RuntimeDecode,
    InvalidRequest,
    Io,
    Config,
}

impl PlayerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlayerError::SourceOpen { .. } => ErrorKind::SourceOpen,
            PlayerError::NoVideoTrack => ErrorKind::NoVideoTrack,
            PlayerError::DecoderConfig(_) => ErrorKind::DecoderConfig,
            PlayerError::SinkInit(_) => ErrorKind::SinkInit,
            PlayerError::RuntimeDecode(_) => ErrorKind::RuntimeDecode,
            PlayerError::InvalidSeek(_) | PlayerError::NoActivePlayback => ErrorKind::InvalidRequest,
            PlayerError::Io(_) => ErrorKind::Io,
            PlayerError::Config(_) => ErrorKind::Config,
        }
    }

    /// 是否属于启动阶段的配置错误（解码器/音频输出不可用）
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            PlayerError::SourceOpen { .. }
                | PlayerError::NoVideoTrack
                | PlayerError::DecoderConfig(_)
                | PlayerError::SinkInit(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;
