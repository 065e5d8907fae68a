use crate::core::{PlaybackSpeed, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 播放器配置
///
/// 所有等待都是有界的：解码器输入/输出槽等待、暂停轮询间隔。
/// 这些值决定了 stop/pause/seek 请求被解码线程观察到的最大延迟。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// 等待解码器空闲输入槽的超时（毫秒）
    pub input_timeout_ms: u64,
    /// 等待解码输出的超时（毫秒）
    pub output_timeout_ms: u64,
    /// 暂停时的轮询间隔（毫秒）
    pub pause_poll_ms: u64,
    /// 轨道未提供帧率时使用的默认值
    pub default_frame_rate: u32,
    /// 初始播放倍速
    pub default_speed: PlaybackSpeed,
    /// initiate 后是否立即进入播放状态
    pub auto_play: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            input_timeout_ms: 10,
            output_timeout_ms: 10,
            pause_poll_ms: 50,
            default_frame_rate: 30,
            default_speed: PlaybackSpeed::Normal,
            auto_play: true,
        }
    }
}

impl PlayerConfig {
    /// 从 JSON 文件加载配置（缺失的字段使用默认值）
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: PlayerConfig = serde_json::from_str(&text)?;
        info!("📝 已加载播放器配置: {}", path.display());
        Ok(config)
    }

    pub fn input_timeout(&self) -> Duration {
        Duration::from_millis(self.input_timeout_ms)
    }

    pub fn output_timeout(&self) -> Duration {
        Duration::from_millis(self.output_timeout_ms)
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms.max(1))
    }
}
