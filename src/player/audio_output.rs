use crate::core::Result;

/// 音频输出（流式 PCM 设备）
///
/// `write` 同步阻塞，由设备自身的消费速度完成音频节拍控制；
/// 实现必须保证阻塞有界，否则 stop/pause 无法及时生效。
pub trait AudioSink: Send {
    /// 写入 16 位小端交错 PCM，返回实际写入的字节数
    fn write(&mut self, pcm: &[u8]) -> Result<usize>;

    /// 设置硬件播放速率（保持音调不变）
    ///
    /// 返回 Ok(false) 表示设备不支持调速，此时只有视频按倍速节拍，音画会逐渐漂移。
    fn set_playback_rate(&mut self, rate: f32) -> Result<bool>;

    /// 暂停/恢复设备输出（不丢弃已写入的数据）
    fn set_paused(&mut self, _paused: bool) {}

    /// 丢弃已写入但尚未播放的数据（Seek 后调用）
    fn flush(&mut self) {}

    /// 关闭设备
    fn release(&mut self) {}
}
