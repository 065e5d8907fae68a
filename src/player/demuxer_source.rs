use crate::core::{Result, TrackFormat};

/// 一个压缩样本的元数据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    /// 显示时间戳（微秒）
    pub pts_us: i64,
    /// 写入缓冲区的字节数
    pub size: usize,
    /// 是否为同步点（关键帧）
    pub is_sync: bool,
}

/// 解封装器抽象接口（一个轨道上的顺序读游标）
///
/// 具体实现由平台媒体框架提供（FFmpeg、系统解封装器、内存数据等）。
/// 每个 Decode Session 持有自己独立的实例，互不共享读位置。
pub trait Demuxer: Send {
    /// 容器中的轨道数
    fn track_count(&self) -> usize;

    /// 获取指定轨道的格式
    fn track_format(&self, index: usize) -> Result<TrackFormat>;

    /// 选择要读取的轨道
    fn select_track(&mut self, index: usize) -> Result<()>;

    /// 把当前样本复制到 `buf`（覆盖原内容），不移动游标
    ///
    /// 返回：
    /// - Ok(Some(info)): 成功读取
    /// - Ok(None): 没有更多样本
    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Result<Option<SampleInfo>>;

    /// 把游标移动到 `time_us` 之前（含）最近的同步点
    fn seek_to(&mut self, time_us: i64) -> Result<()>;

    /// 前进到下一个样本；没有更多样本时返回 false
    fn advance(&mut self) -> bool;

    /// 释放底层句柄
    fn release(&mut self) {}

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}
