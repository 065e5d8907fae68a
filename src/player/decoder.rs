use crate::core::Result;
use crate::player::surface::RenderSurface;
use std::time::Duration;

/// 解码输出单元的描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputBuffer {
    /// 输出槽编号，releaseOutput 时归还
    pub index: usize,
    pub pts_us: i64,
    pub size: usize,
    /// 解码器在这个单元上标记了流结束
    pub end_of_stream: bool,
}

/// 解码器抽象接口（输入槽 / 输出槽模型）
///
/// 所有等待都必须有界：超时返回 Ok(None)，让解码循环及时响应暂停/停止/Seek。
pub trait Decoder: Send {
    /// 申请一个空闲输入槽
    fn dequeue_input(&mut self, timeout: Duration) -> Result<Option<usize>>;

    /// 输入槽的缓冲区，由解封装器填充
    fn input_buffer(&mut self, index: usize) -> Result<&mut Vec<u8>>;

    /// 把填好的输入槽交给解码器；`end_of_stream` 为 true 时缓冲区内容被忽略
    fn queue_input(&mut self, index: usize, pts_us: i64, end_of_stream: bool) -> Result<()>;

    /// 取出一个解码单元
    fn dequeue_output(&mut self, timeout: Duration) -> Result<Option<OutputBuffer>>;

    /// 解码单元的数据（音频 PCM）
    fn output_buffer(&self, index: usize) -> Result<&[u8]>;

    /// 归还输出槽；`target` 非空时把帧渲染到该表面
    fn release_output(&mut self, index: usize, target: Option<&dyn RenderSurface>) -> Result<()>;

    /// 丢弃所有在途数据（Seek 后调用，可重复调用）
    fn flush(&mut self) -> Result<()>;

    /// 释放底层句柄
    fn release(&mut self) {}

    /// 解码器类型信息
    fn info(&self) -> String;
}
