use crate::core::{MediaSource, Result, TrackDescriptor};
use crate::player::audio_output::AudioSink;
use crate::player::decoder::Decoder;
use crate::player::demuxer_source::Demuxer;
use crate::player::surface::RenderSurface;

/// 平台媒体框架
///
/// 负责创建解封装器、解码器和音频输出。每次调用都返回新的独立实例，
/// 因此视频和音频可以各自持有一个解封装游标。
pub trait MediaBackend: Send + Sync {
    /// 打开媒体源（失败时返回 `SourceOpen`）
    fn open_demuxer(&self, source: &MediaSource) -> Result<Box<dyn Demuxer>>;

    /// 为轨道创建并配置解码器（失败时返回 `DecoderConfig`）
    ///
    /// 视频解码器会拿到启动时的渲染表面用于配置；之后每一帧的目标表面
    /// 在 `release_output` 时单独传入。
    fn create_decoder(
        &self,
        source: &MediaSource,
        track: &TrackDescriptor,
        surface: Option<&dyn RenderSurface>,
    ) -> Result<Box<dyn Decoder>>;

    /// 打开音频输出（失败时返回 `SinkInit`）
    fn open_audio_sink(&self, track: &TrackDescriptor) -> Result<Box<dyn AudioSink>>;

    /// 后端名称
    fn name(&self) -> &str;
}
