use crate::core::{
    log_ctx, MediaSource, PixelFormat, PlayerError, Result, StreamKind, TrackDescriptor,
    TrackFormat, TrackParams, VideoFrame,
};
use crate::player::audio_output::AudioSink;
use crate::player::backend::MediaBackend;
use crate::player::decoder::{Decoder, OutputBuffer};
use crate::player::demuxer_source::{Demuxer, SampleInfo};
use crate::player::surface::RenderSurface;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, media, software, util};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::time::Duration;

/// 解码器同时在途的单元上限
const MAX_IN_FLIGHT: usize = 8;

/// 基于 FFmpeg 的媒体后端
pub struct FfmpegBackend;

impl FfmpegBackend {
    /// 初始化 FFmpeg
    pub fn new() -> Result<Self> {
        ffmpeg::init().map_err(|e| PlayerError::DecoderConfig(format!("FFmpeg 初始化失败: {}", e)))?;
        info!("{} ✅ FFmpeg 初始化成功", log_ctx());
        Ok(Self)
    }
}

fn open_input(source: &MediaSource) -> Result<format::context::Input> {
    let path = source.local_path();
    format::input(&path).map_err(|e| PlayerError::SourceOpen {
        uri: source.uri().to_string(),
        reason: e.to_string(),
    })
}

fn decode_error(e: ffmpeg::Error) -> PlayerError {
    PlayerError::RuntimeDecode(e.to_string())
}

fn config_error(e: ffmpeg::Error) -> PlayerError {
    PlayerError::DecoderConfig(e.to_string())
}

impl MediaBackend for FfmpegBackend {
    fn open_demuxer(&self, source: &MediaSource) -> Result<Box<dyn Demuxer>> {
        Ok(Box::new(FfmpegDemuxer::open(source)?))
    }

    fn create_decoder(
        &self,
        source: &MediaSource,
        track: &TrackDescriptor,
        _surface: Option<&dyn RenderSurface>,
    ) -> Result<Box<dyn Decoder>> {
        Ok(Box::new(FfmpegDecoder::open(source, track)?))
    }

    fn open_audio_sink(&self, track: &TrackDescriptor) -> Result<Box<dyn AudioSink>> {
        let TrackParams::Audio {
            sample_rate,
            channel_count,
        } = track.params
        else {
            return Err(PlayerError::SinkInit(format!("轨道 #{} 不是音频轨道", track.index)));
        };

        #[cfg(feature = "cpal")]
        let sink = super::cpal_sink::CpalSink::open(sample_rate, channel_count)
            .map(|sink| Box::new(sink) as Box<dyn AudioSink>);
        #[cfg(not(feature = "cpal"))]
        let sink = Err(PlayerError::SinkInit(format!(
            "未启用音频输出（{} Hz, {} 声道）",
            sample_rate, channel_count
        )));
        sink
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

/// FFmpeg 解封装器：只读取已选择轨道的数据包
pub struct FfmpegDemuxer {
    input_ctx: format::context::Input,
    source_path: String,
    selected: Option<usize>,
    current: Option<ffmpeg::Packet>,
    exhausted: bool,
}

// AVFormatContext 不是 Send；每个实例只被一个解码线程使用
unsafe impl Send for FfmpegDemuxer {}

impl FfmpegDemuxer {
    pub fn open(source: &MediaSource) -> Result<Self> {
        info!("正在打开文件: {}", source);
        let input_ctx = open_input(source)?;
        Ok(Self {
            input_ctx,
            source_path: source.uri().to_string(),
            selected: None,
            current: None,
            exhausted: false,
        })
    }

    fn time_base_us(&self, index: usize) -> f64 {
        self.input_ctx.stream(index).map_or(0.0, |stream| {
            let tb = stream.time_base();
            tb.numerator() as f64 / tb.denominator().max(1) as f64 * 1_000_000.0
        })
    }

    /// 读到下一个属于已选择轨道的数据包
    fn fill_current(&mut self) {
        if self.current.is_some() || self.exhausted {
            return;
        }
        let Some(selected) = self.selected else {
            return;
        };
        loop {
            let next = self
                .input_ctx
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));
            match next {
                Some((index, packet)) if index == selected => {
                    self.current = Some(packet);
                    return;
                }
                Some(_) => continue,
                None => {
                    self.exhausted = true;
                    return;
                }
            }
        }
    }
}

impl Demuxer for FfmpegDemuxer {
    fn track_count(&self) -> usize {
        self.input_ctx.streams().count()
    }

    fn track_format(&self, index: usize) -> Result<TrackFormat> {
        let stream = self
            .input_ctx
            .stream(index)
            .ok_or_else(|| PlayerError::DecoderConfig(format!("轨道 #{} 不存在", index)))?;
        let params = stream.parameters();
        let codec_name = params.id().name().to_string();

        let tb = stream.time_base();
        let stream_duration_us = if stream.duration() > 0 {
            (stream.duration() as f64 * tb.numerator() as f64 / tb.denominator().max(1) as f64
                * 1_000_000.0) as i64
        } else {
            // 容器时长以 AV_TIME_BASE（微秒）计
            self.input_ctx.duration()
        };
        let duration_us = (stream_duration_us > 0).then_some(stream_duration_us);

        let format = match params.medium() {
            media::Type::Video => {
                let decoder = codec::context::Context::from_parameters(params)
                    .and_then(|ctx| ctx.decoder().video())
                    .map_err(config_error)?;
                let fps = stream.avg_frame_rate();
                let frame_rate = (fps.denominator() > 0 && fps.numerator() > 0)
                    .then(|| (fps.numerator() as f64 / fps.denominator() as f64).round() as u32);
                TrackFormat {
                    mime: format!("video/{}", codec_name),
                    duration_us,
                    frame_rate,
                    width: Some(decoder.width()),
                    height: Some(decoder.height()),
                    ..TrackFormat::default()
                }
            }
            media::Type::Audio => {
                let decoder = codec::context::Context::from_parameters(params)
                    .and_then(|ctx| ctx.decoder().audio())
                    .map_err(config_error)?;
                TrackFormat {
                    mime: format!("audio/{}", codec_name),
                    duration_us,
                    sample_rate: Some(decoder.rate()),
                    channel_count: Some(decoder.channels()),
                    ..TrackFormat::default()
                }
            }
            other => TrackFormat {
                mime: format!("{:?}/{}", other, codec_name).to_lowercase(),
                duration_us,
                ..TrackFormat::default()
            },
        };
        Ok(format)
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        if self.input_ctx.stream(index).is_none() {
            return Err(PlayerError::DecoderConfig(format!("轨道 #{} 不存在", index)));
        }
        self.selected = Some(index);
        self.current = None;
        self.exhausted = false;
        Ok(())
    }

    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Result<Option<SampleInfo>> {
        let Some(index) = self.selected else {
            return Err(PlayerError::RuntimeDecode("尚未选择轨道".to_string()));
        };
        self.fill_current();
        let tb_us = self.time_base_us(index);
        let Some(packet) = &self.current else {
            return Ok(None);
        };

        buf.clear();
        buf.extend_from_slice(packet.data().unwrap_or(&[]));
        let pts = packet.pts().or(packet.dts()).unwrap_or(0);
        Ok(Some(SampleInfo {
            pts_us: (pts as f64 * tb_us) as i64,
            size: buf.len(),
            is_sync: packet.is_key(),
        }))
    }

    fn seek_to(&mut self, time_us: i64) -> Result<()> {
        // 不指定流时 FFmpeg 以微秒为单位，定位到目标之前的关键帧
        self.input_ctx
            .seek(time_us, ..time_us)
            .map_err(decode_error)?;
        self.current = None;
        self.exhausted = false;
        Ok(())
    }

    fn advance(&mut self) -> bool {
        self.current = None;
        self.fill_current();
        self.current.is_some()
    }

    fn description(&self) -> String {
        format!("FFmpeg Demuxer: {}", self.source_path)
    }
}

/// 一个解码单元
struct DecodedUnit {
    pts_us: i64,
    data: Vec<u8>,
    width: u32,
    height: u32,
    end_of_stream: bool,
}

enum CodecState {
    Video {
        decoder: codec::decoder::Video,
        scaler: Option<software::scaling::Context>,
    },
    Audio {
        decoder: codec::decoder::Audio,
        resampler: Option<software::resampling::Context>,
        sample_rate: u32,
        channels: u16,
    },
}

/// FFmpeg 软件解码器，包装成输入槽 / 输出槽模型
///
/// 数据包的时间戳直接以微秒写入，解码器原样透传到帧上。
pub struct FfmpegDecoder {
    kind: StreamKind,
    codec: CodecState,
    input: Vec<u8>,
    input_taken: bool,
    pending: VecDeque<DecodedUnit>,
    outputs: Vec<Option<DecodedUnit>>,
    last_pts: i64,
}

// SwsContext / SwrContext 不是 Send；每个解码器实例只在一个线程中使用
unsafe impl Send for FfmpegDecoder {}

impl FfmpegDecoder {
    pub fn open(source: &MediaSource, track: &TrackDescriptor) -> Result<Self> {
        let input_ctx = open_input(source)?;
        let stream = input_ctx
            .stream(track.index)
            .ok_or_else(|| PlayerError::DecoderConfig(format!("轨道 #{} 不存在", track.index)))?;
        let context =
            codec::context::Context::from_parameters(stream.parameters()).map_err(config_error)?;

        let codec = match track.params {
            TrackParams::Video { .. } => {
                let decoder = context.decoder().video().map_err(config_error)?;
                debug!(
                    "软件解码器: {}x{}, 格式: {:?}",
                    decoder.width(),
                    decoder.height(),
                    decoder.format()
                );
                CodecState::Video {
                    decoder,
                    scaler: None,
                }
            }
            TrackParams::Audio {
                sample_rate,
                channel_count,
            } => {
                let decoder = context.decoder().audio().map_err(config_error)?;
                debug!(
                    "音频解码器: {} Hz, {} 声道, 格式: {:?}",
                    decoder.rate(),
                    decoder.channels(),
                    decoder.format()
                );
                CodecState::Audio {
                    decoder,
                    resampler: None,
                    sample_rate,
                    channels: channel_count,
                }
            }
        };

        Ok(Self {
            kind: track.kind(),
            codec,
            input: Vec::new(),
            input_taken: false,
            pending: VecDeque::new(),
            outputs: Vec::new(),
            last_pts: 0,
        })
    }

    fn in_flight(&self) -> usize {
        self.pending.len() + self.outputs.iter().filter(|slot| slot.is_some()).count()
    }

    fn send(&mut self, packet: Option<&ffmpeg::Packet>) -> Result<()> {
        let result = match (&mut self.codec, packet) {
            (CodecState::Video { decoder, .. }, Some(packet)) => decoder.send_packet(packet),
            (CodecState::Video { decoder, .. }, None) => decoder.send_eof(),
            (CodecState::Audio { decoder, .. }, Some(packet)) => decoder.send_packet(packet),
            (CodecState::Audio { decoder, .. }, None) => decoder.send_eof(),
        };
        match result {
            Ok(()) | Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) => Err(decode_error(e)),
        }
    }

    /// 取出解码器里所有可用的帧
    fn receive_all(&mut self) -> Result<()> {
        loop {
            let unit = match &mut self.codec {
                CodecState::Video { decoder, scaler } => {
                    let mut frame = util::frame::Video::empty();
                    match decoder.receive_frame(&mut frame) {
                        Ok(()) => convert_video(scaler, &frame)?,
                        Err(ffmpeg::Error::Other { errno: 11 }) | Err(ffmpeg::Error::Eof) => break, // EAGAIN
                        Err(e) => {
                            warn!("视频解码错误（已跳过）: {}", e);
                            break;
                        }
                    }
                }
                CodecState::Audio {
                    decoder,
                    resampler,
                    sample_rate,
                    channels,
                } => {
                    let mut frame = util::frame::Audio::empty();
                    match decoder.receive_frame(&mut frame) {
                        Ok(()) => convert_audio(resampler, &frame, *sample_rate, *channels)?,
                        Err(ffmpeg::Error::Other { errno: 11 }) | Err(ffmpeg::Error::Eof) => break,
                        Err(e) => return Err(decode_error(e)),
                    }
                }
            };
            self.last_pts = unit.pts_us;
            self.pending.push_back(unit);
        }
        Ok(())
    }

    fn unit(&self, index: usize) -> Result<&DecodedUnit> {
        self.outputs
            .get(index)
            .and_then(Option::as_ref)
            .ok_or_else(|| PlayerError::RuntimeDecode(format!("输出槽 #{} 不存在", index)))
    }
}

/// 转换为连续的 RGBA
fn convert_video(
    scaler: &mut Option<software::scaling::Context>,
    frame: &util::frame::Video,
) -> Result<DecodedUnit> {
    let width = frame.width();
    let height = frame.height();

    if scaler.is_none() {
        *scaler = Some(
            software::scaling::Context::get(
                frame.format(),
                width,
                height,
                util::format::Pixel::RGBA,
                width,
                height,
                software::scaling::Flags::BILINEAR,
            )
            .map_err(decode_error)?,
        );
    }
    let scaler = scaler
        .as_mut()
        .ok_or_else(|| PlayerError::RuntimeDecode("缩放器未初始化".to_string()))?;

    let mut rgba_frame = util::frame::Video::empty();
    scaler.run(frame, &mut rgba_frame).map_err(decode_error)?;

    let row_size = width as usize * 4;
    let stride = rgba_frame.stride(0);
    let frame_data = rgba_frame.data(0);
    let mut data = vec![0u8; row_size * height as usize];
    for y in 0..height as usize {
        let src = y * stride;
        data[y * row_size..(y + 1) * row_size].copy_from_slice(&frame_data[src..src + row_size]);
    }

    Ok(DecodedUnit {
        pts_us: frame.timestamp().unwrap_or(0),
        data,
        width,
        height,
        end_of_stream: false,
    })
}

/// 重采样为 16 位交错 PCM（采样率、声道数与音频输出一致）
fn convert_audio(
    resampler: &mut Option<software::resampling::Context>,
    frame: &util::frame::Audio,
    sample_rate: u32,
    channels: u16,
) -> Result<DecodedUnit> {
    if resampler.is_none() {
        let target_layout = match channels {
            1 => util::channel_layout::ChannelLayout::MONO,
            6 => util::channel_layout::ChannelLayout::_5POINT1,
            _ => util::channel_layout::ChannelLayout::STEREO,
        };
        debug!(
            "🔧 初始化音频重采样器: {}Hz/{}ch → {}Hz/{}ch",
            frame.rate(),
            frame.channels(),
            sample_rate,
            channels
        );
        *resampler = Some(
            software::resampling::Context::get(
                frame.format(),
                frame.channel_layout(),
                frame.rate(),
                util::format::Sample::I16(util::format::sample::Type::Packed),
                target_layout,
                sample_rate,
            )
            .map_err(decode_error)?,
        );
    }
    let resampler = resampler
        .as_mut()
        .ok_or_else(|| PlayerError::RuntimeDecode("重采样器未初始化".to_string()))?;

    let mut resampled = util::frame::Audio::empty();
    resampler.run(frame, &mut resampled).map_err(decode_error)?;

    let size = resampled.samples() * channels as usize * 2;
    let plane = resampled.data(0);
    let data = plane[..size.min(plane.len())].to_vec();

    Ok(DecodedUnit {
        pts_us: frame.timestamp().unwrap_or(0),
        data,
        width: 0,
        height: 0,
        end_of_stream: false,
    })
}

impl Decoder for FfmpegDecoder {
    fn dequeue_input(&mut self, _timeout: Duration) -> Result<Option<usize>> {
        if self.input_taken || self.in_flight() >= MAX_IN_FLIGHT {
            return Ok(None);
        }
        self.input_taken = true;
        Ok(Some(0))
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut Vec<u8>> {
        if index != 0 || !self.input_taken {
            return Err(PlayerError::RuntimeDecode(format!("输入槽 #{} 未申请", index)));
        }
        Ok(&mut self.input)
    }

    fn queue_input(&mut self, index: usize, pts_us: i64, end_of_stream: bool) -> Result<()> {
        if index != 0 || !self.input_taken {
            return Err(PlayerError::RuntimeDecode(format!("输入槽 #{} 未申请", index)));
        }
        self.input_taken = false;

        if end_of_stream {
            self.send(None)?;
            self.receive_all()?;
            self.pending.push_back(DecodedUnit {
                pts_us: self.last_pts,
                data: Vec::new(),
                width: 0,
                height: 0,
                end_of_stream: true,
            });
            return Ok(());
        }

        let mut packet = ffmpeg::Packet::copy(&self.input);
        packet.set_pts(Some(pts_us));
        packet.set_dts(Some(pts_us));
        self.send(Some(&packet))?;
        self.receive_all()
    }

    fn dequeue_output(&mut self, timeout: Duration) -> Result<Option<OutputBuffer>> {
        let Some(unit) = self.pending.pop_front() else {
            // 解码器还需要更多输入
            if self.input_taken || self.in_flight() > 0 {
                std::thread::sleep(timeout);
            }
            return Ok(None);
        };

        let output = OutputBuffer {
            index: 0,
            pts_us: unit.pts_us,
            size: unit.data.len(),
            end_of_stream: unit.end_of_stream,
        };
        let index = match self.outputs.iter().position(Option::is_none) {
            Some(index) => {
                self.outputs[index] = Some(unit);
                index
            }
            None => {
                self.outputs.push(Some(unit));
                self.outputs.len() - 1
            }
        };
        Ok(Some(OutputBuffer { index, ..output }))
    }

    fn output_buffer(&self, index: usize) -> Result<&[u8]> {
        Ok(&self.unit(index)?.data)
    }

    fn release_output(&mut self, index: usize, target: Option<&dyn RenderSurface>) -> Result<()> {
        self.unit(index)?;
        let Some(unit) = self.outputs[index].take() else {
            return Ok(());
        };
        if let (Some(surface), StreamKind::Video) = (target, self.kind) {
            if !unit.end_of_stream {
                surface.present(&VideoFrame {
                    pts_us: unit.pts_us,
                    width: unit.width,
                    height: unit.height,
                    format: PixelFormat::RGBA,
                    data: &unit.data,
                });
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        match &mut self.codec {
            CodecState::Video { decoder, .. } => decoder.flush(),
            CodecState::Audio { decoder, .. } => decoder.flush(),
        }
        self.pending.clear();
        self.outputs.iter_mut().for_each(|slot| *slot = None);
        self.input_taken = false;
        Ok(())
    }

    fn release(&mut self) {
        self.pending.clear();
        self.outputs.clear();
    }

    fn info(&self) -> String {
        format!("FFmpeg 软件解码（{}）", self.kind.as_str())
    }
}
