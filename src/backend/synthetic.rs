//! 纯内存的合成媒体后端
//!
//! 不依赖任何系统库：视频样本的负载是帧序号（u32 小端），音频样本解码为静音 PCM。
//! 音频输出按真实时间节拍阻塞，行为接近真实设备。测试和命令行演示都使用它。

use crate::core::{
    MediaSource, PixelFormat, PlayerError, Result, StreamKind, TrackDescriptor, TrackFormat,
    TrackParams, VideoFrame,
};
use crate::player::audio_output::AudioSink;
use crate::player::backend::MediaBackend;
use crate::player::decoder::{Decoder, OutputBuffer};
use crate::player::demuxer_source::{Demuxer, SampleInfo};
use crate::player::surface::RenderSurface;
use crossbeam::queue::SegQueue;
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 每个音频样本包含的 PCM 帧数
const AUDIO_FRAMES_PER_PACKET: u32 = 1024;
/// 解码器同时在途的单元上限
const MAX_IN_FLIGHT: usize = 2;
/// 音频输出单次写入最多阻塞的时长
const SINK_CHUNK: Duration = Duration::from_millis(10);

/// 合成轨道
#[derive(Debug, Clone, PartialEq)]
pub enum TrackSpec {
    Video { width: u32, height: u32, frame_rate: u32 },
    Audio { sample_rate: u32, channel_count: u16 },
    Other { mime: String },
}

impl TrackSpec {
    pub fn mime(&self) -> &str {
        match self {
            TrackSpec::Video { .. } => "video/avc",
            TrackSpec::Audio { .. } => "audio/mp4a-latm",
            TrackSpec::Other { mime } => mime,
        }
    }
}

/// 一个合成媒体文件（轨道按添加顺序编号）
#[derive(Debug, Clone)]
pub struct SyntheticMedia {
    duration_us: i64,
    tracks: Vec<TrackSpec>,
    gop: Option<u32>,
    audio_duration_known: bool,
}

impl SyntheticMedia {
    pub fn new(duration_ms: i64) -> Self {
        Self {
            duration_us: duration_ms.max(0) * 1000,
            tracks: Vec::new(),
            gop: None,
            audio_duration_known: true,
        }
    }

    /// 10 秒 640x360@30 视频 + 44.1kHz 立体声
    pub fn demo() -> Self {
        Self::new(10_000).with_video(640, 360, 30).with_audio(44_100, 2)
    }

    pub fn with_video(mut self, width: u32, height: u32, frame_rate: u32) -> Self {
        self.tracks.push(TrackSpec::Video {
            width,
            height,
            frame_rate: frame_rate.max(1),
        });
        self
    }

    pub fn with_audio(mut self, sample_rate: u32, channel_count: u16) -> Self {
        self.tracks.push(TrackSpec::Audio {
            sample_rate,
            channel_count,
        });
        self
    }

    /// 非音视频轨道（字幕、数据等）
    pub fn with_track(mut self, mime: &str) -> Self {
        self.tracks.push(TrackSpec::Other {
            mime: mime.to_string(),
        });
        self
    }

    /// 关键帧间隔（帧数），默认等于帧率（每秒一个关键帧）
    pub fn with_gop(mut self, frames: u32) -> Self {
        self.gop = Some(frames.max(1));
        self
    }

    /// 音频轨道格式里不带时长（部分容器只在视频轨道上写时长）
    pub fn without_audio_duration(mut self) -> Self {
        self.audio_duration_known = false;
        self
    }

    pub fn duration_us(&self) -> i64 {
        self.duration_us
    }

    fn track(&self, index: usize) -> Result<&TrackSpec> {
        self.tracks
            .get(index)
            .ok_or_else(|| PlayerError::DecoderConfig(format!("轨道 #{} 不存在", index)))
    }

    fn format(&self, index: usize) -> Result<TrackFormat> {
        let spec = self.track(index)?;
        let mime = spec.mime().to_string();
        let format = match spec {
            TrackSpec::Video {
                width,
                height,
                frame_rate,
            } => TrackFormat {
                mime,
                duration_us: Some(self.duration_us),
                frame_rate: Some(*frame_rate),
                width: Some(*width),
                height: Some(*height),
                ..TrackFormat::default()
            },
            TrackSpec::Audio {
                sample_rate,
                channel_count,
            } => TrackFormat {
                mime,
                duration_us: self.audio_duration_known.then_some(self.duration_us),
                sample_rate: Some(*sample_rate),
                channel_count: Some(*channel_count),
                ..TrackFormat::default()
            },
            TrackSpec::Other { .. } => TrackFormat {
                mime,
                ..TrackFormat::default()
            },
        };
        Ok(format)
    }

    fn sample_count(&self, spec: &TrackSpec) -> usize {
        match spec {
            TrackSpec::Video { frame_rate, .. } => {
                (self.duration_us * *frame_rate as i64 / 1_000_000) as usize
            }
            TrackSpec::Audio { sample_rate, .. } => {
                let frames = self.duration_us * *sample_rate as i64 / 1_000_000;
                let per_packet = AUDIO_FRAMES_PER_PACKET as i64;
                ((frames + per_packet - 1) / per_packet) as usize
            }
            TrackSpec::Other { .. } => 0,
        }
    }

    fn sample_pts(&self, spec: &TrackSpec, sample: usize) -> i64 {
        match spec {
            TrackSpec::Video { frame_rate, .. } => sample as i64 * 1_000_000 / *frame_rate as i64,
            TrackSpec::Audio { sample_rate, .. } => {
                sample as i64 * AUDIO_FRAMES_PER_PACKET as i64 * 1_000_000 / *sample_rate as i64
            }
            TrackSpec::Other { .. } => 0,
        }
    }

    /// 样本负载：视频是帧序号，音频是本包的 PCM 帧数
    fn sample_payload(&self, spec: &TrackSpec, sample: usize) -> u32 {
        match spec {
            TrackSpec::Audio { sample_rate, .. } => {
                let total = (self.duration_us * *sample_rate as i64 / 1_000_000) as u64;
                let start = sample as u64 * AUDIO_FRAMES_PER_PACKET as u64;
                total.saturating_sub(start).min(AUDIO_FRAMES_PER_PACKET as u64) as u32
            }
            _ => sample as u32,
        }
    }

    fn is_sync(&self, spec: &TrackSpec, sample: usize) -> bool {
        match spec {
            TrackSpec::Video { frame_rate, .. } => {
                sample % self.gop.unwrap_or(*frame_rate) as usize == 0
            }
            _ => true,
        }
    }
}

/// 资源计数
#[derive(Default)]
struct Counters {
    demuxers_opened: AtomicUsize,
    demuxers_released: AtomicUsize,
    decoders_created: AtomicUsize,
    decoders_released: AtomicUsize,
    sinks_opened: AtomicUsize,
    sinks_released: AtomicUsize,
    seeks: AtomicUsize,
    flushes: AtomicUsize,
    sink_flushes: AtomicUsize,
    /// 最近一次生效的音频播放速率（f32 位模式，0 表示从未生效）
    sink_rate_bits: AtomicU32,
    pcm_bytes: AtomicU64,
    seek_log: Mutex<Vec<(String, i64)>>,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

/// 资源计数快照
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSnapshot {
    pub demuxers_opened: usize,
    pub demuxers_released: usize,
    pub decoders_created: usize,
    pub decoders_released: usize,
    pub sinks_opened: usize,
    pub sinks_released: usize,
    pub seeks: usize,
    pub flushes: usize,
    pub sink_flushes: usize,
    /// 音频输出最近一次接受的播放速率；设备不支持调速时为 None
    pub sink_rate: Option<f32>,
    pub pcm_bytes: u64,
}

impl StatsSnapshot {
    /// 打开的解封装器、解码器、音频输出是否全部释放
    pub fn all_released(&self) -> bool {
        self.demuxers_opened == self.demuxers_released
            && self.decoders_created == self.decoders_released
            && self.sinks_opened == self.sinks_released
    }
}

/// 注入的故障
#[derive(Debug, Clone)]
struct Faults {
    fail_audio_sink: bool,
    rejected_mimes: Vec<String>,
    fail_after: HashMap<StreamKind, u64>,
    sink_rate_control: bool,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            fail_audio_sink: false,
            rejected_mimes: Vec::new(),
            fail_after: HashMap::new(),
            sink_rate_control: true,
        }
    }
}

/// 合成媒体后端
#[derive(Default)]
pub struct SyntheticBackend {
    media: RwLock<HashMap<String, Arc<SyntheticMedia>>>,
    counters: Arc<Counters>,
    faults: RwLock<Faults>,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个媒体源
    pub fn register(&self, uri: &str, media: SyntheticMedia) {
        self.media.write().insert(uri.to_string(), Arc::new(media));
    }

    pub fn stats(&self) -> StatsSnapshot {
        let c = &self.counters;
        StatsSnapshot {
            demuxers_opened: c.demuxers_opened.load(Ordering::SeqCst),
            demuxers_released: c.demuxers_released.load(Ordering::SeqCst),
            decoders_created: c.decoders_created.load(Ordering::SeqCst),
            decoders_released: c.decoders_released.load(Ordering::SeqCst),
            sinks_opened: c.sinks_opened.load(Ordering::SeqCst),
            sinks_released: c.sinks_released.load(Ordering::SeqCst),
            seeks: c.seeks.load(Ordering::SeqCst),
            flushes: c.flushes.load(Ordering::SeqCst),
            sink_flushes: c.sink_flushes.load(Ordering::SeqCst),
            sink_rate: match c.sink_rate_bits.load(Ordering::SeqCst) {
                0 => None,
                bits => Some(f32::from_bits(bits)),
            },
            pcm_bytes: c.pcm_bytes.load(Ordering::SeqCst),
        }
    }

    /// 之后打开的音频输出全部失败
    pub fn fail_audio_sink(&self, fail: bool) {
        self.faults.write().fail_audio_sink = fail;
    }

    /// 拒绝为该 MIME 类型创建解码器
    pub fn reject_codec(&self, mime: &str) {
        self.faults.write().rejected_mimes.push(mime.to_string());
    }

    /// 之后创建的该类型解码器在输出 `outputs` 个单元后报错
    pub fn fail_decoding_after(&self, kind: StreamKind, outputs: u64) {
        self.faults.write().fail_after.insert(kind, outputs);
    }

    /// 音频输出是否支持调速
    pub fn set_sink_rate_control(&self, supported: bool) {
        self.faults.write().sink_rate_control = supported;
    }

    /// 所有解封装器收到的 Seek 目标：(轨道 MIME, 目标微秒)，按发生顺序
    pub fn seek_targets(&self) -> Vec<(String, i64)> {
        self.counters.seek_log.lock().clone()
    }

    fn lookup(&self, source: &MediaSource) -> Result<Arc<SyntheticMedia>> {
        self.media
            .read()
            .get(source.uri())
            .cloned()
            .ok_or_else(|| PlayerError::SourceOpen {
                uri: source.uri().to_string(),
                reason: "未注册的合成媒体".to_string(),
            })
    }
}

impl MediaBackend for SyntheticBackend {
    fn open_demuxer(&self, source: &MediaSource) -> Result<Box<dyn Demuxer>> {
        let media = self.lookup(source)?;
        bump(&self.counters.demuxers_opened);
        Ok(Box::new(SyntheticDemuxer {
            uri: source.uri().to_string(),
            media,
            selected: None,
            cursor: 0,
            released: false,
            counters: self.counters.clone(),
        }))
    }

    fn create_decoder(
        &self,
        source: &MediaSource,
        track: &TrackDescriptor,
        surface: Option<&dyn RenderSurface>,
    ) -> Result<Box<dyn Decoder>> {
        let media = self.lookup(source)?;
        let faults = self.faults.read().clone();
        if faults.rejected_mimes.iter().any(|mime| *mime == track.mime) {
            return Err(PlayerError::DecoderConfig(format!("不支持的编码: {}", track.mime)));
        }

        let spec = media.track(track.index)?.clone();
        let kind = match spec {
            TrackSpec::Video { .. } => StreamKind::Video,
            TrackSpec::Audio { .. } => StreamKind::Audio,
            TrackSpec::Other { ref mime } => {
                return Err(PlayerError::DecoderConfig(format!("无法解码轨道类型: {}", mime)))
            }
        };
        if kind == StreamKind::Video && surface.is_none() {
            return Err(PlayerError::DecoderConfig("视频解码器需要渲染表面".to_string()));
        }

        bump(&self.counters.decoders_created);
        Ok(Box::new(SyntheticDecoder {
            kind,
            spec,
            input: Vec::new(),
            input_taken: false,
            pending: VecDeque::new(),
            outputs: Vec::new(),
            last_pts: 0,
            produced: 0,
            fail_after: faults.fail_after.get(&kind).copied(),
            released: false,
            counters: self.counters.clone(),
        }))
    }

    fn open_audio_sink(&self, track: &TrackDescriptor) -> Result<Box<dyn AudioSink>> {
        let faults = self.faults.read().clone();
        if faults.fail_audio_sink {
            return Err(PlayerError::SinkInit("合成音频设备不可用".to_string()));
        }
        let TrackParams::Audio {
            sample_rate,
            channel_count,
        } = track.params
        else {
            return Err(PlayerError::SinkInit(format!("轨道 #{} 不是音频轨道", track.index)));
        };

        bump(&self.counters.sinks_opened);
        Ok(Box::new(SyntheticSink {
            sample_rate,
            frame_bytes: channel_count as usize * 2,
            rate: 1.0,
            rate_control: faults.sink_rate_control,
            paused: false,
            released: false,
            counters: self.counters.clone(),
        }))
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

/// 合成解封装器
struct SyntheticDemuxer {
    uri: String,
    media: Arc<SyntheticMedia>,
    selected: Option<(usize, TrackSpec)>,
    cursor: usize,
    released: bool,
    counters: Arc<Counters>,
}

impl Demuxer for SyntheticDemuxer {
    fn track_count(&self) -> usize {
        self.media.tracks.len()
    }

    fn track_format(&self, index: usize) -> Result<TrackFormat> {
        self.media.format(index)
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        let spec = self.media.track(index)?.clone();
        self.selected = Some((index, spec));
        self.cursor = 0;
        Ok(())
    }

    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Result<Option<SampleInfo>> {
        let Some((_, spec)) = &self.selected else {
            return Err(PlayerError::RuntimeDecode("尚未选择轨道".to_string()));
        };
        if self.cursor >= self.media.sample_count(spec) {
            return Ok(None);
        }

        buf.clear();
        buf.extend_from_slice(&self.media.sample_payload(spec, self.cursor).to_le_bytes());
        Ok(Some(SampleInfo {
            pts_us: self.media.sample_pts(spec, self.cursor),
            size: buf.len(),
            is_sync: self.media.is_sync(spec, self.cursor),
        }))
    }

    fn seek_to(&mut self, time_us: i64) -> Result<()> {
        let Some((_, spec)) = &self.selected else {
            return Err(PlayerError::RuntimeDecode("尚未选择轨道".to_string()));
        };
        let count = self.media.sample_count(spec);
        if count == 0 {
            self.cursor = 0;
            return Ok(());
        }

        // 目标之前（含）最后一个样本，再回退到同步点
        let mut sample = (0..count)
            .take_while(|&i| self.media.sample_pts(spec, i) <= time_us.max(0))
            .last()
            .unwrap_or(0);
        while sample > 0 && !self.media.is_sync(spec, sample) {
            sample -= 1;
        }
        self.cursor = sample;
        bump(&self.counters.seeks);
        self.counters
            .seek_log
            .lock()
            .push((spec.mime().to_string(), time_us));
        debug!("合成解封装器 Seek: {}us → 样本 #{}", time_us, sample);
        Ok(())
    }

    fn advance(&mut self) -> bool {
        let Some((_, spec)) = &self.selected else {
            return false;
        };
        let count = self.media.sample_count(spec);
        if self.cursor < count {
            self.cursor += 1;
        }
        self.cursor < count
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            bump(&self.counters.demuxers_released);
        }
    }

    fn description(&self) -> String {
        match &self.selected {
            Some((index, _)) => format!("SyntheticDemuxer({} #{})", self.uri, index),
            None => format!("SyntheticDemuxer({})", self.uri),
        }
    }
}

impl Drop for SyntheticDemuxer {
    fn drop(&mut self) {
        self.release();
    }
}

/// 一个解码单元
struct DecodedUnit {
    pts_us: i64,
    data: Vec<u8>,
    end_of_stream: bool,
}

/// 合成解码器：单个输入槽，解码是同步的，输出按送入顺序排队
struct SyntheticDecoder {
    kind: StreamKind,
    spec: TrackSpec,
    input: Vec<u8>,
    input_taken: bool,
    pending: VecDeque<DecodedUnit>,
    outputs: Vec<Option<DecodedUnit>>,
    last_pts: i64,
    produced: u64,
    fail_after: Option<u64>,
    released: bool,
    counters: Arc<Counters>,
}

impl SyntheticDecoder {
    fn in_flight(&self) -> usize {
        self.pending.len() + self.outputs.iter().filter(|slot| slot.is_some()).count()
    }

    fn decode(&self, payload: &[u8]) -> Vec<u8> {
        match self.spec {
            TrackSpec::Audio { channel_count, .. } => {
                let frames = payload
                    .get(..4)
                    .and_then(|bytes| bytes.try_into().ok())
                    .map_or(0, u32::from_le_bytes);
                vec![0u8; frames as usize * channel_count as usize * 2]
            }
            _ => payload.to_vec(),
        }
    }

    fn unit(&self, index: usize) -> Result<&DecodedUnit> {
        self.outputs
            .get(index)
            .and_then(Option::as_ref)
            .ok_or_else(|| PlayerError::RuntimeDecode(format!("输出槽 #{} 不存在", index)))
    }
}

impl Decoder for SyntheticDecoder {
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

        let unit = if end_of_stream {
            DecodedUnit {
                pts_us: self.last_pts,
                data: Vec::new(),
                end_of_stream: true,
            }
        } else {
            self.last_pts = pts_us;
            DecodedUnit {
                pts_us,
                data: self.decode(&self.input),
                end_of_stream: false,
            }
        };
        self.pending.push_back(unit);
        Ok(())
    }

    fn dequeue_output(&mut self, timeout: Duration) -> Result<Option<OutputBuffer>> {
        if let Some(limit) = self.fail_after {
            if self.produced >= limit {
                return Err(PlayerError::RuntimeDecode(format!(
                    "{} 解码失败（第 {} 个单元）",
                    self.kind.as_str(),
                    self.produced + 1
                )));
            }
        }

        let Some(unit) = self.pending.pop_front() else {
            thread::sleep(timeout);
            return Ok(None);
        };
        self.produced += 1;

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

        if let (Some(surface), TrackSpec::Video { width, height, .. }) = (target, &self.spec) {
            if !unit.end_of_stream {
                surface.present(&VideoFrame {
                    pts_us: unit.pts_us,
                    width: *width,
                    height: *height,
                    format: PixelFormat::Opaque,
                    data: &unit.data,
                });
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.pending.clear();
        self.outputs.iter_mut().for_each(|slot| *slot = None);
        self.input_taken = false;
        bump(&self.counters.flushes);
        Ok(())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.pending.clear();
            self.outputs.clear();
            bump(&self.counters.decoders_released);
        }
    }

    fn info(&self) -> String {
        format!("SyntheticDecoder({})", self.kind.as_str())
    }
}

impl Drop for SyntheticDecoder {
    fn drop(&mut self) {
        self.release();
    }
}

/// 合成音频输出：每次最多接收 10ms 的数据，并按播放速率睡眠对应时长
struct SyntheticSink {
    sample_rate: u32,
    frame_bytes: usize,
    rate: f32,
    rate_control: bool,
    paused: bool,
    released: bool,
    counters: Arc<Counters>,
}

impl AudioSink for SyntheticSink {
    fn write(&mut self, pcm: &[u8]) -> Result<usize> {
        if self.released {
            return Err(PlayerError::RuntimeDecode("音频输出已关闭".to_string()));
        }
        if self.paused {
            thread::sleep(SINK_CHUNK);
            return Ok(0);
        }

        let frame_bytes = self.frame_bytes.max(1);
        let chunk_frames = (self.sample_rate as u64 * SINK_CHUNK.as_millis() as u64 / 1000).max(1);
        let frames = (pcm.len() / frame_bytes).min(chunk_frames as usize);
        let written = if frames == 0 { pcm.len() } else { frames * frame_bytes };

        if frames > 0 {
            let seconds = frames as f64 / self.sample_rate.max(1) as f64 / self.rate as f64;
            thread::sleep(Duration::from_secs_f64(seconds));
        }
        self.counters.pcm_bytes.fetch_add(written as u64, Ordering::SeqCst);
        Ok(written)
    }

    fn set_playback_rate(&mut self, rate: f32) -> Result<bool> {
        if !self.rate_control {
            return Ok(false);
        }
        self.rate = if rate.is_finite() && rate > 0.0 { rate } else { 1.0 };
        self.counters
            .sink_rate_bits
            .store(self.rate.to_bits(), Ordering::SeqCst);
        Ok(true)
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    fn flush(&mut self) {
        bump(&self.counters.sink_flushes);
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            bump(&self.counters.sinks_released);
        }
    }
}

/// 渲染表面收到的一帧
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresentedFrame {
    pub pts_us: i64,
    /// 合成视频的帧序号
    pub sequence: u32,
    pub at: Instant,
}

/// 记录所有收到的帧的渲染表面
pub struct FrameRecorder {
    name: String,
    frames: SegQueue<PresentedFrame>,
    presented: AtomicUsize,
    valid: AtomicBool,
}

impl FrameRecorder {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            frames: SegQueue::new(),
            presented: AtomicUsize::new(0),
            valid: AtomicBool::new(true),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 取出目前为止收到的帧（按到达顺序）
    pub fn take(&self) -> Vec<PresentedFrame> {
        std::iter::from_fn(|| self.frames.pop()).collect()
    }

    /// 累计收到的帧数
    pub fn presented(&self) -> usize {
        self.presented.load(Ordering::SeqCst)
    }

    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }
}

impl RenderSurface for FrameRecorder {
    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    fn present(&self, frame: &VideoFrame<'_>) {
        let sequence = frame
            .data
            .get(..4)
            .and_then(|bytes| bytes.try_into().ok())
            .map_or(0, u32::from_le_bytes);
        self.frames.push(PresentedFrame {
            pts_us: frame.pts_us,
            sequence,
            at: Instant::now(),
        });
        let count = self.presented.fetch_add(1, Ordering::SeqCst) + 1;
        if count == 1 {
            info!("🖼️  {} 收到第一帧 ({}x{})", self.name, frame.width, frame.height);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_track(media: &SyntheticMedia, index: usize) -> TrackDescriptor {
        let format = media.format(index).unwrap();
        TrackDescriptor {
            index,
            mime: format.mime,
            duration_us: media.duration_us(),
            params: TrackParams::Video {
                width: format.width.unwrap(),
                height: format.height.unwrap(),
                frame_rate: format.frame_rate.unwrap(),
            },
        }
    }

    #[test]
    fn test_demuxer_reads_frame_sequence() {
        let backend = SyntheticBackend::new();
        backend.register("mem://a", SyntheticMedia::new(1_000).with_video(320, 240, 10));
        let mut demuxer = backend.open_demuxer(&"mem://a".into()).unwrap();
        demuxer.select_track(0).unwrap();

        let mut buf = Vec::new();
        let mut pts = Vec::new();
        while let Some(info) = demuxer.read_sample(&mut buf).unwrap() {
            assert_eq!(u32::from_le_bytes(buf[..4].try_into().unwrap()) as usize, pts.len());
            pts.push(info.pts_us);
            demuxer.advance();
        }
        assert_eq!(pts.len(), 10);
        assert_eq!(pts[3], 300_000);
    }

    #[test]
    fn test_seek_lands_on_previous_sync_sample() {
        let backend = SyntheticBackend::new();
        backend.register("mem://a", SyntheticMedia::new(3_000).with_video(320, 240, 30));
        let mut demuxer = backend.open_demuxer(&"mem://a".into()).unwrap();
        demuxer.select_track(0).unwrap();

        let mut buf = Vec::new();
        demuxer.seek_to(2_100_000).unwrap();
        let info = demuxer.read_sample(&mut buf).unwrap().unwrap();
        assert!(info.is_sync);
        assert_eq!(info.pts_us, 2_000_000);

        // 超出末尾时停在最后一个关键帧
        demuxer.seek_to(60_000_000).unwrap();
        assert_eq!(demuxer.read_sample(&mut buf).unwrap().unwrap().pts_us, 2_000_000);
        assert_eq!(backend.stats().seeks, 2);
    }

    #[test]
    fn test_decoder_presents_to_target_and_signals_eos() {
        let backend = SyntheticBackend::new();
        let media = SyntheticMedia::new(200).with_video(64, 32, 10);
        backend.register("mem://a", media.clone());
        let surface = FrameRecorder::new("test");
        let track = video_track(&media, 0);
        let mut decoder = backend
            .create_decoder(&"mem://a".into(), &track, Some(&*surface))
            .unwrap();

        let slot = decoder.dequeue_input(Duration::ZERO).unwrap().unwrap();
        decoder.input_buffer(slot).unwrap().extend_from_slice(&7u32.to_le_bytes());
        decoder.queue_input(slot, 700_000, false).unwrap();
        let slot = decoder.dequeue_input(Duration::ZERO).unwrap().unwrap();
        decoder.queue_input(slot, 0, true).unwrap();
        assert!(decoder.dequeue_input(Duration::ZERO).unwrap().is_none());

        let frame = decoder.dequeue_output(Duration::ZERO).unwrap().unwrap();
        assert!(!frame.end_of_stream);
        decoder.release_output(frame.index, Some(&*surface)).unwrap();
        let eos = decoder.dequeue_output(Duration::ZERO).unwrap().unwrap();
        assert!(eos.end_of_stream);
        assert_eq!(eos.size, 0);
        decoder.release_output(eos.index, Some(&*surface)).unwrap();

        let frames = surface.take();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 7);
        assert_eq!(frames[0].pts_us, 700_000);
    }

    #[test]
    fn test_video_decoder_requires_surface() {
        let backend = SyntheticBackend::new();
        let media = SyntheticMedia::new(200).with_video(64, 32, 10);
        backend.register("mem://a", media.clone());
        let result = backend.create_decoder(&"mem://a".into(), &video_track(&media, 0), None);
        assert!(matches!(result, Err(PlayerError::DecoderConfig(_))));
    }

    #[test]
    fn test_audio_packets_decode_to_pcm() {
        let backend = SyntheticBackend::new();
        let media = SyntheticMedia::new(100).with_audio(10_240, 2);
        backend.register("mem://a", media.clone());
        let track = TrackDescriptor {
            index: 0,
            mime: "audio/mp4a-latm".into(),
            duration_us: media.duration_us(),
            params: TrackParams::Audio {
                sample_rate: 10_240,
                channel_count: 2,
            },
        };
        let mut demuxer = backend.open_demuxer(&"mem://a".into()).unwrap();
        demuxer.select_track(0).unwrap();
        let mut decoder = backend.create_decoder(&"mem://a".into(), &track, None).unwrap();

        let slot = decoder.dequeue_input(Duration::ZERO).unwrap().unwrap();
        demuxer.read_sample(decoder.input_buffer(slot).unwrap()).unwrap();
        decoder.queue_input(slot, 0, false).unwrap();
        let output = decoder.dequeue_output(Duration::ZERO).unwrap().unwrap();
        // 100ms @ 10240Hz = 1024 帧，一个包，立体声 16 位
        assert_eq!(output.size, 1024 * 2 * 2);
        assert_eq!(decoder.output_buffer(output.index).unwrap().len(), output.size);
    }

    #[test]
    fn test_injected_faults() {
        let backend = SyntheticBackend::new();
        let media = SyntheticMedia::new(1_000).with_video(64, 32, 10);
        backend.register("mem://a", media.clone());
        backend.fail_decoding_after(StreamKind::Video, 0);
        let surface = FrameRecorder::new("test");
        let mut decoder = backend
            .create_decoder(&"mem://a".into(), &video_track(&media, 0), Some(&*surface))
            .unwrap();
        assert!(matches!(
            decoder.dequeue_output(Duration::ZERO),
            Err(PlayerError::RuntimeDecode(_))
        ));

        backend.reject_codec("video/avc");
        let result =
            backend.create_decoder(&"mem://a".into(), &video_track(&media, 0), Some(&*surface));
        assert!(matches!(result, Err(PlayerError::DecoderConfig(_))));
    }

    #[test]
    fn test_release_is_counted_once() {
        let backend = SyntheticBackend::new();
        backend.register("mem://a", SyntheticMedia::demo());
        let mut demuxer = backend.open_demuxer(&"mem://a".into()).unwrap();
        demuxer.release();
        demuxer.release();
        drop(demuxer);

        let stats = backend.stats();
        assert_eq!(stats.demuxers_opened, 1);
        assert_eq!(stats.demuxers_released, 1);
        assert!(stats.all_released());
    }
}
