use crate::core::{log_ctx, MediaSource, PlayerConfig, PlayerError, Result, StreamKind, TrackDescriptor};
use crate::player::backend::MediaBackend;
use crate::player::decoder::Decoder;
use crate::player::demuxer_source::{Demuxer, SampleInfo};
use crate::player::listener::{ListenerSet, PlaybackEvent};
use crate::player::surface::RenderSurface;
use crate::player::transport::{SeekRequest, TransportController};
use log::{debug, info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 解码线程共享的上下文
#[derive(Clone)]
pub(crate) struct SessionShared {
    pub transport: Arc<TransportController>,
    pub listeners: Arc<ListenerSet>,
    pub config: PlayerConfig,
    /// 播放总时长，两路流的 Seek 目标都以它计算
    pub duration_us: i64,
}

/// 解码循环的退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopExit {
    EndOfStream,
    Stopped,
}

/// 每种流的解码循环
pub(crate) trait SessionLoop: Send + 'static {
    fn kind(&self) -> StreamKind;
    fn shared(&self) -> &SessionShared;
    fn run(&mut self) -> Result<LoopExit>;
}

/// 一个流的解封装游标 + 解码器
///
/// Drop 时释放解码器和解封装器，无论循环是正常结束、出错还是被停止。
pub(crate) struct SessionCore {
    pub kind: StreamKind,
    pub track: TrackDescriptor,
    pub demuxer: Box<dyn Demuxer>,
    pub decoder: Box<dyn Decoder>,
    pub input_eos: bool,
    pub samples_fed: u64,
}

impl SessionCore {
    /// 打开独立的解封装游标并配置解码器
    pub fn open(
        backend: &dyn MediaBackend,
        source: &MediaSource,
        track: &TrackDescriptor,
        surface: Option<&dyn RenderSurface>,
    ) -> Result<Self> {
        let kind = track.kind();
        let mut demuxer = backend.open_demuxer(source)?;
        if let Err(e) = demuxer.select_track(track.index) {
            demuxer.release();
            return Err(e);
        }

        let decoder = match backend.create_decoder(source, track, surface) {
            Ok(decoder) => decoder,
            Err(e) => {
                demuxer.release();
                return Err(e);
            }
        };
        info!(
            "{} 🔧 {} 解码会话就绪: {} / {}",
            log_ctx(),
            kind.as_str(),
            demuxer.description(),
            decoder.info()
        );

        Ok(Self {
            kind,
            track: track.clone(),
            demuxer,
            decoder,
            input_eos: false,
            samples_fed: 0,
        })
    }

    /// 送入步骤：申请输入槽，从解封装器复制一个样本
    ///
    /// 返回本次送入的样本信息；没有空闲槽或已送入 EOS 时返回 None。
    pub fn feed(&mut self, timeout: Duration) -> Result<Option<SampleInfo>> {
        if self.input_eos {
            return Ok(None);
        }
        let Some(slot) = self.decoder.dequeue_input(timeout)? else {
            return Ok(None);
        };

        let buffer = self.decoder.input_buffer(slot)?;
        match self.demuxer.read_sample(buffer)? {
            None => {
                debug!("{} 样本读取完毕，送入 EOS", self.kind.as_str());
                self.decoder.queue_input(slot, 0, true)?;
                self.input_eos = true;
                Ok(None)
            }
            Some(sample) => {
                self.decoder.queue_input(slot, sample.pts_us, false)?;
                self.demuxer.advance();
                self.samples_fed += 1;
                Ok(Some(sample))
            }
        }
    }

    /// 执行 Seek：游标定位到目标之前最近的同步点，并丢弃解码器中的在途数据
    ///
    /// `duration_us` 是整个播放的时长，而不是本轨道的时长：音频轨道可能没有时长信息。
    pub fn seek(&mut self, request: &SeekRequest, duration_us: i64) -> Result<i64> {
        let target_us = request.target_us(duration_us);
        self.demuxer.seek_to(target_us)?;
        self.decoder.flush()?;
        self.input_eos = false;
        info!(
            "{} ⏩ {} Seek 到 {}% ({}ms)",
            log_ctx(),
            self.kind.as_str(),
            request.percent,
            target_us / 1000
        );
        Ok(target_us)
    }
}

impl Drop for SessionCore {
    fn drop(&mut self) {
        self.decoder.release();
        self.demuxer.release();
        info!(
            "{} 🧹 {} 解码器/解封装器已释放（共送入 {} 个样本）",
            log_ctx(),
            self.kind.as_str(),
            self.samples_fed
        );
    }
}

/// 线程退出时注销流（包括 panic 展开）
struct DetachGuard {
    kind: StreamKind,
    transport: Arc<TransportController>,
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        self.transport.detach(self.kind);
    }
}

/// 启动解码线程
pub(crate) fn spawn_session<S: SessionLoop>(session: S) -> Result<JoinHandle<()>> {
    let kind = session.kind();
    thread::Builder::new()
        .name(format!("{}-decode", kind.as_str()))
        .spawn(move || run_session(session))
        .map_err(PlayerError::Io)
}

fn run_session<S: SessionLoop>(mut session: S) {
    let kind = session.kind();
    let shared = session.shared().clone();
    let _detach = DetachGuard {
        kind,
        transport: shared.transport.clone(),
    };
    info!("{} 🎬 {} 解码线程启动", log_ctx(), kind.as_str());

    let outcome = session.run();
    // 先释放资源，再上报结果
    drop(session);

    match outcome {
        Ok(LoopExit::EndOfStream) => {
            info!("{} 📄 {} 流播放结束", log_ctx(), kind.as_str());
            shared.listeners.emit(PlaybackEvent::EndOfStream { stream: kind });
        }
        Ok(LoopExit::Stopped) => {
            info!("{} ⏹️  {} 解码线程收到停止请求", log_ctx(), kind.as_str());
        }
        Err(e) => {
            warn!("{} ❌ {} 解码线程异常退出，另一路流不受影响", log_ctx(), kind.as_str());
            shared.listeners.report_error(Some(kind), &e);
        }
    }
    info!("{} ✅ {} 解码线程结束", log_ctx(), kind.as_str());
}
