use crate::core::{log_ctx, MediaSource, PlayerError, Result, StreamKind, TrackDescriptor, TransportState};
use crate::player::backend::MediaBackend;
use crate::player::decoder::OutputBuffer;
use crate::player::session::{LoopExit, SessionCore, SessionLoop, SessionShared};
use crate::player::surface::SurfaceSlot;
use log::{debug, info};

/// PTS 对应的帧计数；前导 B 帧可能带负 PTS，计数不小于 0
fn frame_count_at(pts_us: i64, frame_rate: u32) -> i64 {
    (pts_us * frame_rate as i64 / 1_000_000).max(0)
}

/// 视频解码会话：送入压缩样本，按播放时钟把解码帧交给渲染表面
pub(crate) struct VideoSession {
    core: SessionCore,
    shared: SessionShared,
    surface: SurfaceSlot,
    frame_rate: u32,
    frames_rendered: u64,
    frames_dropped: u64,
}

impl VideoSession {
    /// 渲染表面缺失或无效时直接失败，不进入解码循环
    pub fn open(
        backend: &dyn MediaBackend,
        source: &MediaSource,
        track: &TrackDescriptor,
        surface: SurfaceSlot,
        shared: SessionShared,
    ) -> Result<Self> {
        let target = surface
            .valid()
            .ok_or_else(|| PlayerError::DecoderConfig("渲染表面不存在或已失效".to_string()))?;
        let core = SessionCore::open(backend, source, track, Some(target.as_ref()))?;
        let frame_rate = track
            .frame_rate()
            .unwrap_or(shared.config.default_frame_rate)
            .max(1);

        Ok(Self {
            core,
            shared,
            surface,
            frame_rate,
            frames_rendered: 0,
            frames_dropped: 0,
        })
    }

    /// 进度在送入时上报（此时最早知道 PTS）
    fn report_progress(&self, pts_us: i64) {
        let position_ms = pts_us / 1000;
        let frame_count = frame_count_at(pts_us, self.frame_rate);
        self.shared.listeners.update_progress(position_ms, frame_count);
    }

    /// 等到该帧的显示时刻；返回 false 表示该帧应被丢弃（停止或 Seek）
    ///
    /// 等待挂在传输控制器的条件变量上，任何命令都会打断它并重新计算。
    fn wait_for_deadline(&self, pts_us: i64) -> bool {
        let transport = &self.shared.transport;
        let clock = transport.clock();
        loop {
            if transport.is_stop_requested() || transport.has_pending_seek(StreamKind::Video) {
                return false;
            }
            if transport.state() != TransportState::Playing {
                transport.wait_until_playing(self.shared.config.pause_poll());
                clock.unanchor();
                continue;
            }

            let seen = transport.change_seq();
            let delay = clock.delay_until(pts_us);
            if delay.is_zero() {
                return true;
            }
            transport.wait_for_change(delay, seen);
        }
    }

    /// 输出步骤：节拍控制后把帧释放到当前渲染表面
    fn present(&mut self, output: OutputBuffer) -> Result<()> {
        if output.end_of_stream && output.size == 0 {
            return self.core.decoder.release_output(output.index, None);
        }

        if !self.wait_for_deadline(output.pts_us) {
            self.frames_dropped += 1;
            return self.core.decoder.release_output(output.index, None);
        }

        // 每帧都读取最新发布的表面，不缓存
        let target = self.surface.valid();
        if target.is_none() {
            debug!("渲染表面不可用，丢弃帧 PTS={}us", output.pts_us);
            self.frames_dropped += 1;
        } else {
            self.frames_rendered += 1;
        }
        self.core.decoder.release_output(output.index, target.as_deref())
    }
}

impl SessionLoop for VideoSession {
    fn kind(&self) -> StreamKind {
        StreamKind::Video
    }

    fn shared(&self) -> &SessionShared {
        &self.shared
    }

    fn run(&mut self) -> Result<LoopExit> {
        let transport = self.shared.transport.clone();
        let config = self.shared.config.clone();
        transport.clock().unanchor();

        let exit = loop {
            if transport.is_stop_requested() {
                break LoopExit::Stopped;
            }
            if !transport.wait_until_playing(config.pause_poll()) {
                transport.clock().unanchor();
                continue;
            }
            if let Some(request) = transport.take_pending_seek(StreamKind::Video) {
                self.core.seek(&request, self.shared.duration_us)?;
                transport.clock().unanchor();
            }

            if let Some(sample) = self.core.feed(config.input_timeout())? {
                self.report_progress(sample.pts_us);
            }

            if let Some(output) = self.core.decoder.dequeue_output(config.output_timeout())? {
                self.present(output)?;
                // 流结束之后又来了 Seek：继续循环，由 Seek 重新定位
                if output.end_of_stream && !transport.has_pending_seek(StreamKind::Video) {
                    break LoopExit::EndOfStream;
                }
            }
        };

        info!(
            "{} 🎬 视频循环退出: {:?}（渲染 {} 帧，丢弃 {} 帧）",
            log_ctx(),
            exit,
            self.frames_rendered,
            self.frames_dropped
        );
        Ok(exit)
    }
}
