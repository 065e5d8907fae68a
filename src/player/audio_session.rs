use crate::core::{log_ctx, MediaSource, Result, StreamKind, TrackDescriptor};
use crate::player::audio_output::AudioSink;
use crate::player::backend::MediaBackend;
use crate::player::decoder::OutputBuffer;
use crate::player::session::{LoopExit, SessionCore, SessionLoop, SessionShared};
use log::{debug, info, warn};

/// 音频解码会话：解码后的 PCM 同步写入音频输出，由设备的阻塞写入完成节拍
pub(crate) struct AudioSession {
    core: SessionCore,
    shared: SessionShared,
    sink: Box<dyn AudioSink>,
    pcm: Vec<u8>,
    applied_rate: Option<f32>,
    sink_paused: bool,
    bytes_written: u64,
}

impl AudioSession {
    pub fn open(
        backend: &dyn MediaBackend,
        source: &MediaSource,
        track: &TrackDescriptor,
        shared: SessionShared,
    ) -> Result<Self> {
        let core = SessionCore::open(backend, source, track, None)?;
        // 音频输出打开失败时 core 被 drop，解码器和解封装器随之释放
        let sink = backend.open_audio_sink(track)?;

        Ok(Self {
            core,
            shared,
            sink,
            pcm: Vec::new(),
            applied_rate: None,
            sink_paused: false,
            bytes_written: 0,
        })
    }

    /// 把当前倍速同步到音频设备的播放速率
    fn sync_playback_rate(&mut self) {
        let rate = self.shared.transport.speed();
        if self.applied_rate == Some(rate) {
            return;
        }
        match self.sink.set_playback_rate(rate) {
            Ok(true) => debug!("🔊 音频播放速率 → {}x", rate),
            Ok(false) => {
                if rate != 1.0 {
                    warn!("⚠️  音频设备不支持调速，仅视频按 {}x 节拍，音画可能逐渐漂移", rate);
                }
            }
            Err(e) => warn!("⚠️  设置音频播放速率失败: {}", e),
        }
        self.applied_rate = Some(rate);
    }

    fn set_sink_paused(&mut self, paused: bool) {
        if self.sink_paused != paused {
            self.sink.set_paused(paused);
            self.sink_paused = paused;
        }
    }

    /// 输出步骤：复制 PCM、归还输出槽，再阻塞写入设备
    fn drain(&mut self, output: OutputBuffer) -> Result<()> {
        self.pcm.clear();
        if output.size > 0 {
            let data = self.core.decoder.output_buffer(output.index)?;
            let len = output.size.min(data.len());
            self.pcm.extend_from_slice(&data[..len]);
        }
        self.core.decoder.release_output(output.index, None)?;

        let transport = &self.shared.transport;
        let mut offset = 0;
        while offset < self.pcm.len() {
            // 写入过程中收到停止或 Seek，剩余数据直接丢弃
            if transport.is_stop_requested() || transport.has_pending_seek(StreamKind::Audio) {
                break;
            }
            offset += self.sink.write(&self.pcm[offset..])?;
        }
        self.bytes_written += offset as u64;
        Ok(())
    }
}

impl SessionLoop for AudioSession {
    fn kind(&self) -> StreamKind {
        StreamKind::Audio
    }

    fn shared(&self) -> &SessionShared {
        &self.shared
    }

    fn run(&mut self) -> Result<LoopExit> {
        let transport = self.shared.transport.clone();
        let config = self.shared.config.clone();

        let exit = loop {
            if transport.is_stop_requested() {
                break LoopExit::Stopped;
            }
            if !transport.wait_until_playing(config.pause_poll()) {
                self.set_sink_paused(true);
                transport.clock().unanchor();
                continue;
            }
            self.set_sink_paused(false);

            if let Some(request) = transport.take_pending_seek(StreamKind::Audio) {
                self.core.seek(&request, self.shared.duration_us)?;
                self.sink.flush();
                transport.clock().unanchor();
            }
            self.sync_playback_rate();

            self.core.feed(config.input_timeout())?;

            if let Some(output) = self.core.decoder.dequeue_output(config.output_timeout())? {
                self.drain(output)?;
                if output.end_of_stream && !transport.has_pending_seek(StreamKind::Audio) {
                    break LoopExit::EndOfStream;
                }
            }
        };

        info!(
            "{} 🔊 音频循环退出: {:?}（写入 {} 字节 PCM）",
            log_ctx(),
            exit,
            self.bytes_written
        );
        Ok(exit)
    }
}

impl Drop for AudioSession {
    fn drop(&mut self) {
        self.sink.release();
        debug!("{} 🔊 音频输出已关闭", log_ctx());
    }
}
