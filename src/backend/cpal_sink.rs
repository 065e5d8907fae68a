use crate::core::{log_ctx, PlayerError, Result};
use crate::player::audio_output::AudioSink;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
use crossbeam::queue::SegQueue;
use log::{debug, info, warn};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// 设备缓冲上限（秒），写满后 write 阻塞
const BUFFER_SECONDS: f32 = 0.2;
/// 缓冲已满时单次等待的时长
const FULL_WAIT: Duration = Duration::from_millis(5);

/// 基于 cpal 的音频输出
pub struct CpalSink {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
    buffer: Arc<SegQueue<f32>>,
    capacity: usize,
}

// cpal::Stream 不是 Send；CpalSink 只会被音频解码线程持有和使用
unsafe impl Send for CpalSink {}

impl CpalSink {
    /// 打开默认输出设备并立即开始播放
    pub fn open(sample_rate: u32, channels: u16) -> Result<Self> {
        info!("{} 初始化音频输出: {} Hz, {} 声道", log_ctx(), sample_rate, channels);

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::SinkInit("无法找到音频输出设备".to_string()))?;
        debug!("使用音频设备: {}", device.name().unwrap_or_default());

        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let supported = device
            .supported_output_configs()
            .map_err(|e| PlayerError::SinkInit(format!("无法获取支持的音频配置: {}", e)))?
            .any(|range| Self::is_config_compatible(&config, &range));
        if !supported {
            return Err(PlayerError::SinkInit(format!(
                "音频设备不支持 {} Hz, {} 声道",
                sample_rate, channels
            )));
        }

        let capacity = (sample_rate as f32 * channels as f32 * BUFFER_SECONDS) as usize;
        let mut sink = Self {
            device,
            config,
            stream: None,
            buffer: Arc::new(SegQueue::new()),
            capacity: capacity.max(1),
        };
        sink.start()?;
        Ok(sink)
    }

    /// 检查配置是否兼容
    fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
        let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
            && config.sample_rate.0 <= supported.max_sample_rate().0;
        rate_in_range && config.channels == supported.channels()
    }

    fn start(&mut self) -> Result<()> {
        let buffer = self.buffer.clone();
        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for sample in data.iter_mut() {
                        *sample = buffer.pop().unwrap_or(0.0);
                    }
                },
                move |err| {
                    warn!("音频流错误: {}", err);
                },
                None,
            )
            .map_err(|e| PlayerError::SinkInit(format!("创建音频流失败: {}", e)))?;

        stream
            .play()
            .map_err(|e| PlayerError::SinkInit(format!("启动音频流失败: {}", e)))?;
        self.stream = Some(stream);
        info!("{} 音频输出已启动", log_ctx());
        Ok(())
    }

    fn clear_buffer(&self) {
        while self.buffer.pop().is_some() {}
    }
}

impl AudioSink for CpalSink {
    fn write(&mut self, pcm: &[u8]) -> Result<usize> {
        if self.stream.is_none() {
            return Err(PlayerError::RuntimeDecode("音频输出已关闭".to_string()));
        }

        let free = self.capacity.saturating_sub(self.buffer.len());
        if free == 0 {
            thread::sleep(FULL_WAIT);
            return Ok(0);
        }

        let samples = (pcm.len() / 2).min(free);
        for bytes in pcm[..samples * 2].chunks_exact(2) {
            let value = i16::from_le_bytes([bytes[0], bytes[1]]);
            self.buffer.push(value as f32 / 32768.0);
        }
        // 不足一个采样的尾巴直接丢弃
        Ok(if samples == 0 { pcm.len() } else { samples * 2 })
    }

    fn set_playback_rate(&mut self, _rate: f32) -> Result<bool> {
        Ok(false)
    }

    fn set_paused(&mut self, paused: bool) {
        let Some(stream) = &self.stream else {
            return;
        };
        let result = if paused { stream.pause() } else { stream.play() };
        if let Err(e) = result {
            warn!("⚠️  切换音频流状态失败: {}", e);
        }
    }

    fn flush(&mut self) {
        self.clear_buffer();
    }

    fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            self.clear_buffer();
            info!("{} 音频输出已停止", log_ctx());
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.release();
    }
}
