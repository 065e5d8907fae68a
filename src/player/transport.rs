use crate::core::{log_ctx, PlaybackClock, PlayerError, Result, StreamKind, TransportState};
use log::{debug, info};
use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// 一次待处理的 Seek 请求
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekRequest {
    /// 目标进度（0-100）
    pub percent: f64,
    /// 递增编号，每次 seek() 加一
    pub generation: u64,
    awaiting: u8, // 尚未消费该请求的流（位集合）
}

impl SeekRequest {
    /// 目标位置（微秒）= percent / 100 × 总时长
    pub fn target_us(&self, duration_us: i64) -> i64 {
        ((self.percent / 100.0) * duration_us as f64).round() as i64
    }
}

/// 传输控制器 - 两个解码线程每次循环都会查询的状态机
///
/// Stopped → Playing ⇄ Paused → Stopped；Seek 不是独立状态，而是叠加在
/// Playing/Paused 之上的待处理请求。所有字段由同一把锁保护，
/// 任何命令都会通过条件变量唤醒正在等待的解码线程。
pub struct TransportController {
    inner: Mutex<TransportInner>,
    changed: Condvar,
    clock: PlaybackClock,
}

struct TransportInner {
    state: TransportState,
    stop_requested: bool,
    pending_seek: Option<SeekRequest>,
    seek_generation: u64,
    active: u8,
    change_seq: u64,
}

impl TransportInner {
    fn touch(&mut self) {
        self.change_seq = self.change_seq.wrapping_add(1);
    }
}

impl TransportController {
    pub fn new(clock: PlaybackClock) -> Self {
        Self {
            inner: Mutex::new(TransportInner {
                state: TransportState::Stopped,
                stop_requested: false,
                pending_seek: None,
                seek_generation: 0,
                active: 0,
                change_seq: 0,
            }),
            changed: Condvar::new(),
            clock,
        }
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    /// 新的播放会话开始：登记参与的流，清除停止标志
    pub fn begin(&self, kinds: &[StreamKind], start_playing: bool) {
        let mut inner = self.inner.lock();
        inner.stop_requested = false;
        inner.pending_seek = None;
        inner.active = kinds.iter().fold(0, |bits, kind| bits | kind.bit());
        inner.state = if start_playing {
            TransportState::Playing
        } else {
            TransportState::Paused
        };
        inner.touch();
        self.clock.unanchor();
        info!("{} ▶️ 传输控制器启动: {:?}, 状态 {:?}", log_ctx(), kinds, inner.state);
        self.changed.notify_all();
    }

    pub fn state(&self) -> TransportState {
        self.inner.lock().state
    }

    /// Paused → Playing；返回状态是否发生变化
    pub fn play(&self) -> bool {
        self.transition(TransportState::Paused, TransportState::Playing)
    }

    /// Playing → Paused；不清空任何缓冲，恢复时从上次解码的位置继续
    pub fn pause(&self) -> bool {
        let changed = self.transition(TransportState::Playing, TransportState::Paused);
        if changed {
            self.clock.unanchor();
        }
        changed
    }

    fn transition(&self, from: TransportState, to: TransportState) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != from || inner.stop_requested {
            debug!("忽略状态切换 {:?} → {:?}（当前 {:?}）", from, to, inner.state);
            return false;
        }
        inner.state = to;
        inner.touch();
        self.changed.notify_all();
        true
    }

    /// 记录 Seek 请求（异步生效）
    ///
    /// 在解码线程消费之前多次调用只会产生一次有效 Seek，目标为最后一次的进度。
    pub fn seek(&self, percent: f64) -> Result<SeekRequest> {
        if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
            return Err(PlayerError::InvalidSeek(percent));
        }

        let mut inner = self.inner.lock();
        if inner.state == TransportState::Stopped || inner.active == 0 {
            return Err(PlayerError::NoActivePlayback);
        }
        inner.seek_generation += 1;
        let request = SeekRequest {
            percent,
            generation: inner.seek_generation,
            awaiting: inner.active,
        };
        if let Some(previous) = inner.pending_seek.replace(request) {
            debug!("覆盖尚未生效的 Seek: {}% → {}%", previous.percent, percent);
        }
        inner.touch();
        self.clock.unanchor();
        self.changed.notify_all();
        Ok(request)
    }

    /// 解码线程取出属于自己的待处理 Seek；所有活跃流都消费后请求被清除
    pub fn take_pending_seek(&self, kind: StreamKind) -> Option<SeekRequest> {
        let mut inner = self.inner.lock();
        let mut request = inner.pending_seek?;
        if request.awaiting & kind.bit() == 0 {
            return None;
        }
        request.awaiting &= !kind.bit();
        inner.pending_seek = if request.awaiting == 0 {
            None
        } else {
            Some(request)
        };
        Some(request)
    }

    /// 是否有尚未被该流消费的 Seek
    pub fn has_pending_seek(&self, kind: StreamKind) -> bool {
        self.inner
            .lock()
            .pending_seek
            .map_or(false, |request| request.awaiting & kind.bit() != 0)
    }

    pub fn is_seek_pending(&self) -> bool {
        self.inner.lock().pending_seek.is_some()
    }

    /// 修改播放倍速（时钟解除锚定，下一帧重新同步）
    pub fn set_speed(&self, multiplier: f32) {
        let mut inner = self.inner.lock();
        self.clock.set_speed(multiplier);
        inner.touch();
        self.changed.notify_all();
    }

    pub fn speed(&self) -> f32 {
        self.clock.speed()
    }

    /// 请求停止（异步）：设置停止标志并唤醒所有等待
    pub fn request_stop(&self) {
        let mut inner = self.inner.lock();
        inner.stop_requested = true;
        inner.state = TransportState::Stopped;
        inner.pending_seek = None;
        inner.touch();
        self.changed.notify_all();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.inner.lock().stop_requested
    }

    /// 解码线程退出时注销；最后一个流退出后状态变为 Stopped
    pub fn detach(&self, kind: StreamKind) {
        let mut inner = self.inner.lock();
        inner.active &= !kind.bit();
        if let Some(mut request) = inner.pending_seek {
            request.awaiting &= !kind.bit();
            inner.pending_seek = (request.awaiting != 0).then_some(request);
        }
        if inner.active == 0 {
            inner.state = TransportState::Stopped;
        }
        inner.touch();
        debug!("{} {} 流已注销，剩余活跃流 {:#04b}", log_ctx(), kind.as_str(), inner.active);
        self.changed.notify_all();
    }

    pub fn is_active(&self, kind: StreamKind) -> bool {
        self.inner.lock().active & kind.bit() != 0
    }

    /// 等待进入 Playing 状态（最多 `timeout`）；返回当前是否可以继续解码
    pub fn wait_until_playing(&self, timeout: Duration) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == TransportState::Playing && !inner.stop_requested {
            return true;
        }
        if inner.stop_requested {
            return false;
        }
        self.changed.wait_for(&mut inner, timeout);
        inner.state == TransportState::Playing && !inner.stop_requested
    }

    /// 命令序号，配合 `wait_for_change` 使用
    pub fn change_seq(&self) -> u64 {
        self.inner.lock().change_seq
    }

    /// 等待任意传输命令（最多 `timeout`）；`seen` 之后已有变化时立即返回
    pub fn wait_for_change(&self, timeout: Duration, seen: u64) {
        let mut inner = self.inner.lock();
        if inner.change_seq != seen || timeout.is_zero() {
            return;
        }
        self.changed.wait_for(&mut inner, timeout);
    }
}

impl Default for TransportController {
    fn default() -> Self {
        Self::new(PlaybackClock::new())
    }
}
