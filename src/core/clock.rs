use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 播放时钟 - 把 PTS 映射到墙上时间，用于视频帧节拍控制
///
/// 时钟在第一帧渲染时锚定：`anchor` 对应该帧 PTS / speed。
/// Seek、暂停、倍速变化后都会解除锚定，下一帧重新建立映射。
#[derive(Clone)]
pub struct PlaybackClock {
    inner: Arc<Mutex<ClockInner>>,
}

struct ClockInner {
    anchor: Option<Anchor>,
    speed: f32,
}

#[derive(Clone, Copy)]
struct Anchor {
    wall: Instant,
    scaled_pts_us: f64, // 锚定帧的 PTS / speed（微秒）
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self::with_speed(1.0)
    }

    pub fn with_speed(speed: f32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                anchor: None,
                speed: sanitize_speed(speed),
            })),
        }
    }

    /// 解除锚定
    pub fn unanchor(&self) {
        self.inner.lock().anchor = None;
    }

    pub fn is_anchored(&self) -> bool {
        self.inner.lock().anchor.is_some()
    }

    pub fn speed(&self) -> f32 {
        self.inner.lock().speed
    }

    /// 设置播放速率（同时解除锚定）
    pub fn set_speed(&self, speed: f32) {
        let mut inner = self.inner.lock();
        inner.speed = sanitize_speed(speed);
        inner.anchor = None;
    }

    /// 距离 `pts_us` 应当显示的时刻还需等待多久；未锚定时以该帧锚定并返回 0
    pub fn delay_until(&self, pts_us: i64) -> Duration {
        self.delay_until_at(pts_us, Instant::now())
    }

    fn delay_until_at(&self, pts_us: i64, now: Instant) -> Duration {
        let mut inner = self.inner.lock();
        let scaled = pts_us as f64 / inner.speed as f64;
        let anchor = *inner.anchor.get_or_insert(Anchor {
            wall: now,
            scaled_pts_us: scaled,
        });

        let offset_us = scaled - anchor.scaled_pts_us;
        if offset_us <= 0.0 {
            return Duration::ZERO;
        }
        let target = anchor.wall + Duration::from_secs_f64(offset_us / 1_000_000.0);
        target.saturating_duration_since(now)
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

fn sanitize_speed(speed: f32) -> f32 {
    if speed.is_finite() && speed > 0.0 {
        speed
    } else {
        1.0
    }
}
