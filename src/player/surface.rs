use crate::core::VideoFrame;
use parking_lot::RwLock;
use std::sync::Arc;

/// 渲染表面（纹理/着色器细节由渲染器负责，核心只负责交付帧）
pub trait RenderSurface: Send + Sync {
    /// 表面是否仍然可用
    fn is_valid(&self) -> bool {
        true
    }

    /// 显示一帧
    fn present(&self, frame: &VideoFrame<'_>);
}

/// 当前渲染目标
///
/// 控制线程通过 `publish` 原子替换引用；视频解码线程在每次输出帧时读取最新值，
/// 不缓存旧引用。
#[derive(Clone, Default)]
pub struct SurfaceSlot {
    current: Arc<RwLock<Option<Arc<dyn RenderSurface>>>>,
}

impl SurfaceSlot {
    pub fn new(surface: Option<Arc<dyn RenderSurface>>) -> Self {
        Self {
            current: Arc::new(RwLock::new(surface)),
        }
    }

    pub fn publish(&self, surface: Option<Arc<dyn RenderSurface>>) {
        *self.current.write() = surface;
    }

    pub fn current(&self) -> Option<Arc<dyn RenderSurface>> {
        self.current.read().clone()
    }

    /// 当前表面存在且有效
    pub fn valid(&self) -> Option<Arc<dyn RenderSurface>> {
        self.current().filter(|surface| surface.is_valid())
    }
}
