// 媒体后端实现

pub mod synthetic;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

#[cfg(feature = "cpal")]
pub mod cpal_sink;

pub use synthetic::{FrameRecorder, PresentedFrame, StatsSnapshot, SyntheticBackend, SyntheticMedia};

#[cfg(feature = "ffmpeg")]
pub use self::ffmpeg::{FfmpegBackend, FfmpegDecoder, FfmpegDemuxer};

#[cfg(feature = "cpal")]
pub use cpal_sink::CpalSink;
