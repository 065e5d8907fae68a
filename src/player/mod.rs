// 播放器核心模块

pub mod audio_output;
pub(crate) mod audio_session;
pub mod backend;
pub mod decoder;
pub mod demuxer_source; // Demuxer 抽象接口
pub mod listener;
pub mod manager;
pub mod prober;
pub(crate) mod session;
pub mod surface;
pub mod transport;
pub(crate) mod video_session;

pub use audio_output::AudioSink;
pub use backend::MediaBackend;
pub use decoder::{Decoder, OutputBuffer};
pub use demuxer_source::{Demuxer, SampleInfo};
pub use listener::{
    ChannelListener, ListenerSet, Listeners, Notification, PlaybackEvent, PlaybackEventListener,
    ProgressListener, VideoInfoListener,
};
pub use manager::Player;
pub use prober::{ProbedTracks, TrackProber};
pub use surface::{RenderSurface, SurfaceSlot};
pub use transport::{SeekRequest, TransportController};
