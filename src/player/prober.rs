use crate::core::{MediaSource, PlayerError, Result, TrackDescriptor, TrackFormat, TrackParams};
use crate::player::backend::MediaBackend;
use crate::player::demuxer_source::Demuxer;
use log::{debug, info, warn};

/// 探测结果：必有视频轨道，音频可选
#[derive(Debug, Clone, PartialEq)]
pub struct ProbedTracks {
    pub video: TrackDescriptor,
    pub audio: Option<TrackDescriptor>,
}

impl ProbedTracks {
    /// 播放总时长：以视频轨道为准，缺失时退回音频轨道
    pub fn duration_us(&self) -> i64 {
        if self.video.duration_us > 0 {
            self.video.duration_us
        } else {
            self.audio.as_ref().map_or(0, |audio| audio.duration_us)
        }
    }
}

/// 轨道探测器
pub struct TrackProber;

impl TrackProber {
    /// 打开媒体源，选择第一个视频轨道和第一个音频轨道
    pub fn probe(
        backend: &dyn MediaBackend,
        source: &MediaSource,
        default_frame_rate: u32,
    ) -> Result<ProbedTracks> {
        let mut demuxer = backend.open_demuxer(source)?;
        let result = Self::select_tracks(demuxer.as_ref(), default_frame_rate);
        demuxer.release();

        if let Ok(tracks) = &result {
            info!(
                "🔍 轨道探测完成: 视频 #{} {} ({:?}), 音频 {}",
                tracks.video.index,
                tracks.video.mime,
                tracks.video.dimensions(),
                tracks
                    .audio
                    .as_ref()
                    .map_or("无".to_string(), |a| format!("#{} {}", a.index, a.mime)),
            );
        }
        result
    }

    /// 在已打开的解封装器上选择轨道
    pub fn select_tracks(demuxer: &dyn Demuxer, default_frame_rate: u32) -> Result<ProbedTracks> {
        let mut video = None;
        let mut audio = None;

        for index in 0..demuxer.track_count() {
            let format = demuxer.track_format(index)?;
            debug!("轨道 #{}: {:?}", index, format);

            if format.mime.starts_with("video/") {
                if video.is_none() {
                    video = Some(video_descriptor(index, &format, default_frame_rate));
                }
            } else if format.mime.starts_with("audio/") {
                if audio.is_none() {
                    audio = audio_descriptor(index, &format);
                }
            }
        }

        // 不支持纯音频播放
        let video = video.ok_or(PlayerError::NoVideoTrack)?;
        Ok(ProbedTracks { video, audio })
    }
}

fn video_descriptor(index: usize, format: &TrackFormat, default_frame_rate: u32) -> TrackDescriptor {
    let frame_rate = format
        .frame_rate
        .filter(|fps| *fps > 0)
        .unwrap_or(default_frame_rate.max(1));

    TrackDescriptor {
        index,
        mime: format.mime.clone(),
        duration_us: format.duration_us.unwrap_or(0).max(0),
        params: TrackParams::Video {
            width: format.width.unwrap_or(0),
            height: format.height.unwrap_or(0),
            frame_rate,
        },
    }
}

fn audio_descriptor(index: usize, format: &TrackFormat) -> Option<TrackDescriptor> {
    match (format.sample_rate, format.channel_count) {
        (Some(sample_rate), Some(channel_count)) if sample_rate > 0 && channel_count > 0 => {
            Some(TrackDescriptor {
                index,
                mime: format.mime.clone(),
                duration_us: format.duration_us.unwrap_or(0).max(0),
                params: TrackParams::Audio {
                    sample_rate,
                    channel_count,
                },
            })
        }
        _ => {
            warn!("⚠️  音频轨道 #{} 缺少采样率/声道数，跳过音频", index);
            None
        }
    }
}
