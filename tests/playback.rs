use avsync_player::backend::{FrameRecorder, SyntheticBackend, SyntheticMedia};
use avsync_player::core::ErrorKind;
use avsync_player::{
    ChannelListener, FilterId, Listeners, MediaBackend, MediaSource, Notification, PlaybackEvent,
    PlaybackSpeed, Player, PlayerConfig, PlayerError, StreamKind, TransportState,
};
use avsync_player::player::ProgressListener;
use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

struct Harness {
    backend: Arc<SyntheticBackend>,
    player: Player,
    surface: Arc<FrameRecorder>,
    rx: Receiver<Notification>,
}

impl Harness {
    fn new(uri: &str, media: SyntheticMedia) -> Self {
        let backend = Arc::new(SyntheticBackend::new());
        backend.register(uri, media);
        let (listener, rx) = ChannelListener::new();
        let player = Player::new(
            backend.clone() as Arc<dyn MediaBackend>,
            PlayerConfig::default(),
            Listeners::shared(listener),
        );
        let surface = FrameRecorder::new("main");
        player.update_render_target(Some(surface.clone()));
        Self {
            backend,
            player,
            surface,
            rx,
        }
    }

    fn wait_for_end(&self, timeout: Duration) -> bool {
        wait_until(timeout, || {
            self.player.state() == TransportState::Stopped && !self.player.is_active()
        })
    }

    fn events(&self) -> Vec<PlaybackEvent> {
        self.rx
            .try_iter()
            .filter_map(|notification| match notification {
                Notification::Event(event) => Some(event),
                _ => None,
            })
            .collect()
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn sequences(frames: &[avsync_player::backend::PresentedFrame]) -> Vec<u32> {
    frames.iter().map(|frame| frame.sequence).collect()
}

#[test]
fn test_duration_and_dimensions_reported_before_decoding() {
    let h = Harness::new("mem://a", SyntheticMedia::new(1_000).with_video(320, 240, 30));
    h.player.initiate("mem://a".into()).unwrap();

    assert_eq!(h.rx.recv().unwrap(), Notification::Duration(1_000));
    assert_eq!(h.rx.recv().unwrap(), Notification::Dimensions(320, 240));
    assert_eq!(
        h.rx.recv().unwrap(),
        Notification::Event(PlaybackEvent::Initiated {
            uri: "mem://a".to_string()
        })
    );

    assert!(h.wait_for_end(Duration::from_secs(5)));
    let dimensions = h
        .rx
        .try_iter()
        .filter(|n| matches!(n, Notification::Dimensions(..)))
        .count();
    assert_eq!(dimensions, 0);
}

#[test]
fn test_plays_to_end_and_releases_everything() {
    let h = Harness::new(
        "mem://a",
        SyntheticMedia::new(1_000)
            .with_video(320, 240, 30)
            .with_audio(44_100, 2),
    );
    h.player.initiate("mem://a".into()).unwrap();
    assert!(h.wait_for_end(Duration::from_secs(5)));

    let frames = h.surface.take();
    assert_eq!(sequences(&frames), (0..30).collect::<Vec<_>>());

    let events = h.events();
    assert!(events.contains(&PlaybackEvent::EndOfStream {
        stream: StreamKind::Video
    }));
    assert!(events.contains(&PlaybackEvent::EndOfStream {
        stream: StreamKind::Audio
    }));
    assert!(!events.iter().any(|e| matches!(e, PlaybackEvent::Error { .. })));

    let stats = h.backend.stats();
    assert!(stats.all_released(), "{:?}", stats);
    assert_eq!(stats.sinks_opened, 1);
    // 1 秒 44.1kHz 立体声 16 位
    assert_eq!(stats.pcm_bytes, 44_100 * 2 * 2);
}

#[test]
fn test_pause_and_resume_neither_skips_nor_repeats() {
    let h = Harness::new("mem://a", SyntheticMedia::new(2_000).with_video(320, 240, 30));
    h.player.initiate("mem://a".into()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || h.surface.presented() >= 10));

    h.player.pause();
    assert_eq!(h.player.state(), TransportState::Paused);
    thread::sleep(Duration::from_millis(200));
    let paused_at = h.surface.presented();
    thread::sleep(Duration::from_millis(300));
    assert_eq!(h.surface.presented(), paused_at);

    h.player.play().unwrap();
    assert!(h.wait_for_end(Duration::from_secs(5)));
    assert_eq!(sequences(&h.surface.take()), (0..60).collect::<Vec<_>>());

    let events = h.events();
    assert!(events.contains(&PlaybackEvent::Paused));
    assert_eq!(
        events.iter().filter(|e| **e == PlaybackEvent::Playing).count(),
        2
    );
}

#[test]
fn test_seeks_while_paused_collapse_into_last() {
    let h = Harness::new("mem://a", SyntheticMedia::new(3_000).with_video(320, 240, 30));
    h.player.initiate("mem://a".into()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || h.surface.presented() >= 5));

    h.player.pause();
    thread::sleep(Duration::from_millis(100));
    let seeks_before = h.backend.stats().seeks;

    h.player.seek(10.0).unwrap();
    h.player.seek(40.0).unwrap();
    h.player.seek(70.0).unwrap();
    thread::sleep(Duration::from_millis(100));
    // 暂停期间不执行
    assert_eq!(h.backend.stats().seeks, seeks_before);
    h.surface.take();

    let resumed_from = h.surface.presented();
    h.player.play().unwrap();
    assert!(wait_until(Duration::from_secs(2), || h.backend.stats().seeks > seeks_before));
    assert!(wait_until(Duration::from_secs(2), || h.surface.presented() >= resumed_from + 5));
    h.player.stop();

    assert_eq!(h.backend.stats().seeks, seeks_before + 1);
    // 70% × 3s = 2.1s，回退到 2.0s 的关键帧
    let frames = h.surface.take();
    assert_eq!(frames[0].sequence, 60);
    assert_eq!(frames[0].pts_us, 2_000_000);

    let seeking = h
        .events()
        .into_iter()
        .filter(|e| matches!(e, PlaybackEvent::Seeking { .. }))
        .count();
    assert_eq!(seeking, 3);
}

#[test]
fn test_seek_during_playback_restarts_at_sync_point() {
    let h = Harness::new(
        "mem://a",
        SyntheticMedia::new(1_000)
            .with_video(320, 240, 30)
            .with_gop(10),
    );
    h.player.initiate("mem://a".into()).unwrap();
    assert!(wait_until(Duration::from_secs(3), || h.surface.presented() >= 20));
    h.player.seek(50.0).unwrap();
    assert!(h.wait_for_end(Duration::from_secs(5)));

    let frames = sequences(&h.surface.take());
    let resumed = frames.iter().rposition(|&seq| seq == 10).unwrap();
    assert_eq!(frames[resumed..], (10..30).collect::<Vec<_>>()[..]);
}

#[test]
fn test_both_streams_seek_to_same_target_without_audio_duration() {
    let h = Harness::new(
        "mem://a",
        SyntheticMedia::new(4_000)
            .with_video(320, 240, 30)
            .with_audio(44_100, 2)
            .without_audio_duration(),
    );
    h.player.initiate("mem://a".into()).unwrap();
    assert_eq!(h.rx.recv().unwrap(), Notification::Duration(4_000));
    assert!(wait_until(Duration::from_secs(2), || h.surface.presented() >= 5));

    h.player.seek(50.0).unwrap();
    assert!(wait_until(Duration::from_secs(2), || h.backend.seek_targets().len() >= 2));
    h.player.stop();

    let mut targets = h.backend.seek_targets();
    targets.sort();
    assert_eq!(
        targets,
        vec![
            ("audio/mp4a-latm".to_string(), 2_000_000),
            ("video/avc".to_string(), 2_000_000),
        ]
    );
}

#[test]
fn test_seek_with_audio_flushes_sink_once() {
    let h = Harness::new(
        "mem://a",
        SyntheticMedia::new(3_000)
            .with_video(320, 240, 30)
            .with_audio(44_100, 2),
    );
    h.player.initiate("mem://a".into()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || h.surface.presented() >= 5));
    assert_eq!(h.backend.stats().sink_flushes, 0);

    h.player.seek(50.0).unwrap();
    assert!(wait_until(Duration::from_secs(2), || h.backend.stats().sink_flushes >= 1));
    assert!(wait_until(Duration::from_secs(2), || h.backend.stats().flushes >= 2));
    thread::sleep(Duration::from_millis(100));
    h.player.stop();

    let stats = h.backend.stats();
    assert_eq!(stats.sink_flushes, 1);
    assert_eq!(stats.flushes, 2);
    assert_eq!(stats.seeks, 2);
}

#[test]
fn test_invalid_seeks_are_rejected() {
    let h = Harness::new("mem://a", SyntheticMedia::new(2_000).with_video(320, 240, 30));
    assert!(matches!(h.player.seek(50.0), Err(PlayerError::NoActivePlayback)));

    h.player.initiate("mem://a".into()).unwrap();
    assert!(matches!(h.player.seek(-1.0), Err(PlayerError::InvalidSeek(_))));
    assert!(matches!(h.player.seek(100.5), Err(PlayerError::InvalidSeek(_))));
    assert!(matches!(h.player.seek(f64::NAN), Err(PlayerError::InvalidSeek(_))));
    assert!(h.player.seek(100.0).is_ok());

    h.player.stop();
    assert!(matches!(h.player.seek(10.0), Err(PlayerError::NoActivePlayback)));
}

#[test]
fn test_double_speed_halves_frame_interval() {
    let h = Harness::new("mem://a", SyntheticMedia::new(2_000).with_video(320, 240, 30));
    assert_eq!(h.player.set_speed("2.0x"), PlaybackSpeed::Double);
    h.player.initiate("mem://a".into()).unwrap();
    assert!(wait_until(Duration::from_secs(3), || h.surface.presented() >= 30));
    h.player.stop();

    let frames = h.surface.take();
    let span = frames[25].at.duration_since(frames[5].at);
    let interval_ms = span.as_secs_f64() * 1000.0 / 20.0;
    // 30fps 在 2 倍速下约 16.7ms 一帧
    assert!(
        (10.0..25.0).contains(&interval_ms),
        "frame interval {:.1}ms",
        interval_ms
    );
    assert!(h.events().contains(&PlaybackEvent::SpeedChanged {
        speed: PlaybackSpeed::Double
    }));
}

#[test]
fn test_speed_change_reaches_audio_sink() {
    let h = Harness::new(
        "mem://a",
        SyntheticMedia::new(3_000)
            .with_video(320, 240, 30)
            .with_audio(44_100, 2),
    );
    h.player.initiate("mem://a".into()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || h.backend.stats().sink_rate == Some(1.0)));

    h.player.set_speed("2.0x");
    assert!(wait_until(Duration::from_secs(2), || h.backend.stats().sink_rate == Some(2.0)));
    h.player.set_speed("0.5x");
    assert!(wait_until(Duration::from_secs(2), || h.backend.stats().sink_rate == Some(0.5)));
    h.player.stop();
}

#[test]
fn test_sink_without_rate_control_keeps_video_paced() {
    let h = Harness::new(
        "mem://a",
        SyntheticMedia::new(2_000)
            .with_video(320, 240, 30)
            .with_audio(44_100, 2),
    );
    h.backend.set_sink_rate_control(false);
    h.player.set_speed("2.0x");
    h.player.initiate("mem://a".into()).unwrap();
    assert!(wait_until(Duration::from_secs(3), || h.surface.presented() >= 30));
    h.player.stop();

    let frames = h.surface.take();
    let span = frames[25].at.duration_since(frames[5].at);
    let interval_ms = span.as_secs_f64() * 1000.0 / 20.0;
    assert!(
        (10.0..25.0).contains(&interval_ms),
        "frame interval {:.1}ms",
        interval_ms
    );

    let stats = h.backend.stats();
    assert_eq!(stats.sink_rate, None);
    assert!(stats.pcm_bytes > 0);
    assert!(stats.all_released(), "{:?}", stats);
    assert!(!h
        .events()
        .iter()
        .any(|e| matches!(e, PlaybackEvent::Error { .. })));
}

#[test]
fn test_unknown_speed_label_falls_back_to_normal() {
    let h = Harness::new("mem://a", SyntheticMedia::new(500).with_video(320, 240, 30));
    assert_eq!(h.player.set_speed("3x"), PlaybackSpeed::Normal);
    assert_eq!(h.player.speed(), PlaybackSpeed::Normal);
}

#[test]
fn test_position_follows_wall_clock_and_stop_is_prompt() {
    let h = Harness::new("mem://demo", SyntheticMedia::demo());
    h.player.initiate("mem://demo".into()).unwrap();
    thread::sleep(Duration::from_millis(1_500));

    let position = h
        .rx
        .try_iter()
        .filter_map(|n| match n {
            Notification::Position(ms) => Some(ms),
            _ => None,
        })
        .last()
        .unwrap();
    assert!((1_200..=1_800).contains(&position), "position {}ms", position);

    let started = Instant::now();
    h.player.stop();
    assert!(started.elapsed() < Duration::from_millis(300), "{:?}", started.elapsed());
    assert!(!h.player.is_active());
    assert!(h.backend.stats().all_released());
    assert!(h.events().contains(&PlaybackEvent::Stopped));
}

#[test]
fn test_new_source_after_stop_does_not_resurrect_old_session() {
    let h = Harness::new("mem://long", SyntheticMedia::demo());
    h.backend
        .register("mem://short", SyntheticMedia::new(1_000).with_video(160, 120, 30));

    h.player.initiate("mem://long".into()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || h.surface.presented() >= 3));
    h.player.stop();
    h.surface.take();
    let _ = h.rx.try_iter().count();

    h.player.initiate("mem://short".into()).unwrap();
    assert!(h.wait_for_end(Duration::from_secs(5)));
    assert_eq!(sequences(&h.surface.take()), (0..30).collect::<Vec<_>>());

    let dimensions: Vec<_> = h
        .rx
        .try_iter()
        .filter(|n| matches!(n, Notification::Dimensions(..)))
        .collect();
    assert_eq!(dimensions, vec![Notification::Dimensions(160, 120)]);
    assert!(h.backend.stats().all_released());
}

#[test]
fn test_initiate_while_playing_replaces_session() {
    let h = Harness::new("mem://long", SyntheticMedia::demo());
    h.backend
        .register("mem://short", SyntheticMedia::new(500).with_video(160, 120, 30));

    h.player.initiate("mem://long".into()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || h.surface.presented() >= 3));
    h.player.initiate("mem://short".into()).unwrap();
    h.surface.take();
    assert!(h.wait_for_end(Duration::from_secs(5)));

    let frames = h.surface.take();
    assert!(frames.iter().all(|frame| frame.pts_us < 500_000));
    assert!(h.backend.stats().all_released());
}

#[test]
fn test_audio_sink_failure_keeps_video_playing() {
    let h = Harness::new(
        "mem://a",
        SyntheticMedia::new(1_000)
            .with_video(320, 240, 30)
            .with_audio(44_100, 2),
    );
    h.backend.fail_audio_sink(true);
    h.player.initiate("mem://a".into()).unwrap();
    assert!(h.wait_for_end(Duration::from_secs(5)));

    assert_eq!(h.surface.take().len(), 30);
    let events = h.events();
    assert!(events.iter().any(|e| matches!(
        e,
        PlaybackEvent::Error {
            stream: Some(StreamKind::Audio),
            kind: ErrorKind::SinkInit,
            ..
        }
    )));
    assert!(events.contains(&PlaybackEvent::EndOfStream {
        stream: StreamKind::Video
    }));
    assert!(h.backend.stats().all_released());
}

#[test]
fn test_audio_decode_error_is_isolated() {
    let h = Harness::new(
        "mem://a",
        SyntheticMedia::new(1_000)
            .with_video(320, 240, 30)
            .with_audio(44_100, 2),
    );
    h.backend.fail_decoding_after(StreamKind::Audio, 5);
    h.player.initiate("mem://a".into()).unwrap();
    assert!(h.wait_for_end(Duration::from_secs(5)));

    assert_eq!(h.surface.take().len(), 30);
    let events = h.events();
    assert!(events.iter().any(|e| matches!(
        e,
        PlaybackEvent::Error {
            stream: Some(StreamKind::Audio),
            kind: ErrorKind::RuntimeDecode,
            ..
        }
    )));
    assert!(!events.contains(&PlaybackEvent::EndOfStream {
        stream: StreamKind::Audio
    }));
    assert!(h.backend.stats().all_released());
}

#[test]
fn test_audio_only_source_is_rejected() {
    let h = Harness::new("mem://radio", SyntheticMedia::new(1_000).with_audio(44_100, 2));
    let result = h.player.initiate("mem://radio".into());
    assert!(matches!(result, Err(PlayerError::NoVideoTrack)));
    assert_eq!(h.player.state(), TransportState::Stopped);
    assert!(h.events().iter().any(|e| matches!(
        e,
        PlaybackEvent::Error {
            stream: None,
            kind: ErrorKind::NoVideoTrack,
            ..
        }
    )));
    assert!(h.backend.stats().all_released());
}

#[test]
fn test_missing_or_invalid_surface_fails_setup() {
    let h = Harness::new("mem://a", SyntheticMedia::new(1_000).with_video(320, 240, 30));
    h.player.update_render_target(None);
    assert!(matches!(
        h.player.initiate("mem://a".into()),
        Err(PlayerError::DecoderConfig(_))
    ));

    h.surface.set_valid(false);
    h.player.update_render_target(Some(h.surface.clone()));
    assert!(matches!(
        h.player.initiate("mem://a".into()),
        Err(PlayerError::DecoderConfig(_))
    ));
    assert!(!h.player.is_active());
    assert!(h.backend.stats().all_released());
}

#[test]
fn test_rejected_codec_fails_setup() {
    let h = Harness::new("mem://a", SyntheticMedia::new(1_000).with_video(320, 240, 30));
    h.backend.reject_codec("video/avc");
    assert!(matches!(
        h.player.initiate(MediaSource::from_uri("mem://a")),
        Err(PlayerError::DecoderConfig(_))
    ));
    assert_eq!(h.backend.stats().decoders_created, 0);
    assert!(h.backend.stats().all_released());
}

#[test]
fn test_render_target_swap_takes_effect_on_next_frame() {
    let h = Harness::new("mem://a", SyntheticMedia::new(2_000).with_video(320, 240, 30));
    let second = FrameRecorder::new("second");
    h.player.initiate("mem://a".into()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || h.surface.presented() >= 10));

    h.player.update_render_target(Some(second.clone()));
    assert!(h.wait_for_end(Duration::from_secs(5)));

    let mut all = sequences(&h.surface.take());
    let moved = sequences(&second.take());
    assert!(!moved.is_empty());
    all.extend(moved);
    assert_eq!(all, (0..60).collect::<Vec<_>>());
}

#[test]
fn test_frames_dropped_without_surface() {
    let h = Harness::new("mem://a", SyntheticMedia::new(1_000).with_video(320, 240, 30));
    h.player.initiate("mem://a".into()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || h.surface.presented() >= 5));

    h.player.update_render_target(None);
    let before = h.surface.presented();
    assert!(h.wait_for_end(Duration::from_secs(5)));
    // 摘除时可能正有一帧在交付
    assert!(h.surface.presented() <= before + 1);
}

#[test]
fn test_filter_selection_is_forwarded() {
    let h = Harness::new("mem://a", SyntheticMedia::new(500).with_video(320, 240, 30));
    assert_eq!(h.player.set_filter("FILTER2"), FilterId::Filter2);
    assert_eq!(h.player.set_filter("sepia"), FilterId::None);

    let notifications: Vec<_> = h.rx.try_iter().collect();
    assert_eq!(
        notifications,
        vec![
            Notification::Filter(FilterId::Filter2),
            Notification::Event(PlaybackEvent::FilterChanged {
                filter: FilterId::Filter2
            }),
            Notification::Filter(FilterId::None),
            Notification::Event(PlaybackEvent::FilterChanged {
                filter: FilterId::None
            }),
        ]
    );
}

#[test]
fn test_play_after_end_reopens_last_source() {
    let h = Harness::new("mem://a", SyntheticMedia::new(500).with_video(320, 240, 30));
    assert!(matches!(h.player.play(), Err(PlayerError::NoActivePlayback)));

    h.player.initiate("mem://a".into()).unwrap();
    assert!(h.wait_for_end(Duration::from_secs(5)));
    assert_eq!(h.surface.take().len(), 15);
    let opened = h.backend.stats().demuxers_opened;

    h.player.play().unwrap();
    assert!(h.wait_for_end(Duration::from_secs(5)));
    assert_eq!(sequences(&h.surface.take()), (0..15).collect::<Vec<_>>());
    assert!(h.backend.stats().demuxers_opened > opened);
}

#[test]
fn test_toggle_play_pause() {
    let h = Harness::new("mem://demo", SyntheticMedia::demo());
    h.player.initiate("mem://demo".into()).unwrap();
    assert_eq!(h.player.state(), TransportState::Playing);

    h.player.toggle_play_pause().unwrap();
    assert_eq!(h.player.state(), TransportState::Paused);
    h.player.toggle_play_pause().unwrap();
    assert_eq!(h.player.state(), TransportState::Playing);

    h.player.stop();
    assert_eq!(h.player.state(), TransportState::Stopped);
}

#[test]
fn test_listener_can_be_replaced_at_runtime() {
    let h = Harness::new("mem://a", SyntheticMedia::new(500).with_video(320, 240, 30));
    let (replacement, replacement_rx) = ChannelListener::new();
    h.player.set_event_listener(Some(replacement));

    h.player.initiate("mem://a".into()).unwrap();
    assert!(h.wait_for_end(Duration::from_secs(5)));

    assert!(h.events().is_empty());
    let events: Vec<_> = replacement_rx.try_iter().collect();
    assert!(events.contains(&Notification::Event(PlaybackEvent::EndOfStream {
        stream: StreamKind::Video
    })));
}

/// 在进度回调里查询播放器状态
#[derive(Default)]
struct QueryingProgress {
    player: OnceLock<Weak<Player>>,
    queries: AtomicUsize,
}

impl ProgressListener for QueryingProgress {
    fn set_duration(&self, _duration_ms: i64) {}

    fn update_position(&self, _position_ms: i64) {
        if let Some(player) = self.player.get().and_then(Weak::upgrade) {
            let _ = player.tracks();
            let _ = player.is_active();
            self.queries.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn update_frame_count(&self, _frame_count: i64) {}
}

#[test]
fn test_queries_from_callbacks_do_not_block_replacement() {
    let backend = Arc::new(SyntheticBackend::new());
    backend.register(
        "mem://a",
        SyntheticMedia::new(3_000)
            .with_video(320, 240, 30)
            .with_audio(44_100, 2),
    );
    backend.register("mem://b", SyntheticMedia::new(500).with_video(320, 240, 30));

    let progress = Arc::new(QueryingProgress::default());
    let player = Arc::new(Player::new(
        backend.clone() as Arc<dyn MediaBackend>,
        PlayerConfig::default(),
        Listeners::new().with_progress(progress.clone()),
    ));
    let _ = progress.player.set(Arc::downgrade(&player));
    let surface = FrameRecorder::new("main");
    player.update_render_target(Some(surface.clone()));

    player.initiate("mem://a".into()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || progress.queries.load(Ordering::SeqCst) >= 5));

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let replacer = {
        let player = player.clone();
        thread::spawn(move || {
            let _ = done_tx.send(player.initiate("mem://b".into()).is_ok());
        })
    };
    assert_eq!(done_rx.recv_timeout(Duration::from_secs(3)), Ok(true));
    replacer.join().unwrap();

    player.stop();
    assert!(backend.stats().all_released(), "{:?}", backend.stats());
}
