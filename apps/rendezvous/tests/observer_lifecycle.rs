use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use dispatch_queue::Dispatcher;
use rendezvous::media::{
    AudioFrame, AudioFrameKind, AudioTrack, I420aFrame, MediaReceiver, MediaReceiverHandle,
    RemoteTrack, VideoCallback, VideoFrame, VideoFrameKind, VideoTrack,
};

const TOGGLES: u64 = 2_000;

#[test_timeout::timeout(120)]
fn cleared_callbacks_never_see_another_frame() {
    let track = VideoTrack::new("camera");
    let retired = Arc::new(AtomicU64::new(0));
    let violations = Arc::new(AtomicUsize::new(0));
    let delivered = Arc::new(AtomicUsize::new(0));
    let stop = Arc::new(AtomicBool::new(false));

    let deliverer = {
        let track = Arc::clone(&track);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let (y, u, v) = ([16u8; 16], [128u8; 4], [128u8; 4]);
            let frame = I420aFrame::packed(4, 4, &y, &u, &v);
            while !stop.load(Ordering::Acquire) {
                track.deliver_i420a(&frame);
            }
        })
    };

    for generation in 1..=TOGGLES {
        let retired_seen = Arc::clone(&retired);
        let violations = Arc::clone(&violations);
        let delivered = Arc::clone(&delivered);
        let callback: VideoCallback = Arc::new(move |_: VideoFrame<'_>| {
            if retired_seen.load(Ordering::Acquire) >= generation {
                violations.fetch_add(1, Ordering::SeqCst);
            }
            delivered.fetch_add(1, Ordering::Relaxed);
        });
        track.set_callback(VideoFrameKind::I420a, Some(callback));
        thread::yield_now();
        track.set_callback(VideoFrameKind::I420a, None);
        assert!(!track.has_observer());
        retired.store(generation, Ordering::Release);
    }

    stop.store(true, Ordering::Release);
    deliverer.join().expect("deliverer");

    assert_eq!(violations.load(Ordering::SeqCst), 0);
    assert_eq!(track.source().sink_count(), 0);
}

#[test_timeout::timeout(120)]
fn competing_setters_leave_one_registration() {
    let track = AudioTrack::new("microphone");
    let calls = Arc::new(AtomicUsize::new(0));

    let setters: Vec<_> = (0..4)
        .map(|worker| {
            let track = Arc::clone(&track);
            let calls = Arc::clone(&calls);
            thread::spawn(move || {
                for round in 0..500 {
                    if (round + worker) % 3 == 0 {
                        track.set_callback(AudioFrameKind::Pcm, None);
                    } else {
                        let calls = Arc::clone(&calls);
                        track.set_callback(
                            AudioFrameKind::Pcm,
                            Some(Arc::new(move |_: &AudioFrame<'_>| {
                                calls.fetch_add(1, Ordering::Relaxed);
                            })),
                        );
                    }
                }
            })
        })
        .collect();
    for setter in setters {
        setter.join().expect("setter");
    }

    assert!(track.source().sink_count() <= 1);
    assert_eq!(track.source().sink_count() == 1, track.has_observer());

    let counter = Arc::clone(&calls);
    track.set_callback(
        AudioFrameKind::Pcm,
        Some(Arc::new(move |_: &AudioFrame<'_>| {
            counter.fetch_add(1, Ordering::Relaxed);
        })),
    );
    let before = calls.load(Ordering::Relaxed);
    let samples = [0u8; 320];
    let frame = AudioFrame {
        data: &samples,
        bits_per_sample: 16,
        sample_rate: 16_000,
        channels: 1,
        frames: 160,
    };
    assert_eq!(track.deliver_audio(&frame), 1);
    assert_eq!(calls.load(Ordering::Relaxed), before + 1);

    track.detach();
    assert_eq!(track.deliver_audio(&frame), 0);
    assert_eq!(track.source().sink_count(), 0);
}

#[test_timeout::timeout(120)]
fn unpairing_races_setters_and_delivery() {
    let mut dispatcher: Dispatcher<MediaReceiver> = Dispatcher::new();
    let handle = MediaReceiverHandle::new(dispatcher.handle());
    let mut receiver = MediaReceiver::new();

    let track = VideoTrack::new("camera");
    assert!(handle.on_track_paired(RemoteTrack::Video(Arc::clone(&track))));
    dispatcher.drain(&mut receiver);
    assert!(receiver.slot("camera").is_some());

    let detached = Arc::new(AtomicBool::new(false));
    let late_calls = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));
    let stop = Arc::new(AtomicBool::new(false));

    let setter = {
        let track = Arc::clone(&track);
        let detached = Arc::clone(&detached);
        let late_calls = Arc::clone(&late_calls);
        let calls = Arc::clone(&calls);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut install = true;
            while !stop.load(Ordering::Acquire) {
                let callback = install.then(|| {
                    let detached = Arc::clone(&detached);
                    let late_calls = Arc::clone(&late_calls);
                    let calls = Arc::clone(&calls);
                    Arc::new(move |_: VideoFrame<'_>| {
                        if detached.load(Ordering::Acquire) {
                            late_calls.fetch_add(1, Ordering::SeqCst);
                        }
                        calls.fetch_add(1, Ordering::Relaxed);
                    }) as VideoCallback
                });
                track.set_callback(VideoFrameKind::I420a, callback);
                install = !install;
            }
        })
    };

    let deliverer = {
        let track = Arc::clone(&track);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let (y, u, v) = ([16u8; 16], [128u8; 4], [128u8; 4]);
            let frame = I420aFrame::packed(4, 4, &y, &u, &v);
            while !stop.load(Ordering::Acquire) {
                track.deliver_i420a(&frame);
            }
        })
    };

    let unpairer = {
        let handle = handle.clone();
        let track = Arc::clone(&track);
        let calls = Arc::clone(&calls);
        thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(5);
            while calls.load(Ordering::Relaxed) < 100 && Instant::now() < deadline {
                thread::yield_now();
            }
            handle.on_track_unpaired(RemoteTrack::Video(track))
        })
    };

    while receiver.slot("camera").is_some() {
        dispatcher.drain(&mut receiver);
        thread::yield_now();
    }
    detached.store(true, Ordering::Release);
    assert!(unpairer.join().expect("unpairer"));

    thread::sleep(Duration::from_millis(50));
    stop.store(true, Ordering::Release);
    setter.join().expect("setter");
    deliverer.join().expect("deliverer");

    assert!(calls.load(Ordering::Relaxed) > 0);
    assert_eq!(late_calls.load(Ordering::SeqCst), 0);
    assert!(!track.has_observer());
    assert_eq!(track.source().sink_count(), 0);
}
