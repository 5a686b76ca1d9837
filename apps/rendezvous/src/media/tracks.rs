use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::audio_buffer::AudioReadStream;
use super::frame::{Argb32Frame, AudioFrame, I420aFrame, VideoFrame, i420a_to_argb32};
use super::observer::{Observer, ObserverSlot, SinkSource};
use super::source::FanoutSource;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VideoFrameKind {
    I420a,
    Argb32,
}

pub type VideoCallback = Arc<dyn Fn(VideoFrame<'_>) + Send + Sync>;

#[derive(Default)]
struct VideoCallbacks {
    i420a: Option<VideoCallback>,
    argb32: Option<VideoCallback>,
    argb_scratch: Vec<u8>,
}

#[derive(Default)]
pub struct VideoFrameObserver {
    inner: Mutex<VideoCallbacks>,
}

impl VideoFrameObserver {
    pub fn on_i420a_frame(&self, frame: &I420aFrame<'_>) {
        let mut inner = self.inner.lock();
        if let Some(callback) = inner.i420a.clone() {
            callback(VideoFrame::I420a(frame));
        }
        let Some(callback) = inner.argb32.clone() else {
            return;
        };
        let mut scratch = std::mem::take(&mut inner.argb_scratch);
        match i420a_to_argb32(frame, &mut scratch) {
            Ok(stride) => {
                let argb = Argb32Frame {
                    width: frame.width,
                    height: frame.height,
                    stride,
                    data: &scratch,
                };
                callback(VideoFrame::Argb32(&argb));
            }
            Err(err) => {
                debug!(target: "rendezvous::media", error = %err, "dropping unconvertible frame");
            }
        }
        inner.argb_scratch = scratch;
    }

    pub fn on_argb32_frame(&self, frame: &Argb32Frame<'_>) {
        let callback = self.inner.lock().argb32.clone();
        if let Some(callback) = callback {
            callback(VideoFrame::Argb32(frame));
        }
    }
}

impl Observer for VideoFrameObserver {
    type Kind = VideoFrameKind;
    type Callback = VideoCallback;

    fn install(&self, kind: VideoFrameKind, callback: Option<VideoCallback>) {
        let mut inner = self.inner.lock();
        match kind {
            VideoFrameKind::I420a => inner.i420a = callback,
            VideoFrameKind::Argb32 => {
                inner.argb32 = callback;
                if inner.argb32.is_none() {
                    inner.argb_scratch = Vec::new();
                }
            }
        }
    }

    fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.i420a.is_none() && inner.argb32.is_none()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AudioFrameKind {
    Pcm,
}

pub type AudioCallback = Arc<dyn Fn(&AudioFrame<'_>) + Send + Sync>;

#[derive(Default)]
pub struct AudioFrameObserver {
    callback: Mutex<Option<AudioCallback>>,
}

impl AudioFrameObserver {
    pub fn on_audio_frame(&self, frame: &AudioFrame<'_>) {
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(frame);
        }
    }
}

impl Observer for AudioFrameObserver {
    type Kind = AudioFrameKind;
    type Callback = AudioCallback;

    fn install(&self, _kind: AudioFrameKind, callback: Option<AudioCallback>) {
        *self.callback.lock() = callback;
    }

    fn is_empty(&self) -> bool {
        self.callback.lock().is_none()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataChannelState {
    Open,
    Closing,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataEventKind {
    Message,
    Buffering,
    State,
}

#[derive(Debug, Clone, Copy)]
pub enum DataChannelEvent<'a> {
    Message { binary: bool, data: &'a [u8] },
    Buffering { previous: usize, current: usize, limit: usize },
    State(DataChannelState),
}

impl DataChannelEvent<'_> {
    pub fn kind(&self) -> DataEventKind {
        match self {
            DataChannelEvent::Message { .. } => DataEventKind::Message,
            DataChannelEvent::Buffering { .. } => DataEventKind::Buffering,
            DataChannelEvent::State(_) => DataEventKind::State,
        }
    }
}

pub type DataCallback = Arc<dyn Fn(DataChannelEvent<'_>) + Send + Sync>;

#[derive(Default)]
struct DataCallbacks {
    message: Option<DataCallback>,
    buffering: Option<DataCallback>,
    state: Option<DataCallback>,
}

impl DataCallbacks {
    fn slot(&mut self, kind: DataEventKind) -> &mut Option<DataCallback> {
        match kind {
            DataEventKind::Message => &mut self.message,
            DataEventKind::Buffering => &mut self.buffering,
            DataEventKind::State => &mut self.state,
        }
    }
}

#[derive(Default)]
pub struct DataChannelObserver {
    callbacks: Mutex<DataCallbacks>,
}

impl DataChannelObserver {
    pub fn on_event(&self, event: DataChannelEvent<'_>) {
        let callback = self.callbacks.lock().slot(event.kind()).clone();
        if let Some(callback) = callback {
            callback(event);
        }
    }
}

impl Observer for DataChannelObserver {
    type Kind = DataEventKind;
    type Callback = DataCallback;

    fn install(&self, kind: DataEventKind, callback: Option<DataCallback>) {
        *self.callbacks.lock().slot(kind) = callback;
    }

    fn is_empty(&self) -> bool {
        let callbacks = self.callbacks.lock();
        callbacks.message.is_none() && callbacks.buffering.is_none() && callbacks.state.is_none()
    }
}

/// A remote track plus the native sink list its frames are delivered through.
pub struct Track<O: Observer> {
    name: String,
    source: Arc<FanoutSource<O>>,
    slot: ObserverSlot<O>,
}

impl<O: Observer> Track<O> {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        let source = Arc::new(FanoutSource::new());
        let slot = ObserverSlot::new(name.clone(), source.clone() as Arc<dyn SinkSource<O>>);
        Arc::new(Self { name, source, slot })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_callback(&self, kind: O::Kind, callback: Option<O::Callback>) {
        self.slot.set_callback(kind, callback);
    }

    pub fn has_observer(&self) -> bool {
        self.slot.is_registered()
    }

    /// Native delivery path.
    pub fn source(&self) -> &Arc<FanoutSource<O>> {
        &self.source
    }

    pub fn detach(&self) {
        self.slot.detach();
    }
}

impl<O: Observer> fmt::Debug for Track<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("name", &self.name)
            .field("sinks", &self.source.sink_count())
            .finish()
    }
}

pub type VideoTrack = Track<VideoFrameObserver>;
pub type AudioTrack = Track<AudioFrameObserver>;
pub type DataTrack = Track<DataChannelObserver>;

impl Track<VideoFrameObserver> {
    pub fn deliver_i420a(&self, frame: &I420aFrame<'_>) -> usize {
        self.source.deliver(|observer| observer.on_i420a_frame(frame))
    }

    /// For sources that already produce ARGB; only ARGB32 callbacks see these.
    pub fn deliver_argb32(&self, frame: &Argb32Frame<'_>) -> usize {
        self.source.deliver(|observer| observer.on_argb32_frame(frame))
    }
}

impl Track<AudioFrameObserver> {
    pub fn deliver_audio(&self, frame: &AudioFrame<'_>) -> usize {
        self.source.deliver(|observer| observer.on_audio_frame(frame))
    }

    /// Buffer incoming audio for pull-style reads. Dropping the stream unregisters it.
    pub fn read_stream(&self, buffer_ms: u32) -> AudioReadStream {
        AudioReadStream::attach(
            self.source.clone() as Arc<dyn SinkSource<AudioFrameObserver>>,
            buffer_ms,
        )
    }
}

impl Track<DataChannelObserver> {
    pub fn deliver_event(&self, event: DataChannelEvent<'_>) -> usize {
        self.source.deliver(|observer| observer.on_event(event))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
    Data,
}

#[derive(Clone, Debug)]
pub enum RemoteTrack {
    Video(Arc<VideoTrack>),
    Audio(Arc<AudioTrack>),
    Data(Arc<DataTrack>),
}

impl RemoteTrack {
    pub fn name(&self) -> &str {
        match self {
            RemoteTrack::Video(track) => track.name(),
            RemoteTrack::Audio(track) => track.name(),
            RemoteTrack::Data(track) => track.name(),
        }
    }

    pub fn kind(&self) -> TrackKind {
        match self {
            RemoteTrack::Video(_) => TrackKind::Video,
            RemoteTrack::Audio(_) => TrackKind::Audio,
            RemoteTrack::Data(_) => TrackKind::Data,
        }
    }

    pub fn detach(&self) {
        match self {
            RemoteTrack::Video(track) => track.detach(),
            RemoteTrack::Audio(track) => track.detach(),
            RemoteTrack::Data(track) => track.detach(),
        }
    }

    pub fn is_same(&self, other: &RemoteTrack) -> bool {
        match (self, other) {
            (RemoteTrack::Video(a), RemoteTrack::Video(b)) => Arc::ptr_eq(a, b),
            (RemoteTrack::Audio(a), RemoteTrack::Audio(b)) => Arc::ptr_eq(a, b),
            (RemoteTrack::Data(a), RemoteTrack::Data(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn argb_callback_receives_converted_frames() {
        let track = VideoTrack::new("camera");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        track.set_callback(
            VideoFrameKind::Argb32,
            Some(Arc::new(move |frame: VideoFrame<'_>| {
                if let VideoFrame::Argb32(argb) = frame {
                    sink.lock()
                        .push((argb.width, argb.height, argb.stride, argb.data[..4].to_vec()));
                }
            })),
        );

        let y = [235u8; 4];
        let chroma = [128u8; 1];
        let frame = I420aFrame::packed(2, 2, &y, &chroma, &chroma);
        assert_eq!(track.deliver_i420a(&frame), 1);
        assert_eq!(track.deliver_i420a(&frame), 1);

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (2, 2, 8, vec![255, 255, 255, 255]));
    }

    #[test]
    fn each_variant_is_independent() {
        let track = VideoTrack::new("camera");
        let i420_hits = Arc::new(AtomicUsize::new(0));
        let argb_hits = Arc::new(AtomicUsize::new(0));
        let (i, a) = (i420_hits.clone(), argb_hits.clone());
        track.set_callback(
            VideoFrameKind::I420a,
            Some(Arc::new(move |_: VideoFrame<'_>| {
                i.fetch_add(1, Ordering::SeqCst);
            })),
        );
        track.set_callback(
            VideoFrameKind::Argb32,
            Some(Arc::new(move |_: VideoFrame<'_>| {
                a.fetch_add(1, Ordering::SeqCst);
            })),
        );

        let y = [16u8; 4];
        let chroma = [128u8; 1];
        let frame = I420aFrame::packed(2, 2, &y, &chroma, &chroma);
        track.deliver_i420a(&frame);
        track.set_callback(VideoFrameKind::Argb32, None);
        assert!(track.has_observer());
        track.deliver_i420a(&frame);

        assert_eq!(i420_hits.load(Ordering::SeqCst), 2);
        assert_eq!(argb_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn argb_sources_bypass_the_i420a_callback() {
        let track = VideoTrack::new("screen");
        let i420_hits = Arc::new(AtomicUsize::new(0));
        let argb_rows = Arc::new(Mutex::new(Vec::new()));
        let hits = i420_hits.clone();
        track.set_callback(
            VideoFrameKind::I420a,
            Some(Arc::new(move |_: VideoFrame<'_>| {
                hits.fetch_add(1, Ordering::SeqCst);
            })),
        );

        let pixels = [0x10u8, 0x20, 0x30, 0xff, 0x40, 0x50, 0x60, 0xff];
        let frame = Argb32Frame {
            width: 2,
            height: 1,
            stride: 8,
            data: &pixels,
        };
        assert_eq!(track.deliver_argb32(&frame), 1);
        assert_eq!(i420_hits.load(Ordering::SeqCst), 0);

        let rows = argb_rows.clone();
        track.set_callback(
            VideoFrameKind::Argb32,
            Some(Arc::new(move |frame: VideoFrame<'_>| {
                if let VideoFrame::Argb32(argb) = frame {
                    rows.lock().push(argb.data.to_vec());
                }
            })),
        );
        track.deliver_argb32(&frame);
        assert_eq!(*argb_rows.lock(), vec![pixels.to_vec()]);
        assert_eq!(i420_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn data_events_route_by_kind() {
        let track = DataTrack::new("rendezvous");
        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = messages.clone();
        track.set_callback(
            DataEventKind::Message,
            Some(Arc::new(move |event: DataChannelEvent<'_>| {
                if let DataChannelEvent::Message { data, .. } = event {
                    sink.lock().push(data.to_vec());
                }
            })),
        );

        track.deliver_event(DataChannelEvent::State(DataChannelState::Open));
        track.deliver_event(DataChannelEvent::Message {
            binary: true,
            data: b"ping",
        });
        assert_eq!(*messages.lock(), vec![b"ping".to_vec()]);

        track.set_callback(DataEventKind::Message, None);
        assert!(!track.has_observer());
        assert_eq!(track.source().sink_count(), 0);
    }

    #[test]
    fn remote_track_identity() {
        let video = RemoteTrack::Video(VideoTrack::new("a"));
        let same = video.clone();
        let other = RemoteTrack::Video(VideoTrack::new("a"));
        assert!(video.is_same(&same));
        assert!(!video.is_same(&other));
        assert_eq!(video.kind(), TrackKind::Video);
        assert_eq!(video.name(), "a");
    }
}
