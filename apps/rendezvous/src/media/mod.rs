//! Remote track delivery and the observer lifecycle around it.

pub mod audio_buffer;
pub mod frame;
pub mod observer;
pub mod receiver;
pub mod source;
pub mod tracks;

pub use audio_buffer::{AudioFormatError, AudioReadBuffer, AudioReadStream, ReadStatus};
pub use frame::{Argb32Frame, AudioFrame, FrameError, I420aFrame, VideoFrame};
pub use observer::{Observer, ObserverSlot, SinkSource};
pub use receiver::{MediaReceiver, MediaReceiverHandle, StreamEvent, TrackSlot};
pub use source::FanoutSource;
pub use tracks::{
    AudioCallback, AudioFrameKind, AudioFrameObserver, AudioTrack, DataCallback,
    DataChannelEvent, DataChannelObserver, DataChannelState, DataEventKind, DataTrack,
    RemoteTrack, Track, TrackKind, VideoCallback, VideoFrameKind, VideoFrameObserver, VideoTrack,
};
