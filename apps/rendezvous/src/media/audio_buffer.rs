//! Pull-style reader over a remote audio track.
//!
//! Incoming 10 ms frames are queued (oldest dropped once `buffer_ms` worth is
//! held) and converted on read to whatever rate and channel layout the caller
//! asks for.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use thiserror::Error;
use tracing::{debug, trace};

use super::frame::AudioFrame;
use super::observer::{Observer, Registration, SinkSource};
use super::tracks::{AudioFrameKind, AudioFrameObserver};

const FRAME_MS: u32 = 10;
const DEFAULT_BUFFER_MS: u32 = 500;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AudioFormatError {
    #[error("unsupported sample width {0} bits")]
    UnsupportedBitsPerSample(u32),
    #[error("unsupported channel count {0}")]
    UnsupportedChannels(u32),
    #[error("sample rate must be non-zero")]
    ZeroSampleRate,
    #[error("buffer of {len} samples is not a multiple of {channels} channels")]
    Misaligned { len: usize, channels: u32 },
    #[error("frame declares {declared} frames but carries {actual} bytes")]
    Truncated { declared: usize, actual: usize },
    #[error("resampler failed: {0}")]
    Resampler(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadStatus {
    /// Samples taken from buffered audio; the rest of the output is silence.
    pub filled: usize,
    pub underrun: bool,
}

struct BufferedFrame {
    samples: Vec<i16>,
    sample_rate: u32,
    channels: u32,
}

#[derive(Default)]
struct ReadState {
    frames: VecDeque<BufferedFrame>,
    /// Current frame already converted to the last requested output format.
    pending: Vec<f32>,
    position: usize,
    dropped: u64,
    converter: Option<RateConverter>,
}

pub struct AudioReadBuffer {
    max_frames: usize,
    state: Mutex<ReadState>,
}

impl AudioReadBuffer {
    /// `buffer_ms` below one frame falls back to 500 ms.
    pub fn new(buffer_ms: u32) -> Self {
        let buffer_ms = if buffer_ms < FRAME_MS {
            DEFAULT_BUFFER_MS
        } else {
            buffer_ms
        };
        Self {
            max_frames: (buffer_ms / FRAME_MS).max(1) as usize,
            state: Mutex::new(ReadState::default()),
        }
    }

    pub fn capacity_frames(&self) -> usize {
        self.max_frames
    }

    pub fn buffered_frames(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.state.lock().dropped
    }

    pub fn push(&self, frame: &AudioFrame<'_>) -> Result<(), AudioFormatError> {
        let samples = widen(frame)?;
        let mut state = self.state.lock();
        if state.frames.len() >= self.max_frames {
            state.frames.pop_front();
            state.dropped += 1;
        }
        state.frames.push_back(BufferedFrame {
            samples,
            sample_rate: frame.sample_rate,
            channels: frame.channels,
        });
        Ok(())
    }

    /// Fill `out` with interleaved samples at `sample_rate` / `channels`.
    ///
    /// Missing audio is padded with silence and reported as an underrun.
    pub fn read(
        &self,
        sample_rate: u32,
        channels: u32,
        out: &mut [f32],
    ) -> Result<ReadStatus, AudioFormatError> {
        check_layout(sample_rate, channels)?;
        if out.len() % channels as usize != 0 {
            return Err(AudioFormatError::Misaligned {
                len: out.len(),
                channels,
            });
        }

        let mut state = self.state.lock();
        let mut filled = 0;
        while filled < out.len() {
            if state.position >= state.pending.len() {
                let Some(frame) = state.frames.pop_front() else {
                    break;
                };
                state.pending.clear();
                state.position = 0;
                let state = &mut *state;
                convert(&frame, sample_rate, channels, &mut state.converter, &mut state.pending)?;
                continue;
            }
            let available = &state.pending[state.position..];
            let count = available.len().min(out.len() - filled);
            out[filled..filled + count].copy_from_slice(&available[..count]);
            state.position += count;
            filled += count;
        }

        let underrun = filled < out.len();
        out[filled..].fill(0.0);
        if underrun {
            trace!(target: "rendezvous::media", filled, requested = out.len(), "audio underrun");
        }
        Ok(ReadStatus { filled, underrun })
    }
}

/// An [`AudioReadBuffer`] registered on a track; unregisters on drop.
pub struct AudioReadStream {
    buffer: Arc<AudioReadBuffer>,
    _registration: Registration<AudioFrameObserver>,
}

impl AudioReadStream {
    pub(crate) fn attach(source: Arc<dyn SinkSource<AudioFrameObserver>>, buffer_ms: u32) -> Self {
        let buffer = Arc::new(AudioReadBuffer::new(buffer_ms));
        let observer = Arc::new(AudioFrameObserver::default());
        let sink = Arc::clone(&buffer);
        observer.install(
            AudioFrameKind::Pcm,
            Some(Arc::new(move |frame: &AudioFrame<'_>| {
                if let Err(err) = sink.push(frame) {
                    debug!(target: "rendezvous::media", error = %err, "dropping audio frame");
                }
            })),
        );
        Self {
            buffer,
            _registration: Registration::new(source, observer),
        }
    }

    pub fn buffer(&self) -> &AudioReadBuffer {
        &self.buffer
    }

    pub fn read(
        &self,
        sample_rate: u32,
        channels: u32,
        out: &mut [f32],
    ) -> Result<ReadStatus, AudioFormatError> {
        self.buffer.read(sample_rate, channels, out)
    }
}

fn check_layout(sample_rate: u32, channels: u32) -> Result<(), AudioFormatError> {
    if sample_rate == 0 {
        return Err(AudioFormatError::ZeroSampleRate);
    }
    if !(1..=2).contains(&channels) {
        return Err(AudioFormatError::UnsupportedChannels(channels));
    }
    Ok(())
}

/// Decode the frame's bytes into interleaved 16-bit samples.
fn widen(frame: &AudioFrame<'_>) -> Result<Vec<i16>, AudioFormatError> {
    check_layout(frame.sample_rate, frame.channels)?;
    let count = frame.frames * frame.channels as usize;
    match frame.bits_per_sample {
        8 => {
            let bytes = frame.data.get(..count).ok_or(AudioFormatError::Truncated {
                declared: frame.frames,
                actual: frame.data.len(),
            })?;
            Ok(bytes
                .iter()
                .map(|&b| (i32::from(b) * 256 - 32768) as i16)
                .collect())
        }
        16 => {
            let bytes = frame
                .data
                .get(..count * 2)
                .ok_or(AudioFormatError::Truncated {
                    declared: frame.frames,
                    actual: frame.data.len(),
                })?;
            Ok(bytes
                .chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                .collect())
        }
        bits => Err(AudioFormatError::UnsupportedBitsPerSample(bits)),
    }
}

/// Convert one buffered frame into `out` at the requested format.
fn convert(
    frame: &BufferedFrame,
    sample_rate: u32,
    channels: u32,
    converter: &mut Option<RateConverter>,
    out: &mut Vec<f32>,
) -> Result<(), AudioFormatError> {
    let planar = remix(frame, channels);
    if frame.sample_rate == sample_rate {
        interleave(&planar, out);
        return Ok(());
    }
    let channels = channels as usize;
    let converter = match converter.take() {
        Some(current) if current.matches(frame.sample_rate, sample_rate, channels) => {
            converter.insert(current)
        }
        _ => converter.insert(RateConverter::new(frame.sample_rate, sample_rate, channels)?),
    };
    converter.push(planar, out)
}

/// Remix to the requested channel layout, as planar f32.
fn remix(frame: &BufferedFrame, channels: u32) -> Vec<Vec<f32>> {
    let scale = |s: i16| f32::from(s) / 32768.0;
    match (frame.channels, channels) {
        (2, 1) => vec![
            frame
                .samples
                .chunks_exact(2)
                .map(|pair| scale(((i32::from(pair[0]) + i32::from(pair[1])) / 2) as i16))
                .collect(),
        ],
        (1, 2) => {
            let mono: Vec<f32> = frame.samples.iter().copied().map(scale).collect();
            vec![mono.clone(), mono]
        }
        (1, _) => vec![frame.samples.iter().copied().map(scale).collect()],
        _ => (0..2)
            .map(|channel| {
                frame
                    .samples
                    .iter()
                    .skip(channel)
                    .step_by(2)
                    .copied()
                    .map(scale)
                    .collect()
            })
            .collect(),
    }
}

fn interleave(planar: &[Vec<f32>], out: &mut Vec<f32>) {
    let frames = planar.first().map_or(0, Vec::len);
    out.reserve(frames * planar.len());
    for index in 0..frames {
        out.extend(planar.iter().map(|channel| channel[index]));
    }
}

/// Streaming sample-rate conversion for one (from, to, channels) combination.
///
/// Input is fed in 10 ms chunks at the source rate; anything short of a chunk
/// stays queued until the next frame arrives.
struct RateConverter {
    from: u32,
    to: u32,
    channels: usize,
    resampler: FastFixedIn<f32>,
    input: Vec<Vec<f32>>,
}

impl RateConverter {
    fn new(from: u32, to: u32, channels: usize) -> Result<Self, AudioFormatError> {
        let chunk = (from / (1000 / FRAME_MS)).max(1) as usize;
        let resampler = FastFixedIn::new(
            f64::from(to) / f64::from(from),
            1.0,
            PolynomialDegree::Cubic,
            chunk,
            channels,
        )
        .map_err(|err| AudioFormatError::Resampler(err.to_string()))?;
        debug!(target: "rendezvous::media", from, to, channels, chunk, "audio resampler created");
        Ok(Self {
            from,
            to,
            channels,
            resampler,
            input: vec![Vec::with_capacity(chunk * 2); channels],
        })
    }

    fn matches(&self, from: u32, to: u32, channels: usize) -> bool {
        self.from == from && self.to == to && self.channels == channels
    }

    /// Queue `planar` and append every completed chunk, interleaved, to `out`.
    fn push(&mut self, planar: Vec<Vec<f32>>, out: &mut Vec<f32>) -> Result<(), AudioFormatError> {
        for (queue, samples) in self.input.iter_mut().zip(planar) {
            queue.extend(samples);
        }
        loop {
            let needed = self.resampler.input_frames_next();
            if self.input.first().map_or(0, Vec::len) < needed {
                return Ok(());
            }
            let resampled = self
                .resampler
                .process(&self.input, None)
                .map_err(|err| AudioFormatError::Resampler(err.to_string()))?;
            for queue in &mut self.input {
                queue.drain(..needed);
            }
            interleave(&resampled, out);
        }
    }
}
