//! Gapless playback scheduler driven by the output device clock
//!
//! Chunks arrive at irregular network-driven intervals; the scheduler, not the
//! network, determines audio timing. A frames-rendered counter advanced by the
//! output callback acts as the device clock, and a monotonically advancing
//! `next_start` cursor commits each chunk to begin exactly where the previous
//! one ends.
//!
//! # Architecture
//!
//! ```text
//! Session loop (async)                 Audio thread (sync)
//! ┌──────────────────────┐             ┌─────────────────────────┐
//! │ enqueue(chunk)       │──mutex────▶ │ CPAL output callback    │
//! │ interrupt()          │             │   ├─ mix pending chunks │
//! └──────────────────────┘             │   ├─ advance clock      │
//!                                      │   └─ feed spectrum tap  │
//!                                      └─────────────────────────┘
//! ```
//!
//! Enqueue, interrupt, and the render pass all serialize on one mutex, so the
//! pending set and the cursor have a single-writer discipline by construction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig};

use super::pcm::AudioChunk;
use super::spectrum::SpectrumTap;
use super::AudioError;

/// Frames rendered since the stream started. Shared between the scheduler and
/// the output callback; reads outside the callback are monotonic snapshots.
pub type SharedClock = Arc<AtomicU64>;

/// One chunk committed to the timeline.
struct Scheduled {
    /// Absolute start frame on the device clock.
    start: u64,
    /// Mono frames at the playback sample rate.
    frames: Vec<f32>,
}

struct SchedulerState {
    /// Arena of pending playback handles keyed by opaque token.
    pending: HashMap<u64, Scheduled>,
    /// Next committed start frame. Non-decreasing except on interrupt reset.
    next_start: u64,
    next_token: u64,
}

/// Schedules decoded chunks for gapless back-to-back playback.
///
/// Cheap to clone; all clones share the same timeline and clock.
#[derive(Clone)]
pub struct PlaybackScheduler {
    state: Arc<Mutex<SchedulerState>>,
    clock: SharedClock,
    sample_rate: u32,
}

impl PlaybackScheduler {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(SchedulerState {
                pending: HashMap::new(),
                next_start: 0,
                next_token: 0,
            })),
            clock: Arc::new(AtomicU64::new(0)),
            sample_rate,
        }
    }

    /// Commit a chunk to the timeline. Returns the start frame it was
    /// scheduled at.
    ///
    /// The start is `max(next_start, now)`: if the device clock has already
    /// advanced past the cursor the chunk starts immediately - a small audible
    /// gap under load is acceptable, reordering is not.
    pub fn enqueue(&self, chunk: AudioChunk) -> u64 {
        let frames = downmix(&chunk);
        let len = frames.len() as u64;

        let mut state = self.state.lock().unwrap();
        let now = self.clock.load(Ordering::Acquire);
        let start = state.next_start.max(now);
        state.next_start = start + len;

        let token = state.next_token;
        state.next_token += 1;
        state.pending.insert(token, Scheduled { start, frames });

        log::debug!(
            "Playback: scheduled {} frames at frame {} (now {}, {} pending)",
            len,
            start,
            now,
            state.pending.len()
        );
        start
    }

    /// Force-stop everything queued or playing and reset the cursor.
    ///
    /// Clearing the pending set and zeroing `next_start` happen under one
    /// lock, so a chunk enqueued after the interrupt starts fresh at current
    /// device time rather than at a stale future slot. Safe to call with an
    /// empty pending set.
    pub fn interrupt(&self) {
        let mut state = self.state.lock().unwrap();
        let dropped = state.pending.len();
        state.pending.clear();
        state.next_start = 0;
        if dropped > 0 {
            log::info!("Playback: interrupted, dropped {} pending chunks", dropped);
        }
    }

    /// Current device time in frames.
    pub fn now_frames(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    /// Current device time in seconds.
    pub fn now_secs(&self) -> f64 {
        self.now_frames() as f64 / self.sample_rate as f64
    }

    /// Number of chunks queued or playing.
    pub fn pending_len(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Shared frames-rendered counter. The output callback advances it; tests
    /// drive it directly.
    pub fn clock_handle(&self) -> SharedClock {
        self.clock.clone()
    }

    /// Mix every pending chunk overlapping the next `out.len()` frames into
    /// `out`, advance the clock, and retire chunks that finished. Called from
    /// the output callback with a mono scratch buffer.
    fn render(&self, out: &mut [f32]) {
        out.fill(0.0);
        let base = self.clock.load(Ordering::Acquire);
        let end = base + out.len() as u64;

        let mut state = self.state.lock().unwrap();
        state.pending.retain(|_, sched| {
            let sched_end = sched.start + sched.frames.len() as u64;
            if sched_end <= base {
                // Already wholly in the past (consumer fell behind)
                return false;
            }
            if sched.start < end {
                let from = base.max(sched.start);
                let to = end.min(sched_end);
                for frame in from..to {
                    out[(frame - base) as usize] += sched.frames[(frame - sched.start) as usize];
                }
            }
            // Self-removes once the callback has rendered past its end
            sched_end > end
        });
        drop(state);

        self.clock.fetch_add(out.len() as u64, Ordering::AcqRel);
    }
}

/// Interleaved chunk samples → mono frames.
fn downmix(chunk: &AudioChunk) -> Vec<f32> {
    if chunk.channels <= 1 {
        return chunk.samples.clone();
    }
    let ch = chunk.channels as usize;
    chunk
        .samples
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

enum StreamCommand {
    Shutdown,
}

/// Owns the CPAL output stream on a dedicated thread.
///
/// `cpal::Stream` is not `Send`, so the stream lives on its own thread and the
/// handle only carries a shutdown channel. Dropping the handle stops playback.
pub struct PlaybackStream {
    shutdown_tx: std::sync::mpsc::Sender<StreamCommand>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl PlaybackStream {
    /// Open the default output device at the scheduler's sample rate and
    /// start rendering its timeline. Rendered frames are also pushed into
    /// `tap` for the visualization feed.
    pub fn open(scheduler: &PlaybackScheduler, tap: SpectrumTap) -> Result<Self, AudioError> {
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<(), AudioError>>(1);
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<StreamCommand>();

        let scheduler = scheduler.clone();
        let thread = std::thread::Builder::new()
            .name("voiceloop-playback".into())
            .spawn(move || {
                let stream = match build_output_stream(&scheduler, tap) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamCreationFailed(format!(
                        "Failed to start output stream: {}",
                        e
                    ))));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Park until told to stop; the stream drops with this frame
                while let Ok(cmd) = shutdown_rx.recv() {
                    match cmd {
                        StreamCommand::Shutdown => break,
                    }
                }
                log::debug!("Playback thread exiting");
            })
            .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                shutdown_tx,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(AudioError::StreamCreationFailed(
                "Playback thread died during startup".to_string(),
            )),
        }
    }

    /// Stop rendering and release the output device. Best-effort; safe to
    /// call once the channel peer is already gone.
    pub fn stop(mut self) {
        let _ = self.shutdown_tx.send(StreamCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for PlaybackStream {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(StreamCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn build_output_stream(
    scheduler: &PlaybackScheduler,
    tap: SpectrumTap,
) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::NoOutputDevice)?;

    log::info!("Using audio output device: {:?}", device.name());

    let default_config = device
        .default_output_config()
        .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

    let channels = default_config.channels();
    let config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(scheduler.sample_rate()),
        buffer_size: cpal::BufferSize::Default,
    };

    log::info!(
        "Playback config: {} Hz, {} channels, {:?}",
        config.sample_rate.0,
        channels,
        default_config.sample_format()
    );

    match default_config.sample_format() {
        SampleFormat::F32 => build_output_typed::<f32>(&device, &config, scheduler, tap),
        SampleFormat::I16 => build_output_typed::<i16>(&device, &config, scheduler, tap),
        SampleFormat::U16 => build_output_typed::<u16>(&device, &config, scheduler, tap),
        other => Err(AudioError::StreamCreationFailed(format!(
            "Unsupported output sample format {:?}",
            other
        ))),
    }
}

fn build_output_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    scheduler: &PlaybackScheduler,
    tap: SpectrumTap,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let err_fn = |err| log::error!("Output stream error: {}", err);
    let channels = config.channels as usize;
    let scheduler = scheduler.clone();
    let mut scratch: Vec<f32> = Vec::new();

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                scratch.resize(frames, 0.0);
                scheduler.render(&mut scratch);
                tap.push_frames(&scratch);

                // Duplicate the mono timeline across device channels
                for (frame, &value) in scratch.iter().enumerate() {
                    for ch in 0..channels {
                        data[frame * channels + ch] = T::from_sample(value);
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

    Ok(stream)
}
