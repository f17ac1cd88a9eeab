//! Frequency-spectrum visualization feed
//!
//! A read-only tap on the playback scheduler's rendered output. The output
//! callback pushes rendered frames into a ring buffer; on demand the tap
//! computes a fixed 128-bin frequency-magnitude snapshot (Hann window +
//! forward FFT) of the most recent frames. A feed task emits one smoothed
//! snapshot per rendering tick (~30fps) for external rendering.
//!
//! Purely observational: nothing here influences scheduling or channel state.
//! With no active session the ring is empty and snapshots are all zeros, which
//! callers should render as the idle state.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use tokio::sync::{oneshot, watch};
use tokio::time::interval;

/// Number of frequency-magnitude bins per snapshot.
pub const SPECTRUM_BINS: usize = 128;

/// FFT analysis window (two samples per output bin).
const FFT_SIZE: usize = 2 * SPECTRUM_BINS;

/// Ring capacity (~85ms at 24 kHz); only the trailing window is analyzed.
const TAP_CAPACITY: usize = 2048;

/// EMA smoothing factor (0.3 = 30% new value, 70% previous)
const EMA_ALPHA: f32 = 0.3;

/// Frame interval for ~30fps emission
const FRAME_INTERVAL_MS: u64 = 33;

/// One spectrum snapshot for external rendering.
#[derive(Clone, Copy, serde::Serialize)]
pub struct SpectrumFrame {
    // serde derives Serialize for arrays only up to length 32; serialize the
    // 128-bin array as a slice, which produces the same JSON sequence.
    #[serde(serialize_with = "serialize_bins")]
    pub bins: [f32; SPECTRUM_BINS],
}

fn serialize_bins<S: serde::Serializer>(
    bins: &[f32; SPECTRUM_BINS],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serde::Serialize::serialize(&bins[..], serializer)
}

impl Default for SpectrumFrame {
    fn default() -> Self {
        Self {
            bins: [0.0; SPECTRUM_BINS],
        }
    }
}

/// Ring buffer of recently rendered output frames.
///
/// Cheap to clone; the playback callback writes, the feed task reads.
#[derive(Clone, Default)]
pub struct SpectrumTap {
    samples: Arc<Mutex<VecDeque<f32>>>,
}

impl SpectrumTap {
    pub fn new() -> Self {
        Self {
            samples: Arc::new(Mutex::new(VecDeque::with_capacity(TAP_CAPACITY))),
        }
    }

    /// Append rendered frames, evicting the oldest past capacity. Called from
    /// the output callback.
    pub fn push_frames(&self, frames: &[f32]) {
        let mut ring = self.samples.lock().unwrap();
        if frames.len() >= TAP_CAPACITY {
            ring.clear();
            ring.extend(&frames[frames.len() - TAP_CAPACITY..]);
            return;
        }
        let to_remove = (ring.len() + frames.len()).saturating_sub(TAP_CAPACITY);
        if to_remove > 0 {
            ring.drain(0..to_remove);
        }
        ring.extend(frames);
    }

    /// Frequency-magnitude snapshot of the most recent analysis window.
    ///
    /// Returns all zeros when the tap holds no audio (idle state).
    pub fn snapshot(&self) -> SpectrumFrame {
        let window: Vec<f32> = {
            let ring = self.samples.lock().unwrap();
            if ring.is_empty() {
                return SpectrumFrame::default();
            }
            let start = ring.len().saturating_sub(FFT_SIZE);
            ring.iter().skip(start).copied().collect()
        };

        // Hann window, zero-padded on the left if the tap is still filling
        let mut input = vec![Complex::new(0.0f32, 0.0f32); FFT_SIZE];
        let offset = FFT_SIZE - window.len();
        for (i, &sample) in window.iter().enumerate() {
            let n = (offset + i) as f32;
            let hann =
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * n / (FFT_SIZE as f32 - 1.0)).cos());
            input[offset + i] = Complex::new(sample * hann, 0.0);
        }

        let mut planner = FftPlanner::new();
        planner.plan_fft_forward(FFT_SIZE).process(&mut input);

        let mut frame = SpectrumFrame::default();
        let scale = 2.0 / FFT_SIZE as f32;
        for (bin, value) in frame.bins.iter_mut().zip(input.iter()) {
            *bin = (value.norm() * scale).clamp(0.0, 1.0);
        }
        frame
    }

    /// Drop all buffered frames (session teardown).
    pub fn clear(&self) {
        self.samples.lock().unwrap().clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.samples.lock().unwrap().len()
    }
}

/// Consumer handle for the live spectrum feed.
///
/// Lazy and restartable: each call to [`SpectrumFeed::next`] waits for the
/// following snapshot; [`SpectrumFeed::latest`] reads without waiting.
#[derive(Clone)]
pub struct SpectrumFeed {
    rx: watch::Receiver<SpectrumFrame>,
}

impl SpectrumFeed {
    pub fn latest(&self) -> SpectrumFrame {
        *self.rx.borrow()
    }

    /// Wait for the next emitted snapshot. Returns `None` once the feed task
    /// has shut down.
    pub async fn next(&mut self) -> Option<SpectrumFrame> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow())
    }
}

/// Create the feed side of a spectrum channel.
pub fn feed_channel() -> (watch::Sender<SpectrumFrame>, SpectrumFeed) {
    let (tx, rx) = watch::channel(SpectrumFrame::default());
    (tx, SpectrumFeed { rx })
}

/// Run the spectrum emitter at ~30fps until the stop signal fires.
///
/// Each tick takes a snapshot from the tap, applies EMA smoothing against the
/// previous frame, and publishes it on the watch channel.
pub async fn run_spectrum_feed(
    tap: SpectrumTap,
    updates: watch::Sender<SpectrumFrame>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut tick = interval(Duration::from_millis(FRAME_INTERVAL_MS));
    let mut prev: Option<[f32; SPECTRUM_BINS]> = None;

    log::debug!("Spectrum feed started");

    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                log::debug!("Spectrum feed received stop signal");
                break;
            }
            _ = tick.tick() => {
                let mut frame = tap.snapshot();
                if let Some(prev_bins) = prev {
                    for (bin, old) in frame.bins.iter_mut().zip(prev_bins.iter()) {
                        *bin = EMA_ALPHA * *bin + (1.0 - EMA_ALPHA) * old;
                    }
                }
                prev = Some(frame.bins);

                if updates.send(frame).is_err() {
                    log::debug!("Spectrum feed: all receivers dropped");
                    break;
                }
            }
        }
    }

    // Publish an idle frame on the way out
    let _ = updates.send(SpectrumFrame::default());
    log::debug!("Spectrum feed stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tap_yields_idle_snapshot() {
        let tap = SpectrumTap::new();
        let frame = tap.snapshot();
        assert!(frame.bins.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_tap_is_bounded() {
        let tap = SpectrumTap::new();
        tap.push_frames(&vec![0.1; TAP_CAPACITY + 500]);
        assert_eq!(tap.len(), TAP_CAPACITY);

        tap.push_frames(&[0.2; 100]);
        assert_eq!(tap.len(), TAP_CAPACITY);
    }

    #[test]
    fn test_snapshot_has_fixed_bin_count() {
        let tap = SpectrumTap::new();
        tap.push_frames(&[0.5; 32]); // fewer than one analysis window
        let frame = tap.snapshot();
        assert_eq!(frame.bins.len(), SPECTRUM_BINS);
        assert!(frame.bins.iter().all(|&b| (0.0..=1.0).contains(&b)));
    }

    #[test]
    fn test_sine_peaks_at_expected_bin() {
        let tap = SpectrumTap::new();
        let sample_rate = 24_000.0f32;
        // Bin 16 at 24 kHz with a 256-point window is 1500 Hz
        let freq = 16.0 * sample_rate / FFT_SIZE as f32;
        let samples: Vec<f32> = (0..FFT_SIZE)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin())
            .collect();
        tap.push_frames(&samples);

        let frame = tap.snapshot();
        let peak = frame
            .bins
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!((15..=17).contains(&peak), "peak at bin {}", peak);
    }

    #[test]
    fn test_clear_returns_to_idle() {
        let tap = SpectrumTap::new();
        tap.push_frames(&[0.5; 512]);
        tap.clear();
        assert!(tap.snapshot().bins.iter().all(|&b| b == 0.0));
    }

    #[tokio::test]
    async fn test_feed_emits_and_stops() {
        let tap = SpectrumTap::new();
        tap.push_frames(&[0.5; 512]);

        let (tx, mut feed) = feed_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_spectrum_feed(tap, tx, stop_rx));

        let frame = feed.next().await.expect("snapshot");
        assert!(frame.bins.iter().any(|&b| b > 0.0));

        stop_tx.send(()).expect("stop");
        task.await.expect("join");
    }
}
