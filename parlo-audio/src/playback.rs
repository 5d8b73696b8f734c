//! Gapless playback pipeline for synthesized speech.
//!
//! Arriving frames are appended to a pending buffer. A flush-and-play
//! cycle atomically drains the whole buffer in arrival order, wraps it in
//! a WAV container sized exactly for that payload, persists it to a
//! scoped temporary file, and plays it to completion. Frames that arrive
//! mid-playback start the next cycle immediately, so playback stays
//! gapless while remaining interruptible.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parlo_live::{AudioFrame, OUTPUT_SAMPLE_RATE};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::{AudioError, AudioResult};

/// Plays one WAV container to completion.
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Play the container at `path` to completion, or until halted.
    async fn play(&self, path: &Path) -> AudioResult<()>;

    /// Halt the in-flight playback, if any. Idempotent.
    fn halt(&self);
}

/// Buffers inbound audio frames and drives sequential playback.
///
/// The pending buffer is mutated only by this pipeline; at most one
/// device playback is in flight at any time.
pub struct PlaybackPipeline {
    sink: Arc<dyn PlaybackSink>,
    pending: parking_lot::Mutex<Vec<u8>>,
    in_flight: AtomicBool,
    consume: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackPipeline {
    /// Create a pipeline playing through `sink`.
    pub fn new(sink: Arc<dyn PlaybackSink>) -> Arc<Self> {
        Arc::new(Self {
            sink,
            pending: parking_lot::Mutex::new(Vec::new()),
            in_flight: AtomicBool::new(false),
            consume: parking_lot::Mutex::new(None),
        })
    }

    /// Consume audio frames from a session subscription.
    pub fn attach(self: &Arc<Self>, mut frames: broadcast::Receiver<AudioFrame>) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                match frames.recv().await {
                    Ok(frame) => this.handle_frame(frame),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "playback subscriber lagged, skipping frames");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *self.consume.lock() = Some(handle);
    }

    /// Append one frame and start a flush-and-play cycle when idle.
    pub fn handle_frame(self: &Arc<Self>, frame: AudioFrame) {
        if frame.sample_rate != OUTPUT_SAMPLE_RATE {
            tracing::warn!(sample_rate = frame.sample_rate, "ignoring frame at foreign rate");
            return;
        }

        let start = {
            let mut pending = self.pending.lock();
            pending.extend_from_slice(&frame.data);
            !self.in_flight.swap(true, Ordering::SeqCst)
        };
        if start {
            let this = self.clone();
            tokio::spawn(async move { this.pump().await });
        }
    }

    /// Halt playback and discard buffered-but-unplayed audio. Idempotent.
    pub fn stop_playback(&self) {
        self.pending.lock().clear();
        self.sink.halt();
        tracing::debug!("playback stopped, pending audio discarded");
    }

    /// Drain-and-play until the pending buffer stays empty.
    async fn pump(self: Arc<Self>) {
        loop {
            let batch = {
                let mut pending = self.pending.lock();
                if pending.is_empty() {
                    // Going idle is decided under the buffer lock, so a
                    // concurrent append either lands in this drain or
                    // observes in_flight == false and starts a new cycle.
                    self.in_flight.store(false, Ordering::SeqCst);
                    return;
                }
                std::mem::take(&mut *pending)
            };

            if let Err(error) = self.play_batch(batch).await {
                tracing::warn!(%error, "playback cycle failed");
            }
        }
    }

    /// One flush-and-play cycle over an already-drained batch.
    async fn play_batch(&self, pcm: Vec<u8>) -> AudioResult<()> {
        let container = pcm_to_wav(&pcm, OUTPUT_SAMPLE_RATE)?;

        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(&container)?;
        file.flush()?;

        tracing::debug!(bytes = pcm.len(), "playing buffered audio");
        self.sink.play(file.path()).await
        // The temp file drops here on success and failure alike.
    }
}

impl std::fmt::Debug for PlaybackPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackPipeline")
            .field("pending_bytes", &self.pending.lock().len())
            .field("in_flight", &self.in_flight.load(Ordering::SeqCst))
            .finish()
    }
}

/// Wrap raw PCM16 mono bytes in a WAV container sized for the payload.
///
/// A trailing odd byte cannot be a PCM16 sample and is dropped.
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> AudioResult<Vec<u8>> {
    if pcm.len() % 2 != 0 {
        tracing::warn!(bytes = pcm.len(), "odd PCM16 payload, dropping trailing byte");
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for sample in pcm.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([sample[0], sample[1]]))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

#[cfg(feature = "desktop-audio")]
pub use desktop::CpalPlaybackSink;

#[cfg(feature = "desktop-audio")]
mod desktop {
    use super::*;
    use cpal::SampleRate;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    /// Plays WAV containers on the default output device.
    pub struct CpalPlaybackSink {
        halted: Arc<AtomicBool>,
    }

    impl CpalPlaybackSink {
        /// Create an idle playback sink.
        pub fn new() -> Self {
            Self { halted: Arc::new(AtomicBool::new(false)) }
        }
    }

    impl Default for CpalPlaybackSink {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl PlaybackSink for CpalPlaybackSink {
        async fn play(&self, path: &Path) -> AudioResult<()> {
            self.halted.store(false, Ordering::SeqCst);
            let halted = self.halted.clone();
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || play_wav_blocking(&path, &halted))
                .await
                .map_err(|e| AudioError::playback(format!("playback task failed: {e}")))?
        }

        fn halt(&self) {
            self.halted.store(true, Ordering::SeqCst);
        }
    }

    fn play_wav_blocking(path: &Path, halted: &AtomicBool) -> AudioResult<()> {
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let samples: Vec<f32> = reader
            .samples::<i16>()
            .map(|s| s.map(|v| f32::from(v) / 32768.0))
            .collect::<Result<_, _>>()?;
        if samples.is_empty() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::playback("no output device available"))?;

        let rate = SampleRate(spec.sample_rate);
        let supported = device
            .supported_output_configs()
            .map_err(|e| AudioError::playback(e.to_string()))?
            .find(|c| c.channels() == 1 && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
            .or_else(|| {
                // Mono path unavailable: duplicate onto a stereo config.
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2 && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
                })
            })
            .ok_or_else(|| AudioError::playback("no suitable output config found"))?;
        let config = supported.with_sample_rate(rate).config();
        let channels = config.channels as usize;

        let total = samples.len();
        let samples = Arc::new(samples);
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let samples_cb = samples.clone();
        let position_cb = position.clone();
        let finished_cb = finished.clone();
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let pos = position_cb.load(Ordering::Relaxed);
                        let sample = if pos < total {
                            position_cb.store(pos + 1, Ordering::Relaxed);
                            samples_cb[pos]
                        } else {
                            finished_cb.store(true, Ordering::Relaxed);
                            0.0
                        };
                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                },
                |error| {
                    tracing::error!(%error, "audio playback error");
                },
                None,
            )
            .map_err(|e| AudioError::playback(e.to_string()))?;

        stream.play().map_err(|e| AudioError::playback(e.to_string()))?;

        let duration_ms = (total as u64 * 1000) / u64::from(spec.sample_rate);
        let timeout = Duration::from_millis(duration_ms + 500);
        let started = Instant::now();
        while !finished.load(Ordering::Relaxed) && !halted.load(Ordering::SeqCst) {
            if started.elapsed() > timeout {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        if !halted.load(Ordering::SeqCst) {
            // Let the device ring buffer empty before tearing down.
            std::thread::sleep(Duration::from_millis(100));
        }

        drop(stream);
        tracing::debug!(samples = total, "playback cycle complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_to_wav_header_matches_payload() {
        let container = pcm_to_wav(&[1u8, 0, 2, 0, 3, 0], 24_000).unwrap();
        let reader = hound::WavReader::new(std::io::Cursor::new(&container)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 24_000);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.len(), 3); // three samples = six payload bytes
    }

    #[test]
    fn test_pcm_to_wav_empty_payload() {
        let container = pcm_to_wav(&[], 24_000).unwrap();
        let reader = hound::WavReader::new(std::io::Cursor::new(&container)).unwrap();
        assert_eq!(reader.len(), 0);
    }

    #[test]
    fn test_pcm_to_wav_drops_trailing_odd_byte() {
        let container = pcm_to_wav(&[1u8, 0, 9], 24_000).unwrap();
        let reader = hound::WavReader::new(std::io::Cursor::new(&container)).unwrap();
        assert_eq!(reader.len(), 1);
    }
}
