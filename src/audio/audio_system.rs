//! The AudioSystem that manages recording and playback threads.
//!
//! Uses std::thread (NOT tokio tasks) for real-time audio I/O to avoid
//! contention with async network tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use alsa::pcm::PCM;
use anyhow::Result;
use tokio::sync::mpsc;

use super::DeviceError;
use super::alsa_device::{self, AlsaParams};
use super::scheduler::OutputDevice;
use super::timeline::TimelineOutput;
use crate::protocol::WIRE_SAMPLE_RATE;
use crate::transmit::{SendError, Transmitter};

/// Audio system configuration.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// ALSA capture device name (e.g. "default", "plughw:0,0")
    pub capture_device: String,
    /// ALSA playback device name
    pub playback_device: String,
    /// Desired capture sample rate (the hardware may negotiate another)
    pub capture_sample_rate: u32,
    /// Desired capture channel count; only channel 0 is transmitted
    pub capture_channels: u32,
    /// Native frames per transmit block
    pub capture_block_size: usize,
    /// Desired playback period size in frames (0 = let ALSA decide)
    pub playback_period_size: usize,
}

/// Reported from the audio threads to the session controller.
#[derive(Debug)]
pub enum AudioEvent {
    /// A captured frame could not be handed to the transport and was dropped.
    SendFailed(SendError),
    /// The capture device failed and could not be recovered.
    CaptureFailed(String),
    /// The playback thread exited on a device error; nothing will be
    /// rendered from the timeline any more.
    PlaybackFailed(String),
}

/// Consecutive periods the playback device may fail to recover before the
/// playback thread gives up.
const MAX_FAILED_PERIODS: u32 = 50;

/// Counts periods in a row whose XRUN recovery failed.
#[derive(Debug, Default)]
struct RecoveryBudget {
    failed_periods: u32,
}

impl RecoveryBudget {
    /// Record one period; errors once the limit is reached.
    fn period_done(&mut self, recovered: bool) -> Result<()> {
        if recovered {
            self.failed_periods = 0;
            return Ok(());
        }
        self.failed_periods += 1;
        if self.failed_periods >= MAX_FAILED_PERIODS {
            anyhow::bail!(
                "playback device did not recover for {} periods",
                self.failed_periods
            );
        }
        Ok(())
    }
}

struct Worker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.handle.join();
    }
}

/// Owns the playback thread for its whole lifetime and the capture thread
/// while the microphone is on.
///
/// - Recording thread: ALSA capture → block accumulation → [`Transmitter`]
/// - Playback thread: [`TimelineOutput`] → ALSA playback
pub struct AudioSystem {
    config: AudioConfig,
    output: TimelineOutput,
    playback: Option<Worker>,
    capture: Option<Worker>,
}

impl AudioSystem {
    /// Open the playback device and start rendering.
    ///
    /// Playback is opened at the wire rate, mono; the capture device is
    /// only opened by [`AudioSystem::start_capture`]. If the playback
    /// thread dies, [`AudioEvent::PlaybackFailed`] is sent on `events`.
    pub fn start(config: AudioConfig, events: mpsc::Sender<AudioEvent>) -> Result<Self, DeviceError> {
        let period = (config.playback_period_size > 0).then_some(config.playback_period_size);
        let (pcm, params) =
            alsa_device::open_playback(&config.playback_device, WIRE_SAMPLE_RATE, 1, period)?;

        if params.sample_rate != WIRE_SAMPLE_RATE {
            log::warn!(
                "Playback negotiated {}Hz instead of {}Hz, frames will be point-resampled",
                params.sample_rate,
                WIRE_SAMPLE_RATE
            );
        }

        let output = TimelineOutput::new(params.sample_rate);
        let running = Arc::new(AtomicBool::new(true));
        let handle = {
            let running = running.clone();
            let output = output.clone();
            thread::Builder::new()
                .name("audio-play".into())
                .spawn(move || {
                    if let Err(e) = play_thread(pcm, &params, &output, &running) {
                        log::error!("Playback thread error: {}", e);
                        let _ = events.try_send(AudioEvent::PlaybackFailed(e.to_string()));
                    }
                })?
        };

        Ok(Self {
            config,
            output,
            playback: Some(Worker { running, handle }),
            capture: None,
        })
    }

    /// Output handle for the playback scheduler.
    pub fn output(&self) -> TimelineOutput {
        self.output.clone()
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.as_ref().is_some_and(|w| !w.handle.is_finished())
    }

    /// Open the capture device and start feeding `transmitter`.
    ///
    /// Device failures are returned here, before any thread is spawned.
    pub fn start_capture(
        &mut self,
        transmitter: Transmitter,
        events: mpsc::Sender<AudioEvent>,
    ) -> Result<(), DeviceError> {
        self.stop_capture();

        let (pcm, params) = alsa_device::open_capture(
            &self.config.capture_device,
            self.config.capture_sample_rate,
            self.config.capture_channels,
            Some(self.config.capture_block_size),
        )?;

        let block_size = self.config.capture_block_size.max(1);
        let running = Arc::new(AtomicBool::new(true));
        let handle = {
            let running = running.clone();
            thread::Builder::new()
                .name("audio-record".into())
                .spawn(move || {
                    if let Err(e) =
                        record_thread(pcm, &params, block_size, &transmitter, &events, &running)
                    {
                        log::error!("Recording thread error: {}", e);
                        let _ = events.try_send(AudioEvent::CaptureFailed(e.to_string()));
                    }
                })?
        };

        self.capture = Some(Worker { running, handle });
        Ok(())
    }

    /// Stop the microphone. Blocks until the capture thread has exited, so
    /// no block is transmitted after this returns.
    pub fn stop_capture(&mut self) {
        if let Some(worker) = self.capture.take() {
            worker.stop();
            log::info!("Microphone stopped");
        }
    }

    /// Discard audio scheduled but not yet played.
    pub fn flush_playback(&self) {
        self.output.clear();
    }

    /// Signal threads to stop and wait for them to finish.
    pub fn stop(&mut self) {
        self.stop_capture();
        if let Some(worker) = self.playback.take() {
            worker.stop();
        }
    }
}

impl Drop for AudioSystem {
    fn drop(&mut self) {
        self.stop();
    }
}

// ======================== Recording thread ========================

fn record_thread(
    pcm: PCM,
    params: &AlsaParams,
    block_size: usize,
    transmitter: &Transmitter,
    events: &mpsc::Sender<AudioEvent>,
    running: &AtomicBool,
) -> Result<()> {
    let channels = params.channels.max(1) as usize;
    let native_rate = params.sample_rate;

    // ALSA read buffer (interleaved f32, one period)
    let mut read_buf = vec![0f32; params.period_size.max(1) * channels];
    // Channel 0 samples waiting to fill a block
    let mut accum_buf: Vec<f32> = Vec::with_capacity(block_size * 2);

    let io = pcm.io_f32()?;

    log::info!(
        "Recording started: rate={}, ch={}, period={}, block={}",
        native_rate,
        channels,
        params.period_size,
        block_size,
    );

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                accum_buf.extend(
                    read_buf[..frames * channels]
                        .chunks_exact(channels)
                        .map(|frame| frame[0]),
                );

                while accum_buf.len() >= block_size {
                    match transmitter.on_capture_block(&accum_buf[..block_size], native_rate) {
                        Ok(n) => log::trace!("Sent {} bytes", n),
                        Err(e) => {
                            log::debug!("Dropped capture block: {}", e);
                            let _ = events.try_send(AudioEvent::SendFailed(e));
                        }
                    }
                    accum_buf.drain(..block_size);
                }
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                pcm.prepare()?;
            }
        }
    }

    log::info!("Recording stopped");
    Ok(())
}

// ======================== Playback thread ========================

fn play_thread(
    pcm: PCM,
    params: &AlsaParams,
    output: &TimelineOutput,
    running: &AtomicBool,
) -> Result<()> {
    let channels = params.channels.max(1) as usize;
    let period = params.period_size.max(1);
    let mut period_buf = vec![0f32; period * channels];

    let io = pcm.io_f32()?;

    log::info!(
        "Playback started: rate={}, ch={}, period={}",
        params.sample_rate,
        channels,
        period,
    );

    let mut budget = RecoveryBudget::default();
    while running.load(Ordering::Relaxed) {
        output.render_next(&mut period_buf, channels);

        // Write with retry loop to handle short writes and XRUN recovery
        let mut frames_written = 0;
        let mut retry_count = 0u32;
        let mut recovered = true;
        while frames_written < period {
            let offset = frames_written * channels;
            match io.writei(&period_buf[offset..]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;

                    if let Err(e2) = pcm.prepare() {
                        log::error!("Failed to recover PCM playback: {}", e2);
                        recovered = false;
                        break;
                    }

                    // The device keeps falling behind; drop the rest of this period
                    if retry_count >= 3 {
                        log::error!(
                            "Max recovery retries ({}) reached. Dropping {} unwritten frames.",
                            retry_count,
                            period - frames_written
                        );
                        break;
                    }
                }
            }
        }
        budget.period_done(recovered)?;
    }

    log::info!("Playback stopped");
    Ok(())
}
