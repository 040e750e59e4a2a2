//! audio - Capture, conversion and scheduled playback
//!
//! ALSA does the device I/O on dedicated OS threads. Capture feeds the
//! transmit path once per fixed-size block; playback renders a timeline of
//! buffers placed by the [`PlaybackScheduler`].

mod alsa_device;
mod audio_system;
pub mod convert;
pub mod scheduler;
pub mod timeline;

use thiserror::Error;

pub use audio_system::{AudioConfig, AudioEvent, AudioSystem};
pub use scheduler::{OutputDevice, PlaybackBuffer, PlaybackScheduler};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to open {direction} device '{device}': {source}")]
    Open {
        device: String,
        direction: String,
        source: alsa::Error,
    },
    #[error("failed to spawn audio thread: {0}")]
    Thread(#[from] std::io::Error),
}
