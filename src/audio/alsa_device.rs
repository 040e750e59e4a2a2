//! ALSA PCM device wrappers for audio capture and playback.
//!
//! Both directions use interleaved 32-bit float samples; the `plug` layer
//! behind `default` converts from whatever the hardware really runs at.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};

use super::DeviceError;

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames (one frame = channels × sample_width)
    pub period_size: usize,
}

/// Open a PCM device for capture (recording).
pub fn open_capture(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams), DeviceError> {
    open_pcm(device, Direction::Capture, sample_rate, channels, period_size, "Capture")
}

/// Open a PCM device for playback.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams), DeviceError> {
    open_pcm(
        device,
        Direction::Playback,
        sample_rate,
        channels,
        period_size,
        "Playback",
    )
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
    dir_name: &str,
) -> Result<(PCM, AlsaParams), DeviceError> {
    let open_err = |source: alsa::Error| DeviceError::Open {
        device: device.to_string(),
        direction: dir_name.to_string(),
        source,
    };

    let pcm = PCM::new(device, direction, false).map_err(open_err)?;

    // Configure hardware parameters
    {
        let hwp = HwParams::any(&pcm).map_err(open_err)?;
        hwp.set_access(Access::RWInterleaved).map_err(open_err)?;
        hwp.set_format(Format::FloatLE).map_err(open_err)?;
        hwp.set_channels(channels).map_err(open_err)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)
            .map_err(open_err)?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)
                .map_err(open_err)?;
        }
        pcm.hw_params(&hwp).map_err(open_err)?;
    }

    // Read back actual negotiated parameters
    let (actual_rate, actual_channels, period_size) = {
        let hwp = pcm.hw_params_current().map_err(open_err)?;
        let rate = hwp.get_rate().map_err(open_err)?;
        let ch = hwp.get_channels().map_err(open_err)?;
        let ps = hwp.get_period_size().map_err(open_err)? as usize;
        (rate, ch, ps)
    };

    let params = AlsaParams {
        sample_rate: actual_rate,
        channels: actual_channels,
        period_size,
    };

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        dir_name,
        device,
        actual_rate,
        actual_channels,
        period_size,
    );

    Ok((pcm, params))
}
