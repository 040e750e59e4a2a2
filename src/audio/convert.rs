//! Sample conversion between native float audio and wire PCM.
//!
//! Rate conversion is plain decimation: each output sample is the input
//! sample at `floor(i * ratio)`. No anti-aliasing filter is applied.

/// Convert native-rate float samples to `target_rate` i16 PCM.
pub fn downsample(native: &[f32], native_rate: u32, target_rate: u32) -> Vec<i16> {
    if native.is_empty() || native_rate == 0 || target_rate == 0 {
        return Vec::new();
    }

    let ratio = native_rate as f64 / target_rate as f64;
    let out_len = (native.len() as f64 / ratio).floor() as usize;

    (0..out_len)
        .map(|i| {
            let src = ((i as f64 * ratio).floor() as usize).min(native.len() - 1);
            float_to_i16(native[src])
        })
        .collect()
}

/// Convert wire PCM back to float; the sample rate is unchanged.
pub fn upsample(pcm: &[i16]) -> Vec<f32> {
    pcm.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Asymmetric full-scale mapping: negatives scale by 32768, the rest by 32767.
#[inline]
pub fn float_to_i16(sample: f32) -> i16 {
    let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

pub fn i16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// A trailing odd byte is dropped.
pub fn le_bytes_to_i16(data: &[u8]) -> Vec<i16> {
    data.chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}
