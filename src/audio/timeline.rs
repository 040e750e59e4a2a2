//! Device-side queue of scheduled buffers.
//!
//! ALSA only knows "write these frames next", so absolute start times are
//! kept here on a frame clock. The playback thread renders one period at a
//! time from the timeline and advances the clock by what it wrote.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use super::scheduler::{OutputDevice, PlaybackBuffer};

struct Scheduled {
    start_frame: u64,
    frame_len: u64,
    buffer: PlaybackBuffer,
}

impl Scheduled {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.frame_len
    }

    /// Sample for device frame `offset` frames into this buffer.
    fn sample_at(&self, offset: u64, device_rate: u32) -> f32 {
        let idx = if self.buffer.sample_rate == device_rate {
            offset as usize
        } else {
            (offset * self.buffer.sample_rate as u64 / device_rate as u64) as usize
        };
        self.buffer.samples.get(idx).copied().unwrap_or(0.0)
    }
}

/// Scheduled buffers ordered by start frame, plus the frame clock.
///
/// `position` is the first frame not yet rendered. Both only change under
/// the same lock, so a start time read from the clock can never land in a
/// window that was rendered in between.
pub struct Timeline {
    sample_rate: u32,
    position: u64,
    entries: VecDeque<Scheduled>,
}

impl Timeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            position: 0,
            entries: VecDeque::new(),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Seconds rendered so far.
    pub fn current_time(&self) -> f64 {
        self.position as f64 / self.sample_rate as f64
    }

    /// Queue `buffer` at `start_time` and return when it will really start.
    ///
    /// A start that has already been rendered moves to the next unrendered
    /// frame, so no part of the buffer is skipped.
    pub fn insert(&mut self, buffer: PlaybackBuffer, start_time: f64) -> f64 {
        if buffer.is_empty() || buffer.sample_rate == 0 {
            return start_time;
        }
        let requested = (start_time.max(0.0) * self.sample_rate as f64).round() as u64;
        let (start_frame, start_time) = if requested < self.position {
            (self.position, self.current_time())
        } else {
            (requested, start_time)
        };
        let frame_len = (buffer.samples.len() as u64 * self.sample_rate as u64)
            .div_ceil(buffer.sample_rate as u64);
        let entry = Scheduled {
            start_frame,
            frame_len,
            buffer,
        };

        // arrivals are almost always in order, so search from the back
        let pos = self
            .entries
            .iter()
            .rposition(|e| e.start_frame <= start_frame)
            .map_or(0, |p| p + 1);
        self.entries.insert(pos, entry);
        start_time
    }

    /// Render the next interleaved period and advance the clock past it.
    ///
    /// Frames with nothing scheduled are silent; overlapping buffers are
    /// summed. Buffers that finish inside this window are released.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        out.fill(0.0);
        let channels = channels.max(1);
        let position = self.position;
        let frames = (out.len() / channels) as u64;
        let window_end = position + frames;

        for entry in &self.entries {
            if entry.start_frame >= window_end {
                break;
            }
            let from = entry.start_frame.max(position);
            let to = entry.end_frame().min(window_end);
            for frame in from..to {
                let sample = entry.sample_at(frame - entry.start_frame, self.sample_rate);
                let base = (frame - position) as usize * channels;
                for slot in &mut out[base..base + channels] {
                    *slot += sample;
                }
            }
        }

        self.entries.retain(|e| e.end_frame() > window_end);
        self.position = window_end;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Cloneable handle to the playback timeline.
///
/// The controller schedules through [`OutputDevice`]; the playback thread
/// calls [`TimelineOutput::render_next`] once per period.
#[derive(Clone)]
pub struct TimelineOutput {
    timeline: Arc<Mutex<Timeline>>,
}

impl TimelineOutput {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            timeline: Arc::new(Mutex::new(Timeline::new(sample_rate))),
        }
    }

    fn timeline(&self) -> MutexGuard<'_, Timeline> {
        // a panic mid-render leaves the queue usable
        self.timeline
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fill `out` with the next period.
    pub fn render_next(&self, out: &mut [f32], channels: usize) {
        self.timeline().render(out, channels);
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.timeline().len()
    }
}

impl OutputDevice for TimelineOutput {
    fn current_time(&self) -> f64 {
        self.timeline().current_time()
    }

    fn schedule(&self, buffer: PlaybackBuffer, start_time: f64) -> f64 {
        self.timeline().insert(buffer, start_time)
    }

    fn clear(&self) {
        self.timeline().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::scheduler::PlaybackScheduler;

    fn buffer(value: f32, len: usize) -> PlaybackBuffer {
        PlaybackBuffer::new(vec![value; len], 16000)
    }

    #[test]
    fn renders_silence_when_empty() {
        let mut timeline = Timeline::new(16000);
        let mut out = vec![1.0f32; 64];
        timeline.render(&mut out, 1);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn buffer_starts_at_its_frame() {
        let mut timeline = Timeline::new(16000);
        // 1 ms in = frame 16
        timeline.insert(buffer(0.5, 8), 0.001);

        let mut out = vec![0.0f32; 32];
        timeline.render(&mut out, 1);
        assert!(out[..16].iter().all(|&s| s == 0.0));
        assert!(out[16..24].iter().all(|&s| s == 0.5));
        assert!(out[24..].iter().all(|&s| s == 0.0));
        assert!(timeline.is_empty());
    }

    #[test]
    fn buffer_spanning_periods_continues() {
        let mut timeline = Timeline::new(16000);
        let samples: Vec<f32> = (0..10).map(|i| i as f32).collect();
        timeline.insert(PlaybackBuffer::new(samples, 16000), 0.0);

        let mut first = vec![0.0f32; 6];
        timeline.render(&mut first, 1);
        assert_eq!(first, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(timeline.len(), 1);

        let mut second = vec![0.0f32; 6];
        timeline.render(&mut second, 1);
        assert_eq!(second, vec![6.0, 7.0, 8.0, 9.0, 0.0, 0.0]);
        assert!(timeline.is_empty());
    }

    #[test]
    fn mono_is_duplicated_across_channels() {
        let mut timeline = Timeline::new(16000);
        timeline.insert(PlaybackBuffer::new(vec![0.25, -0.25], 16000), 0.0);
        let mut out = vec![0.0f32; 6];
        timeline.render(&mut out, 2);
        assert_eq!(out, vec![0.25, 0.25, -0.25, -0.25, 0.0, 0.0]);
    }

    #[test]
    fn out_of_order_inserts_are_sorted() {
        let mut timeline = Timeline::new(16000);
        timeline.insert(buffer(0.2, 4), 4.0 / 16000.0);
        timeline.insert(buffer(0.1, 4), 0.0);
        let mut out = vec![0.0f32; 8];
        timeline.render(&mut out, 1);
        assert_eq!(out, vec![0.1, 0.1, 0.1, 0.1, 0.2, 0.2, 0.2, 0.2]);
    }

    #[test]
    fn overlapping_buffers_are_summed() {
        let mut timeline = Timeline::new(16000);
        timeline.insert(buffer(0.25, 4), 0.0);
        timeline.insert(buffer(0.5, 4), 2.0 / 16000.0);
        let mut out = vec![0.0f32; 6];
        timeline.render(&mut out, 1);
        assert_eq!(out, vec![0.25, 0.25, 0.75, 0.75, 0.5, 0.5]);
    }

    #[test]
    fn lower_rate_source_is_stretched() {
        let mut timeline = Timeline::new(32000);
        timeline.insert(PlaybackBuffer::new(vec![1.0, 2.0], 16000), 0.0);
        let mut out = vec![0.0f32; 5];
        timeline.render(&mut out, 1);
        assert_eq!(out, vec![1.0, 1.0, 2.0, 2.0, 0.0]);
    }

    #[test]
    fn scheduler_and_output_play_gaplessly() {
        let output = TimelineOutput::new(16000);
        let mut scheduler = PlaybackScheduler::new();
        scheduler.start(&output);

        scheduler.schedule(&output, buffer(0.1, 320));
        scheduler.schedule(&output, buffer(0.2, 320));

        let mut period = vec![0.0f32; 640];
        output.render_next(&mut period, 1);
        assert!(period[..320].iter().all(|&s| s == 0.1));
        assert!(period[320..].iter().all(|&s| s == 0.2));
        assert_eq!(output.current_time(), 0.04);
        assert_eq!(output.pending(), 0);
    }

    #[test]
    fn late_frame_plays_from_current_position() {
        let output = TimelineOutput::new(16000);
        let mut scheduler = PlaybackScheduler::new();
        scheduler.start(&output);

        scheduler.schedule(&output, buffer(0.1, 160));
        let mut period = vec![0.0f32; 320];
        output.render_next(&mut period, 1);
        output.render_next(&mut period, 1);

        // cursor (160) is behind the clock (640), the frame starts at 640
        let start = scheduler.schedule(&output, buffer(0.3, 160)).unwrap();
        assert_eq!(start, 640.0 / 16000.0);
        output.render_next(&mut period, 1);
        assert!(period[..160].iter().all(|&s| s == 0.3));
        assert!(period[160..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn start_in_rendered_window_moves_to_next_frame() {
        let output = TimelineOutput::new(16000);
        let mut period = vec![0.0f32; 320];

        // clock read before the period was rendered
        let stale = output.current_time();
        output.render_next(&mut period, 1);

        let start = output.schedule(buffer(0.3, 400), stale);
        assert_eq!(start, 320.0 / 16000.0);

        output.render_next(&mut period, 1);
        assert!(period.iter().all(|&s| s == 0.3));
        output.render_next(&mut period, 1);
        assert!(period[..80].iter().all(|&s| s == 0.3));
        assert!(period[80..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn clear_releases_pending_buffers() {
        let output = TimelineOutput::new(16000);
        for i in 0..100 {
            output.schedule(buffer(0.1, 320), i as f64 * 0.02);
        }
        assert_eq!(output.pending(), 100);
        output.clear();
        assert_eq!(output.pending(), 0);

        let mut period = vec![1.0f32; 320];
        output.render_next(&mut period, 1);
        assert!(period.iter().all(|&s| s == 0.0));
    }
}
