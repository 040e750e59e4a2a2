//! Playback scheduling on the output device clock.
//!
//! Each decoded frame is placed immediately after the previous one. When
//! the cursor has fallen behind the device clock (frames stopped arriving
//! for a while) it snaps forward to "now" instead of trying to catch up.

/// A mono float buffer ready to be handed to the output device.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// The playback half of an audio device.
///
/// `schedule` must not block; the device plays the buffer once its own
/// clock reaches `start_time`.
pub trait OutputDevice {
    /// Current position of the device clock in seconds.
    fn current_time(&self) -> f64;

    /// Returns the time the buffer will actually start, which is later than
    /// `start_time` if the device clock already moved past it.
    fn schedule(&self, buffer: PlaybackBuffer, start_time: f64) -> f64;

    /// Drop everything scheduled but not yet played.
    fn clear(&self);
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CursorState {
    Idle,
    Active { next_play_time: f64 },
}

pub struct PlaybackScheduler {
    state: CursorState,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self {
            state: CursorState::Idle,
        }
    }

    /// (Re)start tracking from the device's current time.
    pub fn start<D: OutputDevice + ?Sized>(&mut self, device: &D) {
        self.state = CursorState::Active {
            next_play_time: device.current_time(),
        };
    }

    pub fn stop(&mut self) {
        self.state = CursorState::Idle;
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        matches!(self.state, CursorState::Active { .. })
    }

    #[cfg(test)]
    pub fn next_play_time(&self) -> Option<f64> {
        match self.state {
            CursorState::Idle => None,
            CursorState::Active { next_play_time } => Some(next_play_time),
        }
    }

    /// Queue `buffer` right after everything scheduled so far.
    ///
    /// Returns the start time handed to the device, or `None` if the buffer
    /// was dropped (scheduler idle or buffer empty).
    pub fn schedule<D: OutputDevice + ?Sized>(
        &mut self,
        device: &D,
        buffer: PlaybackBuffer,
    ) -> Option<f64> {
        let CursorState::Active { next_play_time } = self.state else {
            log::debug!("Playback idle, dropping {} samples", buffer.samples.len());
            return None;
        };
        if buffer.is_empty() {
            return None;
        }

        let now = device.current_time();
        let start = if next_play_time < now {
            log::trace!("Playback underrun, cursor {:.3}s behind", now - next_play_time);
            now
        } else {
            next_play_time
        };

        let duration = buffer.duration();
        let start = device.schedule(buffer, start);
        self.state = CursorState::Active {
            next_play_time: start + duration,
        };
        Some(start)
    }
}

impl Default for PlaybackScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::{Cell, RefCell};

    /// Output device whose clock only moves when the test says so.
    #[derive(Default)]
    pub struct ManualDevice {
        pub now: Cell<f64>,
        /// Earliest start the device accepts, as if it had already played
        /// up to here without `now` showing it yet.
        pub rendered_until: Cell<f64>,
        pub scheduled: RefCell<Vec<(f64, PlaybackBuffer)>>,
    }

    impl ManualDevice {
        pub fn advance(&self, seconds: f64) {
            self.now.set(self.now.get() + seconds);
        }

        pub fn start_times(&self) -> Vec<f64> {
            self.scheduled.borrow().iter().map(|(t, _)| *t).collect()
        }
    }

    impl OutputDevice for ManualDevice {
        fn current_time(&self) -> f64 {
            self.now.get()
        }

        fn schedule(&self, buffer: PlaybackBuffer, start_time: f64) -> f64 {
            let start = start_time.max(self.rendered_until.get());
            self.scheduled.borrow_mut().push((start, buffer));
            start
        }

        fn clear(&self) {
            self.scheduled.borrow_mut().clear();
        }
    }
}
