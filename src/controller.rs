use std::sync::Arc;

use crate::audio::convert::upsample;
use crate::audio::{AudioEvent, OutputDevice, PlaybackBuffer, PlaybackScheduler};
use crate::net_link::NetEvent;
use crate::protocol::{self, Envelope, WIRE_SAMPLE_RATE};
use crate::session::{SessionHandle, SessionState, Stats};

/// Reacts to transport and audio-thread events for one session.
///
/// Owns the playback cursor; frames are scheduled in the order the
/// transport delivers them.
pub struct SessionController<D: OutputDevice> {
    session: SessionHandle,
    stats: Arc<Stats>,
    output: D,
    scheduler: PlaybackScheduler,
}

impl<D: OutputDevice> SessionController<D> {
    pub fn new(session: SessionHandle, stats: Arc<Stats>, output: D) -> Self {
        Self {
            session,
            stats,
            output,
            scheduler: PlaybackScheduler::new(),
        }
    }

    #[cfg(test)]
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    #[cfg(test)]
    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    pub fn handle_net_event(&mut self, event: NetEvent) {
        match event {
            NetEvent::Binary(data) => self.process_server_message(&data),
            NetEvent::Connected => {
                log::info!("WebSocket connected");
                self.session.set(SessionState::Connected);
                self.scheduler.start(&self.output);
            }
            NetEvent::Disconnected => {
                log::info!("WebSocket disconnected");
                self.session.set(SessionState::Disconnected);
                self.scheduler.stop();
            }
        }
    }

    fn process_server_message(&mut self, data: &[u8]) {
        let envelope = match protocol::decode(data) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                log::trace!("Ignoring envelope of unhandled kind");
                return;
            }
            Err(e) => {
                log::warn!("Dropping {} byte message: {}", data.len(), e);
                return;
            }
        };

        match envelope {
            Envelope::Audio(frame) => {
                self.stats.add_received(frame.pcm_byte_len());
                let samples = frame.samples();
                let buffer = PlaybackBuffer::new(upsample(&samples), WIRE_SAMPLE_RATE);
                if let Some(start) = self.scheduler.schedule(&self.output, buffer) {
                    log::trace!(
                        "Scheduled {} samples from {} at {:.3}s",
                        samples.len(),
                        frame.participant_id,
                        start
                    );
                }
            }
            Envelope::System(notice) => {
                log::info!("System: {}", notice.message);
            }
        }
    }

    pub fn handle_audio_event(&mut self, event: AudioEvent) {
        match event {
            AudioEvent::SendFailed(e) => {
                log::warn!("Audio frame not sent: {}", e);
            }
            AudioEvent::CaptureFailed(reason) => {
                log::error!("Microphone failed: {}", reason);
            }
            AudioEvent::PlaybackFailed(reason) => {
                // nothing renders the timeline any more
                log::error!("Playback failed: {}", reason);
                self.scheduler.stop();
                self.output.clear();
            }
        }
    }
}
