//! Capture-side path: native float block → wire PCM envelope → NetLink.
//!
//! Runs on the capture thread, so nothing here may wait on the network.
//! Frames that cannot be handed off immediately are dropped.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::audio::convert::downsample;
use crate::net_link::NetCommand;
use crate::protocol::{self, AudioFrame, EncodeError, Envelope, WIRE_SAMPLE_RATE};
use crate::session::{SessionHandle, Stats};

#[derive(Debug, Error)]
pub enum SendError {
    #[error("send queue full, frame dropped")]
    QueueFull,
    #[error("transport closed")]
    Closed,
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

pub struct Transmitter {
    participant_id: String,
    session: SessionHandle,
    stats: Arc<Stats>,
    net_tx: mpsc::Sender<NetCommand>,
}

impl Transmitter {
    pub fn new(
        participant_id: String,
        session: SessionHandle,
        stats: Arc<Stats>,
        net_tx: mpsc::Sender<NetCommand>,
    ) -> Self {
        Self {
            participant_id,
            session,
            stats,
            net_tx,
        }
    }

    /// Handle one capture block of mono samples at `native_rate`.
    ///
    /// Returns the number of encoded bytes handed to the transport, `0`
    /// when the session is not connected or the block was too short to
    /// yield a single wire sample.
    pub fn on_capture_block(&self, native: &[f32], native_rate: u32) -> Result<usize, SendError> {
        if !self.session.is_connected() {
            return Ok(0);
        }

        let samples = downsample(native, native_rate, WIRE_SAMPLE_RATE);
        if samples.is_empty() {
            return Ok(0);
        }

        let envelope = Envelope::Audio(AudioFrame::new(
            self.participant_id.clone(),
            &samples,
            now_millis(),
        ));
        let bytes = protocol::encode(&envelope)?;
        let len = bytes.len();

        match self.net_tx.try_send(NetCommand::SendBinary(bytes)) {
            Ok(()) => {
                self.stats.add_sent(len);
                Ok(len)
            }
            Err(TrySendError::Full(_)) => Err(SendError::QueueFull),
            Err(TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;

    fn transmitter(capacity: usize) -> (Transmitter, mpsc::Receiver<NetCommand>, Arc<Stats>, SessionHandle) {
        let (tx, rx) = mpsc::channel(capacity);
        let stats = Arc::new(Stats::default());
        let session = SessionHandle::new();
        let t = Transmitter::new("web".to_string(), session.clone(), stats.clone(), tx);
        (t, rx, stats, session)
    }

    #[test]
    fn drops_blocks_while_disconnected() {
        let (t, mut rx, stats, session) = transmitter(4);
        let block = vec![0.5f32; 2048];

        assert_eq!(t.on_capture_block(&block, 48000).unwrap(), 0);
        session.set(SessionState::Connecting);
        assert_eq!(t.on_capture_block(&block, 48000).unwrap(), 0);

        assert!(rx.try_recv().is_err());
        assert_eq!(stats.bytes_sent(), 0);
    }

    #[test]
    fn sends_downsampled_envelope() {
        let (t, mut rx, stats, session) = transmitter(4);
        session.set(SessionState::Connected);

        let block: Vec<f32> = (0..2048).map(|i| (i % 100) as f32 / 100.0 - 0.5).collect();
        let before = now_millis();
        let sent = t.on_capture_block(&block, 48000).unwrap();

        let NetCommand::SendBinary(bytes) = rx.try_recv().unwrap() else {
            panic!("expected a binary send");
        };
        assert_eq!(bytes.len(), sent);
        assert_eq!(stats.bytes_sent(), sent as u64);

        let Some(Envelope::Audio(frame)) = protocol::decode(&bytes).unwrap() else {
            panic!("expected an audio envelope");
        };
        assert_eq!(frame.participant_id, "web");
        assert_eq!(frame.pcm_byte_len(), 682 * 2);
        assert_eq!(frame.samples(), downsample(&block, 48000, WIRE_SAMPLE_RATE));
        assert!(frame.capture_timestamp_ms >= before);
    }

    #[test]
    fn full_queue_drops_frame() {
        let (t, _rx, stats, session) = transmitter(1);
        session.set(SessionState::Connected);
        let block = vec![0.1f32; 2048];

        let first = t.on_capture_block(&block, 48000).unwrap();
        assert!(matches!(t.on_capture_block(&block, 48000), Err(SendError::QueueFull)));
        assert_eq!(stats.bytes_sent(), first as u64);
    }

    #[test]
    fn closed_transport_is_reported() {
        let (t, rx, _stats, session) = transmitter(4);
        session.set(SessionState::Connected);
        drop(rx);
        assert!(matches!(
            t.on_capture_block(&[0.0; 2048], 48000),
            Err(SendError::Closed)
        ));
    }
}
