use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

/// Connection state as seen by the audio pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

impl SessionState {
    fn to_u8(self) -> u8 {
        match self {
            SessionState::Disconnected => 0,
            SessionState::Connecting => 1,
            SessionState::Connected => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => SessionState::Connecting,
            2 => SessionState::Connected,
            _ => SessionState::Disconnected,
        }
    }
}

/// Shared, lock-free view of the session state.
///
/// Written by the controller, read by the capture thread on every block.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    state: Arc<AtomicU8>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(SessionState::Disconnected.to_u8())),
        }
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set(&self, state: SessionState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.get() == SessionState::Connected
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte counters for the two directions. Only ever increase.
#[derive(Debug, Default)]
pub struct Stats {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl Stats {
    pub fn add_sent(&self, n: usize) {
        self.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn add_received(&self, n: usize) {
        self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> String {
        format!(
            "Audio: {} sent / {} recv",
            format_bytes(self.bytes_sent()),
            format_bytes(self.bytes_received())
        )
    }
}

/// Human-readable size: plain bytes below 1 KiB, otherwise KB/MB/GB with
/// at most two decimals.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    const UNITS: [&str; 3] = ["KB", "MB", "GB"];
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let text = format!("{:.2}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", text, UNITS[unit])
}
