//! Pipeline configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use swrp_protocol::{CAP_AUDIO, CAP_HIDPI};

/// Software version advertised in HELLO.
pub const SOFTWARE_VERSION: u16 = 3;

/// Parameters for one streaming session, as requested by the shell.
///
/// The source intersects these with the peer's advertised maxima before
/// sending START.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_bps: u32,
    pub hidpi: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 60,
            bitrate_bps: 20_000_000,
            hidpi: false,
        }
    }
}

/// Source endpoint configuration.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Version reported in HELLO.
    pub software_version: u16,
    /// Largest resolution this source can capture.
    pub max_width: u32,
    pub max_height: u32,
    pub max_fps: u32,
    /// Advertise the HiDPI capability bit.
    pub hidpi: bool,
    /// Bound on each handshake phase.
    pub handshake_timeout: Duration,
    /// Cadence of stats snapshots published to observers.
    pub stats_interval: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            software_version: SOFTWARE_VERSION,
            max_width: 3840,
            max_height: 2160,
            max_fps: 120,
            hidpi: false,
            handshake_timeout: Duration::from_secs(5),
            stats_interval: Duration::from_secs(1),
        }
    }
}

impl SourceConfig {
    pub fn with_hidpi(mut self, hidpi: bool) -> Self {
        self.hidpi = hidpi;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    pub fn capabilities(&self) -> u32 {
        if self.hidpi {
            CAP_HIDPI
        } else {
            0
        }
    }
}

/// Sink endpoint configuration.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Version reported in HELLO_ACK.
    pub software_version: u16,
    /// Largest resolution this sink accepts in START.
    pub max_width: u32,
    pub max_height: u32,
    pub max_fps: u32,
    /// Capability bits advertised in HELLO_ACK.
    pub capabilities: u32,
    /// Flow-control credits granted in START_ACK.
    pub initial_credits: u16,
    /// Bound on each handshake phase.
    pub handshake_timeout: Duration,
    /// Round-trip probe cadence; `None` disables the ping task.
    pub ping_interval: Option<Duration>,
    /// Cadence of stats snapshots published to observers.
    pub stats_interval: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            software_version: SOFTWARE_VERSION,
            max_width: 3840,
            max_height: 2160,
            max_fps: 120,
            capabilities: CAP_HIDPI | CAP_AUDIO,
            initial_credits: 8,
            handshake_timeout: Duration::from_secs(5),
            ping_interval: Some(Duration::from_secs(1)),
            stats_interval: Duration::from_secs(1),
        }
    }
}

impl SinkConfig {
    pub fn with_initial_credits(mut self, credits: u16) -> Self {
        self.initial_credits = credits;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_ping_interval(mut self, interval: Option<Duration>) -> Self {
        self.ping_interval = interval;
        self
    }
}
