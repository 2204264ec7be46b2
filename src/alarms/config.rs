//! # Alarm engine configuration.
//!
//! The order of [`AlarmEngineConfig::blocks`] is significant: it defines the
//! cumulative bit offset used to derive alarm codes (see [`layout`](super::layout)).
//!
//! ```json
//! {
//!   "tick_ms": 100,
//!   "blocks": [
//!     { "block": 7,  "size": 2, "polling_s": 0.5 },
//!     { "block": 12, "size": 4, "polling_s": 1.0 }
//!   ]
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::durations;

/// One polled data block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmBlockConfig {
    /// Block identifier (PLC data block number).
    pub block: u32,
    /// Declared size in bytes.
    pub size: usize,
    /// Polling interval.
    #[serde(rename = "polling_s", with = "durations::secs")]
    pub polling: Duration,
    /// Last time the block was selected for reading.
    #[serde(skip)]
    pub last_read: Option<Instant>,
}

impl AlarmBlockConfig {
    pub fn new(block: u32, size: usize, polling: Duration) -> Self {
        Self {
            block,
            size,
            polling,
            last_read: None,
        }
    }

    /// Number of alarm bits in the block.
    #[inline]
    pub fn bit_width(&self) -> usize {
        self.size * 8
    }

    /// Never read, or the polling interval elapsed.
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_read {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.polling,
        }
    }
}

/// One emergency-stop input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencySignalConfig {
    /// Slot the signal halts (`0` = every slot).
    pub slot: u16,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Driver specific address (node id, tag, bit address...).
    pub address: String,
}

fn default_true() -> bool {
    true
}

impl EmergencySignalConfig {
    pub fn new(slot: u16, address: impl Into<String>) -> Self {
        Self {
            slot,
            enabled: true,
            address: address.into(),
        }
    }

    /// Global signals halt the whole station.
    #[inline]
    pub fn is_global(&self) -> bool {
        self.slot == 0
    }
}

/// Settings of the alarm loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmEngineConfig {
    /// Loop period.
    #[serde(rename = "tick_ms", with = "durations::millis")]
    pub tick: Duration,
    /// How long `stop()` waits for the loop to exit.
    #[serde(rename = "stop_timeout_ms", with = "durations::millis")]
    pub stop_timeout: Duration,
    /// Telemetry topic of the active-alarm set.
    pub topic: String,
    /// Ordered block list.
    pub blocks: Vec<AlarmBlockConfig>,
}

impl AlarmEngineConfig {
    pub fn with_blocks(blocks: Vec<AlarmBlockConfig>) -> Self {
        Self {
            blocks,
            ..Self::default()
        }
    }

    /// Tick clamped to at least one millisecond.
    #[inline]
    pub fn tick_clamped(&self) -> Duration {
        self.tick.max(Duration::from_millis(1))
    }
}

impl Default for AlarmEngineConfig {
    /// Default configuration:
    ///
    /// - `tick = 100ms`
    /// - `stop_timeout = 5s`
    /// - `topic = "ActiveAlarms"`
    /// - no blocks
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            stop_timeout: Duration::from_secs(5),
            topic: "ActiveAlarms".to_string(),
            blocks: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_due_after_interval() {
        let now = Instant::now();
        let mut b = AlarmBlockConfig::new(7, 2, Duration::from_secs(1));
        assert!(b.is_due(now));

        b.last_read = Some(now);
        assert!(!b.is_due(now + Duration::from_millis(999)));
        assert!(b.is_due(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_deserialize_engine_config() {
        let json = r#"{"blocks":[{"block":7,"size":2,"polling_s":0.5}]}"#;
        let cfg: AlarmEngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.tick, Duration::from_millis(100));
        assert_eq!(cfg.topic, "ActiveAlarms");
        assert_eq!(cfg.blocks[0].polling, Duration::from_millis(500));
        assert_eq!(cfg.blocks[0].bit_width(), 16);
        assert!(cfg.blocks[0].last_read.is_none());
    }

    #[test]
    fn test_out_of_range_polling_is_rejected() {
        for polling in ["1e20", "-1", "1e400"] {
            let json = format!(r#"{{"blocks":[{{"block":7,"size":2,"polling_s":{polling}}}]}}"#);
            assert!(serde_json::from_str::<AlarmEngineConfig>(&json).is_err(), "{polling}");
        }
    }

    #[test]
    fn test_signal_enabled_by_default() {
        let s: EmergencySignalConfig =
            serde_json::from_str(r#"{"slot":0,"address":"ns=2;s=EStop"}"#).unwrap();
        assert!(s.enabled);
        assert!(s.is_global());
    }
}
