//! Runtime configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SystemError, SystemResult};
use crate::msg::MAX_MSG_SIZE;

/// Configuration for a minisys instance
///
/// The defaults carry the canonical constants: 2-tick short quanta, 4-tick
/// long quanta, promotion after 4 ticks of ready-queue age, 500 ms ack
/// timeout and 5 total transmission attempts per message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Clock period in milliseconds (one tick per period)
    pub tick_period_ms: u64,
    /// Short quantum, in ticks
    pub short_quanta: u64,
    /// Long quantum, in ticks
    pub long_quanta: u64,
    /// Ready-queue age (ticks) at which a long-level thread is promoted
    pub promote_age: u64,
    /// Group identifier stamped on every outgoing frame; frames from other
    /// groups are dropped on arrival
    pub group_id: u16,
    /// Milliseconds to wait for an ack before retransmitting
    pub ack_timeout_ms: u64,
    /// Total transmissions of one message before it is dropped
    pub max_tries: u32,
    /// Maximum message body size in bytes
    pub max_msg_size: usize,
    /// When set, no ticker thread runs and the clock only advances when the
    /// test harness advances it
    pub manual_clock: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            tick_period_ms: 10,
            short_quanta: 2,
            long_quanta: 4,
            promote_age: 4,
            group_id: 0x4d53, // "MS"
            ack_timeout_ms: 500,
            max_tries: 5,
            max_msg_size: MAX_MSG_SIZE,
            manual_clock: false,
        }
    }
}

impl SystemConfig {
    /// Load a configuration from a TOML file; missing keys keep defaults
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> SystemResult<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| SystemError::Config(e.to_string()))
    }

    /// Clock period as a [`Duration`]
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    /// Convert a millisecond delay to ticks, rounding up so an alarm never
    /// fires early
    pub(crate) fn ms_to_ticks(&self, ms: u64) -> u64 {
        ms.div_ceil(self.tick_period_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = SystemConfig::default();
        assert_eq!(cfg.short_quanta, 2);
        assert_eq!(cfg.long_quanta, 4);
        assert_eq!(cfg.promote_age, 4);
        assert_eq!(cfg.max_tries, 5);
        assert_eq!(cfg.max_msg_size, MAX_MSG_SIZE);
    }

    #[test]
    fn test_ms_to_ticks_rounds_up() {
        let cfg = SystemConfig::default();
        assert_eq!(cfg.ms_to_ticks(0), 0);
        assert_eq!(cfg.ms_to_ticks(1), 1);
        assert_eq!(cfg.ms_to_ticks(10), 1);
        assert_eq!(cfg.ms_to_ticks(11), 2);
        assert_eq!(cfg.ms_to_ticks(500), 50);
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tick_period_ms = 5\nack_timeout_ms = 100").unwrap();
        let cfg = SystemConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(cfg.tick_period_ms, 5);
        assert_eq!(cfg.ack_timeout_ms, 100);
        // untouched keys keep their defaults
        assert_eq!(cfg.short_quanta, 2);
    }
}
