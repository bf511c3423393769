/*!
 * Synchronization Configuration
 *
 * Runtime configuration for how blocked callers wait
 */

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

/// Strategy type selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    /// Park immediately (long waits, lowest CPU)
    Park,
    /// Spin briefly, then park (short expected waits)
    Adaptive,
    /// Auto-select based on available parallelism
    Auto,
}

/// Synchronization configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Preferred strategy
    pub strategy: StrategyType,
    /// Spin duration before parking (for Adaptive)
    pub spin_duration: Duration,
    /// Maximum spin iterations before parking
    pub max_spins: u32,
    /// Largest backoff exponent used by spin loops (2^n pause instructions per step)
    pub backoff_limit: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyType::Auto,
            spin_duration: Duration::from_micros(10),
            max_spins: 100,
            backoff_limit: 6,
        }
    }
}

impl SyncConfig {
    /// Configuration optimized for low-latency (< 1ms wait expected)
    pub const fn low_latency() -> Self {
        Self {
            strategy: StrategyType::Adaptive,
            spin_duration: Duration::from_micros(50),
            max_spins: 500,
            backoff_limit: 8,
        }
    }

    /// Configuration optimized for long waits (> 1ms expected)
    pub const fn long_wait() -> Self {
        Self {
            strategy: StrategyType::Park,
            spin_duration: Duration::from_micros(1),
            max_spins: 10,
            backoff_limit: 4,
        }
    }

    /// Default configuration overlaid with `SYNC_*` environment variables
    ///
    /// - `SYNC_WAIT_STRATEGY`: `park`, `adaptive` or `auto`
    /// - `SYNC_MAX_SPINS`: spin iterations before parking
    /// - `SYNC_SPIN_DURATION_US`: spin time budget in microseconds
    /// - `SYNC_BACKOFF_LIMIT`: spin-lock backoff exponent cap
    pub fn from_env() -> Self {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup("SYNC_WAIT_STRATEGY") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "park" => self.strategy = StrategyType::Park,
                "adaptive" => self.strategy = StrategyType::Adaptive,
                "auto" => self.strategy = StrategyType::Auto,
                other => warn!(value = other, "Ignoring unknown SYNC_WAIT_STRATEGY"),
            }
        }
        if let Some(spins) = parse_number(&lookup, "SYNC_MAX_SPINS") {
            self.max_spins = spins;
        }
        if let Some(micros) = parse_number(&lookup, "SYNC_SPIN_DURATION_US") {
            self.spin_duration = Duration::from_micros(u64::from(micros));
        }
        if let Some(limit) = parse_number(&lookup, "SYNC_BACKOFF_LIMIT") {
            self.backoff_limit = limit.min(16);
        }
        self
    }

    /// Select best strategy for the current machine
    pub fn select_strategy(&self) -> StrategyType {
        match self.strategy {
            StrategyType::Auto => {
                // Spinning on a single core only delays the thread we are waiting for
                if available_cores() > 1 {
                    StrategyType::Adaptive
                } else {
                    StrategyType::Park
                }
            }
            other => other,
        }
    }

    /// Number of spin iterations a blocked waiter may burn before parking
    pub(crate) fn spin_budget(&self) -> u32 {
        match self.select_strategy() {
            StrategyType::Park => 0,
            _ => self.max_spins,
        }
    }
}

/// Cores available to the process, looked up once
///
/// The lookup reads cgroup and affinity data on Linux.
fn available_cores() -> usize {
    static CORES: OnceLock<usize> = OnceLock::new();
    *CORES.get_or_init(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    })
}

fn parse_number(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u32> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u32>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring non-numeric sync setting");
            None
        }
    }
}
