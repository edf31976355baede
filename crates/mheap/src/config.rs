//! Configuration Module - Heap Tuning Parameters
//!
//! Manages all configuration parameters for the heap and its collector.
//! Defaults for the destruction mode and the allocator backend follow the
//! crate's cargo features, so a build can select them the way a build-time
//! flag would; every value can still be overridden at runtime.

use std::time::Duration;

/// How a collectable batch is destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestructionMode {
    /// Destroy on the collecting thread, under the heap lock
    Inline,
    /// Hand the batch to the background destruction worker
    Deferred,
}

impl DestructionMode {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "inline" => Some(Self::Inline),
            "deferred" => Some(Self::Deferred),
            _ => None,
        }
    }
}

/// Raw memory source for managed objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorKind {
    /// `std::alloc` system allocator
    System,
    /// Fixed size-class pool on top of mapped chunks
    Fast,
    /// Tracking wrapper around the system allocator
    Debug,
}

impl AllocatorKind {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "system" => Some(Self::System),
            "fast" => Some(Self::Fast),
            "debug" => Some(Self::Debug),
            _ => None,
        }
    }
}

/// Main configuration for the managed heap
///
/// # Examples
///
/// ```rust
/// use mheap::{DestructionMode, HeapConfig};
/// use std::time::Duration;
///
/// let config = HeapConfig {
///     destruction: DestructionMode::Deferred,
///     grace_window: Duration::from_millis(50),
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Destruction delivery mode
    ///
    /// Default: `Deferred` with the `deferred-destruction` feature, else `Inline`
    pub destruction: DestructionMode,

    /// Allocator backend
    ///
    /// Default: `Debug` with `debug-allocator`, `Fast` with `fast-allocator`,
    /// else `System`
    pub allocator: AllocatorKind,

    /// Objects allocated since the last pass before an automatic pass may run
    ///
    /// Both this and `collect_after_removals` must be reached, so that a burst
    /// of allocations alone never triggers a collection.
    ///
    /// Default: 4000
    pub collect_after_allocations: u64,

    /// References removed since the last pass before an automatic pass may run
    ///
    /// Default: 4000
    pub collect_after_removals: u64,

    /// Grace window for freshly promoted objects
    ///
    /// A live object that has never been reached through a reference is kept
    /// alive for this long after its promotion.
    ///
    /// Default: 100ms
    pub grace_window: Duration,

    /// Capacity of the deferred destruction queue (batches)
    ///
    /// When the queue is full the collecting thread destroys inline.
    ///
    /// Default: 16
    pub destruction_queue_capacity: usize,

    /// How long the destruction worker waits for work before re-checking
    /// its shutdown state
    ///
    /// Default: 100ms
    pub worker_poll_interval: Duration,

    /// Enable verbose structured event logging
    ///
    /// Default: false
    pub verbose: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        let destruction = if cfg!(feature = "deferred-destruction") {
            DestructionMode::Deferred
        } else {
            DestructionMode::Inline
        };

        let allocator = if cfg!(feature = "debug-allocator") {
            AllocatorKind::Debug
        } else if cfg!(feature = "fast-allocator") {
            AllocatorKind::Fast
        } else {
            AllocatorKind::System
        };

        HeapConfig {
            destruction,
            allocator,
            collect_after_allocations: 4000,
            collect_after_removals: 4000,
            grace_window: Duration::from_millis(100),
            destruction_queue_capacity: 16,
            worker_poll_interval: Duration::from_millis(100),
            verbose: false,
        }
    }
}

impl HeapConfig {
    /// Validate configuration
    ///
    /// ```rust
    /// use mheap::HeapConfig;
    ///
    /// let config = HeapConfig {
    ///     destruction_queue_capacity: 0,
    ///     ..Default::default()
    /// };
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collect_after_allocations == 0 {
            return Err(ConfigError::InvalidThreshold(
                "collect_after_allocations must be > 0".to_string(),
            ));
        }

        if self.collect_after_removals == 0 {
            return Err(ConfigError::InvalidThreshold(
                "collect_after_removals must be > 0".to_string(),
            ));
        }

        if self.destruction_queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity(
                "destruction_queue_capacity must be > 0".to_string(),
            ));
        }

        if self.worker_poll_interval.is_zero() {
            return Err(ConfigError::InvalidInterval(
                "worker_poll_interval must be > 0".to_string(),
            ));
        }

        if self.grace_window > Duration::from_secs(3600) {
            return Err(ConfigError::InvalidInterval(
                "grace_window must not exceed one hour".to_string(),
            ));
        }

        Ok(())
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with:
    /// - MHEAP_DESTRUCTION (`inline` | `deferred`)
    /// - MHEAP_ALLOCATOR (`system` | `fast` | `debug`)
    /// - MHEAP_COLLECT_AFTER_ALLOCATIONS
    /// - MHEAP_COLLECT_AFTER_REMOVALS
    /// - MHEAP_GRACE_MS
    /// - MHEAP_QUEUE_CAPACITY
    /// - MHEAP_VERBOSE
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("MHEAP_DESTRUCTION") {
            if let Some(mode) = DestructionMode::parse(&val) {
                config.destruction = mode;
            }
        }

        if let Ok(val) = std::env::var("MHEAP_ALLOCATOR") {
            if let Some(kind) = AllocatorKind::parse(&val) {
                config.allocator = kind;
            }
        }

        if let Ok(val) = std::env::var("MHEAP_COLLECT_AFTER_ALLOCATIONS") {
            if let Ok(count) = val.parse::<u64>() {
                config.collect_after_allocations = count;
            }
        }

        if let Ok(val) = std::env::var("MHEAP_COLLECT_AFTER_REMOVALS") {
            if let Ok(count) = val.parse::<u64>() {
                config.collect_after_removals = count;
            }
        }

        if let Ok(val) = std::env::var("MHEAP_GRACE_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                config.grace_window = Duration::from_millis(ms);
            }
        }

        if let Ok(val) = std::env::var("MHEAP_QUEUE_CAPACITY") {
            if let Ok(capacity) = val.parse::<usize>() {
                config.destruction_queue_capacity = capacity;
            }
        }

        if let Ok(val) = std::env::var("MHEAP_VERBOSE") {
            config.verbose = val == "1" || val.eq_ignore_ascii_case("true");
        }

        config
    }

    /// Grace window in collector clock units (milliseconds)
    pub(crate) fn grace_window_ms(&self) -> u64 {
        self.grace_window.as_millis().min(u64::MAX as u128) as u64
    }
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("Invalid queue capacity: {0}")]
    InvalidQueueCapacity(String),

    #[error("Invalid interval: {0}")]
    InvalidInterval(String),
}
