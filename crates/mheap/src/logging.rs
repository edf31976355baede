//! Heap Logging and Tracing
//!
//! Structured event log for collector activity, useful for:
//! - Pause-time analysis
//! - Debugging resurrection and backpressure behaviour
//! - Production monitoring
//!
//! Diagnostics that are not events go through the `log` facade directly.
//! A heap only emits `HeapEvent`s when its configuration has `verbose` set.
//!
//! Log Levels:
//! - ERROR: fatal conditions (logged just before abort)
//! - WARN: queue backpressure, resurrections
//! - INFO: collection passes, shutdown
//! - DEBUG: mark and sweep phases, batch traffic

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Maximum number of events a logger retains
const EVENT_CAPACITY: usize = 4096;

/// Log level for heap events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

/// Heap event types
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HeapEvent {
    /// Collection pass started
    CollectionStart {
        heap: u64,
        collection: u64,
        reason: String,
    },

    /// Mark phase finished
    Mark {
        heap: u64,
        collection: u64,
        marked: usize,
        duration_us: u64,
    },

    /// Sweep phase finished
    Sweep {
        heap: u64,
        collection: u64,
        survivors: usize,
        collectable: usize,
    },

    /// Collection pass finished (mark and sweep; destruction may still be pending)
    CollectionEnd {
        heap: u64,
        collection: u64,
        duration_ms: f64,
    },

    /// Batch handed to the destruction worker
    BatchQueued { heap: u64, objects: usize },

    /// Batch fully processed
    BatchDestroyed {
        heap: u64,
        destroyed: usize,
        resurrected: usize,
        duration_ms: f64,
    },

    /// Objects returned to the live set by a re-mark
    Resurrection { heap: u64, objects: usize },

    /// Destruction queue full, batch destroyed inline
    QueueFull { heap: u64, objects: usize },

    /// Heap torn down
    Shutdown {
        heap: u64,
        collections: u64,
        objects_destroyed: u64,
    },
}

/// Logger configuration
#[derive(Debug, Clone)]
pub struct HeapLoggerConfig {
    /// Minimum log level
    pub level: LogLevel,

    /// Print events to stdout
    pub console: bool,

    /// Print JSON instead of human-readable lines
    pub json: bool,

    /// Prefix printed lines with a wall-clock timestamp
    pub timestamps: bool,
}

impl Default for HeapLoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            console: false,
            json: false,
            timestamps: true,
        }
    }
}

/// HeapLogger - centralized recorder for heap events
pub struct HeapLogger {
    config: HeapLoggerConfig,
    events: Mutex<VecDeque<(Instant, HeapEvent)>>,
    enabled: AtomicBool,
}

impl HeapLogger {
    pub fn new(config: HeapLoggerConfig) -> Self {
        Self {
            config,
            events: Mutex::new(VecDeque::new()),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Record an event
    ///
    /// Events below the configured level are dropped. The oldest event is
    /// evicted once `EVENT_CAPACITY` events are held.
    pub fn log(&self, event: HeapEvent) {
        if !self.is_enabled() || Self::event_level(&event) > self.config.level {
            return;
        }

        if self.config.console {
            self.output_console(&event);
        }

        let mut events = self.events.lock();
        if events.len() == EVENT_CAPACITY {
            events.pop_front();
        }
        events.push_back((Instant::now(), event));
    }

    fn event_level(event: &HeapEvent) -> LogLevel {
        match event {
            HeapEvent::QueueFull { .. } | HeapEvent::Resurrection { .. } => LogLevel::Warn,
            HeapEvent::CollectionStart { .. }
            | HeapEvent::CollectionEnd { .. }
            | HeapEvent::Shutdown { .. } => LogLevel::Info,
            HeapEvent::Mark { .. }
            | HeapEvent::Sweep { .. }
            | HeapEvent::BatchQueued { .. }
            | HeapEvent::BatchDestroyed { .. } => LogLevel::Debug,
        }
    }

    fn output_console(&self, event: &HeapEvent) {
        let line = if self.config.json {
            match serde_json::to_string(event) {
                Ok(json) => json,
                Err(_) => return,
            }
        } else {
            Self::format_human(event)
        };

        if self.config.timestamps {
            let now = chrono::Local::now();
            println!("[{}] {}", now.format("%Y-%m-%d %H:%M:%S%.3f"), line);
        } else {
            println!("{}", line);
        }
    }

    /// Human-readable rendering of an event
    pub fn format_human(event: &HeapEvent) -> String {
        match event {
            HeapEvent::CollectionStart {
                heap,
                collection,
                reason,
            } => format!("[heap {}] collection {} started ({})", heap, collection, reason),
            HeapEvent::Mark {
                heap,
                collection,
                marked,
                duration_us,
            } => format!(
                "[heap {}] collection {}: marked {} objects in {} us",
                heap, collection, marked, duration_us
            ),
            HeapEvent::Sweep {
                heap,
                collection,
                survivors,
                collectable,
            } => format!(
                "[heap {}] collection {}: {} survivors, {} collectable",
                heap, collection, survivors, collectable
            ),
            HeapEvent::CollectionEnd {
                heap,
                collection,
                duration_ms,
            } => format!(
                "[heap {}] collection {} completed ({:.2}ms)",
                heap, collection, duration_ms
            ),
            HeapEvent::BatchQueued { heap, objects } => {
                format!("[heap {}] queued batch of {} objects", heap, objects)
            },
            HeapEvent::BatchDestroyed {
                heap,
                destroyed,
                resurrected,
                duration_ms,
            } => format!(
                "[heap {}] batch destroyed {} objects, resurrected {} ({:.2}ms)",
                heap, destroyed, resurrected, duration_ms
            ),
            HeapEvent::Resurrection { heap, objects } => {
                format!("[heap {}] {} objects resurrected", heap, objects)
            },
            HeapEvent::QueueFull { heap, objects } => format!(
                "[heap {}] destruction queue full, destroying {} objects inline",
                heap, objects
            ),
            HeapEvent::Shutdown {
                heap,
                collections,
                objects_destroyed,
            } => format!(
                "[heap {}] shut down after {} collections, {} objects destroyed",
                heap, collections, objects_destroyed
            ),
        }
    }

    /// All retained events, oldest first
    pub fn events(&self) -> Vec<(Instant, HeapEvent)> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for HeapLogger {
    fn default() -> Self {
        Self::new(HeapLoggerConfig::default())
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_LOGGER: Mutex<HeapLogger> = Mutex::new(HeapLogger::new(HeapLoggerConfig {
        level: LogLevel::Debug,
        ..Default::default()
    }));
}

/// Log a heap event to the global logger
pub fn log_event(event: HeapEvent) {
    GLOBAL_LOGGER.lock().log(event);
}

/// Replace the global logger configuration
pub fn configure_logger(config: HeapLoggerConfig) {
    *GLOBAL_LOGGER.lock() = HeapLogger::new(config);
}

/// Number of events held by the global logger
pub fn event_count() -> usize {
    GLOBAL_LOGGER.lock().event_count()
}

/// Events held by the global logger that were emitted by heap `heap`
pub fn events_for(heap: u64) -> Vec<HeapEvent> {
    GLOBAL_LOGGER
        .lock()
        .events()
        .into_iter()
        .map(|(_, event)| event)
        .filter(|event| event.heap() == heap)
        .collect()
}

impl HeapEvent {
    /// Id of the heap that emitted the event
    pub fn heap(&self) -> u64 {
        match self {
            HeapEvent::CollectionStart { heap, .. }
            | HeapEvent::Mark { heap, .. }
            | HeapEvent::Sweep { heap, .. }
            | HeapEvent::CollectionEnd { heap, .. }
            | HeapEvent::BatchQueued { heap, .. }
            | HeapEvent::BatchDestroyed { heap, .. }
            | HeapEvent::Resurrection { heap, .. }
            | HeapEvent::QueueFull { heap, .. }
            | HeapEvent::Shutdown { heap, .. } => *heap,
        }
    }
}
