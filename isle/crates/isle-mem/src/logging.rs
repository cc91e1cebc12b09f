//! Load Event Logging
//!
//! Structured log of object-memory loads, useful for:
//! - Diagnosing parent chain and hash problems
//! - Spotting loads aborted by the collector
//! - Tracing relocation volume
//!
//! Log Levels:
//! - ERROR: Failed loads
//! - WARN: Skipped signature checks, collector hazards
//! - INFO: Load start/end
//! - DEBUG: State transitions, header and parent details
//! - TRACE: Relocation statistics
//!
//! Every event is also forwarded to the `log` facade.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::loader::LoadState;

/// Log level for load events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

/// Load event types
#[derive(Debug, Clone, PartialEq)]
pub enum LoadEvent {
    /// Load of a URI started
    LoadStart { uri: String, read_only: bool },

    /// Loader moved to a new state
    StateChange { uri: String, state: LoadState },

    /// Header parsed
    HeaderRead {
        uri: String,
        major: u16,
        minor: u16,
        attributes: u32,
        parent_uri: String,
        parent_hash: i32,
    },

    /// Parent found in the read-only registry or loaded
    ParentResolved {
        uri: String,
        parent_uri: String,
        cached: bool,
    },

    /// Relocation pass finished
    Relocated {
        uri: String,
        target: u64,
        size: usize,
        pointers: usize,
        parent_pointers: usize,
        null_pointers: usize,
        swapped_words: usize,
    },

    /// Collector moved the working buffer
    GcHazard { uri: String, attempt: u32 },

    /// Suite accepted without a key
    SignatureSkipped { uri: String },

    /// Load aborted
    LoadFailed { uri: String, error: String },

    /// Load completed
    LoadEnd {
        uri: String,
        start: u64,
        size: usize,
        hash: i32,
        duration_ms: f64,
    },
}

/// Load logger configuration
#[derive(Debug, Clone)]
pub struct LoadLoggerConfig {
    /// Minimum log level
    pub level: LogLevel,

    /// Print events to stdout
    pub console: bool,

    /// Print events as JSON
    pub json: bool,

    /// Prefix printed events with a timestamp
    pub timestamps: bool,

    /// Events retained in memory
    pub capacity: usize,
}

impl Default for LoadLoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Debug,
            console: false,
            json: false,
            timestamps: true,
            capacity: 4096,
        }
    }
}

/// Load logger - centralized record of load events
pub struct LoadLogger {
    config: LoadLoggerConfig,
    events: Mutex<VecDeque<(Instant, LoadEvent)>>,
    enabled: AtomicBool,
}

impl LoadLogger {
    pub fn new(config: LoadLoggerConfig) -> Self {
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

    /// Log a load event
    pub fn log(&self, event: LoadEvent) {
        if !self.is_enabled() {
            return;
        }

        let level = event_level(&event);
        forward(level, &event);
        if level > self.config.level {
            return;
        }

        if self.config.console {
            self.output_console(&event);
        }

        let mut events = self.events.lock();
        if events.len() >= self.config.capacity {
            events.pop_front();
        }
        events.push_back((Instant::now(), event));
    }

    fn output_console(&self, event: &LoadEvent) {
        if self.config.timestamps {
            let now = chrono::Local::now();
            print!("[{}] ", now.format("%Y-%m-%d %H:%M:%S%.3f"));
        }

        if self.config.json {
            if let Ok(json) = serde_json::to_string(&to_json(event)) {
                println!("{}", json);
            }
        } else {
            println!("[OMS] {}", describe(event));
        }
    }

    pub fn get_events(&self) -> Vec<LoadEvent> {
        self.events.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for LoadLogger {
    fn default() -> Self {
        Self::new(LoadLoggerConfig::default())
    }
}

fn event_level(event: &LoadEvent) -> LogLevel {
    match event {
        LoadEvent::LoadFailed { .. } => LogLevel::Error,
        LoadEvent::GcHazard { .. } | LoadEvent::SignatureSkipped { .. } => LogLevel::Warn,
        LoadEvent::LoadStart { .. } | LoadEvent::LoadEnd { .. } => LogLevel::Info,
        LoadEvent::StateChange { .. }
        | LoadEvent::HeaderRead { .. }
        | LoadEvent::ParentResolved { .. } => LogLevel::Debug,
        LoadEvent::Relocated { .. } => LogLevel::Trace,
    }
}

fn forward(level: LogLevel, event: &LoadEvent) {
    let level = match level {
        LogLevel::Error => log::Level::Error,
        LogLevel::Warn => log::Level::Warn,
        LogLevel::Info => log::Level::Info,
        LogLevel::Debug => log::Level::Debug,
        LogLevel::Trace => log::Level::Trace,
    };
    log::log!(target: "isle_mem::oms", level, "{}", describe(event));
}

/// Human-readable form of an event
pub fn describe(event: &LoadEvent) -> String {
    match event {
        LoadEvent::LoadStart { uri, read_only } => {
            format!("Loading object memory from {} (read-only: {})", uri, read_only)
        },
        LoadEvent::StateChange { uri, state } => format!("{}: {}", uri, state),
        LoadEvent::HeaderRead {
            uri,
            major,
            minor,
            attributes,
            parent_uri,
            parent_hash,
        } => format!(
            "{}: version {}.{}, attributes {:#x}, parent {:?} hash {}",
            uri, major, minor, attributes, parent_uri, parent_hash
        ),
        LoadEvent::ParentResolved {
            uri,
            parent_uri,
            cached,
        } => format!(
            "{}: parent {} {}",
            uri,
            parent_uri,
            if *cached { "found in read-only memory" } else { "loaded" }
        ),
        LoadEvent::Relocated {
            uri,
            target,
            size,
            pointers,
            parent_pointers,
            null_pointers,
            swapped_words,
        } => format!(
            "{}: relocated {} bytes to {:#x} ({} pointers, {} into parents, {} null, {} words swapped)",
            uri, size, target, pointers, parent_pointers, null_pointers, swapped_words
        ),
        LoadEvent::GcHazard { uri, attempt } => {
            format!("{}: collection during relocation (attempt {})", uri, attempt)
        },
        LoadEvent::SignatureSkipped { uri } => {
            format!("{}: no key installed, signature not verified", uri)
        },
        LoadEvent::LoadFailed { uri, error } => format!("{}: load failed: {}", uri, error),
        LoadEvent::LoadEnd {
            uri,
            start,
            size,
            hash,
            duration_ms,
        } => format!(
            "{}: loaded {} bytes at {:#x}, hash {} ({:.2}ms)",
            uri, size, start, hash, duration_ms
        ),
    }
}

fn to_json(event: &LoadEvent) -> serde_json::Value {
    match event {
        LoadEvent::LoadStart { uri, read_only } => serde_json::json!({
            "type": "load_start",
            "uri": uri,
            "read_only": read_only
        }),
        LoadEvent::StateChange { uri, state } => serde_json::json!({
            "type": "state_change",
            "uri": uri,
            "state": state.to_string()
        }),
        LoadEvent::HeaderRead {
            uri,
            major,
            minor,
            attributes,
            parent_uri,
            parent_hash,
        } => serde_json::json!({
            "type": "header",
            "uri": uri,
            "major": major,
            "minor": minor,
            "attributes": attributes,
            "parent_uri": parent_uri,
            "parent_hash": parent_hash
        }),
        LoadEvent::ParentResolved {
            uri,
            parent_uri,
            cached,
        } => serde_json::json!({
            "type": "parent",
            "uri": uri,
            "parent_uri": parent_uri,
            "cached": cached
        }),
        LoadEvent::Relocated {
            uri,
            target,
            size,
            pointers,
            parent_pointers,
            null_pointers,
            swapped_words,
        } => serde_json::json!({
            "type": "relocated",
            "uri": uri,
            "target": target,
            "size": size,
            "pointers": pointers,
            "parent_pointers": parent_pointers,
            "null_pointers": null_pointers,
            "swapped_words": swapped_words
        }),
        LoadEvent::GcHazard { uri, attempt } => serde_json::json!({
            "type": "gc_hazard",
            "uri": uri,
            "attempt": attempt
        }),
        LoadEvent::SignatureSkipped { uri } => serde_json::json!({
            "type": "signature_skipped",
            "uri": uri
        }),
        LoadEvent::LoadFailed { uri, error } => serde_json::json!({
            "type": "load_failed",
            "uri": uri,
            "error": error
        }),
        LoadEvent::LoadEnd {
            uri,
            start,
            size,
            hash,
            duration_ms,
        } => serde_json::json!({
            "type": "load_end",
            "uri": uri,
            "start": start,
            "size": size,
            "hash": hash,
            "duration_ms": duration_ms
        }),
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_LOGGER: Mutex<LoadLogger> = Mutex::new(LoadLogger::default());
}

/// Log an event to the global logger
pub fn log_event(event: LoadEvent) {
    GLOBAL_LOGGER.lock().log(event);
}

/// Replace the global logger
pub fn configure_logger(config: LoadLoggerConfig) {
    *GLOBAL_LOGGER.lock() = LoadLogger::new(config);
}

/// Events currently retained by the global logger
pub fn recorded_events() -> Vec<LoadEvent> {
    GLOBAL_LOGGER.lock().get_events()
}

pub fn get_event_count() -> usize {
    GLOBAL_LOGGER.lock().event_count()
}
