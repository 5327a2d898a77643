// Diagnostics ring for the provisioning pipeline
//
// Errors are returned as `DiskError`; this is where the explanation goes.
// The installer UI pulls records out with `snapshot()` / `drain()`.

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;

const MAX_LOG_ENTRIES: usize = 64;

static LOGGER: Mutex<LogRing> = Mutex::new(LogRing::new(MAX_LOG_ENTRIES));
static LOG_COUNT: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
}

impl Level {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
}

/// Bounded record buffer; the oldest record is evicted when full.
pub struct LogRing {
    records: VecDeque<LogRecord>,
    capacity: usize,
}

impl LogRing {
    pub const fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            capacity,
        }
    }

    pub fn push(&mut self, record: LogRecord) {
        if self.capacity == 0 {
            return;
        }
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogRecord> {
        self.records.iter()
    }

    pub fn drain(&mut self) -> Vec<LogRecord> {
        self.records.drain(..).collect()
    }
}

pub fn log(level: Level, args: fmt::Arguments<'_>) {
    LOG_COUNT.fetch_add(1, Ordering::SeqCst);
    let record = LogRecord {
        level,
        message: alloc::fmt::format(args),
    };
    LOGGER.lock().push(record);
}

/// Copy of the retained records, oldest first.
pub fn snapshot() -> Vec<LogRecord> {
    LOGGER.lock().iter().cloned().collect()
}

pub fn drain() -> Vec<LogRecord> {
    LOGGER.lock().drain()
}

/// Total records ever logged, including evicted ones.
pub fn log_count() -> usize {
    LOG_COUNT.load(Ordering::SeqCst)
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logger::log($crate::logger::Level::Error, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logger::log($crate::logger::Level::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logger::log($crate::logger::Level::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logger::log($crate::logger::Level::Debug, format_args!($($arg)*))
    };
}
