//! Structured logging abstraction (spec.md §4.10).
//!
//! Every binary in the teacher workspace calls straight into the `log`
//! crate's macros and initializes it once with `env_logger::init()`
//! (`peoci/src/bin/ocidist.rs`, `peimage-service/src/main.rs`); this module
//! keeps that as the default implementation behind a small trait so callers
//! that want structured key/value fields (or a silent logger in tests) can
//! swap it out without this crate depending on any particular log sink.

use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

/// Case-insensitive parse of a level name; unrecognized names default to
/// `Info` (spec.md §4.10).
pub fn parse_level(s: &str) -> Level {
    match s.to_ascii_lowercase().as_str() {
        "debug" => Level::Debug,
        "warn" | "warning" => Level::Warn,
        "error" => Level::Error,
        _ => Level::Info,
    }
}

pub trait Logger: Send + Sync {
    fn log(&self, level: Level, msg: &str, fields: &[(&str, &str)]);

    fn debug(&self, msg: &str, fields: &[(&str, &str)]) {
        self.log(Level::Debug, msg, fields);
    }
    fn info(&self, msg: &str, fields: &[(&str, &str)]) {
        self.log(Level::Info, msg, fields);
    }
    fn warn(&self, msg: &str, fields: &[(&str, &str)]) {
        self.log(Level::Warn, msg, fields);
    }
    fn error(&self, msg: &str, fields: &[(&str, &str)]) {
        self.log(Level::Error, msg, fields);
    }

    /// A logger that always appends `fields` to every call it forwards.
    fn with(&self, fields: Vec<(String, String)>) -> Box<dyn Logger>;
}

/// Forwards to the `log` crate's global logger, the way every teacher
/// binary already logs.
pub struct StdLogger {
    base_fields: Vec<(String, String)>,
}

impl StdLogger {
    pub fn new() -> Self {
        StdLogger {
            base_fields: Vec::new(),
        }
    }

    fn render(&self, msg: &str, fields: &[(&str, &str)]) -> String {
        let mut out = msg.to_string();
        for (k, v) in self.base_fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).chain(fields.iter().copied())
        {
            let _ = write!(out, " {k}={v}");
        }
        out
    }
}

impl Default for StdLogger {
    fn default() -> Self {
        StdLogger::new()
    }
}

impl Logger for StdLogger {
    fn log(&self, level: Level, msg: &str, fields: &[(&str, &str)]) {
        let rendered = self.render(msg, fields);
        match level {
            Level::Debug => log::debug!("{rendered}"),
            Level::Info => log::info!("{rendered}"),
            Level::Warn => log::warn!("{rendered}"),
            Level::Error => log::error!("{rendered}"),
        }
    }

    fn with(&self, fields: Vec<(String, String)>) -> Box<dyn Logger> {
        let mut base_fields = self.base_fields.clone();
        base_fields.extend(fields);
        Box::new(StdLogger { base_fields })
    }
}

/// Drops everything; used in tests that don't want log output noise.
#[derive(Default, Clone, Copy)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _level: Level, _msg: &str, _fields: &[(&str, &str)]) {}

    fn with(&self, _fields: Vec<(String, String)>) -> Box<dyn Logger> {
        Box::new(NoopLogger)
    }
}

pub fn log_cache_operation(logger: &dyn Logger, op: &str, key: &str) {
    logger.debug("cache operation", &[("op", op), ("key", key)]);
}

pub fn log_cache_hit(logger: &dyn Logger, key: &str) {
    logger.debug("cache hit", &[("key", key)]);
}

pub fn log_cache_miss(logger: &dyn Logger, key: &str) {
    logger.debug("cache miss", &[("key", key)]);
}

pub fn log_eviction(logger: &dyn Logger, key: &str, reason: &str) {
    logger.info("evicted entry", &[("key", key), ("reason", reason)]);
}

pub fn log_cleanup(logger: &dyn Logger, removed: usize, freed_bytes: u64) {
    logger.info(
        "cleanup pass complete",
        &[
            ("removed", &removed.to_string()),
            ("freed_bytes", &freed_bytes.to_string()),
        ],
    );
}

pub fn log_performance_metrics(logger: &dyn Logger, snapshot: &crate::metrics::MetricsSnapshot) {
    logger.info(
        "metrics snapshot",
        &[
            ("hits", &snapshot.hits.to_string()),
            ("misses", &snapshot.misses.to_string()),
            ("hit_rate", &format!("{:.2}", snapshot.hit_rate)),
            ("bandwidth_saved", &snapshot.bandwidth_saved.to_string()),
        ],
    );
}
