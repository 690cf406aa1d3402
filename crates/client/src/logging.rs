//! Logging macros and the per-socket transport logger.
//!
//! The macros format eagerly and hand the string to `tracing`, so call sites
//! read the same whether or not a subscriber is installed.

use serde_json::Value;

pub fn log_info_impl(msg: &str) {
    tracing::info!("{}", msg);
}

pub fn log_error_impl(msg: &str) {
    tracing::error!("{}", msg);
}

pub fn log_warn_impl(msg: &str) {
    tracing::warn!("{}", msg);
}

pub fn log_debug_impl(msg: &str) {
    tracing::debug!("{}", msg);
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log_info_impl(&format!($($arg)*))
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log_error_impl(&format!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::log_warn_impl(&format!($($arg)*))
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log_debug_impl(&format!($($arg)*))
    };
}

/// Frame-level logger switched on by `CreateSocket { debug: true }`.
///
/// Output has the form `kind: msg data`, e.g. `push: room:1 new_msg (3) {...}`.
#[derive(Debug, Clone)]
pub struct TransportLogger {
    socket_name: String,
    enabled: bool,
}

impl TransportLogger {
    pub fn new(socket_name: impl Into<String>, enabled: bool) -> Self {
        Self {
            socket_name: socket_name.into(),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn log(&self, kind: &str, msg: &str, data: &Value) {
        if self.enabled {
            tracing::info!(socket = %self.socket_name, "{}: {} {}", kind, msg, data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_logger_follows_debug_flag() {
        assert!(TransportLogger::new("s1", true).is_enabled());
        assert!(!TransportLogger::new("s1", false).is_enabled());
    }
}
