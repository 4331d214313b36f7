//! Configuration validation

use super::Config;
use std::collections::HashSet;
use std::os::unix::ffi::OsStrExt;

/// `sun_path` holds 108 bytes including the terminating NUL
pub const MAX_SOCKET_PATH: usize = 107;

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
const LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_switch(config, &mut result);
    validate_logging(config, &mut result);
    validate_endpoints(config, &mut result);

    result
}

fn validate_switch(config: &Config, result: &mut ValidationResult) {
    let switch = &config.switch;

    if switch.mac_table_capacity == 0 {
        result.error("switch.mac_table_capacity: must be at least 1");
    }
    if switch.burst_size == 0 {
        result.error("switch.burst_size: must be at least 1");
    }
    if switch.session_queue_depth == 0 {
        result.error("switch.session_queue_depth: must be at least 1");
    }
}

fn validate_logging(config: &Config, result: &mut ValidationResult) {
    let level = config.logging.level.to_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        result.warn(format!(
            "logging.level: unknown level '{}', using info",
            config.logging.level
        ));
    }
    if !LOG_FORMATS.contains(&config.logging.format.as_str()) {
        result.warn(format!(
            "logging.format: unknown format '{}', using pretty",
            config.logging.format
        ));
    }
}

fn validate_endpoints(config: &Config, result: &mut ValidationResult) {
    if config.physical.is_empty() && config.sessions.is_empty() {
        result.warn("no physical interfaces or virtual sockets configured");
    }

    let mut interfaces = HashSet::new();
    for (i, physical) in config.physical.iter().enumerate() {
        if physical.interface.is_empty() {
            result.error(format!("physical[{}]: interface name is empty", i));
        } else if !interfaces.insert(physical.interface.as_str()) {
            result.error(format!(
                "physical[{}]: interface '{}' listed more than once",
                i, physical.interface
            ));
        }
    }

    let mut sockets = HashSet::new();
    for (i, session) in config.sessions.iter().enumerate() {
        let len = session.socket.as_os_str().as_bytes().len();
        if len == 0 {
            result.error(format!("virtual[{}]: socket path is empty", i));
            continue;
        }
        if len > MAX_SOCKET_PATH {
            result.error(format!(
                "virtual[{}]: socket path '{}' is {} bytes, limit is {}",
                i,
                session.socket.display(),
                len,
                MAX_SOCKET_PATH
            ));
        }
        if !sockets.insert(session.socket.as_path()) {
            result.error(format!(
                "virtual[{}]: socket '{}' listed more than once",
                i,
                session.socket.display()
            ));
        }
    }
}
