//! Console logging for the relay server.
//!
//! Timestamped, leveled lines on stdout/stderr. Every module logs through
//! `log()` so the output stays uniform: `[2024-09-01 12:00:00] [VOICE] ...`

use chrono::Local;

#[derive(Clone, Copy)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
    Voice,
    Session,
}

impl LogLevel {
    fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Debug => "DEBUG",
            LogLevel::Voice => "VOICE",
            LogLevel::Session => "SESSION",
        }
    }
}

pub fn log(level: LogLevel, message: &str) {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    println!("[{}] [{}] {}", timestamp, level.prefix(), message);
}

pub fn log_error(context: &str, error: &dyn std::fmt::Display) {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    eprintln!("[{}] [ERROR] {}: {}", timestamp, context, error);
}
