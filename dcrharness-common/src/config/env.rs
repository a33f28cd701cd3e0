//! Typed `DCRHARNESS_*` variable lookup.
//!
//! A bad value never aborts parsing: the default is kept, the problem is
//! recorded, and the caller reports every problem at once.

use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use super::source::Sourced;

/// Prefix shared by every harness environment variable.
pub const ENV_PREFIX: &str = "DCRHARNESS_";

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("{var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: &'static str,
        value: String,
    },

    #[error("{var}: {value} is outside {min}..={max}")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("{var}: '{value}' is not a positive duration (e.g. 30s, 1m 30s, 500ms)")]
    InvalidDuration { var: String, value: String },
}

/// Reads prefixed variables and accumulates [`EnvError`]s.
#[derive(Debug, Default)]
pub struct EnvParser {
    errors: Vec<EnvError>,
}

impl EnvParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    /// `1/true/yes/on` or `0/false/no/off/""`, case-insensitive.
    pub fn get_bool(&mut self, name: &str, default: bool) -> Sourced<bool> {
        self.parse_with(name, default, "boolean (true/false/1/0/yes/no)", |raw| {
            match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" | "" => Some(false),
                _ => None,
            }
        })
    }

    pub fn get_u16_range(&mut self, name: &str, default: u16, min: u16, max: u16) -> Sourced<u16> {
        self.get_range(name, default, min, max, "unsigned 16-bit integer")
    }

    pub fn get_u64_range(&mut self, name: &str, default: u64, min: u64, max: u64) -> Sourced<u64> {
        self.get_range(name, default, min, max, "unsigned 64-bit integer")
    }

    /// Humantime syntax; a bare integer means seconds. Zero is rejected.
    pub fn get_duration(&mut self, name: &str, default: Duration) -> Sourced<Duration> {
        let Some((var, raw)) = lookup(name) else {
            return Sourced::default_value(default);
        };
        let trimmed = raw.trim();
        let parsed = trimmed
            .parse::<u64>()
            .map(Duration::from_secs)
            .or_else(|_| humantime::parse_duration(trimmed));
        match parsed {
            Ok(duration) if !duration.is_zero() => Sourced::from_env(duration, var),
            _ => {
                self.errors.push(EnvError::InvalidDuration { var, value: raw });
                Sourced::default_value(default)
            }
        }
    }

    /// A path with a leading `~/` expanded to the home directory.
    pub fn get_path(&mut self, name: &str, default: &str) -> Sourced<PathBuf> {
        match lookup(name) {
            Some((var, raw)) => Sourced::from_env(expand_home(&raw), var),
            None => Sourced::default_value(expand_home(default)),
        }
    }

    /// One of `trace/debug/info/warn/error/off`, lowercased.
    pub fn get_log_level(&mut self, name: &str, default: &str) -> Sourced<String> {
        self.parse_with(name, default.to_string(), "log level (trace..error, off)", |raw| {
            let lower = raw.to_ascii_lowercase();
            if LOG_LEVELS.contains(&lower.as_str()) {
                Some(lower)
            } else {
                None
            }
        })
    }

    /// `None` when unset or empty.
    pub fn get_optional_string(&mut self, name: &str) -> Sourced<Option<String>> {
        match lookup(name) {
            Some((var, raw)) => Sourced::from_env(Some(raw).filter(|v| !v.is_empty()), var),
            None => Sourced::default_value(None),
        }
    }

    fn get_range<T>(&mut self, name: &str, default: T, min: T, max: T, expected: &'static str) -> Sourced<T>
    where
        T: FromStr + PartialOrd + Display + Copy,
    {
        let Some((var, raw)) = lookup(name) else {
            return Sourced::default_value(default);
        };
        match raw.trim().parse::<T>() {
            Ok(n) if n >= min && n <= max => Sourced::from_env(n, var),
            Ok(n) => {
                self.errors.push(EnvError::OutOfRange {
                    var,
                    value: n.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
                Sourced::default_value(default)
            }
            Err(_) => {
                self.errors.push(EnvError::InvalidValue { var, expected, value: raw });
                Sourced::default_value(default)
            }
        }
    }

    fn parse_with<T>(
        &mut self,
        name: &str,
        default: T,
        expected: &'static str,
        parse: impl FnOnce(&str) -> Option<T>,
    ) -> Sourced<T> {
        let Some((var, raw)) = lookup(name) else {
            return Sourced::default_value(default);
        };
        match parse(&raw) {
            Some(value) => Sourced::from_env(value, var),
            None => {
                self.errors.push(EnvError::InvalidValue { var, expected, value: raw });
                Sourced::default_value(default)
            }
        }
    }
}

/// The prefixed variable name and its value, if set.
fn lookup(name: &str) -> Option<(String, String)> {
    let var = format!("{ENV_PREFIX}{name}");
    env::var(&var).ok().map(|value| (var, value))
}

fn expand_home(raw: &str) -> PathBuf {
    match (raw.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(raw),
    }
}
