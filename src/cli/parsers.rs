//! Shared CLI argument parsers.

use std::time::Duration;

/// Parse a duration string (e.g., "30s", "5m", "1h").
pub fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

/// Host port argument; `None` lets the engine assign one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostPort(pub Option<u16>);

/// Parse a host port; `auto` (or `0`) lets the engine assign one.
pub fn parse_host_port(s: &str) -> Result<HostPort, String> {
    if s.eq_ignore_ascii_case("auto") {
        return Ok(HostPort(None));
    }
    match s.parse::<u16>() {
        Ok(0) => Ok(HostPort(None)),
        Ok(port) => Ok(HostPort(Some(port))),
        Err(_) => Err(format!("invalid port: {} (expected 1-65535 or 'auto')", s)),
    }
}

/// Map the `-v` count to a log level directive.
pub fn verbosity_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "error",
        1 => "warn",
        2 => "info",
        _ => "debug",
    }
}
