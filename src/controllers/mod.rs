//! Resource controllers: each turns a small verb set into remote commands and
//! parses the output into typed projections. None of them keep state; callers
//! re-fetch after every mutation.

pub mod cron;
pub mod docker;
pub mod firewall;
pub mod infra;
pub mod logs;
pub mod nginx;
pub mod security;
pub mod services;
pub mod users;

use crate::error::{GatewayError, GatewayResult};

pub const MAX_LOG_LINES: u32 = 5000;

/// Bounds a requested tail length.
pub fn clamp_lines(lines: Option<u32>, default: u32) -> u32 {
    lines.unwrap_or(default).clamp(1, MAX_LOG_LINES)
}

/// Splits `a|b|c` output lines, skipping lines with too few fields.
pub(crate) fn split_fields(line: &str, min_fields: usize) -> Option<Vec<&str>> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }
    let parts: Vec<&str> = line.split('|').collect();
    if parts.len() < min_fields {
        log::debug!("Skipping line with {} fields: {}", parts.len(), line);
        return None;
    }
    Some(parts)
}

/// Parses human-readable sizes such as `12.5MiB`, `1.2GB` or `512B`.
pub fn parse_size(text: &str) -> Option<u64> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: f64 = number.parse().ok()?;
    let multiplier: f64 = match unit.trim() {
        "" | "B" => 1.0,
        "kB" | "KB" | "k" | "K" => 1e3,
        "KiB" => 1024.0,
        "MB" | "M" => 1e6,
        "MiB" => 1024.0 * 1024.0,
        "GB" | "G" => 1e9,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TB" | "T" => 1e12,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some((value * multiplier).round() as u64)
}

/// Names that end up in file paths or command arguments.
pub(crate) fn validate_name(kind: &str, name: &str) -> GatewayResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && !name.starts_with('.')
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(GatewayError::ValidationFailed(format!(
            "Invalid {} name: {:?}",
            kind, name
        )))
    }
}

/// Turns "no such ..." failures into `NotFound`.
pub(crate) fn not_found_on(err: GatewayError, needles: &[&str], what: &str) -> GatewayError {
    match err {
        GatewayError::RemoteCommandFailed { ref stderr, .. }
            if needles
                .iter()
                .any(|n| stderr.to_lowercase().contains(&n.to_lowercase())) =>
        {
            GatewayError::NotFound(what.to_string())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_in_docker_units() {
        assert_eq!(parse_size("512B"), Some(512));
        assert_eq!(parse_size("1.5KiB"), Some(1536));
        assert_eq!(parse_size("12MiB"), Some(12 * 1024 * 1024));
        assert_eq!(parse_size("1.2GB"), Some(1_200_000_000));
        assert_eq!(parse_size("0B"), Some(0));
        assert_eq!(parse_size("lots"), None);
    }

    #[test]
    fn tail_length_is_bounded() {
        assert_eq!(clamp_lines(None, 100), 100);
        assert_eq!(clamp_lines(Some(0), 100), 1);
        assert_eq!(clamp_lines(Some(1_000_000), 100), MAX_LOG_LINES);
    }

    #[test]
    fn names_reject_traversal() {
        assert!(validate_name("vhost", "example.com").is_ok());
        assert!(validate_name("vhost", "../etc/passwd").is_err());
        assert!(validate_name("vhost", ".hidden").is_err());
        assert!(validate_name("vhost", "a b").is_err());
    }
}
