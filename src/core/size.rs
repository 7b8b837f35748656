//! Byte-size normalization and human-readable formatting
//!
//! Resolver endpoints report sizes inconsistently (`104857600`, `"66.78 MB"`,
//! `"1.2GB"`). Everything is normalized to integer bytes here, once, so the
//! rest of the pipeline only ever sees `u64`.

use serde_json::Value;
use std::time::Duration;

const KIB: f64 = 1024.0;

/// Normalizes a resolver-reported size to bytes.
///
/// Returns `None` when the value cannot be interpreted; callers treat that as
/// "size unknown".
pub fn parse_size(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => {
            if let Some(bytes) = n.as_u64() {
                Some(bytes)
            } else {
                n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)
            }
        }
        Value::String(s) => parse_size_str(s),
        _ => None,
    }
}

/// Parses strings such as `"66.78 MB"`, `"66.78MB"`, `"512 b"` or `"1048576"`
pub fn parse_size_str(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let split_at = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split_at);
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }

    let multiplier = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" | "BYTES" => 1.0,
        "KB" | "K" | "KIB" => KIB,
        "MB" | "M" | "MIB" => KIB * KIB,
        "GB" | "G" | "GIB" => KIB * KIB * KIB,
        "TB" | "T" | "TIB" => KIB * KIB * KIB * KIB,
        _ => return None,
    };

    Some((value * multiplier) as u64)
}

/// Formats a byte count the way status messages show it (`"66.78 MB"`)
pub fn format_size(bytes: u64) -> String {
    let b = bytes as f64;
    if b < KIB {
        format!("{bytes} B")
    } else if b < KIB * KIB {
        format!("{:.2} KB", b / KIB)
    } else if b < KIB * KIB * KIB {
        format!("{:.2} MB", b / (KIB * KIB))
    } else {
        format!("{:.2} GB", b / (KIB * KIB * KIB))
    }
}

/// Formats a rate in bytes per second (`"2.50 MB/s"`)
pub fn format_rate(bytes_per_sec: f64) -> String {
    let clamped = if bytes_per_sec.is_finite() && bytes_per_sec > 0.0 {
        bytes_per_sec as u64
    } else {
        0
    };
    format!("{}/s", format_size(clamped))
}

/// Formats a duration as `"45s"`, `"3m 5s"` or `"1h 2m 3s"`
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, rest) = (total / 3600, total % 3600);
    let (minutes, seconds) = (rest / 60, rest % 60);

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
