//! Human-friendly byte sizes for body limits ("100KB", "1.5M", "unlimited").

use crate::error::{Error, Result};

const KIB: f64 = 1024.0;

fn unit_multiplier(unit: &str) -> Option<f64> {
    match unit {
        "" | "b" => Some(1.0),
        "k" | "kb" | "kib" => Some(KIB),
        "m" | "mb" | "mib" => Some(KIB * KIB),
        "g" | "gb" | "gib" => Some(KIB * KIB * KIB),
        _ => None,
    }
}

fn split_number(raw: &str) -> (&str, &str) {
    let end = raw
        .char_indices()
        .find(|(_, ch)| !(ch.is_ascii_digit() || *ch == '.'))
        .map(|(idx, _)| idx)
        .unwrap_or(raw.len());
    (raw[..end].trim(), raw[end..].trim())
}

/// Parse a size string into a byte count. `None` means no limit.
pub fn parse_size_bytes(s: &str) -> Result<Option<usize>> {
    let raw = s.trim();
    if raw.is_empty() {
        return Err(Error::InvalidArgs("Size value cannot be empty".to_string()));
    }

    let lower = raw.to_ascii_lowercase();
    if lower == "unlimited" {
        return Ok(None);
    }

    let (number_str, unit_str) = split_number(&lower);
    if number_str.is_empty() {
        return Err(Error::InvalidArgs(format!(
            "Invalid size value '{raw}'; expected a number like '1.5MB' or '100k'",
        )));
    }

    let multiplier = unit_multiplier(unit_str).ok_or_else(|| {
        Error::InvalidArgs(format!(
            "Invalid size unit '{unit_str}'; use B, KB, MB, GB, or 'unlimited'",
        ))
    })?;

    let number: f64 = number_str
        .parse()
        .map_err(|_| Error::InvalidArgs(format!("Invalid size value '{raw}'")))?;

    let bytes = number * multiplier;
    if !bytes.is_finite() || bytes > usize::MAX as f64 {
        return Err(Error::InvalidArgs(format!("Size value '{raw}' is too large")));
    }

    Ok(Some(bytes.round() as usize))
}
