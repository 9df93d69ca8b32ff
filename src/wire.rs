//! Codecs for the textual robot wire strings
//!
//! Robot links report joint state and device info as `key:value` pairs
//! joined by `/` (e.g. `1:0.5/2:-0.2`). Decoding preserves pair order
//! because telemetry frames interleave ids and values in that order.

use crate::{Result, TeleoError};

/// Formatting for published joint values: fixed decimal places, taken
/// from the publishing config (two by default).
pub fn format_joint_value(value: f64, decimal_places: u32) -> String {
    format!("{:.1$}", value, decimal_places as usize)
}

/// Decode a joint state string into ordered (joint id, value) pairs.
pub fn decode_joints(raw: &str) -> Result<Vec<(String, f64)>> {
    let mut joints = Vec::new();
    for part in raw.split('/').filter(|p| !p.is_empty()) {
        let (id, value) = part
            .split_once(':')
            .ok_or_else(|| TeleoError::Link(format!("Malformed joint entry: {}", part)))?;
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|_| TeleoError::Link(format!("Malformed joint value: {}", part)))?;
        joints.push((id.trim().to_string(), value));
    }
    Ok(joints)
}

/// Decode a robot info string into ordered (field, value) pairs.
///
/// Info strings use the same `key:value` framing as joint state but
/// values stay textual (model names, firmware revisions).
pub fn decode_info(raw: &str) -> Vec<(String, String)> {
    raw.split('/')
        .filter(|p| !p.is_empty())
        .map(|part| match part.split_once(':') {
            Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
            None => (part.trim().to_string(), String::new()),
        })
        .collect()
}

/// Render a discovery or connection listing as the `/`-delimited display
/// string (`/a/b/`). An empty list renders as `/`.
pub fn display_string<I, S>(entries: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::from("/");
    for entry in entries {
        out.push_str(entry.as_ref());
        out.push('/');
    }
    out
}
