//! Binary-safe log output.

/// Bytes rendered per field before truncating.
pub const MAX_LOG_BYTES: usize = 128;

/// Log binary fields as hex at DEBUG level.
///
/// Formatting only happens when DEBUG is enabled for the current span, so
/// callers can pass large buffers without cost.
pub fn log_binary(message: &str, fields: &[(&str, &[u8])]) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }

    let rendered = fields
        .iter()
        .map(|(label, data)| format!("{}={}", label, hex_preview(data, MAX_LOG_BYTES)))
        .collect::<Vec<_>>()
        .join(", ");
    tracing::debug!("{} ({})", message, rendered);
}

/// Hex-encode at most `limit` bytes, noting the full length when cut.
pub fn hex_preview(data: &[u8], limit: usize) -> String {
    if data.len() <= limit {
        hex::encode(data)
    } else {
        format!("{}...({} bytes)", hex::encode(&data[..limit]), data.len())
    }
}
