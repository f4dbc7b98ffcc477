const UNITS: [&str; 9] = ["Bytes", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

/// Human-readable byte count: base 1024, rounded to `decimals` places, with
/// trailing zeros dropped (`1.0 MB` prints as `1 MB`).
pub fn format_bytes(bytes: u64, decimals: u32) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut unit = 0;
    let mut threshold: u128 = 1024;
    while unit + 1 < UNITS.len() && u128::from(bytes) >= threshold {
        unit += 1;
        threshold *= 1024;
    }

    let value = bytes as f64 / 1024f64.powi(unit as i32);
    let factor = 10f64.powi(decimals as i32);
    let rounded = (value * factor).round() / factor;
    format!("{rounded} {}", UNITS[unit])
}

/// Size label as displayed: `~` marks a lower bound from a truncated listing.
pub fn format_size(bytes: u64, approximate: bool) -> String {
    let marker = if approximate { "~" } else { "" };
    format!("{marker}{}", format_bytes(bytes, 1))
}
