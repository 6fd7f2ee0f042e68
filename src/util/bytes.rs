//! Human-readable byte counts for limits in error messages and startup logs.

const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

/// Render a byte count in IEC units with at most one decimal place,
/// dropping a trailing `.0`.
pub fn format_bytes(bytes: u64) -> String {
    let mut unit = 0;
    let mut scale: u64 = 1;
    while unit < UNITS.len() - 1 && bytes / scale >= 1024 {
        scale *= 1024;
        unit += 1;
    }

    if unit == 0 {
        return format!("{bytes} {}", UNITS[0]);
    }

    let tenths = (u128::from(bytes) * 10 + u128::from(scale) / 2) / u128::from(scale);
    let (whole, fraction) = (tenths / 10, tenths % 10);
    if fraction == 0 {
        format!("{whole} {}", UNITS[unit])
    } else {
        format!("{whole}.{fraction} {}", UNITS[unit])
    }
}
